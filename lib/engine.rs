//! Evolution of Fock states through circuits via permanents, including
//! ensembles of partially distinguishable photons.

use indexmap::{ IndexMap, IndexSet };
use itertools::Itertools;
use ndarray as nd;
use num_complex::Complex64 as C64;
use rayon::prelude::*;
use rustc_hash::FxHashMap as HashMap;
use crate::{
    circuit::{ Circuit, PhotonBunch },
    config::{ MAX_DECOMPOSITION_PAIRS, SimConfig },
    density::DensityMatrix,
    error::{ NumericalWarning, SimError, SimResult },
    fock::{ FockState, Occupation, all_occupations, binary_occupations },
    outcome::{ BinLayout, OutcomeBins },
    permanent::permanent,
};

/// Overlaps within this distance of 0 or 1 are treated as exact.
const OVERLAP_EXACT: f64 = 1e-10;

/// Number of chunks the distinguishability decomposition is split into.
const DECOMPOSITION_CHUNKS: u64 = 64;

/// Output kets to compute amplitudes for.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum OutputSet {
    /// Every ket with the input photon number.
    #[default]
    All,
    /// Every ket with the input photon number and at most one photon per mode.
    Restricted,
    /// An explicit list; kets with a different photon number than the input
    /// are skipped.
    Explicit(Vec<Occupation>),
}

impl OutputSet {
    /// List the output kets for `nphotons` photons over `nmodes` modes.
    pub fn occupations(&self, nmodes: usize, nphotons: usize)
        -> SimResult<Vec<Occupation>>
    {
        match self {
            Self::All => Ok(all_occupations(nmodes, nphotons)),
            Self::Restricted => Ok(binary_occupations(nmodes, nphotons)),
            Self::Explicit(list) => {
                if let Some(bad) = list.iter().find(|o| o.num_modes() != nmodes) {
                    return Err(SimError::config(format!(
                        "output ket has {} modes but the circuit has {}",
                        bad.num_modes(), nmodes,
                    )));
                }
                Ok(
                    list.iter()
                        .filter(|o| o.total() == nphotons)
                        .cloned()
                        .collect()
                )
            },
        }
    }

    /// Return `true` if `occ` belongs to the set.
    pub fn contains(&self, occ: &Occupation) -> bool {
        match self {
            Self::All => true,
            Self::Restricted => occ.is_binary(),
            Self::Explicit(list) => list.contains(occ),
        }
    }
}

/// A transition amplitude with an optional precision warning.
#[derive(Clone, Debug, PartialEq)]
pub struct Amplitude {
    pub value: C64,
    pub warning: Option<NumericalWarning>,
}

/// Compute `<output| U |input>` for a transfer matrix `U` indexed as
/// `[output mode, input mode]`.
///
/// Fails fast with [`SimError::PhotonNumberMismatch`] when the photon numbers
/// differ.
pub fn transition_amplitude(
    matrix: &nd::Array2<C64>,
    input: &Occupation,
    output: &Occupation,
    config: &SimConfig,
) -> SimResult<Amplitude>
{
    let nmodes = matrix.nrows();
    for occ in [input, output] {
        if occ.num_modes() != nmodes {
            return Err(SimError::config(format!(
                "ket has {} modes but the transfer matrix has {}",
                occ.num_modes(), nmodes,
            )));
        }
    }
    let n = input.total();
    if output.total() != n {
        return Err(SimError::PhotonNumberMismatch {
            input: n,
            output: output.total(),
        });
    }
    let rows = output.photon_modes();
    let cols = input.photon_modes();
    let sub: nd::Array2<C64>
        = nd::Array2::from_shape_fn((n, n), |(r, c)| matrix[[rows[r], cols[c]]]);
    let perm = permanent(&sub, config.method, config.parallel_threshold);
    let norm = (input.factorial_prod() * output.factorial_prod()).sqrt();
    let error_estimate = perm.error_estimate(n) / norm;
    let warning
        = (error_estimate > config.cancellation_tol).then(|| {
            tracing::warn!(
                ?input,
                ?output,
                error_estimate,
                magnitude = perm.magnitude,
                "permanent lost precision to cancellation",
            );
            NumericalWarning {
                input: input.clone(),
                output: output.clone(),
                error_estimate,
                magnitude: perm.magnitude,
            }
        });
    Ok(Amplitude { value: perm.value / norm, warning })
}

/// Output of a coherent simulation.
#[derive(Clone, Debug)]
pub struct Evolved {
    pub state: FockState,
    pub warnings: Vec<NumericalWarning>,
}

/// Output of a simulation with partially distinguishable photons.
#[derive(Clone, Debug)]
pub struct Mixed {
    pub density: DensityMatrix,
    pub warnings: Vec<NumericalWarning>,
    /// Number of distinct groupings of photons into mutually interfering sets.
    pub cases: usize,
}

/// Output of a simulation followed by detection.
#[derive(Clone, Debug)]
pub struct Measured {
    pub bins: OutcomeBins,
    pub warnings: Vec<NumericalWarning>,
}

/// Groupings of photons into interfering sets, with their probabilities.
type Partitions = Vec<(Vec<Vec<usize>>, f64)>;

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// Canonical group labels: photons are labeled by the order in which their
/// group is first encountered.
fn labels(parent: &mut [usize]) -> Vec<usize> {
    let n = parent.len();
    let mut seen: Vec<usize> = Vec::new();
    (0..n)
        .map(|i| {
            let root = find(parent, i);
            match seen.iter().position(|r| *r == root) {
                Some(k) => k,
                None => { seen.push(root); seen.len() - 1 },
            }
        })
        .collect()
}

/// Enumerate every choice of interfering/non-interfering for each uncertain
/// pair, closing links transitively, and accumulate the probability of each
/// resulting partition.
fn decompose(
    n: usize,
    links: &[(usize, usize)],
    uncertain: &[(usize, usize, f64)],
) -> SimResult<Partitions>
{
    let total: u64
        = u32::try_from(uncertain.len()).ok()
        .and_then(|k| 1_u64.checked_shl(k))
        .filter(|_| uncertain.len() <= MAX_DECOMPOSITION_PAIRS)
        .ok_or(SimError::DecompositionLimit {
            pairs: uncertain.len(),
            max: MAX_DECOMPOSITION_PAIRS,
        })?;
    let nchunks = DECOMPOSITION_CHUNKS.min(total);
    let size = total.div_ceil(nchunks);
    let chunks: Vec<HashMap<Vec<usize>, f64>>
        = (0..nchunks).into_par_iter()
        .map(|c| {
            let mut acc: HashMap<Vec<usize>, f64> = HashMap::default();
            for bits in c * size..((c + 1) * size).min(total) {
                let mut parent: Vec<usize> = (0..n).collect();
                let mut weight: f64 = 1.0;
                for (a, b) in links.iter() {
                    let (ra, rb) = (find(&mut parent, *a), find(&mut parent, *b));
                    parent[ra] = rb;
                }
                for (k, (a, b, v)) in uncertain.iter().enumerate() {
                    if bits & (1 << k) != 0 {
                        weight *= v;
                        let (ra, rb)
                            = (find(&mut parent, *a), find(&mut parent, *b));
                        parent[ra] = rb;
                    } else {
                        weight *= 1.0 - v;
                    }
                }
                *acc.entry(labels(&mut parent)).or_insert(0.0) += weight;
            }
            acc
        })
        .collect();
    let mut merged: HashMap<Vec<usize>, f64> = HashMap::default();
    for chunk in chunks.into_iter() {
        let mut entries: Vec<(Vec<usize>, f64)> = chunk.into_iter().collect();
        entries.sort_by(|l, r| l.0.cmp(&r.0));
        for (lab, w) in entries.into_iter() {
            *merged.entry(lab).or_insert(0.0) += w;
        }
    }
    let mut partitions: Vec<(Vec<usize>, f64)> = merged.into_iter().collect();
    partitions.sort_by(|l, r| l.0.cmp(&r.0));
    let partitions: Partitions
        = partitions.into_iter()
        .map(|(lab, w)| {
            let ngroups = lab.iter().max().map(|m| m + 1).unwrap_or(0);
            let groups: Vec<Vec<usize>>
                = (0..ngroups)
                .map(|g| (0..n).filter(|i| lab[*i] == g).collect())
                .collect();
            (groups, w)
        })
        .collect();
    Ok(partitions)
}

/// Group label of every photon in a joint ket of distinguishable groups,
/// listed in mode order.
///
/// Two joint kets are coherent only if these sequences agree; otherwise the
/// internal states of the groups tell them apart.
fn label_sequence(kets: &[&Occupation]) -> Vec<usize> {
    let nmodes = kets.first().map(|occ| occ.num_modes()).unwrap_or(0);
    let mut seq: Vec<usize> = Vec::new();
    for m in 0..nmodes {
        for (g, occ) in kets.iter().enumerate() {
            seq.extend(std::iter::repeat(g).take(occ[m]));
        }
    }
    seq
}

/// Runs simulations under a fixed [`SimConfig`].
#[derive(Clone, Debug, Default)]
pub struct Simulator {
    config: SimConfig,
}

impl Simulator {
    /// Create a new simulator.
    pub fn new(config: SimConfig) -> Self { Self { config } }

    pub fn config(&self) -> &SimConfig { &self.config }

    /// Compute a single transition amplitude through a circuit.
    pub fn amplitude(
        &self,
        circuit: &Circuit,
        input: &Occupation,
        output: &Occupation,
    ) -> SimResult<Amplitude>
    {
        transition_amplitude(circuit.matrix(), input, output, &self.config)
    }

    fn check_input(&self, circuit: &Circuit, input: &FockState)
        -> SimResult<()>
    {
        if input.num_modes() != circuit.num_modes() {
            return Err(SimError::config(format!(
                "input state has {} modes but the circuit has {}",
                input.num_modes(), circuit.num_modes(),
            )));
        }
        let nphys = circuit.modes().num_physical_modes();
        let in_loss
            = input.keys().any(|occ| occ[nphys..].iter().any(|n| *n > 0));
        if in_loss {
            return Err(SimError::config("input state occupies loss modes"));
        }
        Ok(())
    }

    /// Evolve a coherent superposition of Fock kets through a circuit.
    ///
    /// All photons are treated as indistinguishable. Output amplitudes below
    /// the configured cutoff are dropped.
    #[tracing::instrument(level = "debug", skip_all, fields(terms = input.len()))]
    pub fn run(&self, circuit: &Circuit, input: &FockState, outputs: &OutputSet)
        -> SimResult<Evolved>
    {
        self.check_input(circuit, input)?;
        let nmodes = circuit.num_modes();
        let matrix = circuit.matrix();
        let mut state = FockState::new(nmodes);
        let mut warnings: Vec<NumericalWarning> = Vec::new();
        let mut out_sets: HashMap<usize, Vec<Occupation>> = HashMap::default();
        for (occ_in, a_in) in input.iter() {
            let n = occ_in.total();
            if !out_sets.contains_key(&n) {
                out_sets.insert(n, outputs.occupations(nmodes, n)?);
            }
            let outs = &out_sets[&n];
            let amps: Vec<Amplitude>
                = outs.par_iter()
                .map(|occ_out| {
                    transition_amplitude(matrix, occ_in, occ_out, &self.config)
                })
                .collect::<SimResult<_>>()?;
            for (occ_out, amp) in outs.iter().zip(amps) {
                state.add_term(*a_in * amp.value, occ_out.clone())?;
                warnings.extend(amp.warning);
            }
        }
        state.prune(self.config.amplitude_cutoff);
        tracing::debug!(outputs = state.len(), warnings = warnings.len());
        Ok(Evolved { state, warnings })
    }

    /// Simulate a bunch of partially distinguishable photons.
    ///
    /// Each photon pair interferes with probability equal to its packet
    /// overlap. Every grouping of photons into interfering sets is enumerated
    /// with its probability. A single group contributes its output state
    /// coherently. With several groups, the joint kets built from the groups'
    /// output states stay coherent with each other as long as they place the
    /// groups' photons in the same order across the modes.
    #[tracing::instrument(level = "debug", skip_all, fields(photons = bunch.len()))]
    pub fn run_bunch(&self, bunch: &PhotonBunch, outputs: &OutputSet)
        -> SimResult<Mixed>
    {
        let circuit = bunch.circuit();
        let nmodes = circuit.num_modes();
        let n = bunch.len();
        let ov = bunch.overlaps()?;
        let mut links: Vec<(usize, usize)> = Vec::new();
        let mut uncertain: Vec<(usize, usize, f64)> = Vec::new();
        for i in 0..n {
            for j in i + 1..n {
                let v = ov[[i, j]];
                if v >= 1.0 - OVERLAP_EXACT {
                    links.push((i, j));
                } else if v > OVERLAP_EXACT {
                    uncertain.push((i, j, v));
                }
            }
        }
        let max_pairs
            = self.config.max_decomposition_pairs.min(MAX_DECOMPOSITION_PAIRS);
        if uncertain.len() > max_pairs {
            return Err(SimError::DecompositionLimit {
                pairs: uncertain.len(),
                max: max_pairs,
            });
        }
        let partitions = decompose(n, &links, &uncertain)?;
        let total_weight: f64 = partitions.iter().map(|(_, w)| *w).sum();
        if (total_weight - 1.0).abs() > 1e-9 {
            return Err(SimError::InternalConsistency(format!(
                "decomposition weights sum to {}", total_weight)));
        }
        tracing::debug!(
            uncertain_pairs = uncertain.len(),
            cases = partitions.len(),
            "decomposed photon bunch",
        );

        // independent groups are computed once each
        let group_outputs = match outputs {
            OutputSet::Restricted => OutputSet::Restricted,
            _ => OutputSet::All,
        };
        let mut groups: IndexSet<Occupation> = IndexSet::new();
        for (parts, _) in partitions.iter().filter(|(p, _)| p.len() > 1) {
            for group in parts.iter() {
                groups.insert(bunch.group_occupation(group)?);
            }
        }
        let evolved: Vec<Evolved>
            = (0..groups.len()).into_par_iter()
            .map(|k| {
                let input = FockState::from_occupation(groups[k].clone());
                self.run(circuit, &input, &group_outputs)
            })
            .collect::<SimResult<_>>()?;

        let mut density = DensityMatrix::new(nmodes);
        let mut warnings: Vec<NumericalWarning> = Vec::new();
        evolved.iter().for_each(|ev| warnings.extend(ev.warnings.iter().cloned()));
        for (parts, weight) in partitions.iter() {
            if parts.len() == 1 {
                let input = FockState::from_occupation(bunch.group_occupation(&parts[0])?);
                let evolved = self.run(circuit, &input, outputs)?;
                density.add_state(&evolved.state, *weight)?;
                warnings.extend(evolved.warnings);
                continue;
            }
            let states: Vec<&FockState>
                = parts.iter()
                .map(|group| {
                    let occ = bunch.group_occupation(group)?;
                    groups.get_index_of(&occ)
                        .map(|idx| &evolved[idx].state)
                        .ok_or_else(|| SimError::InternalConsistency(
                            "missing group output state".into()))
                })
                .collect::<SimResult<_>>()?;
            let mut branches: IndexMap<Vec<usize>, FockState> = IndexMap::new();
            for terms in states.iter().map(|st| st.iter()).multi_cartesian_product() {
                let kets: Vec<&Occupation>
                    = terms.iter().map(|(occ, _)| *occ).collect();
                let occ
                    = kets.iter()
                    .fold(Occupation::vacuum(nmodes), |acc, ket| acc.add(ket));
                if !outputs.contains(&occ) { continue; }
                let ampl: C64 = terms.iter().map(|(_, a)| **a).product();
                branches.entry(label_sequence(&kets))
                    .or_insert_with(|| FockState::new(nmodes))
                    .add_term(ampl, occ)?;
            }
            for branch in branches.values() {
                density.add_state(branch, *weight)?;
            }
        }
        Ok(Mixed { density, warnings, cases: partitions.len() })
    }

    /// Simulate a bunch and apply the circuit's detectors.
    pub fn measure(&self, bunch: &PhotonBunch) -> SimResult<Measured> {
        let circuit = bunch.circuit();
        let Mixed { density, warnings, .. }
            = self.run_bunch(bunch, &OutputSet::All)?;
        let bins
            = OutcomeBins::from_density(&density, BinLayout::full(circuit.modes()))?
            .calc_measure(circuit, &self.config)?;
        Ok(Measured { bins, warnings })
    }
}
