//! Detector-click statistics.
//!
//! [`OutcomeBins`] map occupation vectors over a [`BinLayout`] to
//! probabilities (or raw counts). [`OutcomeBins::calc_measure`] turns the
//! populations of a simulated state into what the circuit's detectors would
//! report.

use std::ops::Deref;
use indexmap::IndexMap;
use rand::Rng;
use rand_distr::{ Distribution, Normal };
use crate::{
    circuit::{ Circuit, Condition, ModeSpace, TimeResolution },
    config::SimConfig,
    density::DensityMatrix,
    error::{ SimError, SimResult },
    fock::{ FockState, Occupation },
};

/* Layouts ********************************************************************/

/// The modes an outcome key refers to: a list of channels, each with `pols`
/// polarizations and `slots` time bins, flattened in the same order as a
/// [`ModeSpace`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BinLayout {
    channels: Vec<usize>,
    pols: usize,
    slots: usize,
}

impl BinLayout {
    pub fn new(channels: Vec<usize>, pols: usize, slots: usize) -> Self {
        Self { channels, pols, slots }
    }

    /// Every mode of a mode space, loss channels included.
    pub fn full(modes: &ModeSpace) -> Self {
        Self {
            channels: (0..modes.total_channels()).collect(),
            pols: modes.pols(),
            slots: modes.slots(),
        }
    }

    /// Layout of measurement results for a circuit: physical channels that
    /// are not ignored, with time bins reported per its time resolution.
    pub fn measured(circuit: &Circuit) -> Self {
        let modes = circuit.modes();
        Self {
            channels: (0..modes.channels())
                .filter(|ch| !circuit.ignored().contains(ch))
                .collect(),
            pols: modes.pols(),
            slots: circuit.time_resolution().reported_slots(modes.slots()),
        }
    }

    pub fn channels(&self) -> &[usize] { &self.channels }

    pub fn pols(&self) -> usize { self.pols }

    pub fn slots(&self) -> usize { self.slots }

    pub fn num_modes(&self) -> usize {
        self.channels.len() * self.pols * self.slots
    }

    /// Position of a channel in the layout.
    pub fn position(&self, channel: usize) -> Option<usize> {
        self.channels.iter().position(|ch| *ch == channel)
    }

    /// Key index of `(position, pol, slot)`.
    pub fn index(&self, pos: usize, pol: usize, slot: usize) -> usize {
        (pos * self.pols + pol) * self.slots + slot
    }

    fn channel_range(&self, pos: usize) -> std::ops::Range<usize> {
        let n = self.pols * self.slots;
        pos * n..(pos + 1) * n
    }

    /// Total number of photons in a channel, if it is part of the layout.
    pub fn channel_count(&self, occ: &Occupation, channel: usize)
        -> Option<usize>
    {
        self.position(channel)
            .map(|pos| occ[self.channel_range(pos)].iter().sum())
    }

    /// Restrict to the listed channels, returning the new layout and the key
    /// indices it keeps.
    pub(crate) fn keep_channels(&self, keep: &[usize]) -> (Self, Vec<usize>) {
        let kept: Vec<(usize, usize)>
            = self.channels.iter().copied().enumerate()
            .filter(|(_, ch)| keep.contains(ch))
            .collect();
        let modes: Vec<usize>
            = kept.iter()
            .flat_map(|(pos, _)| self.channel_range(*pos))
            .collect();
        let layout = Self {
            channels: kept.into_iter().map(|(_, ch)| ch).collect(),
            pols: self.pols,
            slots: self.slots,
        };
        (layout, modes)
    }

    /// Layout after coarse-graining time bins.
    pub(crate) fn collapse(&self, resolution: TimeResolution) -> Self {
        Self {
            channels: self.channels.clone(),
            pols: self.pols,
            slots: resolution.reported_slots(self.slots),
        }
    }

    /// Coarse-grain the time bins of a key, returning the new key and the
    /// histogram of discarded time labels.
    pub(crate) fn collapse_slots(
        &self,
        occ: &Occupation,
        resolution: TimeResolution,
    ) -> (Occupation, Vec<usize>)
    {
        let collapsed = self.collapse(resolution);
        let nlabels = match resolution {
            TimeResolution::Full => 1,
            TimeResolution::Counter => self.slots,
            TimeResolution::Period(p) => p,
        };
        let mut key = vec![0; collapsed.num_modes()];
        let mut hist = vec![0; nlabels];
        for pos in 0..self.channels.len() {
            for pol in 0..self.pols {
                for slot in 0..self.slots {
                    let n = occ[self.index(pos, pol, slot)];
                    key[collapsed.index(pos, pol, resolution.reported_slot(slot))] += n;
                    hist[resolution.traced_slot(slot)] += n;
                }
            }
        }
        (key.into(), hist)
    }
}

/* Bins ***********************************************************************/

fn binomial(n: usize, k: usize) -> f64 {
    (0..k).fold(1.0, |acc, i| acc * (n - i) as f64 / (i + 1) as f64)
}

/// Poisson click distribution truncated at `cutoff`, with the remaining
/// probability assigned to `cutoff` itself.
fn poisson_truncated(rate: f64, cutoff: usize) -> Vec<f64> {
    let mut probs: Vec<f64> = Vec::with_capacity(cutoff + 1);
    let mut p = (-rate).exp();
    for k in 0..cutoff {
        probs.push(p);
        p *= rate / (k + 1) as f64;
    }
    let tail = 1.0 - probs.iter().sum::<f64>();
    probs.push(tail.max(0.0));
    probs
}

/// A distribution of detection outcomes.
///
/// This collection is backed by a single [`IndexMap`], which can be read via
/// [`AsRef`] and [`Deref`].
#[derive(Clone, Debug, PartialEq)]
pub struct OutcomeBins {
    layout: BinLayout,
    probs: IndexMap<Occupation, f64>,
}

impl AsRef<IndexMap<Occupation, f64>> for OutcomeBins {
    fn as_ref(&self) -> &IndexMap<Occupation, f64> { &self.probs }
}

impl Deref for OutcomeBins {
    type Target = IndexMap<Occupation, f64>;

    fn deref(&self) -> &Self::Target { &self.probs }
}

impl OutcomeBins {
    /// Create a new, empty set of bins.
    pub fn new(layout: BinLayout) -> Self {
        Self { layout, probs: IndexMap::new() }
    }

    fn check_modes(&self, nmodes: usize) -> SimResult<()> {
        if nmodes != self.layout.num_modes() {
            return Err(SimError::config(format!(
                "keys have {} modes but the layout has {}",
                nmodes, self.layout.num_modes(),
            )));
        }
        Ok(())
    }

    /// Bins holding the squared amplitudes of a state.
    pub fn from_state(state: &FockState, layout: BinLayout) -> SimResult<Self> {
        let mut bins = Self::new(layout);
        bins.check_modes(state.num_modes())?;
        for (occ, a) in state.iter() {
            bins.add_prob(occ.clone(), a.norm_sqr())?;
        }
        Ok(bins)
    }

    /// Bins holding the populations of a density matrix.
    pub fn from_density(rho: &DensityMatrix, layout: BinLayout)
        -> SimResult<Self>
    {
        let mut bins = Self::new(layout);
        bins.check_modes(rho.num_modes())?;
        for (occ, p) in rho.populations() {
            bins.add_prob(occ.clone(), p)?;
        }
        Ok(bins)
    }

    pub fn layout(&self) -> &BinLayout { &self.layout }

    /// Add probability `p` to a key.
    pub fn add_prob(&mut self, occ: Occupation, p: f64) -> SimResult<()> {
        self.check_modes(occ.num_modes())?;
        *self.probs.entry(occ).or_insert(0.0) += p;
        Ok(())
    }

    /// Record a single observed outcome.
    pub fn add_count(&mut self, occ: Occupation) -> SimResult<()> {
        self.add_prob(occ, 1.0)
    }

    /// Probability of a key, zero if absent.
    pub fn prob(&self, occ: &Occupation) -> f64 {
        self.probs.get(occ).copied().unwrap_or(0.0)
    }

    fn check_conditions(&self, conditions: &[(usize, Condition)])
        -> SimResult<()>
    {
        for (ch, _) in conditions.iter() {
            if self.layout.position(*ch).is_none() {
                return Err(SimError::index(
                    "channel", *ch, self.layout.channels().len()));
            }
        }
        Ok(())
    }

    fn satisfies(&self, occ: &Occupation, conditions: &[(usize, Condition)])
        -> bool
    {
        conditions.iter().all(|(ch, cond)| {
            self.layout.channel_count(occ, *ch).is_some_and(|n| cond.holds(n))
        })
    }

    /// Total probability of all keys satisfying every `(channel, condition)`.
    pub fn prob_where(&self, conditions: &[(usize, Condition)])
        -> SimResult<f64>
    {
        self.check_conditions(conditions)?;
        Ok(
            self.probs.iter()
                .filter(|(occ, _)| self.satisfies(occ, conditions))
                .map(|(_, p)| *p)
                .sum()
        )
    }

    pub fn trace(&self) -> f64 { self.probs.values().sum() }

    /// Rescale to unit total probability.
    pub fn normalize(&mut self) -> SimResult<()> {
        let tr = self.trace();
        if tr <= 0.0 { return Err(SimError::ZeroNorm); }
        self.probs.values_mut().for_each(|p| { *p /= tr; });
        Ok(())
    }

    /// All bins by descending probability.
    pub fn sorted(&self) -> Vec<(&Occupation, f64)> {
        let mut bins: Vec<(&Occupation, f64)>
            = self.probs.iter().map(|(occ, p)| (occ, *p)).collect();
        bins.sort_by(|(occ_l, l), (occ_r, r)| {
            r.total_cmp(l).then_with(|| occ_l.cmp(occ_r))
        });
        bins
    }

    /// Keep only keys satisfying every condition and renormalize.
    ///
    /// Fails with [`SimError::EmptyEnsemble`] if no probability remains.
    pub fn post_select(&self, conditions: &[(usize, Condition)])
        -> SimResult<Self>
    {
        self.check_conditions(conditions)?;
        let probs: IndexMap<Occupation, f64>
            = self.probs.iter()
            .filter(|(occ, p)| **p > 0.0 && self.satisfies(occ, conditions))
            .map(|(occ, p)| (occ.clone(), *p))
            .collect();
        let mut new = Self { layout: self.layout.clone(), probs };
        if new.trace() <= 0.0 { return Err(SimError::EmptyEnsemble); }
        new.normalize()?;
        Ok(new)
    }

    /// Add Gaussian noise with standard deviation `stddev` to every bin,
    /// clamping at zero. The result is not renormalized.
    pub fn white_noise<R>(&self, stddev: f64, rng: &mut R) -> SimResult<Self>
    where R: Rng + ?Sized
    {
        let normal = Normal::new(0.0, stddev)
            .map_err(|e| SimError::config(format!("white noise: {}", e)))?;
        let probs: IndexMap<Occupation, f64>
            = self.probs.iter()
            .map(|(occ, p)| (occ.clone(), (p + normal.sample(rng)).max(0.0)))
            .collect();
        Ok(Self { layout: self.layout.clone(), probs })
    }

    /// Replace every key by a distribution over new keys.
    fn branch<F>(&self, layout: BinLayout, f: F) -> Self
    where F: Fn(&Occupation) -> Vec<(Occupation, f64)>
    {
        let mut probs: IndexMap<Occupation, f64> = IndexMap::new();
        for (occ, p) in self.probs.iter() {
            for (new, w) in f(occ).into_iter() {
                if w > 0.0 { *probs.entry(new).or_insert(0.0) += p * w; }
            }
        }
        Self { layout, probs }
    }

    /// Binomial thinning of each detector channel's photons.
    fn apply_efficiency(&self, circuit: &Circuit) -> Self {
        let lossy: Vec<(Vec<usize>, f64)>
            = circuit.detectors().iter()
            .filter(|(_, det)| det.efficiency < 1.0)
            .filter_map(|(ch, det)| {
                self.layout.position(*ch)
                    .map(|pos| (self.layout.channel_range(pos).collect(), det.efficiency))
            })
            .collect();
        if lossy.is_empty() { return self.clone(); }
        self.branch(self.layout.clone(), |occ| {
            let mut cur: Vec<(Occupation, f64)> = vec![(occ.clone(), 1.0)];
            for (modes, eff) in lossy.iter() {
                for &m in modes.iter() {
                    let n = occ[m];
                    if n == 0 { continue; }
                    cur = cur.into_iter()
                        .flat_map(|(o, w)| {
                            (0..=n).map(move |k| {
                                let mut new = o.clone().into_inner();
                                new[m] = k;
                                let pk = binomial(n, k) * eff.powi(k as i32)
                                    * (1.0 - eff).powi((n - k) as i32);
                                (Occupation::from(new), w * pk)
                            })
                        })
                        .collect();
                }
            }
            cur
        })
    }

    /// Poisson dark clicks on each detector channel, registered in its first
    /// polarization and time bin.
    fn apply_dark_counts(&self, circuit: &Circuit, cutoff: usize) -> Self {
        let dark: Vec<(usize, Vec<f64>)>
            = circuit.detectors().iter()
            .filter(|(_, det)| det.dark_rate > 0.0)
            .filter_map(|(ch, det)| {
                self.layout.position(*ch)
                    .map(|pos| {
                        (self.layout.index(pos, 0, 0),
                            poisson_truncated(det.dark_rate, cutoff))
                    })
            })
            .collect();
        if dark.is_empty() { return self.clone(); }
        self.branch(self.layout.clone(), |occ| {
            let mut cur: Vec<(Occupation, f64)> = vec![(occ.clone(), 1.0)];
            for (m, probs) in dark.iter() {
                cur = cur.into_iter()
                    .flat_map(|(o, w)| {
                        probs.iter().enumerate().map(move |(k, pk)| {
                            let mut new = o.clone().into_inner();
                            new[*m] += k;
                            (Occupation::from(new), w * pk)
                        })
                    })
                    .collect();
            }
            cur
        })
    }

    /// Detector channels go blind independently in each time bin.
    fn apply_blinking(&self, circuit: &Circuit) -> Self {
        let blinking: Vec<(usize, f64)>
            = circuit.detectors().iter()
            .filter(|(_, det)| det.blink > 0.0)
            .filter_map(|(ch, det)| {
                self.layout.position(*ch).map(|pos| (pos, det.blink))
            })
            .collect();
        if blinking.is_empty() { return self.clone(); }
        let layout = &self.layout;
        self.branch(layout.clone(), |occ| {
            let mut cur: Vec<(Occupation, f64)> = vec![(occ.clone(), 1.0)];
            for &(pos, b) in blinking.iter() {
                for slot in 0..layout.slots() {
                    let modes: Vec<usize>
                        = (0..layout.pols())
                        .map(|pol| layout.index(pos, pol, slot))
                        .collect();
                    if modes.iter().all(|m| occ[*m] == 0) { continue; }
                    cur = cur.into_iter()
                        .flat_map(|(o, w)| {
                            let mut blind = o.clone().into_inner();
                            modes.iter().for_each(|m| { blind[*m] = 0; });
                            [(o, w * (1.0 - b)), (Occupation::from(blind), w * b)]
                        })
                        .collect();
                }
            }
            cur
        })
    }

    /// Marginalize onto a subset of channels.
    fn keep_channels(&self, keep: &[usize]) -> Self {
        let (layout, modes) = self.layout.keep_channels(keep);
        self.branch(layout, |occ| {
            vec![(modes.iter().map(|m| occ[*m]).collect(), 1.0)]
        })
    }

    fn collapse_time(&self, resolution: TimeResolution) -> Self {
        let layout = self.layout.collapse(resolution);
        self.branch(layout, |occ| {
            vec![(self.layout.collapse_slots(occ, resolution).0, 1.0)]
        })
    }

    /// Apply a circuit's detectors to bins over its full mode space.
    ///
    /// In order: detector efficiency, dark counts, blinking, removal of loss
    /// and ignored channels, post-selection with renormalization, and
    /// coarse-graining of time bins. The result is over
    /// [`BinLayout::measured`].
    #[tracing::instrument(level = "debug", skip_all, fields(bins = self.len()))]
    pub fn calc_measure(&self, circuit: &Circuit, config: &SimConfig)
        -> SimResult<Self>
    {
        let full = BinLayout::full(circuit.modes());
        if self.layout != full {
            return Err(SimError::config(
                "detection must start from bins over the circuit's full mode \
                space"));
        }
        let detected = self.apply_efficiency(circuit)
            .apply_dark_counts(circuit, config.dark_count_cutoff)
            .apply_blinking(circuit);
        let keep: Vec<usize>
            = (0..circuit.modes().channels())
            .filter(|ch| !circuit.ignored().contains(ch))
            .collect();
        let kept = detected.keep_channels(&keep);
        let conditions = circuit.conditions();
        let selected
            = if conditions.is_empty() {
                kept
            } else {
                kept.post_select(&conditions)?
            };
        let resolution = circuit.time_resolution();
        let measured
            = if resolution == TimeResolution::Full {
                selected
            } else {
                selected.collapse_time(resolution)
            };
        tracing::debug!(bins = measured.len(), trace = measured.trace());
        Ok(measured)
    }
}

#[cfg(test)]
mod test {
    use approx::assert_abs_diff_eq;
    use rand::{ SeedableRng, rngs::StdRng };
    use num_complex::Complex64 as C64;
    use crate::circuit::{ CircuitBuilder, Detector };
    use super::*;

    fn single_photon_bins(circuit: &Circuit, mode: usize) -> OutcomeBins {
        let mut occ = vec![0; circuit.num_modes()];
        occ[mode] = 1;
        let mut bins = OutcomeBins::new(BinLayout::full(circuit.modes()));
        bins.add_prob(occ.into(), 1.0).unwrap();
        bins
    }

    #[test]
    fn efficiency_thins_clicks() {
        let mut builder = CircuitBuilder::new(ModeSpace::simple(2).unwrap());
        builder.detector_with(0, Detector::new().with_efficiency(0.8)).unwrap();
        let circuit = builder.build().unwrap();
        let bins = single_photon_bins(&circuit, 0)
            .calc_measure(&circuit, &SimConfig::default()).unwrap();
        assert_abs_diff_eq!(bins.prob(&[1, 0].into()), 0.8, epsilon = 1e-12);
        assert_abs_diff_eq!(bins.prob(&[0, 0].into()), 0.2, epsilon = 1e-12);
    }

    #[test]
    fn dark_counts_are_poissonian() {
        let mut builder = CircuitBuilder::new(ModeSpace::simple(1).unwrap());
        builder.detector_with(0, Detector::new().with_dark_rate(0.1)).unwrap();
        let circuit = builder.build().unwrap();
        let mut bins = OutcomeBins::new(BinLayout::full(circuit.modes()));
        bins.add_prob([0].into(), 1.0).unwrap();
        let config = SimConfig::default().with_dark_count_cutoff(3);
        let measured = bins.calc_measure(&circuit, &config).unwrap();
        assert_eq!(measured.len(), 4);
        assert_abs_diff_eq!(measured.trace(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(
            measured.prob(&[1].into()), 0.1 * (-0.1_f64).exp(), epsilon = 1e-12);
    }

    #[test]
    fn blinking_hides_clicks() {
        let mut builder = CircuitBuilder::new(ModeSpace::new(1, 1, 2, false).unwrap());
        builder.detector_with(0, Detector::new().with_blink(0.3)).unwrap();
        let circuit = builder.build().unwrap();
        let mut bins = OutcomeBins::new(BinLayout::full(circuit.modes()));
        bins.add_prob([1, 1].into(), 1.0).unwrap();
        let measured = bins.calc_measure(&circuit, &SimConfig::default()).unwrap();
        assert_abs_diff_eq!(measured.prob(&[1, 1].into()), 0.49, epsilon = 1e-12);
        assert_abs_diff_eq!(measured.prob(&[0, 1].into()), 0.21, epsilon = 1e-12);
        assert_abs_diff_eq!(measured.prob(&[0, 0].into()), 0.09, epsilon = 1e-12);
    }

    #[test]
    fn loss_channels_are_marginalized() {
        let modes = ModeSpace::new(2, 1, 1, true).unwrap();
        let mut builder = CircuitBuilder::new(modes);
        builder.loss(0, 0.5).unwrap();
        let circuit = builder.build().unwrap();
        let mut bins = OutcomeBins::new(BinLayout::full(&modes));
        bins.add_prob([1, 0, 0, 0].into(), 0.5).unwrap();
        bins.add_prob([0, 0, 1, 0].into(), 0.5).unwrap();
        let measured = bins.calc_measure(&circuit, &SimConfig::default()).unwrap();
        assert_eq!(measured.layout(), &BinLayout::measured(&circuit));
        assert_abs_diff_eq!(measured.prob(&[1, 0].into()), 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(measured.prob(&[0, 0].into()), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn post_selection_renormalizes() {
        let mut builder = CircuitBuilder::new(ModeSpace::simple(2).unwrap());
        builder.detector_cond(1, Condition::Exactly(1)).unwrap();
        let circuit = builder.build().unwrap();
        let h = std::f64::consts::FRAC_1_SQRT_2;
        let state = FockState::from_terms(
            2,
            [(C64::new(0.5, 0.0), [1, 1]), (C64::new(h, 0.0), [2, 0]), (C64::new(0.5, 0.0), [0, 2])],
        ).unwrap();
        let bins = OutcomeBins::from_state(&state, BinLayout::full(circuit.modes()))
            .unwrap();
        assert_abs_diff_eq!(
            bins.prob_where(&[(1, Condition::Exactly(1))]).unwrap(), 0.25,
            epsilon = 1e-12,
        );
        let measured = bins.calc_measure(&circuit, &SimConfig::default()).unwrap();
        assert_eq!(measured.len(), 1);
        assert_abs_diff_eq!(measured.prob(&[1, 1].into()), 1.0, epsilon = 1e-12);
        assert!(matches!(
            bins.post_select(&[(0, Condition::AtLeast(3))]),
            Err(SimError::EmptyEnsemble)
        ));
        assert!(bins.prob_where(&[(5, Condition::AtLeast(0))]).is_err());
    }

    #[test]
    fn periods_classify_time_bins() {
        let mut builder = CircuitBuilder::new(ModeSpace::new(1, 1, 4, false).unwrap());
        builder.time_resolution(TimeResolution::Period(2)).unwrap();
        let circuit = builder.build().unwrap();
        let mut bins = OutcomeBins::new(BinLayout::full(circuit.modes()));
        bins.add_prob([0, 0, 0, 1].into(), 0.5).unwrap();
        bins.add_prob([0, 0, 1, 0].into(), 0.5).unwrap();
        let measured = bins.calc_measure(&circuit, &SimConfig::default()).unwrap();
        assert_eq!(measured.layout().slots(), 2);
        assert_abs_diff_eq!(measured.prob(&[0, 1].into()), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn counts_noise_and_sorting() {
        let layout = BinLayout::new(vec![0, 1], 1, 1);
        let mut bins = OutcomeBins::new(layout);
        bins.add_count([1, 0].into()).unwrap();
        bins.add_count([1, 0].into()).unwrap();
        bins.add_count([0, 1].into()).unwrap();
        assert!(bins.add_count([0, 1, 0].into()).is_err());
        bins.normalize().unwrap();
        let sorted = bins.sorted();
        assert_eq!(sorted[0].0, &Occupation::from([1, 0]));
        assert_abs_diff_eq!(sorted[0].1, 2.0 / 3.0, epsilon = 1e-12);
        let mut rng = StdRng::seed_from_u64(10546);
        let same = bins.white_noise(0.0, &mut rng).unwrap();
        assert_eq!(same, bins);
        let noisy = bins.white_noise(0.5, &mut rng).unwrap();
        assert!(noisy.values().all(|p| *p >= 0.0));
        assert!(bins.white_noise(-1.0, &mut rng).is_err());
    }
}
