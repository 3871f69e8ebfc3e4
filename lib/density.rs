//! Sparse density matrices over Fock kets.

use indexmap::IndexSet;
use num_complex::Complex64 as C64;
use num_traits::Zero;
use rustc_hash::FxHashMap as HashMap;
use crate::{
    circuit::{ Circuit, TimeResolution },
    config::SimConfig,
    error::{ SimError, SimResult },
    fock::{ FockState, Occupation },
    outcome::BinLayout,
};

/// A mixed ensemble of Fock kets.
///
/// Kets are stored once in an insertion-ordered dictionary and entries are
/// keyed by pairs of dictionary indices, so only non-zero entries take up
/// space. All mutating operations add entries in conjugate pairs.
#[derive(Clone, Debug, PartialEq)]
pub struct DensityMatrix {
    nmodes: usize,
    kets: IndexSet<Occupation>,
    entries: HashMap<(usize, usize), C64>,
}

impl DensityMatrix {
    /// Create a new, empty (zero) matrix over `nmodes` modes.
    pub fn new(nmodes: usize) -> Self {
        Self { nmodes, kets: IndexSet::new(), entries: HashMap::default() }
    }

    /// Create the pure-state matrix `|psi><psi|`.
    pub fn from_state(state: &FockState) -> SimResult<Self> {
        let mut rho = Self::new(state.num_modes());
        rho.add_state(state, 1.0)?;
        Ok(rho)
    }

    pub fn num_modes(&self) -> usize { self.nmodes }

    /// Every ket that has appeared in an entry.
    pub fn kets(&self) -> &IndexSet<Occupation> { &self.kets }

    /// Number of stored non-zero entries.
    pub fn num_entries(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Iterate over all stored entries as `(row ket, column ket, value)`.
    pub fn iter(&self) -> impl Iterator<Item = (&Occupation, &Occupation, C64)> + '_ {
        self.entries.iter()
            .map(|((i, j), v)| (&self.kets[*i], &self.kets[*j], *v))
    }

    fn check_modes(&self, occ: &Occupation) -> SimResult<()> {
        if occ.num_modes() != self.nmodes {
            return Err(SimError::config(format!(
                "ket has {} modes but the density matrix has {}",
                occ.num_modes(), self.nmodes,
            )));
        }
        Ok(())
    }

    fn intern(&mut self, occ: Occupation) -> usize {
        self.kets.insert_full(occ).0
    }

    fn add_entry(&mut self, i: usize, j: usize, v: C64) {
        *self.entries.entry((i, j)).or_insert_with(C64::zero) += v;
    }

    /// Add `weight |psi><psi|`.
    pub fn add_state(&mut self, state: &FockState, weight: f64)
        -> SimResult<()>
    {
        if state.num_modes() != self.nmodes {
            return Err(SimError::config(format!(
                "state has {} modes but the density matrix has {}",
                state.num_modes(), self.nmodes,
            )));
        }
        let idx: Vec<(usize, C64)>
            = state.iter()
            .map(|(occ, a)| (self.intern(occ.clone()), *a))
            .collect();
        for &(i, ai) in idx.iter() {
            for &(j, aj) in idx.iter() {
                self.add_entry(i, j, weight * ai * aj.conj());
            }
        }
        Ok(())
    }

    /// Add `p |occ><occ|`.
    pub fn add_population(&mut self, occ: Occupation, p: f64) -> SimResult<()> {
        self.check_modes(&occ)?;
        let i = self.intern(occ);
        self.add_entry(i, i, C64::from(p));
        Ok(())
    }

    /// Add `weight` times another matrix.
    pub fn add(&mut self, other: &Self, weight: f64) -> SimResult<()> {
        if other.nmodes != self.nmodes {
            return Err(SimError::config(format!(
                "cannot add density matrices over {} and {} modes",
                other.nmodes, self.nmodes,
            )));
        }
        for (a, b, v) in other.iter() {
            let i = self.intern(a.clone());
            let j = self.intern(b.clone());
            self.add_entry(i, j, weight * v);
        }
        Ok(())
    }

    /// Get the entry `<a|rho|b>`.
    pub fn get(&self, a: &Occupation, b: &Occupation) -> C64 {
        self.kets.get_index_of(a)
            .zip(self.kets.get_index_of(b))
            .and_then(|(i, j)| self.entries.get(&(i, j)).copied())
            .unwrap_or_else(C64::zero)
    }

    /// Get the population of a ket.
    pub fn population(&self, occ: &Occupation) -> f64 { self.get(occ, occ).re }

    /// All kets with non-zero population, in dictionary order.
    pub fn populations(&self) -> Vec<(&Occupation, f64)> {
        self.kets.iter().enumerate()
            .filter_map(|(i, occ)| {
                self.entries.get(&(i, i)).map(|v| (occ, v.re))
            })
            .filter(|(_, p)| *p != 0.0)
            .collect()
    }

    pub fn trace(&self) -> f64 {
        self.entries.iter()
            .filter(|((i, j), _)| i == j)
            .map(|(_, v)| v.re)
            .sum()
    }

    /// Rescale to unit trace.
    pub fn normalize(&mut self) -> SimResult<()> {
        let tr = self.trace();
        if tr <= 0.0 { return Err(SimError::ZeroNorm); }
        self.entries.values_mut().for_each(|v| { *v /= tr; });
        Ok(())
    }

    /// Compute `<psi|rho|psi>`.
    pub fn fidelity_state(&self, state: &FockState) -> SimResult<f64> {
        if state.num_modes() != self.nmodes {
            return Err(SimError::config(format!(
                "state has {} modes but the density matrix has {}",
                state.num_modes(), self.nmodes,
            )));
        }
        Ok(
            self.iter()
                .map(|(a, b, v)| state.amplitude(a).conj() * v * state.amplitude(b))
                .sum::<C64>()
                .re
        )
    }

    /// Compute `Tr(self * other)`, summing over matching entries only.
    pub fn fidelity(&self, other: &Self) -> SimResult<f64> {
        if other.nmodes != self.nmodes {
            return Err(SimError::config(format!(
                "cannot compare density matrices over {} and {} modes",
                self.nmodes, other.nmodes,
            )));
        }
        Ok(
            self.iter()
                .map(|(a, b, v)| v * other.get(b, a))
                .sum::<C64>()
                .re
        )
    }

    /// Check that every entry is matched by its conjugate transpose.
    pub fn check_hermitian(&self, tol: f64) -> SimResult<()> {
        for (&(i, j), v) in self.entries.iter() {
            let vt = self.entries.get(&(j, i)).copied().unwrap_or_else(C64::zero);
            if (v - vt.conj()).norm() > tol {
                return Err(SimError::InternalConsistency(format!(
                    "density matrix is not Hermitian: <{:?}|rho|{:?}> = {} but \
                    the transposed entry is {}",
                    &self.kets[i][..], &self.kets[j][..], v, vt,
                )));
            }
        }
        Ok(())
    }

    /// Keep only entries where both kets satisfy `pred`.
    pub fn post_select<F>(&self, pred: F) -> Self
    where F: Fn(&Occupation) -> bool
    {
        let mut new = Self::new(self.nmodes);
        for (a, b, v) in self.iter() {
            if pred(a) && pred(b) {
                let i = new.intern(a.clone());
                let j = new.intern(b.clone());
                new.add_entry(i, j, v);
            }
        }
        new
    }

    /// Trace out a set of modes.
    pub fn partial_trace(&self, modes: &[usize]) -> SimResult<Self> {
        if let Some(k) = modes.iter().find(|k| **k >= self.nmodes) {
            return Err(SimError::index("mode", *k, self.nmodes));
        }
        let keep: Vec<usize>
            = (0..self.nmodes).filter(|k| !modes.contains(k)).collect();
        let mut new = Self::new(keep.len());
        for (a, b, v) in self.iter() {
            if modes.iter().all(|k| a[*k] == b[*k]) {
                let i = new.intern(keep.iter().map(|k| a[*k]).collect());
                let j = new.intern(keep.iter().map(|k| b[*k]).collect());
                new.add_entry(i, j, v);
            }
        }
        Ok(new)
    }

    /// Coarse-grain time bins; entries survive only between kets whose
    /// discarded time labels agree.
    fn collapse_time(&self, layout: &BinLayout, resolution: TimeResolution)
        -> Self
    {
        let collapsed = layout.collapse(resolution);
        let mut new = Self::new(collapsed.num_modes());
        for (a, b, v) in self.iter() {
            let (ka, ha) = layout.collapse_slots(a, resolution);
            let (kb, hb) = layout.collapse_slots(b, resolution);
            if ha == hb {
                let i = new.intern(ka);
                let j = new.intern(kb);
                new.add_entry(i, j, v);
            }
        }
        new
    }

    /// Apply a circuit's detector conditions, trace out loss and ignored
    /// channels, and coarse-grain time bins per its time resolution.
    ///
    /// The result is over the modes of [`BinLayout::measured`] and is left
    /// unnormalized, so its trace is the probability that the conditions are
    /// met. Fails with [`SimError::EmptyEnsemble`] if no entry satisfies the
    /// conditions.
    pub fn calc_measure(&self, circuit: &Circuit, config: &SimConfig)
        -> SimResult<Self>
    {
        let modes = circuit.modes();
        if self.nmodes != modes.num_modes() {
            return Err(SimError::config(format!(
                "density matrix has {} modes but the circuit has {}",
                self.nmodes, modes.num_modes(),
            )));
        }
        let full = BinLayout::full(modes);
        let conditions = circuit.conditions();
        let selected
            = if conditions.is_empty() {
                self.clone()
            } else {
                let rho = self.post_select(|occ| {
                    conditions.iter().all(|(ch, cond)| {
                        full.channel_count(occ, *ch).is_some_and(|n| cond.holds(n))
                    })
                });
                if rho.trace() <= 0.0 { return Err(SimError::EmptyEnsemble); }
                rho
            };
        let keep: Vec<usize>
            = (0..modes.channels())
            .filter(|ch| !circuit.ignored().contains(ch))
            .collect();
        let (kept_layout, kept_modes) = full.keep_channels(&keep);
        let traced: Vec<usize>
            = (0..self.nmodes).filter(|m| !kept_modes.contains(m)).collect();
        let mut reduced = selected.partial_trace(&traced)?;
        let resolution = circuit.time_resolution();
        if resolution != TimeResolution::Full {
            reduced = reduced.collapse_time(&kept_layout, resolution);
        }
        reduced.check_hermitian(config.hermitian_tol)?;
        Ok(reduced)
    }
}

#[cfg(test)]
mod test {
    use approx::assert_abs_diff_eq;
    use crate::circuit::{ CircuitBuilder, Condition, ModeSpace };
    use super::*;

    fn c(re: f64, im: f64) -> C64 { C64::new(re, im) }

    fn bell_like() -> FockState {
        let h = std::f64::consts::FRAC_1_SQRT_2;
        FockState::from_terms(2, [(c(h, 0.0), [1, 0]), (c(0.0, h), [0, 1])])
            .unwrap()
    }

    #[test]
    fn mixture_is_hermitian_with_unit_trace() {
        let mut rho = DensityMatrix::new(2);
        rho.add_state(&bell_like(), 0.25).unwrap();
        rho.add_state(&FockState::from_occupation([2, 0].into()), 0.5).unwrap();
        rho.add_population([0, 2].into(), 0.25).unwrap();
        assert_abs_diff_eq!(rho.trace(), 1.0, epsilon = 1e-12);
        rho.check_hermitian(1e-12).unwrap();
        let coh = rho.get(&[1, 0].into(), &[0, 1].into());
        assert_abs_diff_eq!((coh - c(0.0, -0.125)).norm(), 0.0, epsilon = 1e-12);
        assert!(rho.add_population([1, 0, 0].into(), 1.0).is_err());
    }

    #[test]
    fn fidelities() {
        let psi = bell_like();
        let rho = DensityMatrix::from_state(&psi).unwrap();
        assert_abs_diff_eq!(rho.fidelity_state(&psi).unwrap(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(rho.fidelity(&rho).unwrap(), 1.0, epsilon = 1e-12);
        let mut mixed = DensityMatrix::new(2);
        mixed.add_population([1, 0].into(), 0.5).unwrap();
        mixed.add_population([0, 1].into(), 0.5).unwrap();
        assert_abs_diff_eq!(mixed.fidelity_state(&psi).unwrap(), 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(mixed.fidelity(&rho).unwrap(), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn partial_trace_removes_coherence() {
        // (|1,0> + |0,1>) / sqrt(2): tracing mode 1 leaves a mixture
        let rho = DensityMatrix::from_state(&bell_like()).unwrap();
        let reduced = rho.partial_trace(&[1]).unwrap();
        assert_eq!(reduced.num_modes(), 1);
        assert_abs_diff_eq!(reduced.population(&[1].into()), 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(reduced.population(&[0].into()), 0.5, epsilon = 1e-12);
        assert_eq!(reduced.get(&[1].into(), &[0].into()), C64::zero());
    }

    #[test]
    fn normalize_and_broken_hermiticity() {
        let mut rho = DensityMatrix::new(1);
        assert!(matches!(rho.normalize(), Err(SimError::ZeroNorm)));
        rho.add_population([1].into(), 2.0).unwrap();
        rho.normalize().unwrap();
        assert_abs_diff_eq!(rho.trace(), 1.0);
        let i = rho.intern([0].into());
        rho.add_entry(0, i, c(0.1, 0.0));
        assert!(matches!(
            rho.check_hermitian(1e-9),
            Err(SimError::InternalConsistency(_))
        ));
    }

    #[test]
    fn measure_conditions_and_ignored() {
        let mut builder = CircuitBuilder::new(ModeSpace::simple(3).unwrap());
        builder.detector_cond(0, Condition::Exactly(1)).unwrap()
            .ignore(2).unwrap();
        let circuit = builder.build().unwrap();
        let h = std::f64::consts::FRAC_1_SQRT_2;
        let psi = FockState::from_terms(
            3, [(c(h, 0.0), [1, 0, 1]), (c(0.5, 0.0), [1, 1, 0]), (c(0.5, 0.0), [0, 1, 1])],
        ).unwrap();
        let rho = DensityMatrix::from_state(&psi).unwrap();
        let measured = rho.calc_measure(&circuit, &SimConfig::default()).unwrap();
        assert_eq!(measured.num_modes(), 2);
        assert_abs_diff_eq!(measured.trace(), 0.75, epsilon = 1e-12);
        assert_abs_diff_eq!(measured.population(&[1, 0].into()), 0.5, epsilon = 1e-12);
        // |1,0,1> and |1,1,0> differ on the ignored channel
        assert_eq!(measured.get(&[1, 0].into(), &[1, 1].into()), C64::zero());

        let mut builder = CircuitBuilder::new(ModeSpace::simple(3).unwrap());
        builder.detector_cond(0, Condition::AtLeast(2)).unwrap();
        let circuit = builder.build().unwrap();
        assert!(matches!(
            rho.calc_measure(&circuit, &SimConfig::default()),
            Err(SimError::EmptyEnsemble)
        ));
    }

    #[test]
    fn counter_merges_time_bins() {
        let modes = ModeSpace::new(1, 1, 2, false).unwrap();
        let mut builder = CircuitBuilder::new(modes);
        builder.time_resolution(TimeResolution::Counter).unwrap();
        let circuit = builder.build().unwrap();
        let h = std::f64::consts::FRAC_1_SQRT_2;
        let psi = FockState::from_terms(2, [(c(h, 0.0), [1, 0]), (c(h, 0.0), [0, 1])])
            .unwrap();
        let rho = DensityMatrix::from_state(&psi).unwrap();
        let measured = rho.calc_measure(&circuit, &SimConfig::default()).unwrap();
        assert_eq!(measured.num_modes(), 1);
        assert_abs_diff_eq!(measured.population(&[1].into()), 1.0, epsilon = 1e-12);
    }
}
