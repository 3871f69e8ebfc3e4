//! Occupation-number (Fock) kets and sparse superpositions thereof.

use std::ops::Deref;
use indexmap::IndexMap;
use num_complex::Complex64 as C64;
use num_traits::Zero;
use crate::error::{ SimError, SimResult };

/* Occupations ****************************************************************/

/// Photon occupation numbers, one per mode.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Occupation(Vec<usize>);

impl Deref for Occupation {
    type Target = [usize];

    fn deref(&self) -> &Self::Target { &self.0 }
}

impl AsRef<[usize]> for Occupation {
    fn as_ref(&self) -> &[usize] { &self.0 }
}

impl From<Vec<usize>> for Occupation {
    fn from(occ: Vec<usize>) -> Self { Self(occ) }
}

impl<const N: usize> From<[usize; N]> for Occupation {
    fn from(occ: [usize; N]) -> Self { Self(occ.to_vec()) }
}

impl FromIterator<usize> for Occupation {
    fn from_iter<I>(iter: I) -> Self
    where I: IntoIterator<Item = usize>
    {
        Self(iter.into_iter().collect())
    }
}

impl Occupation {
    /// The vacuum over `nmodes` modes.
    pub fn vacuum(nmodes: usize) -> Self { Self(vec![0; nmodes]) }

    /// A single photon in mode `mode` out of `nmodes`.
    pub fn single(nmodes: usize, mode: usize) -> SimResult<Self> {
        if mode >= nmodes { return Err(SimError::index("mode", mode, nmodes)); }
        let mut occ = vec![0; nmodes];
        occ[mode] = 1;
        Ok(Self(occ))
    }

    /// Number of modes.
    pub fn num_modes(&self) -> usize { self.0.len() }

    /// Total number of photons.
    pub fn total(&self) -> usize { self.0.iter().sum() }

    /// Product of the factorials of all occupation numbers.
    pub fn factorial_prod(&self) -> f64 {
        self.0.iter()
            .map(|n| (1..=*n).map(|k| k as f64).product::<f64>())
            .product()
    }

    /// List each photon's mode, in ascending mode order, with modes repeated
    /// by multiplicity.
    pub fn photon_modes(&self) -> Vec<usize> {
        self.0.iter().enumerate()
            .flat_map(|(k, n)| std::iter::repeat(k).take(*n))
            .collect()
    }

    /// Build an occupation from a list of photon modes.
    pub fn from_photon_modes(nmodes: usize, modes: &[usize])
        -> SimResult<Self>
    {
        let mut occ = vec![0; nmodes];
        for &k in modes.iter() {
            *occ.get_mut(k).ok_or(SimError::index("mode", k, nmodes))? += 1;
        }
        Ok(Self(occ))
    }

    /// Concatenate with another occupation, `self` first.
    pub fn concat(&self, other: &Self) -> Self {
        Self([self.0.as_slice(), other.0.as_slice()].concat())
    }

    /// Element-wise sum with another occupation over the same modes.
    pub fn add(&self, other: &Self) -> Self {
        self.0.iter().zip(other.0.iter()).map(|(a, b)| a + b).collect()
    }

    /// Return `true` if no mode holds more than one photon.
    pub fn is_binary(&self) -> bool { self.0.iter().all(|n| *n <= 1) }

    /// Return the underlying vector.
    pub fn into_inner(self) -> Vec<usize> { self.0 }
}

/// Enumerate every occupation of `nphotons` photons over `nmodes` modes, in
/// lexicographically descending order.
pub fn all_occupations(nmodes: usize, nphotons: usize) -> Vec<Occupation> {
    fn fill(
        acc: &mut Vec<usize>,
        left: usize,
        nmodes: usize,
        out: &mut Vec<Occupation>,
    ) {
        if acc.len() + 1 == nmodes {
            acc.push(left);
            out.push(Occupation(acc.clone()));
            acc.pop();
            return;
        }
        for n in (0..=left).rev() {
            acc.push(n);
            fill(acc, left - n, nmodes, out);
            acc.pop();
        }
    }

    let mut out: Vec<Occupation> = Vec::new();
    if nmodes == 0 {
        if nphotons == 0 { out.push(Occupation(Vec::new())); }
        return out;
    }
    fill(&mut Vec::with_capacity(nmodes), nphotons, nmodes, &mut out);
    out
}

/// Enumerate every occupation of `nphotons` photons over `nmodes` modes where
/// no mode holds more than one photon.
pub fn binary_occupations(nmodes: usize, nphotons: usize) -> Vec<Occupation> {
    use itertools::Itertools;
    (0..nmodes).combinations(nphotons)
        .map(|modes| {
            let mut occ = vec![0; nmodes];
            modes.into_iter().for_each(|k| { occ[k] = 1; });
            Occupation(occ)
        })
        .collect()
}

/* States *********************************************************************/

/// A sparse superposition of Fock kets over a fixed number of modes.
///
/// This collection is backed by a single [`IndexMap`], which can be read via
/// [`AsRef`] and [`Deref`]; insertion order carries no physical meaning.
#[derive(Clone, Debug, PartialEq)]
pub struct FockState {
    nmodes: usize,
    terms: IndexMap<Occupation, C64>,
}

impl AsRef<IndexMap<Occupation, C64>> for FockState {
    fn as_ref(&self) -> &IndexMap<Occupation, C64> { &self.terms }
}

impl Deref for FockState {
    type Target = IndexMap<Occupation, C64>;

    fn deref(&self) -> &Self::Target { &self.terms }
}

impl FockState {
    /// Create a new, empty (zero) state over `nmodes` modes.
    pub fn new(nmodes: usize) -> Self {
        Self { nmodes, terms: IndexMap::new() }
    }

    /// Create a state holding a single ket with unit amplitude.
    pub fn from_occupation(occ: Occupation) -> Self {
        let nmodes = occ.num_modes();
        let mut terms = IndexMap::new();
        terms.insert(occ, C64::from(1.0));
        Self { nmodes, terms }
    }

    /// Create a state from `(amplitude, occupation)` pairs, summing
    /// amplitudes on repeated kets.
    pub fn from_terms<I, O>(nmodes: usize, terms: I) -> SimResult<Self>
    where
        I: IntoIterator<Item = (C64, O)>,
        O: Into<Occupation>,
    {
        let mut state = Self::new(nmodes);
        for (ampl, occ) in terms.into_iter() {
            state.add_term(ampl, occ)?;
        }
        Ok(state)
    }

    /// Number of modes.
    pub fn num_modes(&self) -> usize { self.nmodes }

    /// Add `ampl |occ>` to the state, merging with an existing ket if present.
    pub fn add_term<O>(&mut self, ampl: C64, occ: O) -> SimResult<()>
    where O: Into<Occupation>
    {
        let occ = occ.into();
        if occ.num_modes() != self.nmodes {
            return Err(SimError::config(format!(
                "ket has {} modes but the state has {}",
                occ.num_modes(), self.nmodes,
            )));
        }
        *self.terms.entry(occ).or_insert_with(C64::zero) += ampl;
        Ok(())
    }

    /// Get the amplitude of a ket, zero if absent.
    pub fn amplitude(&self, occ: &Occupation) -> C64 {
        self.terms.get(occ).copied().unwrap_or_else(C64::zero)
    }

    /// Photon number shared by every ket, if there is one.
    pub fn photon_number(&self) -> Option<usize> {
        let mut totals = self.terms.keys().map(|occ| occ.total());
        let first = totals.next()?;
        totals.all(|n| n == first).then_some(first)
    }

    /// Direct product of `self` (first modes) with `rhs` (last modes).
    pub fn tensor_product(&self, rhs: &Self) -> Self {
        let terms: IndexMap<Occupation, C64>
            = self.terms.iter()
            .flat_map(|(occ_a, a)| {
                rhs.terms.iter()
                    .map(move |(occ_b, b)| (occ_a.concat(occ_b), *a * *b))
            })
            .collect();
        Self { nmodes: self.nmodes + rhs.nmodes, terms }
    }

    /// Compute `<self|rhs>`.
    pub fn inner_product(&self, rhs: &Self) -> SimResult<C64> {
        if self.nmodes != rhs.nmodes {
            return Err(SimError::config(format!(
                "cannot take the inner product of states over {} and {} modes",
                self.nmodes, rhs.nmodes,
            )));
        }
        Ok(
            self.terms.iter()
                .filter_map(|(occ, a)| rhs.terms.get(occ).map(|b| a.conj() * b))
                .sum()
        )
    }

    /// Sum of squared amplitude magnitudes.
    pub fn norm_sqr(&self) -> f64 {
        self.terms.values().map(|a| a.norm_sqr()).sum()
    }

    /// Alias for [`Self::norm_sqr`], read as the total probability retained
    /// by the state.
    pub fn probability(&self) -> f64 { self.norm_sqr() }

    /// Rescale the state to unit norm.
    ///
    /// Fails on the zero state.
    pub fn normalize(&mut self) -> SimResult<()> {
        let norm = self.norm_sqr().sqrt();
        if norm == 0.0 { return Err(SimError::ZeroNorm); }
        self.terms.values_mut().for_each(|a| { *a /= norm; });
        Ok(())
    }

    /// Return a normalized copy of `self`.
    pub fn normalized(&self) -> SimResult<Self> {
        let mut new = self.clone();
        new.normalize()?;
        Ok(new)
    }

    /// Keep only kets satisfying `pred`.
    ///
    /// Amplitudes are left untouched, so the squared norm of the result is the
    /// probability of the condition.
    pub fn post_select<F>(&self, pred: F) -> Self
    where F: Fn(&Occupation) -> bool
    {
        let terms: IndexMap<Occupation, C64>
            = self.terms.iter()
            .filter(|(occ, _)| pred(occ))
            .map(|(occ, a)| (occ.clone(), *a))
            .collect();
        Self { nmodes: self.nmodes, terms }
    }

    /// Keep only kets with exactly `n` photons in each listed `(mode, n)`.
    pub fn post_select_counts(&self, counts: &[(usize, usize)])
        -> SimResult<Self>
    {
        if let Some((k, _)) = counts.iter().find(|(k, _)| *k >= self.nmodes) {
            return Err(SimError::index("mode", *k, self.nmodes));
        }
        Ok(self.post_select(|occ| counts.iter().all(|(k, n)| occ[*k] == *n)))
    }

    /// Remove the listed modes, keeping only kets in which they are empty.
    pub fn remove_empty_modes(&self, modes: &[usize]) -> SimResult<Self> {
        if let Some(k) = modes.iter().find(|k| **k >= self.nmodes) {
            return Err(SimError::index("mode", *k, self.nmodes));
        }
        let keep: Vec<usize>
            = (0..self.nmodes).filter(|k| !modes.contains(k)).collect();
        let terms: IndexMap<Occupation, C64>
            = self.terms.iter()
            .filter(|(occ, _)| modes.iter().all(|k| occ[*k] == 0))
            .map(|(occ, a)| (keep.iter().map(|k| occ[*k]).collect(), *a))
            .collect();
        Ok(Self { nmodes: keep.len(), terms })
    }

    /// Apply a global phase so that the amplitude of `occ` is real and
    /// positive.
    pub fn rephase(&mut self, occ: &Occupation) -> SimResult<()> {
        let a = self.terms.get(occ).copied()
            .ok_or_else(|| SimError::config("rephase: ket not present"))?;
        if a.norm() == 0.0 { return Err(SimError::ZeroNorm); }
        let phase = a.conj() / a.norm();
        self.terms.values_mut().for_each(|b| { *b *= phase; });
        Ok(())
    }

    /// Drop kets whose amplitude magnitude is below `cutoff`.
    pub fn prune(&mut self, cutoff: f64) {
        self.terms.retain(|_, a| a.norm() >= cutoff);
    }

    /// List all terms by descending amplitude magnitude.
    pub fn sorted_terms(&self) -> Vec<(&Occupation, C64)> {
        let mut terms: Vec<(&Occupation, C64)>
            = self.terms.iter().map(|(occ, a)| (occ, *a)).collect();
        terms.sort_by(|(occ_l, l), (occ_r, r)| {
            r.norm().total_cmp(&l.norm()).then_with(|| occ_l.cmp(occ_r))
        });
        terms
    }

    /// Path-encode the state into qubits.
    ///
    /// Qubit `k` is carried by the mode pair `pairs[k] = (m1, m0)`: one photon
    /// in `m0` reads as `0` and one photon in `m1` reads as `1`. Kets that do
    /// not hold exactly one photon in every pair are dropped. The result has
    /// one "mode" per qubit whose occupation is the qubit value. Kets that
    /// differ only outside the pairs would merge, which is an error.
    pub fn encode(&self, pairs: &[(usize, usize)]) -> SimResult<Self> {
        check_pairs(pairs, self.nmodes)?;
        let mut terms: IndexMap<Occupation, C64> = IndexMap::new();
        for (occ, a) in self.terms.iter() {
            let bits: Option<Occupation>
                = pairs.iter()
                .map(|(m1, m0)| match (occ[*m1], occ[*m0]) {
                    (0, 1) => Some(0),
                    (1, 0) => Some(1),
                    _ => None,
                })
                .collect::<Option<Vec<usize>>>()
                .map(Occupation::from);
            let Some(bits) = bits else { continue; };
            if terms.insert(bits.clone(), *a).is_some() {
                return Err(SimError::config(format!(
                    "ket {:?} collides with another ket on qubits {:?}",
                    occ.as_ref(), bits.as_ref(),
                )));
            }
        }
        Ok(Self { nmodes: pairs.len(), terms })
    }

    /// Inverse of [`Self::encode`]: expand a qubit state back into photons,
    /// filling the modes outside `pairs` from `ancilla`.
    pub fn decode(&self, pairs: &[(usize, usize)], ancilla: &Occupation)
        -> SimResult<Self>
    {
        if self.nmodes != pairs.len() {
            return Err(SimError::config(format!(
                "state has {} qubits but {} mode pairs were given",
                self.nmodes, pairs.len(),
            )));
        }
        check_pairs(pairs, ancilla.num_modes())?;
        let mut decoded = Self::new(ancilla.num_modes());
        for (bits, a) in self.terms.iter() {
            let mut occ: Vec<usize> = ancilla.to_vec();
            for (bit, (m1, m0)) in bits.iter().zip(pairs) {
                let (n1, n0) = match *bit {
                    0 => (0, 1),
                    1 => (1, 0),
                    _ => {
                        return Err(SimError::config(format!(
                            "ket {:?} is not a qubit ket", bits.as_ref())));
                    },
                };
                occ[*m1] = n1;
                occ[*m0] = n0;
            }
            decoded.add_term(*a, occ)?;
        }
        Ok(decoded)
    }
}

fn check_pairs(pairs: &[(usize, usize)], nmodes: usize) -> SimResult<()> {
    let mut seen: Vec<usize> = Vec::with_capacity(2 * pairs.len());
    for &(m1, m0) in pairs.iter() {
        for m in [m1, m0] {
            if m >= nmodes { return Err(SimError::index("mode", m, nmodes)); }
            if seen.contains(&m) {
                return Err(SimError::config(format!(
                    "mode {} appears in more than one qubit", m)));
            }
            seen.push(m);
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use approx::assert_abs_diff_eq;
    use super::*;

    fn c(re: f64, im: f64) -> C64 { C64::new(re, im) }

    #[test]
    fn add_term_merges() {
        let mut state = FockState::new(2);
        state.add_term(c(0.5, 0.0), [1, 0]).unwrap();
        state.add_term(c(0.0, 0.5), [1, 0]).unwrap();
        assert_eq!(state.len(), 1);
        assert_eq!(state.amplitude(&[1, 0].into()), c(0.5, 0.5));
        assert!(state.add_term(c(1.0, 0.0), [1, 0, 0]).is_err());
    }

    #[test]
    fn tensor_product_is_associative() {
        let a = FockState::from_terms(1, [(c(0.6, 0.0), [1]), (c(0.0, 0.8), [0])])
            .unwrap();
        let b = FockState::from_terms(2, [(c(1.0, 0.0), [0, 2])]).unwrap();
        let d = FockState::from_terms(
            1, [(c(0.5, 0.5), [3]), (c(0.5, -0.5), [1])]).unwrap();
        let left = a.tensor_product(&b).tensor_product(&d);
        let right = a.tensor_product(&b.tensor_product(&d));
        assert_eq!(left.num_modes(), 4);
        assert_eq!(left.len(), right.len());
        for (occ, ampl) in left.iter() {
            assert_abs_diff_eq!((right.amplitude(occ) - ampl).norm(), 0.0);
        }
    }

    #[test]
    fn normalized_self_overlap_is_one() {
        let mut state = FockState::from_terms(
            3, [(c(1.0, 2.0), [1, 1, 0]), (c(-3.0, 0.5), [0, 0, 2])]).unwrap();
        state.normalize().unwrap();
        let braket = state.inner_product(&state).unwrap();
        assert_abs_diff_eq!(braket.re, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(braket.im, 0.0, epsilon = 1e-12);
        assert!(matches!(FockState::new(3).normalize(), Err(SimError::ZeroNorm)));
    }

    #[test]
    fn post_select_keeps_relative_amplitudes() {
        let state = FockState::from_terms(
            2,
            [
                (c(0.5, 0.0), [2, 0]),
                (c(0.0, 0.5), [1, 1]),
                (c(0.5, 0.5), [0, 2]),
            ],
        ).unwrap();
        let selected = state.post_select_counts(&[(0, 1)]).unwrap();
        assert_eq!(selected.len(), 1);
        assert_abs_diff_eq!(selected.probability(), 0.25, epsilon = 1e-12);
        let cond = state.post_select(|occ| occ[0] < 2).normalized().unwrap();
        let ratio = cond.amplitude(&[0, 2].into()) / cond.amplitude(&[1, 1].into());
        let expected = c(0.5, 0.5) / c(0.0, 0.5);
        assert_abs_diff_eq!((ratio - expected).norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn rephase_and_remove_modes() {
        let mut state = FockState::from_terms(
            3, [(c(0.0, 1.0), [1, 0, 0]), (c(1.0, 0.0), [0, 1, 0])]).unwrap();
        state.rephase(&[1, 0, 0].into()).unwrap();
        assert_abs_diff_eq!(state.amplitude(&[1, 0, 0].into()).re, 1.0);
        assert_abs_diff_eq!(state.amplitude(&[0, 1, 0].into()).im, -1.0);
        let reduced = state.remove_empty_modes(&[2]).unwrap();
        assert_eq!(reduced.num_modes(), 2);
        assert_eq!(reduced.len(), 2);
    }

    #[test]
    fn occupation_enumeration_counts() {
        // C(M + n - 1, n)
        assert_eq!(all_occupations(4, 3).len(), 20);
        assert_eq!(binary_occupations(4, 2).len(), 6);
        assert!(all_occupations(3, 2).iter().all(|occ| occ.total() == 2));
        assert_eq!(all_occupations(0, 0).len(), 1);
    }
    #[test]
    fn path_encoding() {
        let h = std::f64::consts::FRAC_1_SQRT_2;
        let state = FockState::from_terms(
            5,
            [
                (c(h, 0.0), [1, 0, 1, 0, 1]),
                (c(0.0, h), [0, 1, 0, 1, 1]),
                (c(0.1, 0.0), [1, 1, 0, 0, 1]),
            ],
        ).unwrap();
        let pairs = [(0, 1), (2, 3)];
        let qubits = state.encode(&pairs).unwrap();
        assert_eq!(qubits.num_modes(), 2);
        assert_eq!(qubits.len(), 2);
        assert_abs_diff_eq!(qubits.amplitude(&[1, 1].into()).re, h);
        assert_abs_diff_eq!(qubits.amplitude(&[0, 0].into()).im, h);

        let back = qubits.decode(&pairs, &[0, 0, 0, 0, 1].into()).unwrap();
        assert_eq!(back.len(), 2);
        for (occ, a) in back.iter() {
            assert_abs_diff_eq!((state.amplitude(occ) - a).norm(), 0.0);
        }
    }

    #[test]
    fn bad_encodings() {
        let state = FockState::from_terms(
            3, [(c(0.6, 0.0), [1, 0, 0]), (c(0.8, 0.0), [1, 0, 1])]).unwrap();
        assert!(state.encode(&[(0, 1)]).is_err());
        assert!(state.encode(&[(0, 0)]).is_err());
        assert!(matches!(
            state.encode(&[(0, 3)]),
            Err(SimError::InvalidIndex { what: "mode", .. })
        ));
        let not_qubits = FockState::from_occupation([2].into());
        assert!(not_qubits.decode(&[(0, 1)], &Occupation::vacuum(2)).is_err());
    }
}
