//! Mode spaces, optical circuits, and their aggregate transfer matrices.
//!
//! Circuits are assembled with a [`CircuitBuilder`], which accumulates element
//! matrices as row operations on a working transfer matrix and finalizes into
//! an immutable [`Circuit`].

use indexmap::IndexMap;
use ndarray as nd;
use ndarray_linalg::{ Eigh, UPLO };
use num_complex::Complex64 as C64;
use crate::{
    error::{ SimError, SimResult },
    photon::PhotonModel,
};

pub mod detector;
pub use detector::{ Condition, Detector, TimeResolution };

pub mod elements;
pub use elements::{ Element, Port };

pub mod builder;
pub use builder::{ CircuitBuilder, haar_unitary };

pub mod bunch;
pub use bunch::{ Photon, PhotonBunch };

/// Tolerance on eigenvalues when checking element contractivity and computing
/// loss dilations.
pub(crate) const UNITARITY_TOL: f64 = 1e-9;

/* Mode space *****************************************************************/

/// Layout of the modes a circuit acts on.
///
/// Modes are indexed as `((channel * pols) + pol) * slots + slot`. With losses
/// enabled, each physical channel `ch` is paired with a loss channel
/// `ch + channels`, so loss modes follow all physical modes in the same order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ModeSpace {
    channels: usize,
    pols: usize,
    slots: usize,
    losses: bool,
}

impl ModeSpace {
    /// Create a new mode space.
    ///
    /// `pols` must be 1 or 2, and `channels` and `slots` must be non-zero.
    pub fn new(channels: usize, pols: usize, slots: usize, losses: bool)
        -> SimResult<Self>
    {
        if channels == 0 || slots == 0 {
            return Err(SimError::config(
                "mode space needs at least one channel and one time bin"));
        }
        if !(1..=2).contains(&pols) {
            return Err(SimError::config(format!(
                "number of polarizations must be 1 or 2; got {}", pols)));
        }
        Ok(Self { channels, pols, slots, losses })
    }

    /// Single polarization, single time bin, lossless.
    pub fn simple(channels: usize) -> SimResult<Self> {
        Self::new(channels, 1, 1, false)
    }

    /// Number of physical channels.
    pub fn channels(&self) -> usize { self.channels }

    /// Number of channels including loss channels.
    pub fn total_channels(&self) -> usize {
        if self.losses { 2 * self.channels } else { self.channels }
    }

    pub fn pols(&self) -> usize { self.pols }

    pub fn slots(&self) -> usize { self.slots }

    pub fn has_losses(&self) -> bool { self.losses }

    /// Number of modes excluding loss channels.
    pub fn num_physical_modes(&self) -> usize {
        self.channels * self.pols * self.slots
    }

    /// Number of modes including loss channels.
    pub fn num_modes(&self) -> usize {
        self.total_channels() * self.pols * self.slots
    }

    /// Flattened index of `(channel, pol, slot)`; `channel` may address a loss
    /// channel.
    pub fn mode(&self, channel: usize, pol: usize, slot: usize)
        -> SimResult<usize>
    {
        if channel >= self.total_channels() {
            return Err(SimError::index("channel", channel, self.total_channels()));
        }
        if pol >= self.pols {
            return Err(SimError::index("polarization", pol, self.pols));
        }
        if slot >= self.slots {
            return Err(SimError::index("time bin", slot, self.slots));
        }
        Ok((channel * self.pols + pol) * self.slots + slot)
    }

    /// Index of the loss mode paired with physical `(channel, pol, slot)`.
    pub fn loss_mode(&self, channel: usize, pol: usize, slot: usize)
        -> SimResult<usize>
    {
        if !self.losses {
            return Err(SimError::config("mode space has no loss channels"));
        }
        if channel >= self.channels {
            return Err(SimError::index("channel", channel, self.channels));
        }
        self.mode(channel + self.channels, pol, slot)
    }

    /// Inverse of [`Self::mode`].
    pub fn decompose(&self, mode: usize) -> SimResult<(usize, usize, usize)> {
        if mode >= self.num_modes() {
            return Err(SimError::index("mode", mode, self.num_modes()));
        }
        let slot = mode % self.slots;
        let pol = (mode / self.slots) % self.pols;
        let channel = mode / (self.slots * self.pols);
        Ok((channel, pol, slot))
    }

    /// Channel of a mode, without range checking.
    pub(crate) fn channel_of(&self, mode: usize) -> usize {
        mode / (self.slots * self.pols)
    }

    pub fn is_loss_mode(&self, mode: usize) -> bool {
        mode >= self.num_physical_modes() && mode < self.num_modes()
    }

    /// All modes belonging to a channel.
    pub fn channel_modes(&self, channel: usize) -> SimResult<Vec<usize>> {
        if channel >= self.total_channels() {
            return Err(SimError::index("channel", channel, self.total_channels()));
        }
        let n = self.pols * self.slots;
        Ok((channel * n..(channel + 1) * n).collect())
    }

    /// All loss modes.
    pub fn loss_modes(&self) -> Vec<usize> {
        (self.num_physical_modes()..self.num_modes()).collect()
    }
}

/* Circuits *******************************************************************/

/// A finalized, immutable optical circuit.
#[derive(Clone, Debug)]
pub struct Circuit {
    pub(crate) modes: ModeSpace,
    pub(crate) transfer: nd::Array2<C64>,
    pub(crate) matrix: nd::Array2<C64>,
    pub(crate) photons: PhotonModel,
    pub(crate) detectors: IndexMap<usize, Detector>,
    pub(crate) ignored: Vec<usize>,
    pub(crate) time_resolution: TimeResolution,
    pub(crate) retiming: Vec<f64>,
    pub(crate) elements: Vec<Element>,
}

impl Circuit {
    pub(crate) fn finalize(
        modes: ModeSpace,
        transfer: nd::Array2<C64>,
        photons: PhotonModel,
        detectors: IndexMap<usize, Detector>,
        ignored: Vec<usize>,
        time_resolution: TimeResolution,
        retiming: Vec<f64>,
        elements: Vec<Element>,
    ) -> SimResult<Self>
    {
        if retiming.len() != modes.channels() {
            return Err(SimError::InternalConsistency(format!(
                "{} time offsets for {} channels",
                retiming.len(), modes.channels(),
            )));
        }
        for (ch, det) in detectors.iter() {
            if det.condition.is_some() && ignored.contains(ch) {
                return Err(SimError::config(format!(
                    "channel {} carries a post-selection condition but is \
                    ignored",
                    ch,
                )));
            }
        }
        let matrix
            = if modes.has_losses() {
                tracing::debug!(
                    physical_modes = modes.num_physical_modes(),
                    "computing loss dilation",
                );
                dilate(&transfer)?
            } else {
                transfer.clone()
            };
        tracing::debug!(
            modes = modes.num_modes(),
            elements = elements.len(),
            detectors = detectors.len(),
            "finalized circuit",
        );
        Ok(Self {
            modes,
            transfer,
            matrix,
            photons,
            detectors,
            ignored,
            time_resolution,
            retiming,
            elements,
        })
    }

    pub fn modes(&self) -> &ModeSpace { &self.modes }

    /// Number of modes of the states this circuit acts on, including loss
    /// modes.
    pub fn num_modes(&self) -> usize { self.modes.num_modes() }

    /// Transfer matrix over the physical modes. This is unitary for a lossless
    /// circuit and contractive otherwise.
    pub fn transfer(&self) -> &nd::Array2<C64> { &self.transfer }

    /// Unitary acting on all modes; equal to [`Self::transfer`] for a lossless
    /// circuit and its dilation over loss channels otherwise.
    pub fn matrix(&self) -> &nd::Array2<C64> { &self.matrix }

    pub fn photons(&self) -> &PhotonModel { &self.photons }

    pub fn detectors(&self) -> &IndexMap<usize, Detector> { &self.detectors }

    pub fn detector(&self, channel: usize) -> Option<&Detector> {
        self.detectors.get(&channel)
    }

    /// All post-selection conditions as `(channel, condition)` pairs.
    pub fn conditions(&self) -> Vec<(usize, Condition)> {
        self.detectors.iter()
            .filter_map(|(ch, det)| det.condition.map(|cond| (*ch, cond)))
            .collect()
    }

    pub fn ignored(&self) -> &[usize] { &self.ignored }

    pub fn time_resolution(&self) -> TimeResolution { self.time_resolution }

    /// Emission-time offset picked up by photons entering each physical
    /// channel, accumulated from time delays.
    pub fn retiming(&self) -> &[f64] { &self.retiming }

    pub fn elements(&self) -> &[Element] { &self.elements }

    /// Serial composition: `self` followed by `next`.
    ///
    /// Both circuits must share a mode space. The photon model of `next` is
    /// appended to that of `self`, so packet indices used with `next` shift by
    /// the length of `self`'s model. Detectors defined on both circuits take
    /// their settings from `next`. Time delays of `next` are carried back to
    /// the inputs of `self`, which fails if `self` mixes the delayed channel
    /// with another.
    pub fn concatenate(&self, next: &Circuit) -> SimResult<Circuit> {
        if self.modes != next.modes {
            return Err(SimError::config(format!(
                "cannot concatenate circuits over different mode spaces \
                ({:?} and {:?})",
                self.modes, next.modes,
            )));
        }
        let transfer = next.transfer.dot(&self.transfer);
        let mut photons = self.photons.clone();
        photons.merge(&next.photons)?;
        let mut detectors = self.detectors.clone();
        next.detectors.iter()
            .for_each(|(ch, det)| { detectors.insert(*ch, *det); });
        let mut ignored = self.ignored.clone();
        next.ignored.iter()
            .for_each(|ch| { if !ignored.contains(ch) { ignored.push(*ch); } });
        let mut retiming = self.retiming.clone();
        for (ch, dt) in next.retiming.iter().enumerate() {
            if *dt == 0.0 { continue; }
            if let Some(src) = feeding_channel(&self.modes, &self.transfer, ch)? {
                retiming[src] += dt;
            }
        }
        let elements: Vec<Element>
            = self.elements.iter().chain(next.elements.iter())
            .cloned()
            .collect();
        Self::finalize(
            self.modes,
            transfer,
            photons,
            detectors,
            ignored,
            next.time_resolution,
            retiming,
            elements,
        )
    }
}

fn coupled(transfer: &nd::Array2<C64>, rows: &[usize], cols: &[usize]) -> bool {
    rows.iter()
        .any(|r| cols.iter().any(|c| transfer[[*r, *c]].norm() > UNITARITY_TOL))
}

/// Find the single input channel that feeds physical channel `ch` through
/// `transfer`, or `None` if nothing reaches `ch`.
///
/// A time delay on `ch` is a re-labeling of the packets of photons entering
/// that channel, so `ch` and its source must not be coupled to any other
/// channel.
pub(crate) fn feeding_channel(
    modes: &ModeSpace,
    transfer: &nd::Array2<C64>,
    ch: usize,
) -> SimResult<Option<usize>>
{
    let nch = modes.channels();
    if ch >= nch { return Err(SimError::index("channel", ch, nch)); }
    let blocks: Vec<Vec<usize>>
        = (0..nch)
        .map(|c| modes.channel_modes(c))
        .collect::<SimResult<_>>()?;
    let sources: Vec<usize>
        = (0..nch)
        .filter(|c| coupled(transfer, &blocks[ch], &blocks[*c]))
        .collect();
    let src
        = match sources.as_slice() {
            [] => { return Ok(None); },
            [src] => *src,
            _ => {
                return Err(SimError::config(format!(
                    "time delay on channel {} after it is mixed with channels \
                    {:?}",
                    ch, sources,
                )));
            },
        };
    let sinks: Vec<usize>
        = (0..nch)
        .filter(|c| coupled(transfer, &blocks[*c], &blocks[src]))
        .collect();
    if sinks != [ch] {
        return Err(SimError::config(format!(
            "time delay on channel {} but its input channel {} also reaches \
            channels {:?}",
            ch, src, sinks,
        )));
    }
    Ok(Some(src))
}

/// Hermitian conjugate.
pub(crate) fn dagger(m: &nd::Array2<C64>) -> nd::Array2<C64> {
    m.t().mapv(|z| z.conj())
}

/// Square root of a positive semi-definite Hermitian matrix.
///
/// Eigenvalues down to `-UNITARITY_TOL` are treated as zero.
fn psd_sqrt(h: &nd::Array2<C64>) -> SimResult<nd::Array2<C64>> {
    let (w, v) = h.eigh(UPLO::Lower)?;
    if let Some(bad) = w.iter().find(|x| **x < -UNITARITY_TOL) {
        return Err(SimError::config(format!(
            "transfer matrix is not contractive (I - T T^dagger has \
            eigenvalue {:e})",
            bad,
        )));
    }
    let sqrt_w: nd::Array1<C64>
        = w.iter().map(|x| C64::from(x.max(0.0).sqrt())).collect();
    let vd = dagger(&v);
    Ok(v.dot(&nd::Array2::from_diag(&sqrt_w)).dot(&vd))
}

/// Unitary dilation of a contractive matrix `T`:
/// ```text
/// [[ T, (I - T T^dagger)^(1/2) ],
///  [ (I - T^dagger T)^(1/2), -T^dagger ]]
/// ```
pub(crate) fn dilate(t: &nd::Array2<C64>) -> SimResult<nd::Array2<C64>> {
    let n = t.nrows();
    let td = dagger(t);
    let eye: nd::Array2<C64> = nd::Array2::eye(n);
    let a = psd_sqrt(&(&eye - &t.dot(&td)))?;
    let b = psd_sqrt(&(&eye - &td.dot(t)))?;
    let mut u: nd::Array2<C64> = nd::Array2::zeros((2 * n, 2 * n));
    u.slice_mut(nd::s![..n, ..n]).assign(t);
    u.slice_mut(nd::s![..n, n..]).assign(&a);
    u.slice_mut(nd::s![n.., ..n]).assign(&b);
    u.slice_mut(nd::s![n.., n..]).assign(&td.mapv(|z| -z));
    Ok(u)
}

/// Largest singular value squared must not exceed one; for `unitary`, all of
/// them must equal one.
pub(crate) fn check_contractive(m: &nd::Array2<C64>, unitary: bool)
    -> SimResult<()>
{
    let (w, _) = dagger(m).dot(m).eigh(UPLO::Lower)?;
    let max = w.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = w.iter().copied().fold(f64::INFINITY, f64::min);
    if max > 1.0 + UNITARITY_TOL {
        return Err(SimError::config(format!(
            "element matrix amplifies (largest |singular value|^2 = {})", max)));
    }
    if unitary && min < 1.0 - UNITARITY_TOL {
        return Err(SimError::config(
            "lossy element in a mode space without loss channels"));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use approx::assert_abs_diff_eq;
    use super::*;

    #[test]
    fn mode_indexing() {
        let ms = ModeSpace::new(3, 2, 4, true).unwrap();
        assert_eq!(ms.num_physical_modes(), 24);
        assert_eq!(ms.num_modes(), 48);
        let m = ms.mode(2, 1, 3).unwrap();
        assert_eq!(m, (2 * 2 + 1) * 4 + 3);
        assert_eq!(ms.decompose(m).unwrap(), (2, 1, 3));
        let l = ms.loss_mode(2, 1, 3).unwrap();
        assert_eq!(l, m + 24);
        assert!(ms.is_loss_mode(l));
        assert!(!ms.is_loss_mode(m));
        assert!(matches!(
            ms.mode(0, 2, 0),
            Err(SimError::InvalidIndex { what: "polarization", .. })
        ));
        assert!(ModeSpace::new(2, 3, 1, false).is_err());
    }

    #[test]
    fn dilation_is_unitary() {
        let t: nd::Array2<C64> = nd::array![
            [C64::new(0.6, 0.0), C64::new(0.0, 0.3)],
            [C64::new(0.2, 0.1), C64::new(0.5, -0.2)],
        ];
        let u = dilate(&t).unwrap();
        let prod = u.dot(&dagger(&u));
        for i in 0..4 {
            for j in 0..4 {
                let target = if i == j { 1.0 } else { 0.0 };
                assert_abs_diff_eq!((prod[[i, j]] - target).norm(), 0.0, epsilon = 1e-10);
            }
        }
        assert_abs_diff_eq!((u[[1, 0]] - t[[1, 0]]).norm(), 0.0);
    }

    #[test]
    fn amplifying_matrix_is_rejected() {
        let m: nd::Array2<C64> = nd::array![[C64::from(1.2)]];
        assert!(check_contractive(&m, false).is_err());
        let m: nd::Array2<C64> = nd::array![[C64::from(0.5)]];
        assert!(check_contractive(&m, false).is_ok());
        assert!(check_contractive(&m, true).is_err());
    }
}
