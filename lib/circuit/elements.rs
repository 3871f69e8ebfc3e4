//! Elementary optical elements and their local transfer matrices.
//!
//! All angles are in degrees. Local matrices are indexed as `[output, input]`.

use ndarray as nd;
use num_complex::Complex64 as C64;
use crate::{
    error::{ SimError, SimResult },
    photon::Polarization,
};

/// A (channel, polarization) pair addressed by an element.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Port {
    pub channel: usize,
    pub pol: Polarization,
}

impl Port {
    pub fn new(channel: usize, pol: Polarization) -> Self {
        Self { channel, pol }
    }
}

impl From<(usize, Polarization)> for Port {
    fn from(cp: (usize, Polarization)) -> Self {
        let (channel, pol) = cp;
        Self { channel, pol }
    }
}

/// Descriptor of one element in a circuit.
#[derive(Clone, Debug, PartialEq)]
pub enum Element {
    Beamsplitter { ch1: usize, ch2: usize, theta: f64, phi: f64 },
    Dielectric { ch1: usize, ch2: usize, t: C64, r: C64 },
    Mmi2 { ch1: usize, ch2: usize },
    Rewire { ch1: usize, ch2: usize },
    PhaseShifter { ch: usize, phi: f64 },
    LossyPhaseShifter { ch: usize, t: C64 },
    Loss { ch: usize, l: f64 },
    Rotator { ch: usize, theta: f64, phi: f64 },
    PolBeamsplitter { ch1: usize, ch2: usize, pol: Polarization },
    Waveplate { ch: usize, alpha: f64, gamma: f64 },
    Delay { ch: usize, bins: isize },
    /// Delay of the packets passing through a channel by a continuous time.
    TimeDelay { ch: usize, dt: f64 },
    /// Arbitrary matrix acting on whole channels.
    Channels { channels: Vec<usize>, matrix: nd::Array2<C64> },
    /// Arbitrary matrix acting on individual ports.
    Custom { ports: Vec<Port>, matrix: nd::Array2<C64> },
}

/// What an element does to the mode space.
#[derive(Clone, Debug)]
pub(crate) enum Action {
    /// Matrix acting on channels, identical for every polarization and time
    /// bin.
    Channels(Vec<usize>, nd::Array2<C64>),
    /// Matrix acting on ports, identical for every time bin.
    Ports(Vec<Port>, nd::Array2<C64>),
    /// Cyclic shift of the time bins of one channel.
    Shift(usize, isize),
    /// Re-timing of the packets of photons routed through one channel.
    Retime(usize, f64),
}

fn rad(deg: f64) -> f64 { deg.to_radians() }

fn mat2(u00: C64, u01: C64, u10: C64, u11: C64) -> nd::Array2<C64> {
    nd::array![[u00, u01], [u10, u11]]
}

/// `[[cos θ, -e^{iφ} sin θ], [e^{-iφ} sin θ, cos θ]]`
pub fn beamsplitter_matrix(theta: f64, phi: f64) -> nd::Array2<C64> {
    let (s, c) = rad(theta).sin_cos();
    let ph = C64::from_polar(1.0, rad(phi));
    mat2(c.into(), -ph * s, ph.conj() * s, c.into())
}

/// `[[t, r], [r, t]]`
pub fn dielectric_matrix(t: C64, r: C64) -> nd::Array2<C64> {
    mat2(t, r, r, t)
}

/// General waveplate acting on (H, V) with fast-axis angle `alpha` and
/// retardance `gamma`.
pub fn waveplate_matrix(alpha: f64, gamma: f64) -> nd::Array2<C64> {
    let (sg, cg) = rad(gamma).sin_cos();
    let (s2a, c2a) = (2.0 * rad(alpha)).sin_cos();
    let i = C64::i();
    mat2(
        i * sg * c2a + cg,
        i * sg * s2a,
        i * sg * s2a,
        -i * sg * c2a + cg,
    )
}

/// Swap polarization `pol` between two channels and transmit the other; ports
/// are ordered `(ch1, pol), (ch1, other), (ch2, pol), (ch2, other)`.
fn pol_beamsplitter_matrix() -> nd::Array2<C64> {
    let o = C64::from(0.0);
    let l = C64::from(1.0);
    nd::array![
        [o, o, l, o],
        [o, l, o, o],
        [l, o, o, o],
        [o, o, o, l],
    ]
}

fn other_pol(pol: Polarization) -> Polarization {
    match pol {
        Polarization::H => Polarization::V,
        Polarization::V => Polarization::H,
    }
}

impl Element {
    /// Return `true` if the element acts on polarization and therefore needs
    /// a two-polarization mode space.
    pub fn needs_polarization(&self) -> bool {
        matches!(
            self,
            Self::Rotator { .. }
            | Self::PolBeamsplitter { .. }
            | Self::Waveplate { .. }
        )
    }

    pub(crate) fn action(&self) -> SimResult<Action> {
        let act = match self {
            Self::Beamsplitter { ch1, ch2, theta, phi } => Action::Channels(
                vec![*ch1, *ch2], beamsplitter_matrix(*theta, *phi)),
            Self::Dielectric { ch1, ch2, t, r } => Action::Channels(
                vec![*ch1, *ch2], dielectric_matrix(*t, *r)),
            Self::Mmi2 { ch1, ch2 } => {
                let t = C64::from(std::f64::consts::FRAC_1_SQRT_2);
                let r = C64::i() * std::f64::consts::FRAC_1_SQRT_2;
                Action::Channels(vec![*ch1, *ch2], dielectric_matrix(t, r))
            },
            Self::Rewire { ch1, ch2 } => Action::Channels(
                vec![*ch1, *ch2], dielectric_matrix(0.0.into(), 1.0.into())),
            Self::PhaseShifter { ch, phi } => Action::Channels(
                vec![*ch],
                nd::array![[C64::from_polar(1.0, rad(*phi))]],
            ),
            Self::LossyPhaseShifter { ch, t } => Action::Channels(
                vec![*ch], nd::array![[*t]]),
            Self::Loss { ch, l } => {
                if !(0.0..=1.0).contains(l) {
                    return Err(SimError::config(format!(
                        "loss must be in [0, 1]; got {}", l)));
                }
                Action::Channels(vec![*ch], nd::array![[C64::from((1.0 - l).sqrt())]])
            },
            Self::Rotator { ch, theta, phi } => Action::Ports(
                vec![Port::new(*ch, Polarization::H), Port::new(*ch, Polarization::V)],
                beamsplitter_matrix(*theta, *phi),
            ),
            Self::PolBeamsplitter { ch1, ch2, pol } => Action::Ports(
                vec![
                    Port::new(*ch1, *pol),
                    Port::new(*ch1, other_pol(*pol)),
                    Port::new(*ch2, *pol),
                    Port::new(*ch2, other_pol(*pol)),
                ],
                pol_beamsplitter_matrix(),
            ),
            Self::Waveplate { ch, alpha, gamma } => Action::Ports(
                vec![Port::new(*ch, Polarization::H), Port::new(*ch, Polarization::V)],
                waveplate_matrix(*alpha, *gamma),
            ),
            Self::Delay { ch, bins } => Action::Shift(*ch, *bins),
            Self::TimeDelay { ch, dt } => {
                if !dt.is_finite() {
                    return Err(SimError::config(format!(
                        "time delay must be finite; got {}", dt)));
                }
                Action::Retime(*ch, *dt)
            },
            Self::Channels { channels, matrix } => Action::Channels(
                channels.clone(), matrix.clone()),
            Self::Custom { ports, matrix } => Action::Ports(
                ports.clone(), matrix.clone()),
        };
        Ok(act)
    }
}

#[cfg(test)]
mod test {
    use approx::assert_abs_diff_eq;
    use super::*;

    fn is_unitary(u: &nd::Array2<C64>) -> bool {
        let n = u.nrows();
        let uh = u.t().mapv(|z| z.conj());
        let prod = u.dot(&uh);
        (0..n).all(|i| {
            (0..n).all(|j| {
                let target = if i == j { 1.0 } else { 0.0 };
                (prod[[i, j]] - target).norm() < 1e-12
            })
        })
    }

    #[test]
    fn element_matrices_are_unitary() {
        assert!(is_unitary(&beamsplitter_matrix(33.0, 71.0)));
        assert!(is_unitary(&waveplate_matrix(22.5, 90.0)));
        assert!(is_unitary(&waveplate_matrix(10.0, 45.0)));
        assert!(is_unitary(&pol_beamsplitter_matrix()));
        let Action::Channels(_, mmi) = Element::Mmi2 { ch1: 0, ch2: 1 }
            .action().unwrap() else { panic!() };
        assert!(is_unitary(&mmi));
    }

    #[test]
    fn balanced_beamsplitter() {
        let u = beamsplitter_matrix(45.0, 0.0);
        let h = std::f64::consts::FRAC_1_SQRT_2;
        assert_abs_diff_eq!(u[[0, 0]].re, h, epsilon = 1e-12);
        assert_abs_diff_eq!(u[[0, 1]].re, -h, epsilon = 1e-12);
        assert_abs_diff_eq!(u[[1, 0]].re, h, epsilon = 1e-12);
    }

    #[test]
    fn half_waveplate_flips_polarization() {
        // fast axis at 45 degrees maps H -> V up to a phase
        let u = waveplate_matrix(45.0, 90.0);
        assert_abs_diff_eq!(u[[0, 0]].norm(), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(u[[1, 0]].norm(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn bad_loss() {
        assert!(Element::Loss { ch: 0, l: 1.5 }.action().is_err());
    }
}
