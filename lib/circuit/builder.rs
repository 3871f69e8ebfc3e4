//! Incremental construction of [`Circuit`]s.

use indexmap::IndexMap;
use ndarray as nd;
use ndarray_linalg::QR;
use num_complex::Complex64 as C64;
use rand::Rng;
use rand_distr::StandardNormal;
use crate::{
    circuit::{
        elements::Action,
        Circuit,
        Condition,
        Detector,
        Element,
        ModeSpace,
        Port,
        TimeResolution,
        check_contractive,
        feeding_channel,
    },
    error::{ SimError, SimResult },
    photon::{ Polarization, PhotonModel },
};

/// Draw a Haar-random `n x n` unitary.
pub fn haar_unitary<R>(n: usize, rng: &mut R) -> SimResult<nd::Array2<C64>>
where R: Rng + ?Sized
{
    let z: nd::Array2<C64>
        = nd::Array2::from_shape_simple_fn((n, n), || {
            let re: f64 = rng.sample(StandardNormal);
            let im: f64 = rng.sample(StandardNormal);
            C64::new(re, im) * std::f64::consts::FRAC_1_SQRT_2
        });
    let (mut q, r) = z.qr()?;
    for (j, mut col) in q.columns_mut().into_iter().enumerate() {
        let d = r[[j, j]];
        if d.norm() > 0.0 {
            let phase = d / d.norm();
            col.mapv_inplace(|x| x * phase);
        }
    }
    Ok(q)
}

/// Replace rows `modes` of `t` with `m` times those rows.
fn apply_rows(t: &mut nd::Array2<C64>, modes: &[usize], m: &nd::Array2<C64>) {
    let rows = t.select(nd::Axis(0), modes);
    let new = m.dot(&rows);
    for (k, &mode) in modes.iter().enumerate() {
        t.row_mut(mode).assign(&new.row(k));
    }
}

fn check_distinct<T>(items: &[T], what: &str) -> SimResult<()>
where T: PartialEq + std::fmt::Debug
{
    for (k, a) in items.iter().enumerate() {
        if items[k + 1..].contains(a) {
            return Err(SimError::config(format!(
                "{} {:?} addressed more than once by an element", what, a)));
        }
    }
    Ok(())
}

/// Builder for a [`Circuit`].
///
/// Element methods validate their arguments and apply the element immediately,
/// returning `&mut Self` for chaining:
/// ```ignore
/// let mut builder = CircuitBuilder::new(ModeSpace::simple(2)?);
/// builder.beamsplitter(0, 1, 45.0, 0.0)?.phase_shifter(1, 90.0)?;
/// let circuit = builder.build()?;
/// ```
/// Elements act on the physical modes only; loss channels are attached when
/// the circuit is [built][Self::build].
#[derive(Clone, Debug)]
pub struct CircuitBuilder {
    modes: ModeSpace,
    transfer: nd::Array2<C64>,
    photons: PhotonModel,
    detectors: IndexMap<usize, Detector>,
    ignored: Vec<usize>,
    time_resolution: TimeResolution,
    retiming: Vec<f64>,
    elements: Vec<Element>,
}

impl CircuitBuilder {
    /// Create a new builder for the identity circuit over `modes`.
    pub fn new(modes: ModeSpace) -> Self {
        let n = modes.num_physical_modes();
        Self {
            modes,
            transfer: nd::Array2::eye(n),
            photons: PhotonModel::default(),
            detectors: IndexMap::new(),
            ignored: Vec::new(),
            time_resolution: TimeResolution::default(),
            retiming: vec![0.0; modes.channels()],
            elements: Vec::new(),
        }
    }

    pub fn modes(&self) -> &ModeSpace { &self.modes }

    /// Working transfer matrix over the physical modes.
    pub fn transfer(&self) -> &nd::Array2<C64> { &self.transfer }

    pub fn photons(&self) -> &PhotonModel { &self.photons }

    /// Mutable access to the photon model, for registering packets.
    pub fn photons_mut(&mut self) -> &mut PhotonModel { &mut self.photons }

    /// Replace the photon model.
    pub fn set_photons(&mut self, photons: PhotonModel) -> &mut Self {
        self.photons = photons;
        self
    }

    fn check_channel(&self, ch: usize) -> SimResult<()> {
        (ch < self.modes.channels()).then_some(())
            .ok_or(SimError::index("channel", ch, self.modes.channels()))
    }

    fn check_block(&self, m: &nd::Array2<C64>, n: usize) -> SimResult<()> {
        if m.nrows() != n || m.ncols() != n {
            return Err(SimError::config(format!(
                "element matrix has shape {:?} but addresses {} ports",
                m.shape(), n,
            )));
        }
        check_contractive(m, !self.modes.has_losses())
    }

    fn apply(&mut self, action: &Action) -> SimResult<()> {
        match action {
            Action::Channels(channels, m) => {
                for ch in channels.iter() { self.check_channel(*ch)?; }
                check_distinct(channels, "channel")?;
                self.check_block(m, channels.len())?;
                for pol in 0..self.modes.pols() {
                    for slot in 0..self.modes.slots() {
                        let modes: Vec<usize>
                            = channels.iter()
                            .map(|ch| self.modes.mode(*ch, pol, slot))
                            .collect::<SimResult<_>>()?;
                        apply_rows(&mut self.transfer, &modes, m);
                    }
                }
            },
            Action::Ports(ports, m) => {
                for port in ports.iter() { self.check_channel(port.channel)?; }
                check_distinct(ports, "port")?;
                self.check_block(m, ports.len())?;
                for slot in 0..self.modes.slots() {
                    let modes: Vec<usize>
                        = ports.iter()
                        .map(|p| self.modes.mode(p.channel, p.pol.index(), slot))
                        .collect::<SimResult<_>>()?;
                    apply_rows(&mut self.transfer, &modes, m);
                }
            },
            Action::Shift(ch, bins) => {
                self.check_channel(*ch)?;
                let nslots = self.modes.slots() as isize;
                for pol in 0..self.modes.pols() {
                    let modes: Vec<usize>
                        = (0..self.modes.slots())
                        .map(|slot| self.modes.mode(*ch, pol, slot))
                        .collect::<SimResult<_>>()?;
                    let rows = self.transfer.select(nd::Axis(0), &modes);
                    for (s, row) in rows.rows().into_iter().enumerate() {
                        let target = (s as isize + bins).rem_euclid(nslots);
                        self.transfer.row_mut(modes[target as usize]).assign(&row);
                    }
                }
            },
            Action::Retime(ch, dt) => {
                self.check_channel(*ch)?;
                let src = feeding_channel(&self.modes, &self.transfer, *ch)?;
                if let Some(src) = src { self.retiming[src] += dt; }
            },
        }
        Ok(())
    }

    /// Validate and apply an element.
    pub fn push(&mut self, element: Element) -> SimResult<&mut Self> {
        if element.needs_polarization() && self.modes.pols() != 2 {
            return Err(SimError::config(format!(
                "{:?} needs a mode space with two polarizations", element)));
        }
        let action = element.action()?;
        self.apply(&action)?;
        self.elements.push(element);
        Ok(self)
    }

    pub fn beamsplitter(&mut self, ch1: usize, ch2: usize, theta: f64, phi: f64)
        -> SimResult<&mut Self>
    {
        self.push(Element::Beamsplitter { ch1, ch2, theta, phi })
    }

    pub fn dielectric(&mut self, ch1: usize, ch2: usize, t: C64, r: C64)
        -> SimResult<&mut Self>
    {
        self.push(Element::Dielectric { ch1, ch2, t, r })
    }

    /// Balanced two-port multimode interference coupler.
    pub fn mmi2(&mut self, ch1: usize, ch2: usize) -> SimResult<&mut Self> {
        self.push(Element::Mmi2 { ch1, ch2 })
    }

    /// Swap two channels.
    pub fn rewire(&mut self, ch1: usize, ch2: usize) -> SimResult<&mut Self> {
        self.push(Element::Rewire { ch1, ch2 })
    }

    pub fn phase_shifter(&mut self, ch: usize, phi: f64)
        -> SimResult<&mut Self>
    {
        self.push(Element::PhaseShifter { ch, phi })
    }

    /// Phase shifter with complex transmission `t`, `|t| <= 1`.
    pub fn lossy_phase_shifter(&mut self, ch: usize, t: C64)
        -> SimResult<&mut Self>
    {
        self.push(Element::LossyPhaseShifter { ch, t })
    }

    /// Lose a fraction `l` of the photons in a channel.
    pub fn loss(&mut self, ch: usize, l: f64) -> SimResult<&mut Self> {
        self.push(Element::Loss { ch, l })
    }

    /// Polarization rotator; the beamsplitter matrix acting on (H, V).
    pub fn rotator(&mut self, ch: usize, theta: f64, phi: f64)
        -> SimResult<&mut Self>
    {
        self.push(Element::Rotator { ch, theta, phi })
    }

    /// Polarizing beamsplitter exchanging polarization `pol` between two
    /// channels.
    pub fn pol_beamsplitter(&mut self, ch1: usize, ch2: usize, pol: Polarization)
        -> SimResult<&mut Self>
    {
        self.push(Element::PolBeamsplitter { ch1, ch2, pol })
    }

    pub fn waveplate(&mut self, ch: usize, alpha: f64, gamma: f64)
        -> SimResult<&mut Self>
    {
        self.push(Element::Waveplate { ch, alpha, gamma })
    }

    /// Half-wave plate.
    pub fn half(&mut self, ch: usize, alpha: f64) -> SimResult<&mut Self> {
        self.waveplate(ch, alpha, 90.0)
    }

    /// Quarter-wave plate.
    pub fn quarter(&mut self, ch: usize, alpha: f64) -> SimResult<&mut Self> {
        self.waveplate(ch, alpha, 45.0)
    }

    /// Arbitrary contractive matrix over a list of ports.
    pub fn custom_gate<P>(&mut self, ports: &[P], matrix: nd::Array2<C64>)
        -> SimResult<&mut Self>
    where P: Into<Port> + Copy
    {
        let ports: Vec<Port> = ports.iter().map(|p| (*p).into()).collect();
        self.push(Element::Custom { ports, matrix })
    }

    /// Arbitrary contractive matrix over a list of channels, acting
    /// identically on every polarization and time bin.
    pub fn channel_gate(&mut self, channels: &[usize], matrix: nd::Array2<C64>)
        -> SimResult<&mut Self>
    {
        self.push(Element::Channels { channels: channels.to_vec(), matrix })
    }

    /// Shift the time bins of a channel by `bins`, wrapping around.
    pub fn delay(&mut self, ch: usize, bins: isize) -> SimResult<&mut Self> {
        self.push(Element::Delay { ch, bins })
    }

    /// Delay the packets of photons passing through a channel by `dt`.
    ///
    /// Photons are re-labeled with their delayed packets, so the delay changes
    /// their overlaps with other photons. The channel must not yet have been
    /// mixed with another channel.
    pub fn delay_time(&mut self, ch: usize, dt: f64) -> SimResult<&mut Self> {
        self.push(Element::TimeDelay { ch, dt })
    }

    /// Apply a Haar-random unitary over all physical channels.
    pub fn random_circuit<R>(&mut self, rng: &mut R) -> SimResult<&mut Self>
    where R: Rng + ?Sized
    {
        let n = self.modes.channels();
        let matrix = haar_unitary(n, rng)?;
        self.push(Element::Channels { channels: (0..n).collect(), matrix })
    }

    /// Attach an ideal detector without a post-selection condition.
    pub fn detector(&mut self, ch: usize) -> SimResult<&mut Self> {
        self.detector_with(ch, Detector::default())
    }

    /// Attach an ideal detector with a post-selection condition.
    pub fn detector_cond(&mut self, ch: usize, condition: Condition)
        -> SimResult<&mut Self>
    {
        self.detector_with(ch, Detector::default().with_condition(condition))
    }

    /// Attach a detector.
    pub fn detector_with(&mut self, ch: usize, detector: Detector)
        -> SimResult<&mut Self>
    {
        self.check_channel(ch)?;
        detector.validate()?;
        if self.detectors.contains_key(&ch) {
            return Err(SimError::config(format!(
                "channel {} already has a detector", ch)));
        }
        self.detectors.insert(ch, detector);
        Ok(self)
    }

    /// Trace a channel out of measurement results.
    pub fn ignore(&mut self, ch: usize) -> SimResult<&mut Self> {
        self.check_channel(ch)?;
        if !self.ignored.contains(&ch) { self.ignored.push(ch); }
        Ok(self)
    }

    pub fn time_resolution(&mut self, resolution: TimeResolution)
        -> SimResult<&mut Self>
    {
        if resolution == TimeResolution::Period(0) {
            return Err(SimError::config("time-bin period must be non-zero"));
        }
        self.time_resolution = resolution;
        Ok(self)
    }

    /// Finalize the circuit.
    pub fn build(&self) -> SimResult<Circuit> {
        Circuit::finalize(
            self.modes,
            self.transfer.clone(),
            self.photons.clone(),
            self.detectors.clone(),
            self.ignored.clone(),
            self.time_resolution,
            self.retiming.clone(),
            self.elements.clone(),
        )
    }
}

#[cfg(test)]
mod test {
    use approx::assert_abs_diff_eq;
    use rand::{ SeedableRng, rngs::StdRng };
    use crate::circuit::dagger;
    use super::*;

    fn assert_unitary(u: &nd::Array2<C64>) {
        let prod = u.dot(&dagger(u));
        for ((i, j), z) in prod.indexed_iter() {
            let target = if i == j { 1.0 } else { 0.0 };
            assert_abs_diff_eq!((*z - target).norm(), 0.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn elements_compose_left_to_right() {
        let mut builder = CircuitBuilder::new(ModeSpace::simple(2).unwrap());
        builder.phase_shifter(0, 90.0).unwrap()
            .beamsplitter(0, 1, 45.0, 0.0).unwrap();
        let t = builder.transfer();
        let h = std::f64::consts::FRAC_1_SQRT_2;
        // phase applied first, then mixed: U = BS . diag(i, 1)
        assert_abs_diff_eq!((t[[0, 0]] - C64::new(0.0, h)).norm(), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!((t[[0, 1]] - C64::new(-h, 0.0)).norm(), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!((t[[1, 0]] - C64::new(0.0, h)).norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn elements_act_on_every_slot_and_pol() {
        let modes = ModeSpace::new(2, 2, 2, false).unwrap();
        let mut builder = CircuitBuilder::new(modes);
        builder.rewire(0, 1).unwrap();
        let t = builder.transfer();
        for pol in 0..2 {
            for slot in 0..2 {
                let a = modes.mode(0, pol, slot).unwrap();
                let b = modes.mode(1, pol, slot).unwrap();
                assert_abs_diff_eq!(t[[b, a]].re, 1.0);
                assert_abs_diff_eq!(t[[a, a]].norm(), 0.0);
            }
        }
    }

    #[test]
    fn delay_shifts_slots() {
        let modes = ModeSpace::new(1, 1, 3, false).unwrap();
        let mut builder = CircuitBuilder::new(modes);
        builder.delay(0, 1).unwrap();
        let t = builder.transfer();
        assert_abs_diff_eq!(t[[1, 0]].re, 1.0);
        assert_abs_diff_eq!(t[[2, 1]].re, 1.0);
        assert_abs_diff_eq!(t[[0, 2]].re, 1.0);
    }

    #[test]
    fn time_delays_follow_their_photons() {
        let modes = ModeSpace::new(3, 2, 1, true).unwrap();
        let mut builder = CircuitBuilder::new(modes);
        builder.delay_time(0, 0.5).unwrap()
            .rewire(0, 1).unwrap()
            .loss(1, 0.2).unwrap()
            .delay_time(1, 0.25).unwrap()
            .half(1, 22.5).unwrap();
        assert_eq!(builder.transfer(), &{
            let mut b = CircuitBuilder::new(modes);
            b.rewire(0, 1).unwrap().loss(1, 0.2).unwrap().half(1, 22.5).unwrap();
            b.transfer().clone()
        });
        // both delays act on photons entering channel 0
        let circuit = builder.build().unwrap();
        assert_eq!(circuit.retiming(), &[0.75, 0.0, 0.0]);

        builder.beamsplitter(1, 2, 45.0, 0.0).unwrap();
        assert!(builder.delay_time(2, 1.0).is_err());
        assert!(builder.delay_time(1, f64::NAN).is_err());
        assert!(builder.delay_time(3, 1.0).is_err());

        // a delay in a later circuit is carried back through a permutation
        let mut later = CircuitBuilder::new(modes);
        later.delay_time(1, 2.0).unwrap();
        let joined = circuit.concatenate(&later.build().unwrap()).unwrap();
        assert_eq!(joined.retiming(), &[2.75, 0.0, 0.0]);
        let mixed = builder.build().unwrap();
        assert!(mixed.concatenate(&later.build().unwrap()).is_err());
    }

    #[test]
    fn lossy_elements_need_loss_channels() {
        let mut builder = CircuitBuilder::new(ModeSpace::simple(2).unwrap());
        assert!(matches!(builder.loss(0, 0.3), Err(SimError::Configuration(_))));
        let modes = ModeSpace::new(2, 1, 1, true).unwrap();
        let mut builder = CircuitBuilder::new(modes);
        builder.loss(0, 0.3).unwrap().beamsplitter(0, 1, 30.0, 10.0).unwrap();
        let circuit = builder.build().unwrap();
        assert_eq!(circuit.matrix().nrows(), 4);
        assert_unitary(circuit.matrix());
        assert!(matches!(
            builder.dielectric(0, 1, C64::from(1.0), C64::from(1.0)),
            Err(SimError::Configuration(_))
        ));
    }

    #[test]
    fn polarization_elements_need_two_pols() {
        let mut builder = CircuitBuilder::new(ModeSpace::simple(2).unwrap());
        assert!(builder.half(0, 22.5).is_err());
        let mut builder
            = CircuitBuilder::new(ModeSpace::new(2, 2, 1, false).unwrap());
        builder.half(0, 22.5).unwrap()
            .pol_beamsplitter(0, 1, Polarization::V).unwrap();
        assert_unitary(builder.transfer());
    }

    #[test]
    fn random_circuit_is_unitary() {
        let mut rng = StdRng::seed_from_u64(10546);
        let mut builder = CircuitBuilder::new(ModeSpace::simple(5).unwrap());
        builder.random_circuit(&mut rng).unwrap();
        assert_unitary(builder.transfer());
    }

    #[test]
    fn detectors_and_indices() {
        let mut builder = CircuitBuilder::new(ModeSpace::simple(2).unwrap());
        assert!(matches!(
            builder.beamsplitter(0, 2, 45.0, 0.0),
            Err(SimError::InvalidIndex { what: "channel", index: 2, len: 2 })
        ));
        assert!(builder.beamsplitter(0, 0, 45.0, 0.0).is_err());
        builder.detector_cond(0, Condition::Exactly(1)).unwrap();
        assert!(builder.detector(0).is_err());
        builder.ignore(0).unwrap();
        assert!(builder.build().is_err());
    }
}
