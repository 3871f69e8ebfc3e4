//! Photon wavepacket descriptors and their pairwise overlaps.

use ndarray as nd;
use crate::error::{ SimError, SimResult };

/// Overlaps with magnitude below this value are set to zero.
pub const OVERLAP_CUTOFF: f64 = 1e-10;

/// Spectral/temporal profile shared by every packet in a model.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum PacketShape {
    /// Gaussian envelope; `width` is the frequency bandwidth.
    #[default]
    Gaussian,
    /// One-sided exponential decay; `width` is the characteristic decay time.
    Exponential,
}

/// Linear polarization basis.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Polarization {
    #[default]
    H = 0,
    V = 1,
}

impl Polarization {
    /// Index of the polarization within a mode space.
    pub fn index(self) -> usize { self as usize }

    /// Inverse of [`Self::index`].
    pub fn from_index(idx: usize) -> SimResult<Self> {
        match idx {
            0 => Ok(Self::H),
            1 => Ok(Self::V),
            _ => Err(SimError::index("polarization", idx, 2)),
        }
    }
}

/// Description of a single-photon wavepacket.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Packet {
    /// Emission time.
    pub time: f64,
    /// Central frequency.
    pub freq: f64,
    /// Bandwidth (Gaussian) or decay time (exponential).
    pub width: f64,
    pub pol: Polarization,
}

impl Packet {
    /// Create a new horizontally polarized packet.
    pub fn new(time: f64, freq: f64, width: f64) -> Self {
        Self { time, freq, width, pol: Polarization::H }
    }

    /// Set the polarization.
    pub fn with_pol(mut self, pol: Polarization) -> Self {
        self.pol = pol;
        self
    }

    /// Copy of `self` emitted `dt` later.
    pub fn delayed(&self, dt: f64) -> Self {
        Self { time: self.time + dt, ..*self }
    }
}

/// |<i|j>|^2 for two Gaussian packets.
fn gaussian_overlap(pi: &Packet, pj: &Packet) -> f64 {
    let wi2 = pi.width.powi(2);
    let wj2 = pj.width.powi(2);
    let dt = pi.time - pj.time;
    let df = pi.freq - pj.freq;
    2.0 * pi.width * pj.width / (wi2 + wj2)
        * (-(dt.powi(2) * wi2 * wj2 + df.powi(2)) / (wi2 + wj2)).exp()
}

/// |<i|j>|^2 for two exponentially decaying packets.
fn exponential_overlap(pi: &Packet, pj: &Packet) -> f64 {
    let (first, last) = if pj.time >= pi.time { (pi, pj) } else { (pj, pi) };
    let dt = first.time / first.width - last.time / last.width;
    let dw = first.width * first.freq - last.width * last.freq;
    dt.exp() / (1.0 + dw.powi(2))
}

/// An ordered table of packets sharing a [`PacketShape`].
///
/// Photons refer to packets by their index in the table. Cloning produces an
/// independent table.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PhotonModel {
    shape: PacketShape,
    packets: Vec<Packet>,
}

impl PhotonModel {
    /// Create a new, empty model.
    pub fn new(shape: PacketShape) -> Self {
        Self { shape, packets: Vec::new() }
    }

    pub fn gaussian() -> Self { Self::new(PacketShape::Gaussian) }

    pub fn exponential() -> Self { Self::new(PacketShape::Exponential) }

    pub fn shape(&self) -> PacketShape { self.shape }

    /// Number of registered packets.
    pub fn len(&self) -> usize { self.packets.len() }

    pub fn is_empty(&self) -> bool { self.packets.is_empty() }

    pub fn iter(&self) -> std::slice::Iter<'_, Packet> { self.packets.iter() }

    /// Register a packet, returning its index.
    pub fn add_packet(&mut self, packet: Packet) -> SimResult<usize> {
        if !(packet.width > 0.0) || !packet.time.is_finite()
            || !packet.freq.is_finite()
        {
            return Err(SimError::config(format!(
                "packet must have finite time/frequency and positive width; \
                got {:?}",
                packet,
            )));
        }
        self.packets.push(packet);
        Ok(self.packets.len() - 1)
    }

    /// Shorthand for [`Self::add_packet`].
    pub fn def_packet(
        &mut self,
        time: f64,
        freq: f64,
        width: f64,
        pol: Polarization,
    ) -> SimResult<usize>
    {
        self.add_packet(Packet::new(time, freq, width).with_pol(pol))
    }

    /// Get a packet by index.
    pub fn get(&self, idx: usize) -> SimResult<&Packet> {
        self.packets.get(idx)
            .ok_or(SimError::index("packet", idx, self.packets.len()))
    }

    /// Register a copy of packet `idx` emitted `dt` later, returning the new
    /// index.
    pub fn delayed(&mut self, idx: usize, dt: f64) -> SimResult<usize> {
        let packet = self.get(idx)?.delayed(dt);
        self.add_packet(packet)
    }

    /// Append the packets of `other`, returning the offset to add to its
    /// indices.
    pub fn merge(&mut self, other: &Self) -> SimResult<usize> {
        if self.is_empty() { self.shape = other.shape; }
        if self.shape != other.shape && !other.is_empty() {
            return Err(SimError::config(format!(
                "cannot merge {:?} packets into a {:?} model",
                other.shape, self.shape,
            )));
        }
        let offset = self.packets.len();
        self.packets.extend(other.packets.iter().copied());
        Ok(offset)
    }

    /// Squared overlap of two packets of this model's shape. Polarization
    /// contributes only if `with_pol` is `true`.
    pub fn packet_overlap(&self, pi: &Packet, pj: &Packet, with_pol: bool)
        -> f64
    {
        if with_pol && pi.pol != pj.pol { return 0.0; }
        let ov = match self.shape {
            PacketShape::Gaussian => gaussian_overlap(pi, pj),
            PacketShape::Exponential => exponential_overlap(pi, pj),
        };
        if ov.sqrt() < OVERLAP_CUTOFF { 0.0 } else { ov.min(1.0) }
    }

    /// Squared overlap of the temporal/spectral parts of packets `i` and `j`,
    /// ignoring polarization.
    pub fn wave_overlap(&self, i: usize, j: usize) -> SimResult<f64> {
        let pi = self.get(i)?;
        let pj = self.get(j)?;
        if i == j { return Ok(1.0); }
        Ok(self.packet_overlap(pi, pj, false))
    }

    /// Squared overlap of packets `i` and `j`, including polarization.
    pub fn overlap(&self, i: usize, j: usize) -> SimResult<f64> {
        let pi = self.get(i)?;
        let pj = self.get(j)?;
        if i == j { return Ok(1.0); }
        Ok(self.packet_overlap(pi, pj, true))
    }

    /// Overlap matrix for a list of packet indices.
    ///
    /// Polarization contributes to the overlap only if `with_pol` is `true`,
    /// i.e. when it is not already resolved by the mode space.
    pub fn overlap_matrix(&self, packets: &[usize], with_pol: bool)
        -> SimResult<nd::Array2<f64>>
    {
        let packets: Vec<Packet>
            = packets.iter()
            .map(|idx| self.get(*idx).copied())
            .collect::<SimResult<_>>()?;
        Ok(self.packets_overlap_matrix(&packets, with_pol))
    }

    /// Overlap matrix for a list of packets, which need not be registered in
    /// the model.
    pub fn packets_overlap_matrix(&self, packets: &[Packet], with_pol: bool)
        -> nd::Array2<f64>
    {
        let n = packets.len();
        let mut ov: nd::Array2<f64> = nd::Array2::eye(n);
        for (a, pa) in packets.iter().enumerate() {
            for (b, pb) in packets.iter().enumerate().skip(a + 1) {
                let v = self.packet_overlap(pa, pb, with_pol);
                ov[[a, b]] = v;
                ov[[b, a]] = v;
            }
        }
        ov
    }
}
