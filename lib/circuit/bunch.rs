//! Labeled multi-photon inputs.

use ndarray as nd;
use crate::{
    circuit::Circuit,
    error::{ SimError, SimResult },
    fock::Occupation,
    photon::Packet,
};

/// A single photon: the mode it is injected into and its packet in the
/// circuit's photon model.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Photon {
    pub mode: usize,
    pub packet: usize,
}

/// An input of individually labeled photons for a particular circuit.
///
/// In a two-polarization mode space, each photon is injected into the
/// polarization mode given by its packet.
#[derive(Clone, Debug)]
pub struct PhotonBunch<'a> {
    circuit: &'a Circuit,
    photons: Vec<Photon>,
}

impl<'a> PhotonBunch<'a> {
    /// Create a new, empty bunch.
    pub fn new(circuit: &'a Circuit) -> Self {
        Self { circuit, photons: Vec::new() }
    }

    pub fn circuit(&self) -> &'a Circuit { self.circuit }

    /// Add a photon with packet `packet` to time bin `slot` of `channel`.
    pub fn add_photon(&mut self, channel: usize, slot: usize, packet: usize)
        -> SimResult<&mut Self>
    {
        let modes = self.circuit.modes();
        if channel >= modes.channels() {
            return Err(SimError::index("channel", channel, modes.channels()));
        }
        let pol
            = if modes.pols() == 2 {
                self.circuit.photons().get(packet)?.pol.index()
            } else {
                0
            };
        let mode = modes.mode(channel, pol, slot)?;
        self.add_photon_mode(mode, packet)
    }

    /// Add a photon with packet `packet` directly to a physical mode.
    pub fn add_photon_mode(&mut self, mode: usize, packet: usize)
        -> SimResult<&mut Self>
    {
        let nphys = self.circuit.modes().num_physical_modes();
        if mode >= nphys {
            return Err(SimError::index("mode", mode, nphys));
        }
        self.circuit.photons().get(packet)?;
        self.photons.push(Photon { mode, packet });
        Ok(self)
    }

    pub fn photons(&self) -> &[Photon] { &self.photons }

    pub fn len(&self) -> usize { self.photons.len() }

    pub fn is_empty(&self) -> bool { self.photons.is_empty() }

    /// Packet index of every photon.
    pub fn packets(&self) -> Vec<usize> {
        self.photons.iter().map(|p| p.packet).collect()
    }

    /// Occupation of the full mode space, including loss modes.
    pub fn occupation(&self) -> Occupation {
        let mut occ = vec![0; self.circuit.num_modes()];
        self.photons.iter().for_each(|p| { occ[p.mode] += 1; });
        occ.into()
    }

    /// Occupation of a subset of the photons, given by their indices.
    pub fn group_occupation(&self, group: &[usize]) -> SimResult<Occupation> {
        let mut occ = vec![0; self.circuit.num_modes()];
        for &k in group.iter() {
            let p = self.photons.get(k)
                .ok_or(SimError::index("photon", k, self.photons.len()))?;
            occ[p.mode] += 1;
        }
        Ok(occ.into())
    }

    /// Pairwise overlap matrix of the photons.
    ///
    /// Each photon's packet is first delayed by the time delays it meets in
    /// the circuit. Polarization contributes only in single-polarization mode
    /// spaces; with two polarizations it is already encoded in the modes.
    pub fn overlaps(&self) -> SimResult<nd::Array2<f64>> {
        let modes = self.circuit.modes();
        let model = self.circuit.photons();
        let retiming = self.circuit.retiming();
        let packets: Vec<Packet>
            = self.photons.iter()
            .map(|p| {
                let dt = retiming[modes.channel_of(p.mode)];
                model.get(p.packet).map(|packet| packet.delayed(dt))
            })
            .collect::<SimResult<_>>()?;
        Ok(model.packets_overlap_matrix(&packets, modes.pols() == 1))
    }
}

#[cfg(test)]
mod test {
    use approx::assert_abs_diff_eq;
    use crate::{
        circuit::{ CircuitBuilder, ModeSpace },
        photon::Polarization,
    };
    use super::*;

    #[test]
    fn photons_follow_packet_polarization() {
        let modes = ModeSpace::new(2, 2, 2, true).unwrap();
        let mut builder = CircuitBuilder::new(modes);
        let h = builder.photons_mut()
            .def_packet(0.0, 1.0, 1.0, Polarization::H).unwrap();
        let v = builder.photons_mut()
            .def_packet(0.0, 1.0, 1.0, Polarization::V).unwrap();
        let circuit = builder.build().unwrap();
        let mut bunch = PhotonBunch::new(&circuit);
        bunch.add_photon(0, 1, h).unwrap().add_photon(1, 0, v).unwrap();
        assert_eq!(bunch.photons()[0].mode, modes.mode(0, 0, 1).unwrap());
        assert_eq!(bunch.photons()[1].mode, modes.mode(1, 1, 0).unwrap());
        let occ = bunch.occupation();
        assert_eq!(occ.num_modes(), 16);
        assert_eq!(occ.total(), 2);
        // polarization is resolved by the modes
        assert_eq!(bunch.overlaps().unwrap()[[0, 1]], 1.0);
    }

    #[test]
    fn time_delays_reduce_overlap() {
        let mut builder = CircuitBuilder::new(ModeSpace::simple(3).unwrap());
        let p = builder.photons_mut()
            .def_packet(0.0, 1.0, 1.0, Polarization::H).unwrap();
        builder.delay_time(0, 1.0).unwrap().delay_time(2, 1.0).unwrap();
        let circuit = builder.build().unwrap();
        let mut bunch = PhotonBunch::new(&circuit);
        bunch.add_photon(0, 0, p).unwrap()
            .add_photon(1, 0, p).unwrap()
            .add_photon(2, 0, p).unwrap();
        let ov = bunch.overlaps().unwrap();
        // unit-width Gaussians offset by 1
        assert_abs_diff_eq!(ov[[0, 1]], (-0.5_f64).exp(), epsilon = 1e-12);
        assert_abs_diff_eq!(ov[[1, 2]], (-0.5_f64).exp(), epsilon = 1e-12);
        assert_abs_diff_eq!(ov[[0, 2]], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn bad_photons() {
        let circuit = CircuitBuilder::new(ModeSpace::simple(2).unwrap())
            .build().unwrap();
        let mut bunch = PhotonBunch::new(&circuit);
        assert!(matches!(
            bunch.add_photon(0, 0, 0),
            Err(SimError::InvalidIndex { what: "packet", .. })
        ));
        assert!(bunch.add_photon_mode(2, 0).is_err());
    }
}
