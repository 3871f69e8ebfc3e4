#![allow(dead_code, non_snake_case, non_upper_case_globals)]

//! Exact simulation of multi-photon interference in linear-optical circuits.
//!
//! Circuits are assembled with a [`CircuitBuilder`] over a [`ModeSpace`] of
//! channels, polarizations, and time bins. A [`Simulator`] evolves Fock states
//! through the resulting transfer matrix by evaluating permanents, and handles
//! partially distinguishable photons by decomposing a [`PhotonBunch`] into
//! groups of mutually interfering photons. Results are collected into a
//! [`DensityMatrix`] and turned into detector statistics by [`OutcomeBins`].

pub mod error;
pub mod config;
pub mod fock;
pub mod photon;
pub mod circuit;
pub mod permanent;
pub mod density;
pub mod outcome;
pub mod engine;

pub use error::{ SimError, SimResult, NumericalWarning };
pub use config::{ MAX_DECOMPOSITION_PAIRS, SimConfig, PermanentMethod };
pub use fock::{ FockState, Occupation };
pub use photon::{ Packet, PacketShape, PhotonModel, Polarization };
pub use circuit::{
    Circuit,
    CircuitBuilder,
    Condition,
    Detector,
    ModeSpace,
    PhotonBunch,
    TimeResolution,
};
pub use density::DensityMatrix;
pub use outcome::{ BinLayout, OutcomeBins };
pub use engine::{ Amplitude, Evolved, Measured, Mixed, OutputSet, Simulator };
