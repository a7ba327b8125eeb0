//! Data module: particle storage

pub mod particles;

pub use particles::{Particle, ParticleStore};
