mod channels;
pub mod errors;
mod gates;
mod measurements;
mod state;
pub mod utils;

pub use channels::{NoiseChannel, NoiseKind};
pub(crate) use state::pick_outcome;
pub use gates::Gate;
pub use measurements::Measurement;
pub use state::{Basis, DensityMatrix, Ket, QuantumState};
