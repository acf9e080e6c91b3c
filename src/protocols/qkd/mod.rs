//! Quantum Key Distribution (QKD) Protocols.
//!
//! - **BB84**: four states, two conjugate bases.
//! - **B92**: two non-orthogonal states, conclusive outcomes only.

pub mod b92;
pub mod bb84;

pub use b92::B92;
pub use bb84::Bb84;
