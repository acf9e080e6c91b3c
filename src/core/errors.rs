use num_complex::Complex64;
use thiserror::Error;

use crate::host::HostPhase;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GateError {
    #[error("Matrix is not Unitary (U†U != I)")]
    NonUnitary,

    #[error("Matrix must be square")]
    NotSquareMatrix,

    #[error("Gates act on a single qubit: expected a 2x2 matrix")]
    InvalidDimensions,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeasurementError {
    #[error("Number of operators ({ops}) does not match number of values ({vals})")]
    CountMismatch { ops: usize, vals: usize },

    #[error("Measurement operators do not sum to Identity (Completeness relation failed)")]
    NotComplete,

    #[error("Invalid operator dimensions")]
    InvalidDimensions,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateError {
    #[error("Bit must be 0 or 1, got {0}")]
    InvalidBit(u8),

    #[error("Trace is not unity: {0}")]
    InvalidTrace(Complex64),

    #[error("Density matrix is not Hermitian")]
    NotHermitian,

    #[error("Density matrix is not positive semi-definite (min eigenvalue {0})")]
    NotPositive(f64),

    #[error("Invalid dimensions: a single qubit density matrix is 2x2, got {rows}x{cols}")]
    InvalidDimensions { rows: usize, cols: usize },

    #[error("Measurement error: {0}")]
    MeasurementError(#[from] MeasurementError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChannelError {
    #[error("Channel must have at least one Kraus operator")]
    Empty,

    #[error("Kraus operators do not sum to Identity (Trace preserving relation failed)")]
    NotComplete,

    #[error("Invalid operator dimensions: Kraus operators act on one qubit (2x2)")]
    InvalidDimensions,

    #[error("Invalid probability: {0}. Must be between 0.0 and 1.0")]
    InvalidProbability(f64),
}

/// Invalid link, bus or session parameters. Always raised at construction.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("length_km must be finite and non-negative, got {0}")]
    InvalidLength(f64),

    #[error("loss_per_km must be within [0, 1], got {0}")]
    InvalidLossPerKm(f64),

    #[error("noise_strength must be within [0, 1], got {0}")]
    InvalidNoiseStrength(f64),

    #[error("error_rate_threshold must be within [0, 1], got {0}")]
    InvalidThreshold(f64),

    #[error("check_ratio must be within [0, 1], got {0}")]
    InvalidCheckRatio(f64),

    #[error("num_qubits must be at least 1")]
    NoQubits,

    #[error("num_qubits {requested} exceeds the limit of {max}")]
    TooManyQubits { requested: usize, max: usize },

    #[error("{field} {value} exceeds the limit of {max}")]
    CapacityTooLarge {
        field: &'static str,
        value: usize,
        max: usize,
    },

    #[error("{field} must be at least 1")]
    ZeroCapacity { field: &'static str },

    #[error("Unknown noise model: {0}")]
    UnknownNoiseModel(String),

    #[error("Unknown protocol: {0}")]
    UnknownProtocol(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },

    #[error("Failed to read configuration: {0}")]
    Unreadable(String),
}

/// A photon absorbed by the fibre. Expected and frequent; never retried.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Qubit in slot {slot} lost: {reason} (p_loss={p_loss:.4}, r={r:.4})")]
pub struct QubitLost {
    pub slot: usize,
    pub reason: String,
    pub p_loss: f64,
    pub r: f64,
}

/// Outcome of a transmission with a caller-supplied noise strength.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransmitError {
    #[error(transparent)]
    Lost(#[from] QubitLost),

    #[error("Invalid noise override: {0}")]
    Channel(#[from] ChannelError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Message `{message}` is not valid in phase {phase:?}")]
    Sequence {
        phase: HostPhase,
        message: &'static str,
    },

    #[error("Protocol record is sealed")]
    RecordSealed,

    #[error("Slot {got} arrived out of order, expected slot {expected}")]
    SlotOutOfOrder { expected: usize, got: usize },

    #[error("Run of {requested} qubits exceeds the limit of {max}")]
    TooManyQubits { requested: usize, max: usize },

    #[error("Length mismatch: expected {expected} entries, got {got}")]
    LengthMismatch { expected: usize, got: usize },

    #[error("Unexpected sifting payload for {protocol}: {payload}")]
    UnexpectedPayload {
        protocol: &'static str,
        payload: &'static str,
    },

    #[error("Run aborted: {0}")]
    Aborted(String),

    #[error("Peer transport closed")]
    TransportClosed,

    #[error("State error: {0}")]
    State(#[from] StateError),
}

/// Top level error surfaced to the driver.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QkdError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("{node} timed out in phase {phase:?}")]
    Timeout { node: String, phase: HostPhase },

    #[error("Host task for {0} terminated unexpectedly")]
    HostPanicked(String),
}
