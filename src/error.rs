// Error taxonomy for talking to the DEQ2496.
//
// Everything in `DeqError` is fatal for the current invocation. The config and
// state read errors live in their own modules and are always recovered there.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeqError {
    #[error("no MIDI port matching '{pattern}' (available: {})", .available.join(", "))]
    DeviceNotFound {
        pattern: String,
        available: Vec<String>,
    },

    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("unexpected response command 0x{got:02X} (expected 0x{expected:02X})")]
    UnexpectedResponse { expected: u8, got: u8 },

    #[error("screen dump has {got} bytes, expected {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("no response from device within {0:?}")]
    ResponseTimeout(Duration),

    #[error("contrast {value} out of range ({min}-{max})")]
    InvalidContrast { value: u8, min: u8, max: u8 },

    #[error("MIDI transport: {0}")]
    Transport(String),
}
