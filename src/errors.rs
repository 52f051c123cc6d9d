//! The closed outcome taxonomy a transaction can produce.
//!
//! [`ModbusError`] is the Rust-idiomatic replacement for the reference
//! bus's `last_errorcode` integer; [`ModbusError::outcome_code`] recovers
//! the original numeric value for callers that still want it (logging,
//! wire-compatible diagnostics, tests against the documented table).

use thiserror::Error;

/// A slave exception reply's 1-byte cause code (§7 of the protocol's error
/// table), codes 1..6 and 8 are named, the rest surface as their raw value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ExceptionCode {
    #[error("illegal function")]
    IllegalFunction,
    #[error("illegal data address")]
    IllegalDataAddress,
    #[error("illegal data value")]
    IllegalDataValue,
    #[error("slave device failure")]
    SlaveFailure,
    #[error("acknowledge")]
    Acknowledge,
    #[error("slave device busy")]
    SlaveBusy,
    #[error("parity error")]
    ParityError,
    #[error("unrecognized exception code {0}")]
    Other(u8),
}

impl ExceptionCode {
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Self::IllegalFunction,
            2 => Self::IllegalDataAddress,
            3 => Self::IllegalDataValue,
            4 => Self::SlaveFailure,
            5 => Self::Acknowledge,
            6 => Self::SlaveBusy,
            8 => Self::ParityError,
            other => Self::Other(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::IllegalFunction => 1,
            Self::IllegalDataAddress => 2,
            Self::IllegalDataValue => 3,
            Self::SlaveFailure => 4,
            Self::Acknowledge => 5,
            Self::SlaveBusy => 6,
            Self::ParityError => 8,
            Self::Other(code) => code,
        }
    }
}

/// Every way a transaction can fail to deliver a decoded reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModbusError {
    #[error("slave raised exception: {0}")]
    Exception(#[from] ExceptionCode),

    #[error("CRC check failed on the received frame: {frame_hex}")]
    CrcError { frame_hex: String },

    #[error("timed out waiting for a reply")]
    Timeout,

    #[error("reply byte count was invalid")]
    InvalidByteCount,

    #[error("failed to open serial port {device}: {reason}")]
    SerialInitFailed { device: String, reason: String },

    #[error("count {count} is invalid for this operation (maximum {max})")]
    InvalidCount { count: u16, max: u16 },

    #[error("serial I/O error: {0}")]
    Io(String),
}

impl ModbusError {
    /// Recovers the numeric outcome code from the protocol's error table.
    pub fn outcome_code(&self) -> i32 {
        match self {
            Self::Exception(kind) => -(kind.code() as i32),
            Self::CrcError { .. } => -256,
            Self::Timeout => -257,
            Self::InvalidByteCount => -258,
            Self::SerialInitFailed { .. } => -259,
            Self::InvalidCount { .. } => -260,
            Self::Io(_) => -257,
        }
    }
}

impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::TimedOut {
            Self::Timeout
        } else {
            Self::Io(err.to_string())
        }
    }
}

impl From<serialport::Error> for ModbusError {
    fn from(err: serialport::Error) -> Self {
        Self::Io(err.to_string())
    }
}
