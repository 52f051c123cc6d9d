//! Master-side client library for Modbus/RTU over RS-485 serial buses.
//!
//! [`Bus`] owns one serial port and exposes one method per supported
//! function code (0x01–0x07, 0x0F, 0x10, 0x11). It formulates request
//! frames, writes them to the port, parses the slave's reply incrementally
//! with a per-transaction timeout, validates CRC and shape, and decodes the
//! payload into the caller's buffer. There is no slave/server side, no
//! Modbus/TCP, and no polling scheduler — this crate drives one request at a
//! time, synchronously.

pub mod bus;
pub mod codec;
pub mod config;
pub mod crc;
pub mod errors;
pub mod frame;
pub mod receive;

pub use bus::{Bus, MAX_DEVICE_NAME_LEN};
pub use codec::SlaveId;
pub use config::{BusConfig, ConfigError, DataBits, LoggingConfig, Parity, StopBits};
pub use errors::{ExceptionCode, ModbusError};
pub use frame::{FunctionCode, MAX_ADU_LEN, MAX_COILS_PER_REQUEST, MAX_PDU_LEN, MAX_REGS_PER_REQUEST};
