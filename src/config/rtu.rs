use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::types::{DataBits, Parity, StopBits};
use crate::frame::DEFAULT_TIMEOUT_MS;

/// Why a [`Config`] was rejected by [`Config::validate`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("device name must not be empty")]
    EmptyDevice,
    #[error("baud_rate must be nonzero")]
    ZeroBaudRate,
    #[error("timeout_ms must be nonzero")]
    ZeroTimeout,
}

/// Everything needed to open and drive one RS-485 bus.
///
/// Mirrors the fields a bus handle carries at init time: device name, line
/// settings, the per-transaction timeout and the debug trace flag. Opening a
/// [`Config`] through [`crate::Bus::open`] consumes it; the bus keeps its own
/// copy of the timeout and debug flag afterwards since those can change at
/// runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub device: String,
    pub baud_rate: u32,
    #[serde(default)]
    pub data_bits: DataBits,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default)]
    pub stop_bits: StopBits,

    /// Milliseconds to wait for a reply before declaring a timeout.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Emit `[HH]`/`<HH>` byte traces for every transaction.
    #[serde(default)]
    pub debug: bool,

    /// Some slaves fold the `slave_id` byte itself into function 0x11's
    /// byte-count field; set this to compensate. See [`crate::Bus::set_slave_id_quirk`].
    #[serde(default)]
    pub slave_id_quirk: bool,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            data_bits: DataBits::default(),
            parity: Parity::default(),
            stop_bits: StopBits::default(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            debug: false,
            slave_id_quirk: false,
        }
    }
}

impl Config {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn serial_port_info(&self) -> String {
        format!(
            "{} ({} baud, {} data bits, {} parity, {} stop bits)",
            self.device, self.baud_rate, self.data_bits, self.parity, self.stop_bits
        )
    }

    /// Rejects configs that [`crate::Bus::open`] could never make sense of,
    /// before a serial port is ever touched.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.is_empty() {
            return Err(ConfigError::EmptyDevice);
        }
        if self.baud_rate == 0 {
            return Err(ConfigError::ZeroBaudRate);
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_protocol_default_timeout() {
        assert_eq!(Config::default().timeout_ms, 1000);
    }

    #[test]
    fn deserializes_with_defaults_for_omitted_fields() {
        let json = r#"{"device": "/dev/ttyUSB1", "baud_rate": 19200}"#;
        let cfg: Config = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.device, "/dev/ttyUSB1");
        assert_eq!(cfg.baud_rate, 19200);
        assert_eq!(cfg.timeout_ms, 1000);
        assert!(!cfg.debug);
    }

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_empty_device() {
        let cfg = Config { device: String::new(), ..Default::default() };
        assert_eq!(cfg.validate().unwrap_err(), ConfigError::EmptyDevice);
    }

    #[test]
    fn rejects_zero_baud_rate() {
        let cfg = Config { baud_rate: 0, ..Default::default() };
        assert_eq!(cfg.validate().unwrap_err(), ConfigError::ZeroBaudRate);
    }

    #[test]
    fn rejects_zero_timeout() {
        let cfg = Config { timeout_ms: 0, ..Default::default() };
        assert_eq!(cfg.validate().unwrap_err(), ConfigError::ZeroTimeout);
    }
}
