mod logging;
mod rtu;
mod types;

pub use logging::Config as LoggingConfig;
pub use rtu::{Config as BusConfig, ConfigError};
pub use types::{DataBits, Parity, StopBits};
