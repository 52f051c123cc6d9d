use serde::{Deserialize, Serialize};
use time::UtcOffset;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    fmt::time::OffsetTime, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
    Registry,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Enable trace-level logging for individual sent/received frame bytes.
    #[serde(default)]
    pub trace_frames: bool,

    /// Minimum log level for console output.
    #[serde(default = "default_level")]
    pub level: String,

    /// Whether to include source code location in logs.
    #[serde(default)]
    pub include_location: bool,

    /// Whether to include thread IDs in logs.
    #[serde(default)]
    pub thread_ids: bool,

    /// Whether to include thread names in logs.
    #[serde(default)]
    pub thread_names: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            trace_frames: false,
            level: default_level(),
            include_location: false,
            thread_ids: false,
            thread_names: false,
        }
    }
}

impl Config {
    pub fn get_level_filter(&self) -> LevelFilter {
        match self.level.to_lowercase().as_str() {
            "error" => LevelFilter::ERROR,
            "warn" => LevelFilter::WARN,
            "info" => LevelFilter::INFO,
            "debug" => LevelFilter::DEBUG,
            "trace" => LevelFilter::TRACE,
            _ => LevelFilter::INFO,
        }
    }

    /// Installs a global `tracing` subscriber built from this config.
    ///
    /// Intended for binaries (the demo CLI); library code never calls this
    /// itself, it only emits spans and events.
    pub fn init_tracing(&self) -> Result<(), Box<dyn std::error::Error>> {
        let timer = OffsetTime::new(
            UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC),
            time::format_description::well_known::Rfc3339,
        );

        let base_level = self.get_level_filter();
        let mut env_filter = EnvFilter::default().add_directive(base_level.into());
        if self.trace_frames {
            env_filter = env_filter.add_directive("yam_modbus::receive=trace".parse()?);
        }

        let layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(self.thread_ids)
            .with_thread_names(self.thread_names)
            .with_file(self.include_location)
            .with_line_number(self.include_location)
            .with_level(true)
            .with_timer(timer)
            .with_filter(env_filter);

        Registry::default().with(layer).try_init()?;
        Ok(())
    }
}
