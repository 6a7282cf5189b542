//! hwsight Common Library
//!
//! This crate provides the shared pieces of the hwsight telemetry workspace:
//!
//! - [`model`] - Normalized hardware/OS data model (`ProcessorIdentifier`, `HWDiskStore`, ...)
//! - [`serialization`] - JSON/CBOR encoding and decoding of snapshots
//! - [`config`] - Configuration loading (JSON5 format)
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod model;
pub mod serialization;

// Re-export commonly used types at the crate root
pub use config::{
    CollectConfig, LogFormat, LoggingConfig, TelemetryConfig, load_config, parse_config,
};
pub use error::{Error, Result};
pub use model::{
    CapacityUnits, ChargeState, DeviceForest, DeviceTreeNode, HWDiskStore, HWPartition,
    LogicalProcessor, OSProcess, OperatingSystemInfo, PowerSource, ProcessState,
    ProcessorIdentifier, TIME_REMAINING_UNKNOWN, TIME_REMAINING_UNLIMITED, TelemetrySnapshot,
    UNKNOWN,
};
pub use serialization::{Format, decode, decode_auto, encode};

/// Initialize tracing with the given configuration.
///
/// Supports two output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
///
/// # Example
///
/// ```ignore
/// use hwsight_common::{LoggingConfig, LogFormat, init_tracing};
///
/// let config = LoggingConfig {
///     level: "debug".to_string(),
///     format: LogFormat::Json,
/// };
/// init_tracing(&config)?;
/// ```
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}
