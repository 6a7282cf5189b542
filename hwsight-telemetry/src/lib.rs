//! Cross-platform hardware and operating system telemetry.
//!
//! Raw platform sources (pseudo-files, device registries, tool output and
//! native counters) are decoded into the normalized model of
//! [`hwsight_common::model`]:
//!
//! ```text
//! source -> decode -> units -> platform builders -> tree -> update -> snapshot
//! ```
//!
//! Every platform module compiles on every target, so the Linux, macOS and
//! Windows builders can all be exercised from captured fixtures. Only
//! [`platform_backend`] picks the live implementation for the running OS.
//!
//! # Example
//!
//! ```ignore
//! use hwsight_common::TelemetryConfig;
//! use hwsight_telemetry::SystemTelemetry;
//!
//! let telemetry = SystemTelemetry::new(&TelemetryConfig::default());
//! let cpu = telemetry.backend().query_processor_identity();
//! println!("{} ({})", cpu.name, cpu.microarchitecture);
//! ```

pub mod backend;
pub mod decode;
pub mod devices;
pub mod fallback;
pub mod linux;
pub mod macos;
pub mod microarch;
pub mod power;
pub mod process_table;
pub mod snapshot;
pub mod source;
pub mod topology;
pub mod tree;
pub mod units;
pub mod update;
pub mod windows;

pub use backend::{PlatformTelemetryBackend, UnsupportedBackend, platform_backend};
pub use fallback::{FallbackChain, Resolution};
pub use snapshot::SystemTelemetry;
pub use source::{
    CannedCommandRunner, CommandRunner, FixedCounters, FsSource, NativeCounters, TextSource,
};
pub use update::{Identity, reconcile, update_by_identity};
