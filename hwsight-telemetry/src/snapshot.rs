//! One-call collection over the platform backend.

use std::collections::BTreeMap;

use hwsight_common::config::{CollectConfig, TelemetryConfig};
use hwsight_common::model::TelemetrySnapshot;
use tracing::{debug, info};

use crate::backend::{PlatformTelemetryBackend, platform_backend};

/// The platform backend plus the set of entities a snapshot collects.
pub struct SystemTelemetry {
    backend: Box<dyn PlatformTelemetryBackend>,
    collect: CollectConfig,
}

impl SystemTelemetry {
    /// Telemetry for the running platform.
    pub fn new(config: &TelemetryConfig) -> Self {
        Self::with_backend(platform_backend(config), config.collect.clone())
    }

    /// Telemetry over an explicit backend.
    pub fn with_backend(backend: Box<dyn PlatformTelemetryBackend>, collect: CollectConfig) -> Self {
        Self { backend, collect }
    }

    /// Direct access to every query.
    pub fn backend(&self) -> &dyn PlatformTelemetryBackend {
        self.backend.as_ref()
    }

    /// Collect every configured entity once.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        let backend = self.backend.as_ref();
        let mut snapshot = TelemetrySnapshot {
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            platform: backend.platform().to_string(),
            operating_system: backend.query_operating_system(),
            load_average: backend.query_load_average(3),
            ..Default::default()
        };

        if self.collect.cpu {
            snapshot.processor = Some(backend.query_processor_identity());
            snapshot.logical_processors = backend.query_logical_processors();
            snapshot.current_frequencies = backend.query_current_frequencies();
            snapshot.max_frequency = backend.query_max_frequency();
        }

        if self.collect.disks {
            snapshot.disks = backend.query_disks();
        }

        if self.collect.power {
            snapshot.power_sources = backend.query_power_sources();
        }

        if self.collect.processes {
            snapshot.processes = backend.query_all_processes();
        }

        snapshot.device_trees = self
            .collect
            .device_classes
            .iter()
            .map(|class| (class.clone(), backend.query_device_tree(class)))
            .collect::<BTreeMap<_, _>>();

        debug!(
            "Snapshot: {} logical processors, {} disks, {} power sources, {} processes, {} device trees",
            snapshot.logical_processors.len(),
            snapshot.disks.len(),
            snapshot.power_sources.len(),
            snapshot.processes.len(),
            snapshot.device_trees.len()
        );
        info!(
            "Collected {} snapshot for '{}'",
            snapshot.platform, snapshot.operating_system.hostname
        );
        snapshot
    }
}

impl std::fmt::Debug for SystemTelemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemTelemetry")
            .field("platform", &self.backend.platform())
            .field("collect", &self.collect)
            .finish()
    }
}
