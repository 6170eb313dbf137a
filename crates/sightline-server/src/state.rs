use std::sync::{Arc, RwLock};

use tracing::info;

use sightline_core::admission::AdmissionController;
use sightline_core::analytics::AnalyticsBackend;
use sightline_core::config::Config;
use sightline_core::error::CoreError;
use sightline_core::visitor::VisitorHasher;
use sightline_duckdb::DuckDbBackend;
use sightline_metadata::MetadataStore;

use crate::geo::GeoResolver;
use crate::webhook::{DispatchSettings, EventDetector, WebhookDispatcher};

/// Shared application state injected into every Axum handler via
/// [`axum::extract::State`].
///
/// Every long-lived service is constructed here and nowhere else; the
/// visitor hasher and admission limits are swapped in place by [`reload`].
///
/// [`reload`]: AppState::reload
pub struct AppState {
    /// Kept concretely for the health check.
    pub db: Arc<DuckDbBackend>,
    pub analytics: Arc<dyn AnalyticsBackend>,
    pub metadata: Arc<dyn MetadataStore>,
    config: RwLock<Arc<Config>>,
    pub hasher: VisitorHasher,
    pub admission: AdmissionController,
    pub geo: Arc<dyn GeoResolver>,
    pub detector: EventDetector,
}

impl AppState {
    /// Must be called inside a Tokio runtime; starts the webhook workers.
    pub fn new(
        db: DuckDbBackend,
        config: Config,
        geo: Arc<dyn GeoResolver>,
    ) -> anyhow::Result<Self> {
        let settings = DispatchSettings::from_config(&config);
        Self::with_dispatch(db, config, geo, settings)
    }

    pub fn with_dispatch(
        db: DuckDbBackend,
        config: Config,
        geo: Arc<dyn GeoResolver>,
        settings: DispatchSettings,
    ) -> anyhow::Result<Self> {
        let db = Arc::new(db);
        let analytics: Arc<dyn AnalyticsBackend> = db.clone();
        let metadata: Arc<dyn MetadataStore> = db.clone();

        let hasher = VisitorHasher::new(&config.salt, config.rotation_hours)?;
        let admission = AdmissionController::new(
            config.rate_limit_ip_per_minute,
            config.rate_limit_api_key_per_minute,
        );
        let dispatcher = WebhookDispatcher::start(Arc::clone(&metadata), settings)?;
        let detector = EventDetector::new(Arc::clone(&metadata), dispatcher);

        Ok(Self {
            db,
            analytics,
            metadata,
            config: RwLock::new(Arc::new(config)),
            hasher,
            admission,
            geo,
            detector,
        })
    }

    /// Snapshot of the configuration currently in force.
    pub fn config(&self) -> Arc<Config> {
        match self.config.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Apply a freshly loaded configuration. An invalid one is rejected and
    /// the running configuration stays in force.
    pub fn reload(&self, next: Config) -> Result<(), CoreError> {
        next.validate()?;
        self.hasher.reload(&next.salt, next.rotation_hours)?;
        self.admission.reconfigure(
            next.rate_limit_ip_per_minute,
            next.rate_limit_api_key_per_minute,
        );
        info!(
            privacy_mode = ?next.privacy_mode,
            rotation_hours = next.rotation_hours,
            "Configuration reloaded"
        );
        let next = Arc::new(next);
        match self.config.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::geo::NullGeoResolver;
    use sightline_core::config::PrivacyMode;

    pub fn test_config() -> Config {
        Config {
            port: 0,
            data_dir: "/tmp/sightline-test".to_string(),
            duckdb_memory_limit: "1GB".to_string(),
            geoip_path: "/nonexistent/GeoLite2-City.mmdb".to_string(),
            salt: "unit-test-salt-0123456789abcdefghijkl".to_string(),
            rotation_hours: 24,
            privacy_mode: PrivacyMode::Standard,
            heartbeat_interval_seconds: 15,
            rate_limit_ip_per_minute: 100,
            rate_limit_api_key_per_minute: 1000,
            retention_days: 30,
            webhook_workers: 1,
            webhook_queue_size: 8,
            cors_origins: vec![],
            smtp: None,
            email_report_interval_hours: 24,
        }
    }

    /// In-memory state with no GeoIP database.
    pub fn test_state() -> AppState {
        let db = DuckDbBackend::open_in_memory().expect("in-memory DuckDB");
        AppState::new(db, test_config(), Arc::new(NullGeoResolver)).expect("state")
    }
}
