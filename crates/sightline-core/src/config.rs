use std::time::Duration;

use crate::error::CoreError;
use crate::visitor::{clamp_rotation_hours, MIN_SALT_LEN};

/// Longest accepted e-mail report interval (one year).
pub const MAX_EMAIL_REPORT_HOURS: u64 = 8760;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub data_dir: String,
    pub duckdb_memory_limit: String,
    pub geoip_path: String,
    /// Server-wide secret mixed into every visitor hash.
    pub salt: String,
    /// Clamped to `[1, 8760]` at load time.
    pub rotation_hours: u32,
    pub privacy_mode: PrivacyMode,
    pub heartbeat_interval_seconds: u32,
    pub rate_limit_ip_per_minute: u32,
    pub rate_limit_api_key_per_minute: u32,
    pub retention_days: u32,
    pub webhook_workers: usize,
    pub webhook_queue_size: usize,
    pub cors_origins: Vec<String>,
    pub smtp: Option<SmtpConfig>,
    pub email_report_interval_hours: u64,
}

/// Controls which optional enrichment fields may be stored with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrivacyMode {
    /// All optional fields are stored.
    #[default]
    Standard,
    /// Country only; no region, city or coordinates.
    Strict,
    /// No geolocation and no browser/OS/device.
    Paranoid,
}

impl PrivacyMode {
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(Self::Standard),
            "strict" => Ok(Self::Strict),
            "paranoid" => Ok(Self::Paranoid),
            other => Err(CoreError::InvalidConfig {
                key: "SIGHTLINE_PRIVACY_MODE",
                message: format!("expected standard, strict or paranoid, got {other:?}"),
            }),
        }
    }

    pub fn allows_geolocation(self) -> bool {
        !matches!(self, Self::Paranoid)
    }

    pub fn allows_precise_location(self) -> bool {
        matches!(self, Self::Standard)
    }

    pub fn allows_client_details(self) -> bool {
        !matches!(self, Self::Paranoid)
    }
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub from: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &'static str, default: &str) -> Result<T, CoreError>
where
    T::Err: std::fmt::Display,
{
    env_or(key, default)
        .trim()
        .parse()
        .map_err(|e: T::Err| CoreError::InvalidConfig {
            key,
            message: e.to_string(),
        })
}

impl Config {
    pub fn from_env() -> Result<Self, CoreError> {
        let salt = std::env::var("SIGHTLINE_SALT").map_err(|_| CoreError::InvalidConfig {
            key: "SIGHTLINE_SALT",
            message: "required".to_string(),
        })?;

        let smtp = match std::env::var("SIGHTLINE_SMTP_HOST") {
            Ok(host) if !host.trim().is_empty() => Some(SmtpConfig {
                host,
                port: parse_env("SIGHTLINE_SMTP_PORT", "587")?,
                from: env_or("SIGHTLINE_SMTP_FROM", "sightline@localhost"),
                username: std::env::var("SIGHTLINE_SMTP_USERNAME").ok(),
                password: std::env::var("SIGHTLINE_SMTP_PASSWORD").ok(),
            }),
            _ => None,
        };

        let config = Self {
            port: parse_env("SIGHTLINE_PORT", "3000")?,
            data_dir: env_or("SIGHTLINE_DATA_DIR", "./data"),
            duckdb_memory_limit: env_or("SIGHTLINE_DUCKDB_MEMORY", "1GB"),
            geoip_path: env_or("SIGHTLINE_GEOIP_PATH", "./GeoLite2-City.mmdb"),
            salt,
            rotation_hours: clamp_rotation_hours(parse_env("SIGHTLINE_ROTATION_HOURS", "24")?),
            privacy_mode: PrivacyMode::parse(&env_or("SIGHTLINE_PRIVACY_MODE", "standard"))?,
            heartbeat_interval_seconds: parse_env("SIGHTLINE_HEARTBEAT_SECONDS", "15")?,
            rate_limit_ip_per_minute: parse_env("SIGHTLINE_RATE_LIMIT_IP", "100")?,
            rate_limit_api_key_per_minute: parse_env("SIGHTLINE_RATE_LIMIT_API_KEY", "1000")?,
            retention_days: parse_env("SIGHTLINE_RETENTION_DAYS", "365")?,
            webhook_workers: parse_env::<usize>("SIGHTLINE_WEBHOOK_WORKERS", "4")?.clamp(1, 32),
            webhook_queue_size: parse_env::<usize>("SIGHTLINE_WEBHOOK_QUEUE", "1024")?.max(1),
            cors_origins: std::env::var("SIGHTLINE_CORS_ORIGINS")
                .map(|v| v.split(',').map(str::to_string).collect())
                .unwrap_or_default(),
            smtp,
            email_report_interval_hours: parse_env("SIGHTLINE_EMAIL_REPORT_HOURS", "24")?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values that must never be silently downgraded.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.salt.chars().count() < MIN_SALT_LEN {
            return Err(CoreError::SaltTooShort {
                min: MIN_SALT_LEN,
                actual: self.salt.chars().count(),
            });
        }
        if self.rate_limit_ip_per_minute == 0 {
            return Err(CoreError::InvalidConfig {
                key: "SIGHTLINE_RATE_LIMIT_IP",
                message: "must be > 0".to_string(),
            });
        }
        if self.rate_limit_api_key_per_minute == 0 {
            return Err(CoreError::InvalidConfig {
                key: "SIGHTLINE_RATE_LIMIT_API_KEY",
                message: "must be > 0".to_string(),
            });
        }
        if self.heartbeat_interval_seconds == 0 {
            return Err(CoreError::InvalidConfig {
                key: "SIGHTLINE_HEARTBEAT_SECONDS",
                message: "must be > 0".to_string(),
            });
        }
        if self.email_report_interval_hours > MAX_EMAIL_REPORT_HOURS {
            return Err(CoreError::InvalidConfig {
                key: "SIGHTLINE_EMAIL_REPORT_HOURS",
                message: format!("must be <= {MAX_EMAIL_REPORT_HOURS}"),
            });
        }
        Ok(())
    }

    pub fn retention_window(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }

    pub fn email_report_interval(&self) -> Duration {
        Duration::from_secs(self.email_report_interval_hours.max(1).saturating_mul(3600))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            port: 3000,
            data_dir: "./data".to_string(),
            duckdb_memory_limit: "1GB".to_string(),
            geoip_path: "./GeoLite2-City.mmdb".to_string(),
            salt: "a".repeat(MIN_SALT_LEN),
            rotation_hours: 24,
            privacy_mode: PrivacyMode::Standard,
            heartbeat_interval_seconds: 15,
            rate_limit_ip_per_minute: 100,
            rate_limit_api_key_per_minute: 1000,
            retention_days: 365,
            webhook_workers: 4,
            webhook_queue_size: 1024,
            cors_origins: vec![],
            smtp: None,
            email_report_interval_hours: 24,
        }
    }

    #[test]
    fn email_report_interval_is_bounded() {
        let mut cfg = config();
        assert_eq!(cfg.email_report_interval(), Duration::from_secs(24 * 3600));

        cfg.email_report_interval_hours = 0;
        assert_eq!(cfg.email_report_interval(), Duration::from_secs(3600));

        cfg.email_report_interval_hours = u64::MAX;
        assert_eq!(cfg.email_report_interval(), Duration::from_secs(u64::MAX));
        assert!(matches!(
            cfg.validate(),
            Err(CoreError::InvalidConfig { key: "SIGHTLINE_EMAIL_REPORT_HOURS", .. })
        ));

        cfg.email_report_interval_hours = MAX_EMAIL_REPORT_HOURS;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn privacy_mode_parses_case_insensitively() {
        assert_eq!(PrivacyMode::parse("STRICT").ok(), Some(PrivacyMode::Strict));
        assert_eq!(
            PrivacyMode::parse(" paranoid ").ok(),
            Some(PrivacyMode::Paranoid)
        );
        assert!(PrivacyMode::parse("loose").is_err());
    }

    #[test]
    fn privacy_mode_field_policy() {
        assert!(PrivacyMode::Standard.allows_precise_location());
        assert!(PrivacyMode::Strict.allows_geolocation());
        assert!(!PrivacyMode::Strict.allows_precise_location());
        assert!(!PrivacyMode::Paranoid.allows_geolocation());
        assert!(!PrivacyMode::Paranoid.allows_client_details());
    }
}
