//! GeoIP resolution for the collect pipeline.

use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use sightline_core::cache::{Expiry, TtlCache};
use sightline_core::config::PrivacyMode;
use sightline_core::event::GeoLocation;

const CACHE_TTL: Duration = Duration::from_secs(3600);
const CACHE_CAPACITY: usize = 50_000;

/// Resolves a client IP to a coarse location. Failures degrade to an empty
/// [`GeoLocation`]; a lookup never fails the request.
#[async_trait]
pub trait GeoResolver: Send + Sync + 'static {
    async fn lookup(&self, ip: &str) -> GeoLocation;
}

/// Used when no GeoIP database is available.
pub struct NullGeoResolver;

#[async_trait]
impl GeoResolver for NullGeoResolver {
    async fn lookup(&self, _ip: &str) -> GeoLocation {
        GeoLocation::default()
    }
}

/// MaxMind City database, opened once and kept in memory, with a read-through
/// cache in front of it.
pub struct MaxMindResolver {
    reader: maxminddb::Reader<Vec<u8>>,
    cache: TtlCache<String, GeoLocation>,
}

impl MaxMindResolver {
    pub fn open(path: &str) -> anyhow::Result<Self> {
        let reader = maxminddb::Reader::open_readfile(path)?;
        Ok(Self {
            reader,
            cache: TtlCache::new(Expiry::AfterWrite(CACHE_TTL), CACHE_CAPACITY),
        })
    }

    fn resolve(&self, ip: &str) -> GeoLocation {
        let Ok(ip_addr) = IpAddr::from_str(ip) else {
            return GeoLocation::default();
        };
        let record: maxminddb::geoip2::City = match self.reader.lookup(ip_addr) {
            Ok(record) => record,
            Err(_) => return GeoLocation::default(),
        };

        let country = record
            .country
            .as_ref()
            .and_then(|c| c.iso_code)
            .map(|s| s.to_string());

        let region = record
            .subdivisions
            .as_ref()
            .and_then(|subs| subs.first())
            .and_then(|sub| sub.names.as_ref())
            .and_then(|names| names.get("en"))
            .map(|s| s.to_string());

        let city = record
            .city
            .as_ref()
            .and_then(|c| c.names.as_ref())
            .and_then(|names| names.get("en"))
            .map(|s| s.to_string());

        let (latitude, longitude) = record
            .location
            .as_ref()
            .map(|loc| (loc.latitude, loc.longitude))
            .unwrap_or((None, None));

        GeoLocation {
            country,
            city,
            region,
            latitude,
            longitude,
        }
    }
}

#[async_trait]
impl GeoResolver for MaxMindResolver {
    async fn lookup(&self, ip: &str) -> GeoLocation {
        if let Some(hit) = self.cache.get(&ip.to_string()).await {
            return hit;
        }
        let location = self.resolve(ip);
        self.cache.insert(ip.to_string(), location.clone()).await;
        location
    }
}

/// Open the database at `path`, falling back to [`NullGeoResolver`] with a
/// warning when it is missing or unreadable.
pub fn resolver_from_path(path: &str) -> Arc<dyn GeoResolver> {
    if !Path::new(path).exists() {
        warn!(
            geoip_path = %path,
            "GeoIP database not found. Events stored with NULL geo fields."
        );
        return Arc::new(NullGeoResolver);
    }
    match MaxMindResolver::open(path) {
        Ok(resolver) => {
            info!(geoip_path = %path, "GeoIP database loaded");
            Arc::new(resolver)
        }
        Err(e) => {
            warn!(geoip_path = %path, error = %e, "GeoIP database unreadable");
            Arc::new(NullGeoResolver)
        }
    }
}

/// Drop the fields the privacy mode does not allow to be stored.
pub fn redact(location: GeoLocation, mode: PrivacyMode) -> GeoLocation {
    if !mode.allows_geolocation() {
        return GeoLocation::default();
    }
    if !mode.allows_precise_location() {
        return GeoLocation {
            country: location.country,
            ..GeoLocation::default()
        };
    }
    location
}
