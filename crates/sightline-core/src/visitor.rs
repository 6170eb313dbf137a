use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::error::CoreError;

/// Minimum accepted length of the server salt.
pub const MIN_SALT_LEN: usize = 32;

const MAX_ROTATION_HOURS: u32 = 8760;

pub fn clamp_rotation_hours(hours: u32) -> u32 {
    hours.clamp(1, MAX_ROTATION_HOURS)
}

#[derive(Debug)]
struct HashState {
    salt: String,
    rotation_hours: u32,
}

/// Derives rotating, salted, one-way visitor identifiers.
///
/// Formula: `sha256(ip + user_agent + project_id + salt + bucket)` rendered as
/// 64 lowercase hex characters, where
/// `bucket = floor(unix_seconds / 3600) / rotation_hours`.
///
/// Two requests map to the same visitor only inside one rotation bucket. The
/// raw IP and User-Agent are only ever held for the duration of the call.
///
/// The hasher can only be built from a valid salt, so there is no
/// "uninitialised" state to guard against at call time. [`reload`] swaps the
/// salt and rotation period atomically; every hash computed afterwards is
/// unrelated to hashes computed before it.
///
/// [`reload`]: VisitorHasher::reload
#[derive(Debug)]
pub struct VisitorHasher {
    state: RwLock<Arc<HashState>>,
}

impl VisitorHasher {
    pub fn new(salt: &str, rotation_hours: u32) -> Result<Self, CoreError> {
        Ok(Self {
            state: RwLock::new(Arc::new(Self::build_state(salt, rotation_hours)?)),
        })
    }

    fn build_state(salt: &str, rotation_hours: u32) -> Result<HashState, CoreError> {
        let len = salt.chars().count();
        if len < MIN_SALT_LEN {
            return Err(CoreError::SaltTooShort {
                min: MIN_SALT_LEN,
                actual: len,
            });
        }
        Ok(HashState {
            salt: salt.to_string(),
            rotation_hours: clamp_rotation_hours(rotation_hours),
        })
    }

    /// Replace the salt and rotation period. The previous state stays in
    /// force when the new values are rejected.
    pub fn reload(&self, salt: &str, rotation_hours: u32) -> Result<(), CoreError> {
        let next = Arc::new(Self::build_state(salt, rotation_hours)?);
        match self.state.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
        tracing::info!(rotation_hours, "Visitor hasher reloaded");
        Ok(())
    }

    pub fn rotation_hours(&self) -> u32 {
        self.current().rotation_hours
    }

    fn current(&self) -> Arc<HashState> {
        match self.state.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn hash(&self, ip: &str, user_agent: &str, project_id: &str) -> String {
        self.hash_at(ip, user_agent, project_id, Utc::now())
    }

    pub fn hash_at(
        &self,
        ip: &str,
        user_agent: &str,
        project_id: &str,
        at: DateTime<Utc>,
    ) -> String {
        let state = self.current();
        let bucket = rotation_bucket(at, state.rotation_hours);
        let mut hasher = Sha256::new();
        hasher.update(ip.as_bytes());
        hasher.update(user_agent.as_bytes());
        hasher.update(project_id.as_bytes());
        hasher.update(state.salt.as_bytes());
        hasher.update(bucket.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Integer time slot for `at` under the given rotation period.
pub fn rotation_bucket(at: DateTime<Utc>, rotation_hours: u32) -> i64 {
    let hours_since_epoch = at.timestamp().div_euclid(3600);
    hours_since_epoch.div_euclid(i64::from(clamp_rotation_hours(rotation_hours)))
}

/// Extract the host from a full referrer URL.
///
/// Returns `None` if referrer is empty or cannot be parsed to a non-empty host.
pub fn extract_referrer_domain(referrer: &str) -> Option<String> {
    if referrer.is_empty() {
        return None;
    }
    // Strip scheme prefix and take everything before the first '/'.
    let stripped = referrer
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let domain = stripped.split(['/', '?', '#']).next()?;
    if domain.is_empty() {
        None
    } else {
        Some(domain.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    const SALT: &str = "0123456789abcdef0123456789abcdef";

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().expect("valid timestamp")
    }

    #[test]
    fn hash_is_64_lowercase_hex_chars() {
        let hasher = VisitorHasher::new(SALT, 24).expect("hasher");
        let id = hasher.hash("1.2.3.4", "Mozilla/5.0 Chrome/120", "proj_1");
        assert_eq!(id.len(), 64);
        assert!(id
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn hash_is_deterministic_within_bucket() {
        let hasher = VisitorHasher::new(SALT, 24).expect("hasher");
        let t = at(1_700_000_000);
        let a = hasher.hash_at("1.2.3.4", "UA", "proj_1", t);
        let b = hasher.hash_at("1.2.3.4", "UA", "proj_1", t + chrono::Duration::minutes(5));
        assert_eq!(a, b);
    }

    #[test]
    fn changing_any_input_changes_hash() {
        let hasher = VisitorHasher::new(SALT, 24).expect("hasher");
        let t = at(1_700_000_000);
        let base = hasher.hash_at("1.2.3.4", "UA", "proj_1", t);
        assert_ne!(base, hasher.hash_at("1.2.3.5", "UA", "proj_1", t));
        assert_ne!(base, hasher.hash_at("1.2.3.4", "UA2", "proj_1", t));
        assert_ne!(base, hasher.hash_at("1.2.3.4", "UA", "proj_2", t));

        let other_salt =
            VisitorHasher::new("ffffffffffffffffffffffffffffffff", 24).expect("hasher");
        assert_ne!(base, other_salt.hash_at("1.2.3.4", "UA", "proj_1", t));
    }

    #[test]
    fn crossing_rotation_boundary_changes_hash() {
        let hasher = VisitorHasher::new(SALT, 1).expect("hasher");
        // 1_699_999_200 is an exact hour boundary.
        let before = at(1_699_999_200 - 1);
        let after = at(1_699_999_200);
        assert_ne!(rotation_bucket(before, 1), rotation_bucket(after, 1));
        assert_ne!(
            hasher.hash_at("1.2.3.4", "UA", "proj_1", before),
            hasher.hash_at("1.2.3.4", "UA", "proj_1", after)
        );
    }

    #[test]
    fn short_salt_is_rejected() {
        let err = VisitorHasher::new("too-short", 24).expect_err("must fail");
        assert!(matches!(err, CoreError::SaltTooShort { min: 32, actual: 9 }));
    }

    #[test]
    fn rotation_hours_are_clamped() {
        assert_eq!(VisitorHasher::new(SALT, 0).expect("hasher").rotation_hours(), 1);
        assert_eq!(
            VisitorHasher::new(SALT, 100_000).expect("hasher").rotation_hours(),
            8760
        );
    }

    #[test]
    fn reload_swaps_state_and_rejects_bad_salt() {
        let hasher = VisitorHasher::new(SALT, 24).expect("hasher");
        let t = at(1_700_000_000);
        let before = hasher.hash_at("1.2.3.4", "UA", "proj_1", t);

        assert!(hasher.reload("short", 24).is_err());
        assert_eq!(before, hasher.hash_at("1.2.3.4", "UA", "proj_1", t));

        hasher
            .reload("abcdefabcdefabcdefabcdefabcdefabcdef", 48)
            .expect("reload");
        assert_eq!(hasher.rotation_hours(), 48);
        assert_ne!(before, hasher.hash_at("1.2.3.4", "UA", "proj_1", t));
    }

    #[test]
    fn extract_referrer_domain_https() {
        let domain = extract_referrer_domain("https://news.ycombinator.com/item?id=12345");
        assert_eq!(domain.as_deref(), Some("news.ycombinator.com"));
    }

    #[test]
    fn extract_referrer_domain_http() {
        let domain = extract_referrer_domain("http://Google.com?q=rust");
        assert_eq!(domain.as_deref(), Some("google.com"));
    }

    #[test]
    fn extract_referrer_domain_empty() {
        assert_eq!(extract_referrer_domain(""), None);
    }
}
