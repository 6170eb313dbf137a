use chrono::Utc;
use tracing::{debug, info};

use crate::state::AppState;

/// Delete events older than the configured retention window.
pub async fn purge_expired(state: &AppState) -> anyhow::Result<u64> {
    let cutoff = Utc::now() - state.config().retention_window();
    let deleted = state.analytics.delete_events_before(cutoff).await?;
    if deleted > 0 {
        info!(deleted, cutoff = %cutoff, "Retention purge removed expired events");
    }
    Ok(deleted)
}

/// Drop rate-limit buckets that have been idle for the eviction window.
pub fn evict_idle_buckets(state: &AppState) -> usize {
    let removed = state.admission.evict_idle();
    if removed > 0 {
        debug!(removed, "Evicted idle rate-limit buckets");
    }
    removed
}
