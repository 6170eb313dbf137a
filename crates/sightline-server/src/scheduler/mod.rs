use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::mailer::ReportMailer;
use crate::state::AppState;

pub mod email_reports;
pub mod retention;

/// How often idle rate-limit buckets are swept.
const EVICTION_PERIOD: Duration = Duration::from_secs(60);
const RETENTION_PERIOD: Duration = Duration::from_secs(3600);

struct ScheduledTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

/// Owns every periodic background task. Dropping the scheduler leaves tasks
/// running; call [`Scheduler::shutdown`] to stop them.
#[derive(Default)]
pub struct Scheduler {
    tasks: Vec<ScheduledTask>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `job` every `period`, starting one period from now.
    ///
    /// Each run executes in its own task, so an error or a panic is logged
    /// and the next tick still fires.
    pub fn spawn<F, Fut>(&mut self, name: &'static str, period: Duration, job: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            info!(task = name, period_seconds = period.as_secs(), "Periodic task started");
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                match tokio::spawn(job()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!(task = name, error = %e, "Periodic task run failed"),
                    Err(e) => error!(task = name, error = %e, "Periodic task run panicked"),
                }
            }
        });
        self.tasks.push(ScheduledTask { name, handle });
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Cancel every task. A run already in progress finishes on its own.
    pub fn shutdown(self) {
        for task in self.tasks {
            task.handle.abort();
            info!(task = task.name, "Periodic task stopped");
        }
    }
}

/// Start the retention purge, bucket eviction and (when a mailer is given)
/// the e-mail report tasks.
pub fn start(state: Arc<AppState>, mailer: Option<Arc<dyn ReportMailer>>) -> Scheduler {
    let mut scheduler = Scheduler::new();

    {
        let state = Arc::clone(&state);
        scheduler.spawn("retention_purge", RETENTION_PERIOD, move || {
            let state = Arc::clone(&state);
            async move { retention::purge_expired(&state).await.map(|_| ()) }
        });
    }

    {
        let state = Arc::clone(&state);
        scheduler.spawn("admission_eviction", EVICTION_PERIOD, move || {
            let state = Arc::clone(&state);
            async move {
                retention::evict_idle_buckets(&state);
                Ok(())
            }
        });
    }

    if let Some(mailer) = mailer {
        let period = state.config().email_report_interval();
        let state = Arc::clone(&state);
        scheduler.spawn("email_reports", period, move || {
            let state = Arc::clone(&state);
            let mailer = Arc::clone(&mailer);
            async move {
                email_reports::send_reports(&state, mailer.as_ref(), period)
                    .await
                    .map(|_| ())
            }
        });
    }

    scheduler
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn failing_and_panicking_runs_do_not_stop_the_task() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new();
        {
            let runs = Arc::clone(&runs);
            scheduler.spawn("flaky", Duration::from_millis(10), move || {
                let runs = Arc::clone(&runs);
                async move {
                    match runs.fetch_add(1, Ordering::SeqCst) {
                        0 => panic!("first run blows up"),
                        1 => Err(anyhow::anyhow!("second run fails")),
                        _ => Ok(()),
                    }
                }
            });
        }
        assert_eq!(scheduler.len(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(runs.load(Ordering::SeqCst) >= 3);

        scheduler.shutdown();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let after_shutdown = runs.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runs.load(Ordering::SeqCst), after_shutdown);
    }
}
