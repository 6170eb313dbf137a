use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::mailer::ReportMailer;
use crate::state::AppState;

/// Build and send a report covering the last `period` for every project with
/// a report address. One failing project does not stop the others; the
/// number of reports sent is returned.
pub async fn send_reports(
    state: &AppState,
    mailer: &dyn ReportMailer,
    period: Duration,
) -> anyhow::Result<usize> {
    let end = Utc::now();
    let start = end - chrono::Duration::from_std(period)?;
    let heartbeat = state.config().heartbeat_interval_seconds;

    let mut sent = 0;
    for project in state.metadata.list_projects().await? {
        if project.report_email.is_none() {
            continue;
        }
        let report = match state
            .analytics
            .generate_report(&project.id, start, end, heartbeat)
            .await
        {
            Ok(report) => report,
            Err(e) => {
                warn!(project_id = %project.id, error = %e, "Report generation failed");
                continue;
            }
        };
        match mailer.send_report(&project, &report).await {
            Ok(()) => sent += 1,
            Err(e) => warn!(project_id = %project.id, error = %e, "Report e-mail failed"),
        }
    }
    if sent > 0 {
        info!(sent, "E-mail reports sent");
    }
    Ok(sent)
}
