//! Scheduled report e-mails.

use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use lettre::{
    message::Mailbox, transport::smtp::authentication::Credentials, AsyncSmtpTransport,
    AsyncTransport, Message, Tokio1Executor,
};

use sightline_core::config::SmtpConfig;
use sightline_core::report::{MetricRow, ProjectReport};
use sightline_metadata::Project;

/// Sends a built report to a project's report address.
#[async_trait]
pub trait ReportMailer: Send + Sync + 'static {
    async fn send_report(&self, project: &Project, report: &ProjectReport) -> anyhow::Result<()>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn from_config(smtp: &SmtpConfig) -> anyhow::Result<Self> {
        let from: Mailbox = smtp
            .from
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid SIGHTLINE_SMTP_FROM: {e}"))?;
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp.host)
            .port(smtp.port)
            .timeout(Some(Duration::from_secs(10)));
        if let (Some(user), Some(pass)) = (&smtp.username, &smtp.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }
        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl ReportMailer for SmtpMailer {
    async fn send_report(&self, project: &Project, report: &ProjectReport) -> anyhow::Result<()> {
        let Some(target) = project.report_email.as_deref() else {
            return Ok(());
        };
        let to: Mailbox = target
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid report address {target:?}: {e}"))?;
        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(format!("Sightline report: {}", project.name))
            .body(render_report(project, report))?;
        self.transport.send(email).await?;
        Ok(())
    }
}

fn write_rows(out: &mut String, title: &str, rows: &[MetricRow]) {
    if rows.is_empty() {
        return;
    }
    let _ = writeln!(out, "\n{title}");
    for row in rows {
        let _ = writeln!(out, "  {:>6}  {}", row.count, row.label);
    }
}

/// Plain-text body of a report e-mail.
pub fn render_report(project: &Project, report: &ProjectReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} ({})", project.name, project.domain);
    let _ = writeln!(
        out,
        "{} to {}",
        report.start.format("%Y-%m-%d %H:%M UTC"),
        report.end.format("%Y-%m-%d %H:%M UTC")
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "Pageviews:        {}", report.pageviews);
    let _ = writeln!(out, "Unique visitors:  {}", report.unique_visitors);
    let _ = writeln!(out, "Sessions:         {}", report.sessions.total_sessions);
    let _ = writeln!(out, "Bounce rate:      {:.1}%", report.bounce_rate);
    let _ = writeln!(out, "Conversion rate:  {:.1}%", report.conversion_rate);
    let _ = writeln!(
        out,
        "Avg. session:     {:.0}s",
        report.sessions.avg_session_duration_seconds
    );
    if let Some(peak) = &report.peak_times.peak_day {
        let _ = writeln!(out, "Busiest day:      {}", peak.name);
    }
    if let Some(peak) = &report.peak_times.peak_hour {
        let _ = writeln!(out, "Busiest hour:     {:02}:00 UTC", peak.hour);
    }
    write_rows(&mut out, "Top pages", &report.top_pages);
    write_rows(&mut out, "Top referrers", &report.referrers);
    write_rows(&mut out, "Countries", &report.countries);
    write_rows(&mut out, "Custom events", &report.custom_events);
    out
}
