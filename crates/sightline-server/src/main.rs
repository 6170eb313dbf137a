use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use sightline_core::config::Config;
use sightline_server::admin::{self, AdminCommand};
use sightline_server::mailer::{ReportMailer, SmtpMailer};
use sightline_server::state::AppState;

/// `sightline health`: liveness check for Docker HEALTHCHECK.
///
/// Calls `GET http://localhost:$SIGHTLINE_PORT/health`.
/// Exits 0 if the server responds with HTTP 200, exits 1 otherwise.
fn run_health_check() -> ! {
    let port = std::env::var("SIGHTLINE_PORT").unwrap_or_else(|_| "3000".to_string());
    let url = format!("http://localhost:{}/health", port);
    match ureq::get(&url).call() {
        Ok(resp) if resp.status() == 200 => std::process::exit(0),
        _ => std::process::exit(1),
    }
}

fn open_database(cfg: &Config) -> Result<sightline_duckdb::DuckDbBackend> {
    std::fs::create_dir_all(&cfg.data_dir)?;
    let db_path = format!("{}/sightline.db", cfg.data_dir);
    sightline_duckdb::DuckDbBackend::open(&db_path, &cfg.duckdb_memory_limit)
}

/// Re-read the environment on SIGHUP. An invalid configuration is logged and
/// the running one stays in force.
#[cfg(unix)]
fn spawn_reload_listener(state: Arc<AppState>) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            let result = Config::from_env().and_then(|next| state.reload(next));
            if let Err(e) = result {
                warn!(error = %e, "Configuration reload rejected; keeping current configuration");
            }
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn spawn_reload_listener(_state: Arc<AppState>) -> Result<()> {
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.first().map(|s| s.as_str()) == Some("health") {
        run_health_check();
    }

    // Structured JSON logging. Level controlled via RUST_LOG.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sightline=info".parse()?),
        )
        .json()
        .init();

    let cfg = Config::from_env()?;
    let db = open_database(&cfg)?;

    if let Some(command) = AdminCommand::parse(&args)? {
        let output = admin::run(&db, command).await?;
        println!("{output}");
        return Ok(());
    }

    let geo = sightline_server::geo::resolver_from_path(&cfg.geoip_path);
    let mailer: Option<Arc<dyn ReportMailer>> = match &cfg.smtp {
        Some(smtp) => Some(Arc::new(SmtpMailer::from_config(smtp)?)),
        None => {
            info!("SMTP not configured; e-mail reports disabled");
            None
        }
    };

    let state = Arc::new(AppState::new(db, cfg.clone(), geo)?);
    spawn_reload_listener(Arc::clone(&state))?;
    let scheduler = sightline_server::scheduler::start(Arc::clone(&state), mailer);

    let addr = format!("0.0.0.0:{}", cfg.port);
    let app = sightline_server::app::build_app(Arc::clone(&state));

    info!(port = cfg.port, privacy_mode = ?cfg.privacy_mode, "Sightline listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        tokio::signal::ctrl_c().await.ok();
    })
    .await?;

    scheduler.shutdown();
    info!("Sightline stopped");
    Ok(())
}
