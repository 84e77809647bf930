use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use roombook::config::Config;
use roombook::engine::Engine;
use roombook::auth::StaticAuthenticator;
use roombook::http::{self, AppState};
use roombook::notify::{self, LogMailer, MailQueue};
use roombook::reaper;
use roombook::render::JsonPresenter;
use roombook::repository::EngineRepository;
use roombook::session::InMemorySessions;
use roombook::workflow::AppContext;

const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

fn init_logger(production: bool) -> Result<(), Box<dyn std::error::Error>> {
    let level = if production { "info" } else { "debug" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into());
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(env_filter)
        .try_init()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env();
    init_logger(config.production)?;
    roombook::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let engine = Arc::new(Engine::new(config.wal_path())?);
    for name in &config.rooms {
        engine.ensure_room(name).await?;
    }

    let sessions = Arc::new(InMemorySessions::new(config.session_lifetime));
    let (mail, mail_rx) = MailQueue::channel(config.mail_queue, config.mail_from.clone());
    tokio::spawn(notify::run_mail_listener(mail_rx, Arc::new(LogMailer)));
    tokio::spawn(reaper::run_session_reaper(sessions.clone(), SESSION_SWEEP_INTERVAL));
    tokio::spawn(reaper::run_compactor(
        engine.clone(),
        config.compact_threshold,
        COMPACT_CHECK_INTERVAL,
    ));

    let state = AppState {
        ctx: AppContext {
            repo: Arc::new(EngineRepository::new(engine.clone(), config.storage_timeout)),
            sessions,
            mail,
        },
        presenter: Arc::new(JsonPresenter),
        auth: Arc::new(StaticAuthenticator::new(
            config.admin_email.clone(),
            config.admin_password.clone(),
        )),
        secure_cookies: config.production,
        require_login: config.require_login,
    };
    if config.admin_password.is_none() {
        warn!("ROOMBOOK_ADMIN_PASSWORD not set; staff login is disabled");
    }

    let addr = config.addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("roombook listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  rooms: {}", engine.list_rooms().await.len());
    let metrics = config
        .metrics_port
        .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"));
    info!("  metrics: {metrics}");

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, let in-flight requests finish
    axum::serve(listener, http::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("roombook stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("failed to register SIGTERM handler: {e}");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    info!("shutdown signal received, draining requests");
}
