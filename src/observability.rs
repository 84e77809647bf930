use std::net::SocketAddr;

use metrics_exporter_prometheus::BuildError;

use crate::engine::EngineError;
use crate::repository::StorageError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: availability searches. Labels: outcome (offered, none, invalid).
pub const SEARCHES_TOTAL: &str = "roombook_searches_total";

/// Counter: reservation submissions. Labels: outcome (confirmed, invalid, lost).
pub const RESERVATIONS_TOTAL: &str = "roombook_reservations_total";

/// Histogram: storage call latency in seconds. Labels: op.
pub const STORAGE_DURATION_SECONDS: &str = "roombook_storage_duration_seconds";

/// Counter: failed storage calls. Labels: op, kind.
pub const STORAGE_ERRORS_TOTAL: &str = "roombook_storage_errors_total";

/// Counter: confirmation mail. Labels: status (sent, failed, dropped).
pub const MAIL_TOTAL: &str = "roombook_mail_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: live browser sessions.
pub const SESSIONS_ACTIVE: &str = "roombook_sessions_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roombook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roombook_wal_flush_batch_size";

/// Counter: WAL compactions. Labels: status.
pub const WAL_COMPACTIONS_TOTAL: &str = "roombook_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a storage failure to a short label for metrics.
pub fn storage_error_label(err: &StorageError) -> &'static str {
    match err {
        StorageError::Timeout(_) => "timeout",
        StorageError::Engine(e) => match e {
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::Conflict(_) => "conflict",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "wal",
        },
    }
}
