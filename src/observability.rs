use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "fleetday_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "fleetday_query_duration_seconds";

// ── Reconciliation ──────────────────────────────────────────────

/// Counter: assignment commits. Labels: outcome.
pub const COMMITS_TOTAL: &str = "fleetday_commits_total";

/// Counter: daily logs written by committed assignments.
pub const DAILY_LOGS_WRITTEN_TOTAL: &str = "fleetday_daily_logs_written_total";

/// Counter: commits that overwrote another assignment's days.
pub const OVERLAPS_TOTAL: &str = "fleetday_overlaps_total";

/// Counter: WAL compactions.
pub const COMPACTIONS_TOTAL: &str = "fleetday_compactions_total";

// ── USE metrics (resource utilization) ──────────────────────────

pub const CONNECTIONS_ACTIVE: &str = "fleetday_connections_active";

pub const CONNECTIONS_TOTAL: &str = "fleetday_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "fleetday_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "fleetday_wal_flush_duration_seconds";

/// Histogram: events per group-commit flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "fleetday_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if `port` is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short label of a command for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertAsset { .. } => "insert_asset",
        Command::InsertAssignment { .. } => "insert_assignment",
        Command::SelectAssets { .. } => "select_assets",
        Command::SelectAssignments { .. } => "select_assignments",
        Command::SelectDailyLogs { .. } => "select_daily_logs",
        Command::SelectUtilization { .. } => "select_utilization",
        Command::SelectStatus { .. } => "select_status",
    }
}
