/// Longest range a single assignment may materialize (about ten years).
pub const MAX_RANGE_DAYS: i64 = 3_660;

/// Widest window a utilization or calendar query may scan.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 3_660;

pub const MAX_ASSETS: usize = 100_000;

/// Asset codes and names.
pub const MAX_NAME_LEN: usize = 256;

/// Free-text assignment metadata (client, site, job description, ...).
pub const MAX_TEXT_LEN: usize = 4_096;

/// Backups larger than this are refused on restore.
pub const MAX_SNAPSHOT_LOGS: usize = 10_000_000;

/// Rows in one multi-row INSERT.
pub const MAX_BATCH_SIZE: usize = 1_000;
