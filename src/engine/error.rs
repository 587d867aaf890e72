use chrono::NaiveDate;
use thiserror::Error;
use ulid::Ulid;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no asset selected")]
    MissingAsset,
    #[error("no start date")]
    MissingStartDate,
    #[error("invalid range: {end} is before {start}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("daily log {log} does not belong to assignment {assignment}")]
    ForeignLog { log: Ulid, assignment: Ulid },
    #[error("more than one daily log for {0}")]
    DuplicateDay(NaiveDate),
    #[error("asset {0} does not point at the committed assignment")]
    PointerMismatch(Ulid),
    #[error("assignment {0} is not active today and cannot become the current one")]
    PointerNotCurrent(Ulid),
    #[error("assignment {assignment} belongs to asset {from}, not {to}")]
    AssetChanged { assignment: Ulid, from: Ulid, to: Ulid },
    #[error("overlap with assignment {0} rejected")]
    OverlapRejected(Ulid),
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    /// Errors raised before anything was staged for persistence.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EngineError::MissingAsset
                | EngineError::MissingStartDate
                | EngineError::InvalidRange { .. }
                | EngineError::InvalidSchedule(_)
                | EngineError::LimitExceeded(_)
        )
    }
}
