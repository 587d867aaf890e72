use crate::model::*;

use super::EngineError;

/// Decides what happens when a commit would overwrite daily logs that belong to
/// another assignment. Called with the incoming assignment and the logs it
/// displaces (never empty). Returning an error vetoes the whole commit.
pub trait OverlapHook: Send + Sync {
    fn on_overlap(&self, incoming: &Assignment, displaced: &[&DailyLog]) -> Result<(), EngineError>;
}

/// Later writes win. The overwrite is logged and allowed.
#[derive(Debug, Default, Clone, Copy)]
pub struct LastWriteWins;

impl OverlapHook for LastWriteWins {
    fn on_overlap(&self, incoming: &Assignment, displaced: &[&DailyLog]) -> Result<(), EngineError> {
        let first = displaced.iter().map(|l| l.date).min();
        let last = displaced.iter().map(|l| l.date).max();
        tracing::warn!(
            assignment = %incoming.id,
            asset = %incoming.asset_id,
            displaced = displaced.len(),
            first = ?first,
            last = ?last,
            "assignment overwrites daily logs of another assignment"
        );
        Ok(())
    }
}

/// Refuses any commit that would overwrite another assignment's days.
#[derive(Debug, Default, Clone, Copy)]
pub struct RejectOverlaps;

impl OverlapHook for RejectOverlaps {
    fn on_overlap(&self, _incoming: &Assignment, displaced: &[&DailyLog]) -> Result<(), EngineError> {
        match displaced.first() {
            Some(log) => Err(EngineError::OverlapRejected(log.assignment_id)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime};
    use ulid::Ulid;

    use super::*;

    fn log(assignment_id: Ulid) -> DailyLog {
        DailyLog {
            id: Ulid::new(),
            asset_id: Ulid::new(),
            assignment_id,
            date: NaiveDate::from_ymd_opt(2025, 3, 3).unwrap(),
            start_time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
            hours: 8.0,
            status: DayStatus::Working,
            verified: true,
            notes: None,
        }
    }

    fn incoming() -> Assignment {
        let d = NaiveDate::from_ymd_opt(2025, 3, 3).unwrap();
        Assignment {
            id: Ulid::new(),
            asset_id: Ulid::new(),
            start_date: d,
            end_date: None,
            schedule: Schedule::default(),
            status: AssignmentStatus::Active,
            client: "ACME".into(),
            cost_center: String::new(),
            province: String::new(),
            city: String::new(),
            site: String::new(),
            job_description: String::new(),
            offer_id: String::new(),
            responsible: String::new(),
            estimated_total_hours: 8.0,
            created_on: d,
        }
    }

    #[test]
    fn last_write_wins_allows() {
        let old = log(Ulid::new());
        assert!(LastWriteWins.on_overlap(&incoming(), &[&old]).is_ok());
    }

    #[test]
    fn reject_names_displaced_assignment() {
        let prior = Ulid::new();
        let old = log(prior);
        match RejectOverlaps.on_overlap(&incoming(), &[&old]) {
            Err(EngineError::OverlapRejected(id)) => assert_eq!(id, prior),
            other => panic!("expected OverlapRejected, got {other:?}"),
        }
    }
}
