use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use tokio::sync::oneshot;

use crate::limits::*;
use crate::model::*;
use crate::observability::{COMMITS_TOTAL, COMPACTIONS_TOTAL, DAILY_LOGS_WRITTEN_TOTAL, OVERLAPS_TOTAL};

use super::calendar::expand_range;
use super::materialize::{build_assignment, materialize, pointer_update, validate_draft};
use super::store::{Collections, UnitOfWork};
use super::{Engine, EngineError, WalCommand};

fn check_name(value: &str, what: &'static str) -> Result<(), EngineError> {
    if value.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

fn stage(
    uow: &mut UnitOfWork<'_>,
    assignment: Assignment,
    logs: Vec<DailyLog>,
    asset: Option<Asset>,
    today: NaiveDate,
) -> Result<(), EngineError> {
    uow.put_assignment(assignment)?;
    for log in logs {
        uow.put_daily_log(log)?;
    }
    if let Some(asset) = asset {
        uow.put_asset(asset, today)?;
    }
    Ok(())
}

fn outcome(result: &Result<CommitReceipt, EngineError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) if e.is_validation() => "invalid",
        Err(EngineError::OverlapRejected(_)) => "overlap",
        Err(EngineError::WalError(_)) => "wal_error",
        Err(_) => "rejected",
    }
}

impl Engine {
    /// Add or edit an asset on the roster. The stored `current_assignment_id` is
    /// kept; a new asset starts without one.
    pub async fn register_asset(&self, mut asset: Asset) -> Result<(), EngineError> {
        check_name(&asset.code, "asset code too long")?;
        check_name(&asset.name, "asset name too long")?;
        check_name(&asset.location, "asset location too long")?;

        let mut state = self.state.write().await;
        match state.asset(&asset.id) {
            Some(stored) => asset.current_assignment_id = stored.current_assignment_id,
            None => {
                if state.asset_count() >= MAX_ASSETS {
                    return Err(EngineError::LimitExceeded("too many assets"));
                }
                asset.current_assignment_id = None;
            }
        }
        tracing::debug!(asset = %asset.id, code = %asset.code, "asset registered");
        self.persist(&mut state, Event::AssetRegistered { asset }).await
    }

    /// Expand the assignment's range and materialize one log per date, reusing
    /// the ids of logs already stored for those days. Nothing is written.
    pub async fn expand_and_materialize(
        &self,
        assignment: &Assignment,
        today: NaiveDate,
    ) -> Result<Vec<DailyLog>, EngineError> {
        let dates = expand_range(assignment.start_date, assignment.end_date)?;
        let state = self.state.read().await;
        materialize(assignment, &dates, today, |date| {
            state.daily_log(assignment.asset_id, date).map(|l| l.id)
        })
    }

    /// Persist an assignment, its logs and an optional asset pointer write as one
    /// unit. Any rejection leaves every collection untouched.
    ///
    /// Only `current_assignment_id` is taken from `asset_update`, and only when the
    /// assignment is ACTIVE and one of its logs falls on `today`.
    pub async fn commit_assignment(
        &self,
        assignment: Assignment,
        daily_logs: Vec<DailyLog>,
        asset_update: Option<Asset>,
        today: NaiveDate,
    ) -> Result<CommitReceipt, EngineError> {
        let mut state = self.state.write().await;
        self.commit_locked(&mut state, assignment, daily_logs, asset_update, today)
            .await
    }

    async fn commit_locked(
        &self,
        state: &mut Collections,
        assignment: Assignment,
        daily_logs: Vec<DailyLog>,
        asset_update: Option<Asset>,
        today: NaiveDate,
    ) -> Result<CommitReceipt, EngineError> {
        let result = self
            .try_commit(state, assignment, daily_logs, asset_update, today)
            .await;
        metrics::counter!(COMMITS_TOTAL, "outcome" => outcome(&result)).increment(1);
        result
    }

    async fn try_commit(
        &self,
        state: &mut Collections,
        assignment: Assignment,
        daily_logs: Vec<DailyLog>,
        asset_update: Option<Asset>,
        today: NaiveDate,
    ) -> Result<CommitReceipt, EngineError> {
        let assignment_id = assignment.id;
        let asset_id = assignment.asset_id;
        let days = daily_logs.len();
        let pointer_updated = asset_update.is_some();

        let (event, displaced) = {
            let mut uow = UnitOfWork::begin(state);
            if let Err(e) = stage(&mut uow, assignment, daily_logs, asset_update, today) {
                uow.rollback();
                return Err(e);
            }
            let displaced = uow.displaced();
            if !displaced.is_empty() {
                metrics::counter!(OVERLAPS_TOTAL).increment(1);
                let verdict = match uow.staged_assignment() {
                    Some(incoming) => self.overlap_hook.on_overlap(incoming, &displaced),
                    None => Ok(()),
                };
                if let Err(e) = verdict {
                    uow.rollback();
                    return Err(e);
                }
            }
            let displaced = displaced.len();
            (uow.commit()?, displaced)
        };

        self.persist(state, event).await?;
        metrics::counter!(DAILY_LOGS_WRITTEN_TOTAL).increment(days as u64);
        tracing::info!(
            assignment = %assignment_id,
            asset = %asset_id,
            days,
            pointer_updated,
            displaced,
            "assignment committed"
        );
        Ok(CommitReceipt {
            assignment_id,
            days,
            pointer_updated,
            displaced,
        })
    }

    /// Validate, expand, materialize, decide the pointer and commit.
    ///
    /// An asset missing from the roster does not block the save; its pointer is
    /// simply not written.
    pub async fn save_assignment(
        &self,
        draft: AssignmentDraft,
        today: NaiveDate,
    ) -> Result<CommitReceipt, EngineError> {
        let validated = validate_draft(&draft).and_then(|(asset_id, start)| {
            expand_range(start, draft.end_date).map(|dates| (asset_id, start, dates))
        });
        let (asset_id, start, dates) = match validated {
            Ok(v) => v,
            Err(e) => {
                metrics::counter!(COMMITS_TOTAL, "outcome" => "invalid").increment(1);
                tracing::debug!(error = %e, "assignment draft rejected");
                return Err(e);
            }
        };
        let assignment = build_assignment(draft, asset_id, start, dates.len(), today);

        let mut state = self.state.write().await;
        let logs = materialize(&assignment, &dates, today, |date| {
            state.daily_log(asset_id, date).map(|l| l.id)
        })?;
        let asset = state.asset(&asset_id);
        if asset.is_none() {
            tracing::warn!(asset = %asset_id, "saving assignment for an asset not on the roster");
        }
        let asset_update = pointer_update(&assignment, &dates, today, asset);
        self.commit_locked(&mut state, assignment, logs, asset_update, today)
            .await
    }

    /// Patch one day of an asset with a fresh single-day assignment. Metadata and
    /// shift come from `parent_id` when given. Times come from the request, then
    /// the day's current log, then the parent; times that differ from the parent's
    /// make the shift custom. Without an explicit status, the override is active
    /// only if the day is currently WORKING or RESERVED.
    pub async fn override_day(
        &self,
        request: DayOverride,
        today: NaiveDate,
    ) -> Result<CommitReceipt, EngineError> {
        let (mut draft, current_log) = {
            let state = self.state.read().await;
            let draft = match request.parent_id {
                Some(parent_id) => {
                    let parent = state
                        .assignment(&parent_id)
                        .filter(|a| a.asset_id == request.asset_id)
                        .ok_or(EngineError::NotFound(parent_id))?;
                    AssignmentDraft::from_assignment(parent)
                }
                None => AssignmentDraft::default(),
            };
            let log = state
                .daily_log(request.asset_id, request.date)
                .map(|l| (l.status, l.start_time, l.end_time));
            (draft, log)
        };

        draft.id = None;
        draft.asset_id = Some(request.asset_id);
        draft.start_date = Some(request.date);
        draft.end_date = Some(request.date);
        let start_time = request
            .start_time
            .or(current_log.map(|(_, start, _)| start))
            .unwrap_or(draft.schedule.start_time);
        let end_time = request
            .end_time
            .or(current_log.map(|(_, _, end)| end))
            .unwrap_or(draft.schedule.end_time);
        if (start_time, end_time) != (draft.schedule.start_time, draft.schedule.end_time) {
            draft.schedule = Schedule::custom(start_time, end_time);
        }
        draft.status = request.status.unwrap_or(match current_log {
            Some((DayStatus::Working | DayStatus::Reserved, _, _)) => AssignmentStatus::Active,
            _ => AssignmentStatus::Finished,
        });

        tracing::debug!(asset = %request.asset_id, date = %request.date, "day override");
        self.save_assignment(draft, today).await
    }

    /// Replace all three collections with a backup, as one WAL record.
    pub async fn restore_snapshot(&self, snapshot: Snapshot) -> Result<(), EngineError> {
        check_snapshot(&snapshot)?;
        let mut state = self.state.write().await;
        tracing::warn!(
            assets = snapshot.assets.len(),
            assignments = snapshot.assignments.len(),
            daily_logs = snapshot.daily_logs.len(),
            "restoring snapshot"
        );
        self.persist(&mut state, Event::StateRestored { snapshot }).await
    }

    /// Parse a JSON backup produced by `export_json` and restore it.
    pub async fn restore_json(&self, json: &str) -> Result<(), EngineError> {
        let snapshot: Snapshot =
            serde_json::from_str(json).map_err(|e| EngineError::InvalidSnapshot(e.to_string()))?;
        self.restore_snapshot(snapshot).await
    }

    /// Rewrite the WAL as one snapshot record. Writers are held off until the new
    /// file is in place.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let state = self.state.read().await;
        let snapshot = state.snapshot();
        let logs = snapshot.daily_logs.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events: vec![Event::StateRestored { snapshot }],
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        drop(state);
        metrics::counter!(COMPACTIONS_TOTAL).increment(1);
        tracing::info!(daily_logs = logs, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// A backup must keep the same invariants commits keep: one log per asset and
/// day, and every log pointing at an assignment of the same asset.
fn check_snapshot(snapshot: &Snapshot) -> Result<(), EngineError> {
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(EngineError::InvalidSnapshot(format!(
            "unsupported version {}",
            snapshot.version
        )));
    }
    if snapshot.assets.len() > MAX_ASSETS {
        return Err(EngineError::LimitExceeded("too many assets"));
    }
    if snapshot.daily_logs.len() > MAX_SNAPSHOT_LOGS {
        return Err(EngineError::LimitExceeded("too many daily logs"));
    }
    let owners: HashMap<_, _> = snapshot
        .assignments
        .iter()
        .map(|a| (a.id, a.asset_id))
        .collect();
    let mut keys = HashSet::with_capacity(snapshot.daily_logs.len());
    for log in &snapshot.daily_logs {
        if owners.get(&log.assignment_id) != Some(&log.asset_id) {
            return Err(EngineError::ForeignLog {
                log: log.id,
                assignment: log.assignment_id,
            });
        }
        if !keys.insert(log.key()) {
            return Err(EngineError::DuplicateDay(log.date));
        }
    }
    Ok(())
}
