use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::EngineError;

/// The three keyed collections: assets by id, assignments by id, daily logs by
/// `(asset, date)`. Mutated only by applying events.
#[derive(Debug, Default, Clone)]
pub struct Collections {
    assets: HashMap<Ulid, Asset>,
    assignments: HashMap<Ulid, Assignment>,
    daily_logs: BTreeMap<LogKey, DailyLog>,
}

impl Collections {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Assets ───────────────────────────────────────────────

    pub fn asset(&self, id: &Ulid) -> Option<&Asset> {
        self.assets.get(id)
    }

    pub fn asset_count(&self) -> usize {
        self.assets.len()
    }

    pub fn assets(&self) -> impl Iterator<Item = &Asset> {
        self.assets.values()
    }

    /// Assets that are scheduled on their own.
    pub fn working_assets(&self) -> impl Iterator<Item = &Asset> {
        self.assets.values().filter(|a| !a.is_accessory())
    }

    pub fn is_accessory(&self, id: &Ulid) -> bool {
        self.assets.get(id).is_some_and(Asset::is_accessory)
    }

    // ── Assignments ──────────────────────────────────────────

    pub fn assignment(&self, id: &Ulid) -> Option<&Assignment> {
        self.assignments.get(id)
    }

    pub fn assignments(&self) -> impl Iterator<Item = &Assignment> {
        self.assignments.values()
    }

    pub fn assignments_for(&self, asset_id: Ulid) -> impl Iterator<Item = &Assignment> {
        self.assignments.values().filter(move |a| a.asset_id == asset_id)
    }

    // ── Daily logs ───────────────────────────────────────────

    pub fn daily_log(&self, asset_id: Ulid, date: NaiveDate) -> Option<&DailyLog> {
        self.daily_logs.get(&(asset_id, date))
    }

    pub fn daily_log_count(&self) -> usize {
        self.daily_logs.len()
    }

    /// All logs ordered by asset, then date.
    pub fn daily_logs(&self) -> impl Iterator<Item = &DailyLog> {
        self.daily_logs.values()
    }

    /// One asset's logs inside the window, in date order.
    pub fn logs_for_asset(&self, asset_id: Ulid, window: Window) -> impl Iterator<Item = &DailyLog> {
        self.daily_logs
            .range((asset_id, window.from)..=(asset_id, window.to))
            .map(|(_, log)| log)
    }

    /// Every asset's logs inside the window.
    pub fn logs_in(&self, window: Window) -> impl Iterator<Item = &DailyLog> {
        self.daily_logs
            .values()
            .filter(move |log| window.contains(log.date))
    }

    // ── Event application ────────────────────────────────────

    pub fn apply_event(&mut self, event: &Event) {
        match event {
            Event::AssetRegistered { asset } => {
                self.assets.insert(asset.id, asset.clone());
            }
            Event::AssignmentCommitted {
                assignment,
                daily_logs,
                asset,
            } => {
                self.assignments.insert(assignment.id, assignment.clone());
                for log in daily_logs {
                    self.daily_logs.insert(log.key(), log.clone());
                }
                if let Some(asset) = asset {
                    self.assets.insert(asset.id, asset.clone());
                }
            }
            Event::StateRestored { snapshot } => {
                self.assets = snapshot.assets.iter().map(|a| (a.id, a.clone())).collect();
                self.assignments = snapshot
                    .assignments
                    .iter()
                    .map(|a| (a.id, a.clone()))
                    .collect();
                self.daily_logs = snapshot
                    .daily_logs
                    .iter()
                    .map(|l| (l.key(), l.clone()))
                    .collect();
            }
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        let mut assets: Vec<Asset> = self.assets.values().cloned().collect();
        assets.sort_by_key(|a| a.id);
        let mut assignments: Vec<Assignment> = self.assignments.values().cloned().collect();
        assignments.sort_by_key(|a| a.id);
        Snapshot {
            version: SNAPSHOT_VERSION,
            assets,
            assignments,
            daily_logs: self.daily_logs.values().cloned().collect(),
        }
    }
}

/// Staged writes of one reconciliation against a read view of the collections.
///
/// Nothing reaches the collections until `commit` seals the unit into a single
/// event and the engine applies it. Dropping the unit (or `rollback`) discards
/// everything staged.
pub struct UnitOfWork<'a> {
    base: &'a Collections,
    assignment: Option<Assignment>,
    daily_logs: BTreeMap<LogKey, DailyLog>,
    asset: Option<Asset>,
}

impl<'a> UnitOfWork<'a> {
    pub fn begin(base: &'a Collections) -> Self {
        Self {
            base,
            assignment: None,
            daily_logs: BTreeMap::new(),
            asset: None,
        }
    }

    /// Stage the assignment. A stored assignment keeps its asset; re-saving it
    /// under another asset is refused.
    pub fn put_assignment(&mut self, assignment: Assignment) -> Result<(), EngineError> {
        if let Some(stored) = self.base.assignment(&assignment.id)
            && stored.asset_id != assignment.asset_id
        {
            return Err(EngineError::AssetChanged {
                assignment: assignment.id,
                from: stored.asset_id,
                to: assignment.asset_id,
            });
        }
        self.assignment = Some(assignment);
        Ok(())
    }

    /// Stage a log of the staged assignment. One log per date.
    pub fn put_daily_log(&mut self, log: DailyLog) -> Result<(), EngineError> {
        let Some(assignment) = &self.assignment else {
            return Err(EngineError::ForeignLog {
                log: log.id,
                assignment: log.assignment_id,
            });
        };
        if log.assignment_id != assignment.id || log.asset_id != assignment.asset_id {
            return Err(EngineError::ForeignLog {
                log: log.id,
                assignment: assignment.id,
            });
        }
        if self.daily_logs.contains_key(&log.key()) {
            return Err(EngineError::DuplicateDay(log.date));
        }
        self.daily_logs.insert(log.key(), log);
        Ok(())
    }

    /// Stage the asset's pointer write. The asset must already be on the roster and
    /// must point at the staged assignment, which has to be ACTIVE with a staged
    /// log for `today`. Only the pointer is taken from `asset`; every other field
    /// keeps its roster value.
    pub fn put_asset(&mut self, asset: Asset, today: NaiveDate) -> Result<(), EngineError> {
        let Some(stored) = self.base.asset(&asset.id) else {
            return Err(EngineError::NotFound(asset.id));
        };
        let assignment = match &self.assignment {
            Some(a) if a.asset_id == asset.id && asset.current_assignment_id == Some(a.id) => a,
            _ => return Err(EngineError::PointerMismatch(asset.id)),
        };
        if assignment.status != AssignmentStatus::Active
            || !self.daily_logs.contains_key(&(asset.id, today))
        {
            return Err(EngineError::PointerNotCurrent(assignment.id));
        }
        let mut updated = stored.clone();
        updated.current_assignment_id = Some(assignment.id);
        self.asset = Some(updated);
        Ok(())
    }

    pub fn staged_assignment(&self) -> Option<&Assignment> {
        self.assignment.as_ref()
    }

    /// Stored logs of other assignments that the staged logs would overwrite.
    pub fn displaced(&self) -> Vec<&'a DailyLog> {
        let Some(assignment) = &self.assignment else {
            return Vec::new();
        };
        self.daily_logs
            .keys()
            .filter_map(|(asset_id, date)| self.base.daily_log(*asset_id, *date))
            .filter(|existing| existing.assignment_id != assignment.id)
            .collect()
    }

    /// Seal the staged writes into one event.
    pub fn commit(self) -> Result<Event, EngineError> {
        let assignment = self.assignment.ok_or(EngineError::MissingAsset)?;
        Ok(Event::AssignmentCommitted {
            assignment,
            daily_logs: self.daily_logs.into_values().collect(),
            asset: self.asset,
        })
    }

    pub fn rollback(self) {
        tracing::debug!(
            staged_logs = self.daily_logs.len(),
            "unit of work rolled back"
        );
    }
}
