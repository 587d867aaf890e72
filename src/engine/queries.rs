use chrono::NaiveDate;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError, projection, utilization};

impl Engine {
    // ── Roster ───────────────────────────────────────────────

    /// All assets, ordered by code.
    pub async fn list_assets(&self) -> Vec<Asset> {
        let state = self.state.read().await;
        let mut assets: Vec<Asset> = state.assets().cloned().collect();
        assets.sort_by(|a, b| a.code.cmp(&b.code).then(a.id.cmp(&b.id)));
        assets
    }

    pub async fn get_asset(&self, id: Ulid) -> Option<Asset> {
        self.state.read().await.asset(&id).cloned()
    }

    // ── Assignments and logs ─────────────────────────────────

    /// Newest start first.
    pub async fn list_assignments(&self) -> Vec<Assignment> {
        let state = self.state.read().await;
        let mut assignments: Vec<Assignment> = state.assignments().cloned().collect();
        sort_newest_first(&mut assignments);
        assignments
    }

    pub async fn get_assignment(&self, id: Ulid) -> Option<Assignment> {
        self.state.read().await.assignment(&id).cloned()
    }

    /// Every daily log, ordered by asset then date.
    pub async fn list_daily_logs(&self) -> Vec<DailyLog> {
        self.state.read().await.daily_logs().cloned().collect()
    }

    /// Logs inside a window, optionally for one asset.
    pub async fn daily_logs_in(&self, window: Window, asset_id: Option<Ulid>) -> Vec<DailyLog> {
        let state = self.state.read().await;
        match asset_id {
            Some(id) => state.logs_for_asset(id, window).cloned().collect(),
            None => state.logs_in(window).cloned().collect(),
        }
    }

    pub async fn daily_log(&self, asset_id: Ulid, date: NaiveDate) -> Option<DailyLog> {
        self.state.read().await.daily_log(asset_id, date).cloned()
    }

    /// Every assignment of one asset, newest start first.
    pub async fn asset_history(&self, asset_id: Ulid) -> Vec<Assignment> {
        let state = self.state.read().await;
        let mut history: Vec<Assignment> = state.assignments_for(asset_id).cloned().collect();
        sort_newest_first(&mut history);
        history
    }

    /// The contract the asset is on today, regardless of its lifecycle status.
    /// Latest start wins.
    pub async fn current_assignment(&self, asset_id: Ulid, today: NaiveDate) -> Option<Assignment> {
        let state = self.state.read().await;
        state
            .assignments_for(asset_id)
            .filter(|a| a.covers(today))
            .max_by_key(|a| (a.start_date, a.id))
            .cloned()
    }

    /// Schedulable assets with no log for `today`, ordered by code.
    pub async fn pending_verification(&self, today: NaiveDate) -> Vec<Asset> {
        let state = self.state.read().await;
        let mut pending: Vec<Asset> = state
            .working_assets()
            .filter(|a| state.daily_log(a.id, today).is_none())
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.code.cmp(&b.code));
        pending
    }

    // ── Utilization ──────────────────────────────────────────

    pub async fn compute_utilization(
        &self,
        window: Window,
        filter: AssetFilter,
    ) -> Result<Utilization, EngineError> {
        let state = self.state.read().await;
        utilization::compute(&state, window, filter)
    }

    pub async fn utilization_for_range(
        &self,
        range: StatsRange,
        filter: AssetFilter,
        today: NaiveDate,
    ) -> Result<Utilization, EngineError> {
        self.compute_utilization(range.resolve(today), filter).await
    }

    pub async fn utilization_by_asset(&self, window: Window) -> Result<Vec<AssetUtilization>, EngineError> {
        let state = self.state.read().await;
        utilization::by_asset(&state, window)
    }

    pub async fn day_summaries(
        &self,
        window: Window,
        today: NaiveDate,
    ) -> Result<Vec<DaySummary>, EngineError> {
        let state = self.state.read().await;
        utilization::day_summaries(&state, window, today)
    }

    // ── Projection ───────────────────────────────────────────

    pub async fn resolve_status(&self, asset_id: Ulid, date: NaiveDate, today: NaiveDate) -> Option<DayStatus> {
        let state = self.state.read().await;
        projection::resolve_status(&state, asset_id, date, today)
    }

    pub async fn project_map(&self, date: NaiveDate, today: NaiveDate) -> Vec<MapPin> {
        let state = self.state.read().await;
        projection::project_map(&state, date, today)
    }

    // ── Backup and notifications ─────────────────────────────

    pub async fn export_snapshot(&self) -> Snapshot {
        self.state.read().await.snapshot()
    }

    pub async fn export_json(&self) -> Result<String, EngineError> {
        let snapshot = self.export_snapshot().await;
        serde_json::to_string_pretty(&snapshot).map_err(|e| EngineError::InvalidSnapshot(e.to_string()))
    }

    /// Committed events touching `asset_id`, plus every restore.
    pub fn subscribe(&self, asset_id: Ulid) -> broadcast::Receiver<Event> {
        self.notify.subscribe(asset_id)
    }
}

fn sort_newest_first(assignments: &mut [Assignment]) {
    assignments.sort_by(|a, b| {
        b.start_date
            .cmp(&a.start_date)
            .then(b.created_on.cmp(&a.created_on))
            .then(b.id.cmp(&a.id))
    });
}
