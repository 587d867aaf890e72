use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::store::Collections;

/// The ACTIVE assignment of `asset_id` covering `date`. When several overlap,
/// the latest start wins.
pub fn covering_assignment(c: &Collections, asset_id: Ulid, date: NaiveDate) -> Option<&Assignment> {
    c.assignments_for(asset_id)
        .filter(|a| a.status == AssignmentStatus::Active && a.covers(date))
        .max_by_key(|a| (a.start_date, a.id))
}

/// Effective status of an asset on a date. A materialized log is authoritative;
/// otherwise a covering contract projects RESERVED (future) or WORKING. `None`
/// means no activity.
pub fn resolve_status(
    c: &Collections,
    asset_id: Ulid,
    date: NaiveDate,
    today: NaiveDate,
) -> Option<DayStatus> {
    if let Some(log) = c.daily_log(asset_id, date) {
        return Some(log.status);
    }
    covering_assignment(c, asset_id, date).map(|_| {
        if date > today {
            DayStatus::Reserved
        } else {
            DayStatus::Working
        }
    })
}

/// One pin per schedulable asset, ordered by code.
pub fn project_map(c: &Collections, date: NaiveDate, today: NaiveDate) -> Vec<MapPin> {
    let mut pins: Vec<MapPin> = c
        .working_assets()
        .map(|asset| {
            let assignment = covering_assignment(c, asset.id, date).or_else(|| {
                c.daily_log(asset.id, date)
                    .and_then(|log| c.assignment(&log.assignment_id))
            });
            let location = assignment
                .map(|a| a.province.as_str())
                .filter(|p| !p.is_empty())
                .unwrap_or(&asset.location)
                .to_string();
            MapPin {
                asset_id: asset.id,
                code: asset.code.clone(),
                status: resolve_status(c, asset.id, date, today),
                location,
                client: assignment.map(|a| a.client.clone()),
            }
        })
        .collect();
    pins.sort_by(|a, b| a.code.cmp(&b.code));
    pins
}
