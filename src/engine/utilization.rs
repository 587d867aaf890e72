//! Real vs theoretical hours over a window of materialized days.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::model::*;

use super::calendar::{round2, weekdays_in, window_days};
use super::store::Collections;
use super::EngineError;

fn snapshot(real: f64, theoretical: f64) -> Utilization {
    let percent = if theoretical > 0.0 {
        round2(100.0 * real / theoretical)
    } else {
        0.0
    };
    Utilization {
        real_hours: round2(real),
        theoretical_hours: round2(theoretical),
        percent,
    }
}

/// Sum logged hours in the window against eight hours per weekday per asset.
/// `All` counts every asset that is not a known accessory.
pub fn compute(
    c: &Collections,
    window: Window,
    filter: AssetFilter,
) -> Result<Utilization, EngineError> {
    window_days(&window)?;
    let (real, assets) = match filter {
        AssetFilter::Asset(id) => {
            let real: f64 = c.logs_for_asset(id, window).map(|l| l.hours).sum();
            (real, 1)
        }
        AssetFilter::All => {
            let real: f64 = c
                .logs_in(window)
                .filter(|l| !c.is_accessory(&l.asset_id))
                .map(|l| l.hours)
                .sum();
            (real, c.working_assets().count())
        }
    };
    let theoretical = f64::from(weekdays_in(&window)) * WORKDAY_HOURS * assets as f64;
    Ok(snapshot(real, theoretical))
}

/// One snapshot per schedulable asset, ordered by code.
pub fn by_asset(c: &Collections, window: Window) -> Result<Vec<AssetUtilization>, EngineError> {
    window_days(&window)?;
    let weekdays = f64::from(weekdays_in(&window));
    let mut rows: Vec<AssetUtilization> = c
        .working_assets()
        .map(|asset| {
            let real: f64 = c.logs_for_asset(asset.id, window).map(|l| l.hours).sum();
            AssetUtilization {
                asset_id: asset.id,
                code: asset.code.clone(),
                utilization: snapshot(real, weekdays * WORKDAY_HOURS),
            }
        })
        .collect();
    rows.sort_by(|a, b| a.code.cmp(&b.code).then(a.asset_id.cmp(&b.asset_id)));
    Ok(rows)
}

/// Per-date calendar cells: how many assets logged a day, their total hours and
/// average load against a nominal workday.
pub fn day_summaries(
    c: &Collections,
    window: Window,
    today: NaiveDate,
) -> Result<Vec<DaySummary>, EngineError> {
    window_days(&window)?;
    let mut per_day: BTreeMap<NaiveDate, (usize, f64)> = BTreeMap::new();
    for log in c.logs_in(window).filter(|l| !c.is_accessory(&l.asset_id)) {
        let cell = per_day.entry(log.date).or_default();
        cell.0 += 1;
        cell.1 += log.hours;
    }

    Ok(window
        .from
        .iter_days()
        .take_while(|d| *d <= window.to)
        .map(|date| {
            let (active_assets, total) = per_day.get(&date).copied().unwrap_or_default();
            let load_percent = if active_assets > 0 {
                round2(100.0 * total / (active_assets as f64 * WORKDAY_HOURS))
            } else {
                0.0
            };
            DaySummary {
                date,
                active_assets,
                total_hours: round2(total),
                load_percent,
                future: date > today,
            }
        })
        .collect())
}
