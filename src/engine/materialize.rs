//! Turning an assignment into one daily log per covered calendar day.

use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// Status of a materialized day. Future days are always reservations; the
/// contract status only matters for today and the past.
pub fn day_status(date: NaiveDate, today: NaiveDate, status: AssignmentStatus) -> DayStatus {
    if date > today {
        DayStatus::Reserved
    } else if status == AssignmentStatus::Active {
        DayStatus::Working
    } else {
        DayStatus::Stopped
    }
}

pub fn validate_schedule(schedule: &Schedule) -> Result<(), EngineError> {
    let Some(preset) = schedule.kind.preset_hours() else {
        return Ok(());
    };
    let hours = schedule.hours_per_day();
    if (hours - preset).abs() > f64::EPSILON {
        return Err(EngineError::InvalidSchedule(format!(
            "{} shift {}-{} covers {hours}h",
            schedule.kind,
            schedule.start_time.format("%H:%M"),
            schedule.end_time.format("%H:%M"),
        )));
    }
    Ok(())
}

fn check_text(value: &Option<String>, what: &'static str) -> Result<(), EngineError> {
    match value {
        Some(v) if v.len() > MAX_TEXT_LEN => Err(EngineError::LimitExceeded(what)),
        _ => Ok(()),
    }
}

/// Reject a draft before anything is staged. Returns the asset and start date
/// the draft is required to carry.
pub fn validate_draft(draft: &AssignmentDraft) -> Result<(Ulid, NaiveDate), EngineError> {
    let asset_id = draft.asset_id.ok_or(EngineError::MissingAsset)?;
    let start = draft.start_date.ok_or(EngineError::MissingStartDate)?;
    if let Some(end) = draft.end_date
        && end < start {
            return Err(EngineError::InvalidRange { start, end });
        }
    validate_schedule(&draft.schedule)?;
    check_text(&draft.client, "client too long")?;
    check_text(&draft.cost_center, "cost center too long")?;
    check_text(&draft.province, "province too long")?;
    check_text(&draft.city, "city too long")?;
    check_text(&draft.site, "site too long")?;
    check_text(&draft.job_description, "job description too long")?;
    check_text(&draft.offer_id, "offer id too long")?;
    check_text(&draft.responsible, "responsible too long")?;
    Ok((asset_id, start))
}

/// Build the assignment record for a validated draft covering `days` dates.
pub fn build_assignment(
    draft: AssignmentDraft,
    asset_id: Ulid,
    start_date: NaiveDate,
    days: usize,
    today: NaiveDate,
) -> Assignment {
    let hours = draft.schedule.hours_per_day();
    Assignment {
        id: draft.id.unwrap_or_else(Ulid::new),
        asset_id,
        start_date,
        end_date: draft.end_date,
        schedule: draft.schedule,
        status: draft.status,
        client: draft.client.filter(|c| !c.is_empty()).unwrap_or_else(|| "No client".into()),
        cost_center: draft.cost_center.unwrap_or_default(),
        province: draft.province.unwrap_or_default(),
        city: draft.city.unwrap_or_default(),
        site: draft.site.unwrap_or_default(),
        job_description: draft.job_description.unwrap_or_default(),
        offer_id: draft.offer_id.unwrap_or_default(),
        responsible: draft.responsible.unwrap_or_default(),
        estimated_total_hours: super::calendar::round2(hours * days as f64),
        created_on: today,
    }
}

/// One daily log per date. `existing_id` returns the id of a log already stored
/// under `(asset, date)` so the write replaces it instead of adding a twin.
pub fn materialize(
    assignment: &Assignment,
    dates: &[NaiveDate],
    today: NaiveDate,
    existing_id: impl Fn(NaiveDate) -> Option<Ulid>,
) -> Result<Vec<DailyLog>, EngineError> {
    validate_schedule(&assignment.schedule)?;
    let hours = assignment.schedule.hours_per_day();
    let notes = format!(
        "Client: {} | Job: {}",
        assignment.client, assignment.job_description
    );

    let mut logs = Vec::with_capacity(dates.len());
    for &date in dates {
        if !assignment.covers(date) {
            return Err(EngineError::InvalidRange {
                start: assignment.start_date,
                end: date,
            });
        }
        logs.push(DailyLog {
            id: existing_id(date).unwrap_or_else(Ulid::new),
            asset_id: assignment.asset_id,
            assignment_id: assignment.id,
            date,
            start_time: assignment.schedule.start_time,
            end_time: assignment.schedule.end_time,
            hours,
            status: day_status(date, today, assignment.status),
            verified: true,
            notes: Some(notes.clone()),
        });
    }
    Ok(logs)
}

/// The asset with its pointer moved to `assignment`, if the contract is active
/// today. `None` leaves the asset untouched.
pub fn pointer_update(
    assignment: &Assignment,
    dates: &[NaiveDate],
    today: NaiveDate,
    asset: Option<&Asset>,
) -> Option<Asset> {
    if assignment.status != AssignmentStatus::Active || !dates.contains(&today) {
        return None;
    }
    let mut updated = asset?.clone();
    updated.current_assignment_id = Some(assignment.id);
    Some(updated)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveTime;

    use super::super::calendar::expand_range;
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn t(s: &str) -> NaiveTime {
        NaiveTime::parse_from_str(s, "%H:%M").unwrap()
    }

    fn assignment(start: &str, end: &str, status: AssignmentStatus) -> Assignment {
        let mut draft = AssignmentDraft::for_asset(Ulid::new(), d(start), Some(d(end)));
        draft.status = status;
        let days = expand_range(d(start), Some(d(end))).unwrap().len();
        build_assignment(draft, Ulid::new(), d(start), days, d(start))
    }

    #[test]
    fn status_decision_order() {
        let today = d("2025-03-10");
        assert_eq!(day_status(d("2025-03-11"), today, AssignmentStatus::Active), DayStatus::Reserved);
        assert_eq!(day_status(d("2025-03-11"), today, AssignmentStatus::Finished), DayStatus::Reserved);
        assert_eq!(day_status(today, today, AssignmentStatus::Active), DayStatus::Working);
        assert_eq!(day_status(d("2025-03-01"), today, AssignmentStatus::Finished), DayStatus::Stopped);
    }

    #[test]
    fn one_log_per_date() {
        let a = assignment("2025-03-03", "2025-03-07", AssignmentStatus::Active);
        let dates = expand_range(a.start_date, a.end_date).unwrap();
        let logs = materialize(&a, &dates, d("2025-03-10"), |_| None).unwrap();
        assert_eq!(logs.len(), 5);
        assert!(logs.iter().all(|l| l.status == DayStatus::Working));
        assert!(logs.iter().all(|l| l.hours == 8.0 && l.verified));
        assert!(logs.iter().all(|l| l.assignment_id == a.id && l.asset_id == a.asset_id));
    }

    #[test]
    fn future_days_reserved() {
        let a = assignment("2025-03-08", "2025-03-12", AssignmentStatus::Active);
        let dates = expand_range(a.start_date, a.end_date).unwrap();
        let logs = materialize(&a, &dates, d("2025-03-10"), |_| None).unwrap();
        let statuses: Vec<_> = logs.iter().map(|l| l.status).collect();
        assert_eq!(
            statuses,
            vec![
                DayStatus::Working,
                DayStatus::Working,
                DayStatus::Working,
                DayStatus::Reserved,
                DayStatus::Reserved,
            ]
        );
    }

    #[test]
    fn finished_past_days_stopped() {
        let a = assignment("2025-03-03", "2025-03-04", AssignmentStatus::Finished);
        let dates = expand_range(a.start_date, a.end_date).unwrap();
        let logs = materialize(&a, &dates, d("2025-03-10"), |_| None).unwrap();
        assert!(logs.iter().all(|l| l.status == DayStatus::Stopped));
    }

    #[test]
    fn reuses_existing_ids() {
        let a = assignment("2025-03-03", "2025-03-04", AssignmentStatus::Active);
        let dates = expand_range(a.start_date, a.end_date).unwrap();
        let kept = Ulid::new();
        let logs = materialize(&a, &dates, d("2025-03-10"), |date| {
            (date == d("2025-03-04")).then_some(kept)
        })
        .unwrap();
        assert_ne!(logs[0].id, kept);
        assert_eq!(logs[1].id, kept);
    }

    #[test]
    fn overnight_shift_hours() {
        let mut a = assignment("2025-03-03", "2025-03-03", AssignmentStatus::Active);
        a.schedule = Schedule::custom(t("22:00"), t("06:00"));
        let logs = materialize(&a, &[a.start_date], d("2025-03-10"), |_| None).unwrap();
        assert_eq!(logs[0].hours, 8.0);
    }

    #[test]
    fn date_outside_assignment_aborts_everything() {
        let a = assignment("2025-03-03", "2025-03-04", AssignmentStatus::Active);
        let dates = vec![d("2025-03-03"), d("2025-03-05")];
        let result = materialize(&a, &dates, d("2025-03-10"), |_| None);
        assert!(matches!(result, Err(EngineError::InvalidRange { .. })));
    }

    #[test]
    fn preset_mismatch_is_invalid_schedule() {
        let mut a = assignment("2025-03-03", "2025-03-03", AssignmentStatus::Active);
        a.schedule = Schedule {
            kind: ScheduleType::TwelveHours,
            start_time: t("08:00"),
            end_time: t("16:00"),
        };
        let result = materialize(&a, &[a.start_date], d("2025-03-10"), |_| None);
        assert!(matches!(result, Err(EngineError::InvalidSchedule(_))));
    }

    #[test]
    fn draft_validation_order() {
        let mut draft = AssignmentDraft::default();
        assert!(matches!(validate_draft(&draft), Err(EngineError::MissingAsset)));
        draft.asset_id = Some(Ulid::new());
        assert!(matches!(validate_draft(&draft), Err(EngineError::MissingStartDate)));
        draft.start_date = Some(d("2025-03-07"));
        draft.end_date = Some(d("2025-03-03"));
        assert!(matches!(validate_draft(&draft), Err(EngineError::InvalidRange { .. })));
        draft.end_date = None;
        draft.client = Some("x".repeat(MAX_TEXT_LEN + 1));
        assert!(matches!(validate_draft(&draft), Err(EngineError::LimitExceeded(_))));
        draft.client = None;
        assert!(validate_draft(&draft).is_ok());
    }

    #[test]
    fn build_assignment_defaults() {
        let a = assignment("2025-03-03", "2025-03-07", AssignmentStatus::Active);
        assert_eq!(a.client, "No client");
        assert_eq!(a.estimated_total_hours, 40.0);
    }

    #[test]
    fn pointer_only_when_active_today() {
        let a = assignment("2025-03-03", "2025-03-07", AssignmentStatus::Active);
        let dates = expand_range(a.start_date, a.end_date).unwrap();
        let asset = Asset::new(a.asset_id, "V1", AssetCategory::Vehicle);

        let moved = pointer_update(&a, &dates, d("2025-03-05"), Some(&asset)).unwrap();
        assert_eq!(moved.current_assignment_id, Some(a.id));

        assert!(pointer_update(&a, &dates, d("2025-03-10"), Some(&asset)).is_none());
        assert!(pointer_update(&a, &dates, d("2025-03-05"), None).is_none());

        let finished = Assignment { status: AssignmentStatus::Finished, ..a.clone() };
        assert!(pointer_update(&finished, &dates, d("2025-03-05"), Some(&asset)).is_none());
    }
}
