use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Months, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::time_diff;

/// Composite key of the daily log collection: one record per asset per calendar day.
pub type LogKey = (Ulid, NaiveDate);

/// Nominal working day used for theoretical capacity.
pub const WORKDAY_HOURS: f64 = 8.0;

pub fn default_start_time() -> NaiveTime {
    NaiveTime::from_hms_opt(8, 0, 0).unwrap_or_default()
}

pub fn default_end_time() -> NaiveTime {
    NaiveTime::from_hms_opt(16, 0, 0).unwrap_or_default()
}

// ── Assets ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetCategory {
    Vehicle,
    Machinery,
    /// Mounted on another asset; never scheduled on its own.
    Accessory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetStatus {
    Operational,
    InWorkshop,
    BrokenDown,
    Reserved,
    Decommissioned,
    OutOfService,
}

/// A physical resource as handed over by the roster.
///
/// `current_assignment_id` is a lookup hint, not ownership. Only a reconciliation
/// commit writes it; roster registrations keep whatever value is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub id: Ulid,
    pub code: String,
    pub name: String,
    pub category: AssetCategory,
    pub status: AssetStatus,
    pub location: String,
    /// The asset an accessory is mounted on.
    pub parent_id: Option<Ulid>,
    pub current_assignment_id: Option<Ulid>,
}

impl Asset {
    pub fn new(id: Ulid, code: impl Into<String>, category: AssetCategory) -> Self {
        Self {
            id,
            code: code.into(),
            name: String::new(),
            category,
            status: AssetStatus::Operational,
            location: String::new(),
            parent_id: None,
            current_assignment_id: None,
        }
    }

    pub fn is_accessory(&self) -> bool {
        self.category == AssetCategory::Accessory
    }
}

// ── Assignments ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentStatus {
    Active,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleType {
    #[serde(rename = "8H")]
    EightHours,
    #[serde(rename = "12H")]
    TwelveHours,
    #[serde(rename = "24H")]
    FullDay,
    #[serde(rename = "CUSTOM")]
    Custom,
}

impl ScheduleType {
    /// Shift length a preset promises. `None` for custom shifts.
    pub fn preset_hours(&self) -> Option<f64> {
        match self {
            ScheduleType::EightHours => Some(8.0),
            ScheduleType::TwelveHours => Some(12.0),
            ScheduleType::FullDay => Some(24.0),
            ScheduleType::Custom => None,
        }
    }
}

/// Daily shift template of an assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub kind: ScheduleType,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            kind: ScheduleType::EightHours,
            start_time: default_start_time(),
            end_time: default_end_time(),
        }
    }
}

impl Schedule {
    /// Standard shift of a schedule type, starting at the default start time.
    pub fn preset(kind: ScheduleType) -> Self {
        let start_time = default_start_time();
        let end_time = match kind {
            ScheduleType::TwelveHours => NaiveTime::from_hms_opt(20, 0, 0).unwrap_or_default(),
            ScheduleType::FullDay => start_time,
            ScheduleType::EightHours | ScheduleType::Custom => default_end_time(),
        };
        Self {
            kind,
            start_time,
            end_time,
        }
    }

    pub fn custom(start_time: NaiveTime, end_time: NaiveTime) -> Self {
        Self {
            kind: ScheduleType::Custom,
            start_time,
            end_time,
        }
    }

    /// Hours covered by one day of this shift. A 24H shift starting and ending at
    /// the same time is a full day; any other equal pair is an empty shift.
    pub fn hours_per_day(&self) -> f64 {
        if self.kind == ScheduleType::FullDay && self.start_time == self.end_time {
            return 24.0;
        }
        time_diff(self.start_time, self.end_time)
    }
}

/// A deployment contract of one asset over a date range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: Ulid,
    pub asset_id: Ulid,
    pub start_date: NaiveDate,
    /// `None` = open-ended.
    pub end_date: Option<NaiveDate>,
    pub schedule: Schedule,
    pub status: AssignmentStatus,
    pub client: String,
    pub cost_center: String,
    pub province: String,
    pub city: String,
    pub site: String,
    pub job_description: String,
    pub offer_id: String,
    pub responsible: String,
    pub estimated_total_hours: f64,
    pub created_on: NaiveDate,
}

impl Assignment {
    /// True if `date` falls inside the contract. Open-ended contracts cover every
    /// date from their start on.
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.start_date <= date && self.end_date.is_none_or(|end| date <= end)
    }
}

/// Unvalidated assignment input as a collaborator submits it.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentDraft {
    /// Re-saving with an existing id supersedes that assignment.
    pub id: Option<Ulid>,
    pub asset_id: Option<Ulid>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub schedule: Schedule,
    pub status: AssignmentStatus,
    pub client: Option<String>,
    pub cost_center: Option<String>,
    pub province: Option<String>,
    pub city: Option<String>,
    pub site: Option<String>,
    pub job_description: Option<String>,
    pub offer_id: Option<String>,
    pub responsible: Option<String>,
}

impl Default for AssignmentDraft {
    fn default() -> Self {
        Self {
            id: None,
            asset_id: None,
            start_date: None,
            end_date: None,
            schedule: Schedule::default(),
            status: AssignmentStatus::Active,
            client: None,
            cost_center: None,
            province: None,
            city: None,
            site: None,
            job_description: None,
            offer_id: None,
            responsible: None,
        }
    }
}

impl AssignmentDraft {
    pub fn for_asset(asset_id: Ulid, start: NaiveDate, end: Option<NaiveDate>) -> Self {
        Self {
            asset_id: Some(asset_id),
            start_date: Some(start),
            end_date: end,
            ..Self::default()
        }
    }

    /// Prefill a draft from a stored assignment, e.g. to continue or patch it.
    pub fn from_assignment(a: &Assignment) -> Self {
        Self {
            id: Some(a.id),
            asset_id: Some(a.asset_id),
            start_date: Some(a.start_date),
            end_date: a.end_date,
            schedule: a.schedule,
            status: a.status,
            client: Some(a.client.clone()),
            cost_center: Some(a.cost_center.clone()),
            province: Some(a.province.clone()),
            city: Some(a.city.clone()),
            site: Some(a.site.clone()),
            job_description: Some(a.job_description.clone()),
            offer_id: Some(a.offer_id.clone()),
            responsible: Some(a.responsible.clone()),
        }
    }
}

/// Request to patch a single day of an asset with a one-day assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct DayOverride {
    pub asset_id: Ulid,
    pub date: NaiveDate,
    /// Assignment whose metadata the override inherits.
    pub parent_id: Option<Ulid>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    /// Derived from the day's current log when absent.
    pub status: Option<AssignmentStatus>,
}

// ── Daily logs ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DayStatus {
    Working,
    Stopped,
    Workshop,
    BrokenDown,
    /// Any materialized day after "today".
    Reserved,
}

/// The materialized fact of one asset on one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyLog {
    pub id: Ulid,
    pub asset_id: Ulid,
    pub assignment_id: Ulid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub hours: f64,
    pub status: DayStatus,
    pub verified: bool,
    pub notes: Option<String>,
}

impl DailyLog {
    pub fn key(&self) -> LogKey {
        (self.asset_id, self.date)
    }
}

// ── Text encodings (wire + display) ──────────────────────────────

macro_rules! text_enum {
    ($ty:ty { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_uppercase().as_str() {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!("unknown {}: {other}", stringify!($ty))),
                }
            }
        }
    };
}

text_enum!(AssetCategory {
    Vehicle => "VEHICLE",
    Machinery => "MACHINERY",
    Accessory => "ACCESSORY",
});

text_enum!(AssetStatus {
    Operational => "OPERATIONAL",
    InWorkshop => "IN_WORKSHOP",
    BrokenDown => "BROKEN_DOWN",
    Reserved => "RESERVED",
    Decommissioned => "DECOMMISSIONED",
    OutOfService => "OUT_OF_SERVICE",
});

text_enum!(AssignmentStatus {
    Active => "ACTIVE",
    Finished => "FINISHED",
});

text_enum!(ScheduleType {
    EightHours => "8H",
    TwelveHours => "12H",
    FullDay => "24H",
    Custom => "CUSTOM",
});

text_enum!(DayStatus {
    Working => "WORKING",
    Stopped => "STOPPED",
    Workshop => "WORKSHOP",
    BrokenDown => "BROKEN_DOWN",
    Reserved => "RESERVED",
});

// ── Events (WAL record format) ───────────────────────────────────

/// Full copy of the three collections. Backup format and compaction record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub assets: Vec<Asset>,
    pub assignments: Vec<Assignment>,
    pub daily_logs: Vec<DailyLog>,
}

pub const SNAPSHOT_VERSION: u32 = 1;

/// One event = one durable unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    AssetRegistered {
        asset: Asset,
    },
    AssignmentCommitted {
        assignment: Assignment,
        daily_logs: Vec<DailyLog>,
        asset: Option<Asset>,
    },
    StateRestored {
        snapshot: Snapshot,
    },
}

// ── Query result types ───────────────────────────────────────────

/// Inclusive calendar window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl Window {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        Self { from, to }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from <= date && date <= self.to
    }
}

/// Preset reporting windows, resolved relative to the caller's "today".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsRange {
    Today,
    /// The seven days before today, plus today.
    Week,
    /// One calendar month back, through today.
    Month,
    /// January 1st of the current year through today.
    Year,
    Custom(Window),
}

impl StatsRange {
    pub fn resolve(&self, today: NaiveDate) -> Window {
        match self {
            StatsRange::Today => Window::new(today, today),
            StatsRange::Week => Window::new(today - chrono::Days::new(7), today),
            StatsRange::Month => Window::new(
                today.checked_sub_months(Months::new(1)).unwrap_or(today),
                today,
            ),
            StatsRange::Year => Window::new(
                NaiveDate::from_ymd_opt(today.year(), 1, 1).unwrap_or(today),
                today,
            ),
            StatsRange::Custom(w) => *w,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetFilter {
    Asset(Ulid),
    /// Every non-accessory asset.
    All,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Utilization {
    pub real_hours: f64,
    pub theoretical_hours: f64,
    pub percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtilizationBand {
    Low,
    Medium,
    Healthy,
}

impl Utilization {
    pub fn band(&self) -> UtilizationBand {
        if self.percent < 50.0 {
            UtilizationBand::Low
        } else if self.percent <= 70.0 {
            UtilizationBand::Medium
        } else {
            UtilizationBand::Healthy
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssetUtilization {
    pub asset_id: Ulid,
    pub code: String,
    pub utilization: Utilization,
}

/// Calendar cell aggregate for one date.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DaySummary {
    pub date: NaiveDate,
    pub active_assets: usize,
    pub total_hours: f64,
    /// Average hours per active asset as a share of a nominal workday.
    pub load_percent: f64,
    pub future: bool,
}

/// Map marker for one asset on one date.
#[derive(Debug, Clone, PartialEq)]
pub struct MapPin {
    pub asset_id: Ulid,
    pub code: String,
    pub status: Option<DayStatus>,
    pub location: String,
    pub client: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    pub assignment_id: Ulid,
    pub days: usize,
    pub pointer_updated: bool,
    /// Logs of other assignments overwritten by this commit.
    pub displaced: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn t(s: &str) -> NaiveTime {
        NaiveTime::parse_from_str(s, "%H:%M").unwrap()
    }

    fn assignment(start: &str, end: Option<&str>) -> Assignment {
        Assignment {
            id: Ulid::new(),
            asset_id: Ulid::new(),
            start_date: d(start),
            end_date: end.map(d),
            schedule: Schedule::default(),
            status: AssignmentStatus::Active,
            client: String::new(),
            cost_center: String::new(),
            province: String::new(),
            city: String::new(),
            site: String::new(),
            job_description: String::new(),
            offer_id: String::new(),
            responsible: String::new(),
            estimated_total_hours: 0.0,
            created_on: d(start),
        }
    }

    #[test]
    fn covers_closed_range() {
        let a = assignment("2025-03-03", Some("2025-03-07"));
        assert!(!a.covers(d("2025-03-02")));
        assert!(a.covers(d("2025-03-03")));
        assert!(a.covers(d("2025-03-07")));
        assert!(!a.covers(d("2025-03-08")));
    }

    #[test]
    fn covers_open_ended() {
        let a = assignment("2025-03-03", None);
        assert!(a.covers(d("2030-01-01")));
        assert!(!a.covers(d("2025-03-01")));
    }

    #[test]
    fn schedule_hours() {
        assert_eq!(Schedule::default().hours_per_day(), 8.0);
        assert_eq!(Schedule::custom(t("22:00"), t("06:00")).hours_per_day(), 8.0);
        assert_eq!(Schedule::custom(t("08:00"), t("08:00")).hours_per_day(), 0.0);
        let full = Schedule {
            kind: ScheduleType::FullDay,
            start_time: t("07:00"),
            end_time: t("07:00"),
        };
        assert_eq!(full.hours_per_day(), 24.0);
        assert_eq!(Schedule::preset(ScheduleType::TwelveHours).hours_per_day(), 12.0);
        assert_eq!(Schedule::preset(ScheduleType::FullDay).hours_per_day(), 24.0);
    }

    #[test]
    fn utilization_bands() {
        let u = |percent| Utilization { real_hours: 0.0, theoretical_hours: 0.0, percent };
        assert_eq!(u(49.9).band(), UtilizationBand::Low);
        assert_eq!(u(50.0).band(), UtilizationBand::Medium);
        assert_eq!(u(70.0).band(), UtilizationBand::Medium);
        assert_eq!(u(70.1).band(), UtilizationBand::Healthy);
    }

    #[test]
    fn stats_range_presets() {
        let today = d("2025-03-31");
        assert_eq!(StatsRange::Today.resolve(today), Window::new(today, today));
        assert_eq!(StatsRange::Week.resolve(today).from, d("2025-03-24"));
        assert_eq!(StatsRange::Month.resolve(today).from, d("2025-02-28"));
        assert_eq!(StatsRange::Year.resolve(today).from, d("2025-01-01"));
    }

    #[test]
    fn text_enums_parse_case_insensitive() {
        assert_eq!("working".parse::<DayStatus>(), Ok(DayStatus::Working));
        assert_eq!("24h".parse::<ScheduleType>(), Ok(ScheduleType::FullDay));
        assert_eq!(AssetCategory::Accessory.to_string(), "ACCESSORY");
        assert!("LUNCH".parse::<AssignmentStatus>().is_err());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let a = assignment("2025-03-03", Some("2025-03-04"));
        let event = Event::AssignmentCommitted {
            daily_logs: vec![DailyLog {
                id: Ulid::new(),
                asset_id: a.asset_id,
                assignment_id: a.id,
                date: a.start_date,
                start_time: t("08:00"),
                end_time: t("16:00"),
                hours: 8.0,
                status: DayStatus::Working,
                verified: true,
                notes: None,
            }],
            assignment: a,
            asset: None,
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
