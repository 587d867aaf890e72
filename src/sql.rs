use chrono::{NaiveDate, NaiveTime};
use sqlparser::ast::{self, Expr, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use thiserror::Error;
use ulid::Ulid;

use crate::limits::MAX_BATCH_SIZE;
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertAsset {
        assets: Vec<Asset>,
    },
    InsertAssignment {
        drafts: Vec<AssignmentDraft>,
    },
    SelectAssets {
        id: Option<Ulid>,
    },
    SelectAssignments {
        asset_id: Option<Ulid>,
    },
    SelectDailyLogs {
        asset_id: Option<Ulid>,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    },
    SelectUtilization {
        asset_id: Option<Ulid>,
        from: NaiveDate,
        to: NaiveDate,
    },
    SelectStatus {
        asset_id: Ulid,
        date: NaiveDate,
    },
}

const ASSET_COLUMNS: &[&str] = &["id", "code", "name", "category", "status", "location", "parent_id"];

const ASSIGNMENT_COLUMNS: &[&str] = &[
    "id",
    "asset_id",
    "start_date",
    "end_date",
    "start_time",
    "end_time",
    "schedule",
    "status",
    "client",
    "ceco",
    "province",
    "city",
    "site",
    "job",
    "offer_id",
    "responsible",
];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

/// One VALUES row with its column names attached.
struct Row<'a> {
    columns: &'a [String],
    values: &'a [Expr],
}

impl Row<'_> {
    fn get(&self, column: &str) -> Option<&Expr> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
    }

    fn text(&self, column: &str) -> Result<Option<String>, SqlError> {
        self.get(column).map_or(Ok(None), parse_text_or_null)
    }

    fn required_text(&self, column: &'static str) -> Result<String, SqlError> {
        self.text(column)?.ok_or(SqlError::MissingColumn(column))
    }

    fn ulid(&self, column: &str) -> Result<Option<Ulid>, SqlError> {
        self.text(column)?
            .map(|s| Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("{column}: bad ULID: {e}"))))
            .transpose()
    }

    fn date(&self, column: &str) -> Result<Option<NaiveDate>, SqlError> {
        self.text(column)?.map(|s| parse_date(&s)).transpose()
    }

    fn time(&self, column: &str) -> Result<Option<NaiveTime>, SqlError> {
        self.text(column)?.map(|s| parse_time(&s)).transpose()
    }

    fn parsed<T: std::str::FromStr<Err = String>>(&self, column: &str) -> Result<Option<T>, SqlError> {
        self.text(column)?
            .map(|s| s.parse::<T>().map_err(SqlError::Parse))
            .transpose()
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let defaults = match table.as_str() {
        "assets" => ASSET_COLUMNS,
        "assignments" => ASSIGNMENT_COLUMNS,
        _ => return Err(SqlError::UnknownTable(table)),
    };
    let columns: Vec<String> = if insert.columns.is_empty() {
        defaults.iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    if let Some(unknown) = columns.iter().find(|c| !defaults.contains(&c.as_str())) {
        return Err(SqlError::UnknownColumn(unknown.clone()));
    }

    let rows = extract_insert_rows(insert)?;
    if rows.len() > MAX_BATCH_SIZE {
        return Err(SqlError::Parse(format!("more than {MAX_BATCH_SIZE} rows")));
    }
    for row in rows {
        if row.len() != columns.len() {
            return Err(SqlError::WrongArity(columns.len(), row.len()));
        }
    }
    let rows = rows.iter().map(|values| Row {
        columns: &columns,
        values,
    });

    if table == "assets" {
        let assets = rows
            .enumerate()
            .map(|(i, row)| asset_row(&row).map_err(|e| e.in_row(i)))
            .collect::<Result<_, _>>()?;
        Ok(Command::InsertAsset { assets })
    } else {
        let drafts = rows
            .enumerate()
            .map(|(i, row)| assignment_row(&row).map_err(|e| e.in_row(i)))
            .collect::<Result<_, _>>()?;
        Ok(Command::InsertAssignment { drafts })
    }
}

fn asset_row(row: &Row<'_>) -> Result<Asset, SqlError> {
    let id = row.ulid("id")?.ok_or(SqlError::MissingColumn("id"))?;
    let category = row.parsed("category")?.unwrap_or(AssetCategory::Vehicle);
    let mut asset = Asset::new(id, row.required_text("code")?, category);
    asset.name = row.text("name")?.unwrap_or_default();
    asset.status = row.parsed("status")?.unwrap_or(AssetStatus::Operational);
    asset.location = row.text("location")?.unwrap_or_default();
    asset.parent_id = row.ulid("parent_id")?;
    Ok(asset)
}

/// Missing asset or start date are left for the engine to reject.
fn assignment_row(row: &Row<'_>) -> Result<AssignmentDraft, SqlError> {
    let start_time = row.time("start_time")?;
    let end_time = row.time("end_time")?;
    let kind = row.parsed::<ScheduleType>("schedule")?;
    let schedule = match (kind, start_time, end_time) {
        (None, None, None) => Schedule::default(),
        (Some(kind), None, None) => Schedule::preset(kind),
        (kind, start, end) => {
            let base = Schedule::preset(kind.unwrap_or(ScheduleType::Custom));
            Schedule {
                kind: kind.unwrap_or(ScheduleType::Custom),
                start_time: start.unwrap_or(base.start_time),
                end_time: end.unwrap_or(base.end_time),
            }
        }
    };

    Ok(AssignmentDraft {
        id: row.ulid("id")?,
        asset_id: row.ulid("asset_id")?,
        start_date: row.date("start_date")?,
        end_date: row.date("end_date")?,
        schedule,
        status: row.parsed("status")?.unwrap_or(AssignmentStatus::Active),
        client: row.text("client")?,
        cost_center: row.text("ceco")?,
        province: row.text("province")?,
        city: row.text("city")?,
        site: row.text("site")?,
        job_description: row.text("job")?,
        offer_id: row.text("offer_id")?,
        responsible: row.text("responsible")?,
    })
}

// ── SELECT ────────────────────────────────────────────────────

#[derive(Default)]
struct Filters {
    id: Option<Ulid>,
    asset_id: Option<Ulid>,
    date: Option<NaiveDate>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
}

impl Filters {
    fn lower(&self) -> Option<NaiveDate> {
        self.from.or(self.date)
    }

    fn upper(&self) -> Option<NaiveDate> {
        self.to.or(self.date)
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        extract_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "assets" => Ok(Command::SelectAssets { id: filters.id }),
        "assignments" => Ok(Command::SelectAssignments {
            asset_id: filters.asset_id,
        }),
        "daily_logs" => Ok(Command::SelectDailyLogs {
            asset_id: filters.asset_id,
            from: filters.lower(),
            to: filters.upper(),
        }),
        "utilization" => Ok(Command::SelectUtilization {
            asset_id: filters.asset_id,
            from: filters.lower().ok_or(SqlError::MissingFilter("date >="))?,
            to: filters.upper().ok_or(SqlError::MissingFilter("date <="))?,
        }),
        "status" => Ok(Command::SelectStatus {
            asset_id: filters.asset_id.ok_or(SqlError::MissingFilter("asset_id"))?,
            date: filters.date.ok_or(SqlError::MissingFilter("date"))?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn extract_filters(expr: &Expr, filters: &mut Filters) -> Result<(), SqlError> {
    let Expr::BinaryOp { left, op, right } = expr else {
        if let Expr::Nested(inner) = expr {
            return extract_filters(inner, filters);
        }
        return Err(SqlError::Unsupported(format!("filter {expr}")));
    };
    if *op == ast::BinaryOperator::And {
        extract_filters(left, filters)?;
        return extract_filters(right, filters);
    }

    let column = expr_column_name(left).ok_or_else(|| SqlError::Unsupported(format!("filter {expr}")))?;
    match (column.as_str(), op) {
        ("id", ast::BinaryOperator::Eq) => filters.id = Some(parse_ulid_expr(right)?),
        ("asset_id", ast::BinaryOperator::Eq) => filters.asset_id = Some(parse_ulid_expr(right)?),
        ("date", ast::BinaryOperator::Eq) => filters.date = Some(parse_date_expr(right)?),
        ("date", ast::BinaryOperator::GtEq) => filters.from = Some(parse_date_expr(right)?),
        ("date", ast::BinaryOperator::LtEq) => filters.to = Some(parse_date_expr(right)?),
        _ => return Err(SqlError::Unsupported(format!("filter {expr}"))),
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_rows(insert: &ast::Insert) -> Result<&[Vec<Expr>], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) if !values.rows.is_empty() => Ok(values.rows.as_slice()),
        SetExpr::Values(_) => Err(SqlError::Parse("empty VALUES".into())),
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_text_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => Ok(Some(s.clone())),
        Some(value) => Err(SqlError::Parse(format!("expected string or NULL, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_text_expr(expr: &Expr) -> Result<String, SqlError> {
    parse_text_or_null(expr)?.ok_or_else(|| SqlError::Parse("unexpected NULL".into()))
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_text_expr(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
}

fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    parse_date(&parse_text_expr(expr)?)
}

fn parse_date(s: &str) -> Result<NaiveDate, SqlError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

/// `HH:MM` or `HH:MM:SS`.
fn parse_time(s: &str) -> Result<NaiveTime, SqlError> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|e| SqlError::Parse(format!("bad time {s:?}: {e}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("expected {0} values, got {1}")]
    WrongArity(usize, usize),
    #[error("missing column: {0}")]
    MissingColumn(&'static str),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
}

impl SqlError {
    fn in_row(self, row: usize) -> Self {
        SqlError::Parse(format!("row {row}: {self}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const V1: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const A1: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn t(s: &str) -> NaiveTime {
        NaiveTime::parse_from_str(s, "%H:%M").unwrap()
    }

    #[test]
    fn parse_insert_asset_minimal() {
        let sql = format!("INSERT INTO assets (id, code) VALUES ('{V1}', 'V1')");
        match parse_sql(&sql).unwrap() {
            Command::InsertAsset { assets } => {
                assert_eq!(assets.len(), 1);
                assert_eq!(assets[0].id.to_string(), V1);
                assert_eq!(assets[0].code, "V1");
                assert_eq!(assets[0].category, AssetCategory::Vehicle);
                assert_eq!(assets[0].status, AssetStatus::Operational);
                assert_eq!(assets[0].parent_id, None);
            }
            cmd => panic!("expected InsertAsset, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_accessory_with_parent() {
        let sql = format!(
            "INSERT INTO assets (id, code, name, category, status, location, parent_id) \
             VALUES ('{A1}', 'ACC-1', 'Crane arm', 'accessory', 'IN_WORKSHOP', 'Depot', '{V1}')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertAsset { assets } => {
                let a = &assets[0];
                assert!(a.is_accessory());
                assert_eq!(a.status, AssetStatus::InWorkshop);
                assert_eq!(a.location, "Depot");
                assert_eq!(a.parent_id.map(|p| p.to_string()).as_deref(), Some(V1));
            }
            cmd => panic!("expected InsertAsset, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_assets_batch() {
        let sql = format!(
            "INSERT INTO assets (id, code) VALUES ('{V1}', 'V1'), ('{A1}', 'V2')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertAsset { assets } => {
                let codes: Vec<_> = assets.iter().map(|a| a.code.as_str()).collect();
                assert_eq!(codes, vec!["V1", "V2"]);
            }
            cmd => panic!("expected InsertAsset, got {cmd:?}"),
        }
    }

    #[test]
    fn asset_without_code_rejected() {
        let sql = format!("INSERT INTO assets (id, name) VALUES ('{V1}', 'Truck')");
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn parse_insert_assignment_named_columns() {
        let sql = format!(
            "INSERT INTO assignments (asset_id, start_date, end_date, start_time, end_time, client, job) \
             VALUES ('{V1}', '2025-03-03', '2025-03-07', '08:00', '16:00', 'ACME', 'Excavation')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertAssignment { drafts } => {
                let draft = &drafts[0];
                assert_eq!(draft.id, None);
                assert_eq!(draft.asset_id.map(|a| a.to_string()).as_deref(), Some(V1));
                assert_eq!(draft.start_date, Some(d("2025-03-03")));
                assert_eq!(draft.end_date, Some(d("2025-03-07")));
                assert_eq!(draft.schedule, Schedule::custom(t("08:00"), t("16:00")));
                assert_eq!(draft.status, AssignmentStatus::Active);
                assert_eq!(draft.client.as_deref(), Some("ACME"));
                assert_eq!(draft.job_description.as_deref(), Some("Excavation"));
            }
            cmd => panic!("expected InsertAssignment, got {cmd:?}"),
        }
    }

    #[test]
    fn assignment_schedule_presets() {
        let sql = format!(
            "INSERT INTO assignments (asset_id, start_date, schedule, status) \
             VALUES ('{V1}', '2025-03-03', '12H', 'finished')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertAssignment { drafts } => {
                assert_eq!(drafts[0].schedule, Schedule::preset(ScheduleType::TwelveHours));
                assert_eq!(drafts[0].status, AssignmentStatus::Finished);
                assert_eq!(drafts[0].end_date, None);
            }
            cmd => panic!("expected InsertAssignment, got {cmd:?}"),
        }
    }

    #[test]
    fn assignment_without_asset_parses() {
        let sql = "INSERT INTO assignments (start_date) VALUES ('2025-03-03')";
        match parse_sql(sql).unwrap() {
            Command::InsertAssignment { drafts } => assert_eq!(drafts[0].asset_id, None),
            cmd => panic!("expected InsertAssignment, got {cmd:?}"),
        }
    }

    #[test]
    fn unknown_column_rejected() {
        let sql = format!("INSERT INTO assignments (asset_id, colour) VALUES ('{V1}', 'red')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownColumn(c)) if c == "colour"));
    }

    #[test]
    fn bad_date_reports_row() {
        let sql = format!(
            "INSERT INTO assignments (asset_id, start_date) VALUES ('{V1}', '2025-03-03'), ('{V1}', '03/03/2025')"
        );
        let err = parse_sql(&sql).unwrap_err().to_string();
        assert!(err.contains("row 1"), "{err}");
    }

    #[test]
    fn wrong_arity_rejected() {
        let sql = format!("INSERT INTO assets (id, code) VALUES ('{V1}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::WrongArity(2, 1))));
    }

    #[test]
    fn parse_select_tables() {
        assert_eq!(parse_sql("SELECT * FROM assets").unwrap(), Command::SelectAssets { id: None });
        assert_eq!(
            parse_sql("SELECT * FROM assignments").unwrap(),
            Command::SelectAssignments { asset_id: None }
        );
    }

    #[test]
    fn parse_select_daily_logs_filters() {
        let sql = format!(
            "SELECT * FROM daily_logs WHERE asset_id = '{V1}' AND date >= '2025-03-01' AND date <= '2025-03-31'"
        );
        match parse_sql(&sql).unwrap() {
            Command::SelectDailyLogs { asset_id, from, to } => {
                assert!(asset_id.is_some());
                assert_eq!(from, Some(d("2025-03-01")));
                assert_eq!(to, Some(d("2025-03-31")));
            }
            cmd => panic!("expected SelectDailyLogs, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_utilization() {
        let sql = "SELECT * FROM utilization WHERE date >= '2025-03-03' AND date <= '2025-03-09'";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectUtilization {
                asset_id: None,
                from: d("2025-03-03"),
                to: d("2025-03-09"),
            }
        );
        let missing = "SELECT * FROM utilization WHERE date >= '2025-03-03'";
        assert!(matches!(parse_sql(missing), Err(SqlError::MissingFilter(_))));
    }

    #[test]
    fn parse_select_status() {
        let sql = format!("SELECT * FROM status WHERE asset_id = '{V1}' AND date = '2025-03-05'");
        match parse_sql(&sql).unwrap() {
            Command::SelectStatus { date, .. } => assert_eq!(date, d("2025-03-05")),
            cmd => panic!("expected SelectStatus, got {cmd:?}"),
        }
    }

    #[test]
    fn unsupported_filter_rejected() {
        let sql = "SELECT * FROM daily_logs WHERE hours > 4";
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_unknown_table_errors() {
        assert!(matches!(
            parse_sql("SELECT * FROM bookings"),
            Err(SqlError::UnknownTable(_))
        ));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }

    #[test]
    fn delete_unsupported() {
        let sql = format!("DELETE FROM assets WHERE id = '{V1}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }
}
