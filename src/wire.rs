use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::messages::data::DataRow;
use pgwire::tokio::{TlsAcceptor, process_socket};
use tokio::net::TcpStream;

use crate::auth::FleetDayAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{QUERIES_TOTAL, QUERY_DURATION_SECONDS, command_label};
use crate::sql::{self, Command, SqlError};

/// Serve one client connection against `engine` until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(FleetDayFactory::new(engine, password));
    process_socket(socket, tls, factory).await
}

/// The server's calendar date. The engine never reads the clock itself.
fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

pub struct FleetDayHandler {
    engine: Arc<Engine>,
    query_parser: Arc<FleetDayQueryParser>,
}

impl FleetDayHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(FleetDayQueryParser),
        }
    }

    async fn run(&self, query: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::InsertAsset { assets } => {
                let count = assets.len();
                for asset in assets {
                    engine.register_asset(asset).await.map_err(engine_err)?;
                }
                Ok(Response::Execution(Tag::new("INSERT").with_rows(count)))
            }
            Command::InsertAssignment { drafts } => {
                let today = today();
                let mut days = 0;
                for draft in drafts {
                    let receipt = engine
                        .save_assignment(draft, today)
                        .await
                        .map_err(engine_err)?;
                    days += receipt.days;
                }
                Ok(Response::Execution(Tag::new("INSERT").with_rows(days)))
            }
            Command::SelectAssets { id } => {
                let assets = match id {
                    Some(id) => engine.get_asset(id).await.into_iter().collect(),
                    None => engine.list_assets().await,
                };
                let schema = Arc::new(asset_schema());
                let rows = assets.iter().map(|a| asset_row(&schema, a)).collect();
                Ok(query_response(schema, rows))
            }
            Command::SelectAssignments { asset_id } => {
                let assignments = match asset_id {
                    Some(id) => engine.asset_history(id).await,
                    None => engine.list_assignments().await,
                };
                let schema = Arc::new(assignment_schema());
                let rows = assignments
                    .iter()
                    .map(|a| assignment_row(&schema, a))
                    .collect();
                Ok(query_response(schema, rows))
            }
            Command::SelectDailyLogs { asset_id, from, to } => {
                let logs = match (from, to) {
                    (None, None) => {
                        let mut logs = engine.list_daily_logs().await;
                        if let Some(id) = asset_id {
                            logs.retain(|l| l.asset_id == id);
                        }
                        logs
                    }
                    (from, to) => {
                        let window = Window::new(
                            from.unwrap_or(NaiveDate::MIN),
                            to.unwrap_or(NaiveDate::MAX),
                        );
                        engine.daily_logs_in(window, asset_id).await
                    }
                };
                let schema = Arc::new(daily_log_schema());
                let rows = logs.iter().map(|l| daily_log_row(&schema, l)).collect();
                Ok(query_response(schema, rows))
            }
            Command::SelectUtilization { asset_id, from, to } => {
                let filter = asset_id.map_or(AssetFilter::All, AssetFilter::Asset);
                let u = engine
                    .compute_utilization(Window::new(from, to), filter)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(utilization_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&u.real_hours)?;
                encoder.encode_field(&u.theoretical_hours)?;
                encoder.encode_field(&u.percent)?;
                encoder.encode_field(&band_label(u.band()))?;
                Ok(query_response(schema, vec![Ok(encoder.take_row())]))
            }
            Command::SelectStatus { asset_id, date } => {
                let status = engine.resolve_status(asset_id, date, today()).await;
                let schema = Arc::new(status_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&asset_id.to_string())?;
                encoder.encode_field(&date.to_string())?;
                encoder.encode_field(&status.map(|s| s.as_str()))?;
                Ok(query_response(schema, vec![Ok(encoder.take_row())]))
            }
        }
    }
}

fn query_response(schema: Arc<Vec<FieldInfo>>, rows: Vec<PgWireResult<DataRow>>) -> Response {
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn band_label(band: UtilizationBand) -> &'static str {
    match band {
        UtilizationBand::Low => "LOW",
        UtilizationBand::Medium => "MEDIUM",
        UtilizationBand::Healthy => "HEALTHY",
    }
}

// ── Result schemas ───────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn text_fields(names: &[&str]) -> impl Iterator<Item = FieldInfo> {
    names.iter().map(|n| field(n, Type::VARCHAR))
}

fn asset_schema() -> Vec<FieldInfo> {
    text_fields(&[
        "id",
        "code",
        "name",
        "category",
        "status",
        "location",
        "parent_id",
        "current_assignment_id",
    ])
    .collect()
}

fn assignment_schema() -> Vec<FieldInfo> {
    let mut fields: Vec<FieldInfo> = text_fields(&[
        "id",
        "asset_id",
        "start_date",
        "end_date",
        "schedule",
        "start_time",
        "end_time",
    ])
    .collect();
    fields.push(field("hours_per_day", Type::FLOAT8));
    fields.extend(text_fields(&[
        "status",
        "client",
        "ceco",
        "province",
        "city",
        "site",
        "job",
        "offer_id",
        "responsible",
    ]));
    fields.push(field("estimated_total_hours", Type::FLOAT8));
    fields.push(field("created_on", Type::VARCHAR));
    fields
}

fn daily_log_schema() -> Vec<FieldInfo> {
    let mut fields: Vec<FieldInfo> = text_fields(&[
        "id",
        "asset_id",
        "assignment_id",
        "date",
        "start_time",
        "end_time",
    ])
    .collect();
    fields.push(field("hours", Type::FLOAT8));
    fields.push(field("status", Type::VARCHAR));
    fields.push(field("verified", Type::BOOL));
    fields.push(field("notes", Type::VARCHAR));
    fields
}

fn utilization_schema() -> Vec<FieldInfo> {
    vec![
        field("real_hours", Type::FLOAT8),
        field("theoretical_hours", Type::FLOAT8),
        field("percent", Type::FLOAT8),
        field("band", Type::VARCHAR),
    ]
}

fn status_schema() -> Vec<FieldInfo> {
    text_fields(&["asset_id", "date", "status"]).collect()
}

/// Schema of a statement's result, from the table it selects from.
fn result_schema(statement: &str) -> Vec<FieldInfo> {
    let lower = statement.to_lowercase();
    let mut words = lower.split_whitespace();
    if words.next() != Some("select") {
        return Vec::new();
    }
    let table = words
        .skip_while(|w| *w != "from")
        .nth(1)
        .map(|t| t.trim_end_matches(';'));
    match table {
        Some("assets") => asset_schema(),
        Some("assignments") => assignment_schema(),
        Some("daily_logs") => daily_log_schema(),
        Some("utilization") => utilization_schema(),
        Some("status") => status_schema(),
        _ => Vec::new(),
    }
}

fn time_text(t: chrono::NaiveTime) -> String {
    t.format("%H:%M").to_string()
}

fn asset_row(schema: &Arc<Vec<FieldInfo>>, a: &Asset) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&a.id.to_string())?;
    encoder.encode_field(&a.code)?;
    encoder.encode_field(&a.name)?;
    encoder.encode_field(&a.category.as_str())?;
    encoder.encode_field(&a.status.as_str())?;
    encoder.encode_field(&a.location)?;
    encoder.encode_field(&a.parent_id.map(|p| p.to_string()))?;
    encoder.encode_field(&a.current_assignment_id.map(|p| p.to_string()))?;
    Ok(encoder.take_row())
}

fn assignment_row(schema: &Arc<Vec<FieldInfo>>, a: &Assignment) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&a.id.to_string())?;
    encoder.encode_field(&a.asset_id.to_string())?;
    encoder.encode_field(&a.start_date.to_string())?;
    encoder.encode_field(&a.end_date.map(|d| d.to_string()))?;
    encoder.encode_field(&a.schedule.kind.as_str())?;
    encoder.encode_field(&time_text(a.schedule.start_time))?;
    encoder.encode_field(&time_text(a.schedule.end_time))?;
    encoder.encode_field(&a.schedule.hours_per_day())?;
    encoder.encode_field(&a.status.as_str())?;
    encoder.encode_field(&a.client)?;
    encoder.encode_field(&a.cost_center)?;
    encoder.encode_field(&a.province)?;
    encoder.encode_field(&a.city)?;
    encoder.encode_field(&a.site)?;
    encoder.encode_field(&a.job_description)?;
    encoder.encode_field(&a.offer_id)?;
    encoder.encode_field(&a.responsible)?;
    encoder.encode_field(&a.estimated_total_hours)?;
    encoder.encode_field(&a.created_on.to_string())?;
    Ok(encoder.take_row())
}

fn daily_log_row(schema: &Arc<Vec<FieldInfo>>, l: &DailyLog) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&l.id.to_string())?;
    encoder.encode_field(&l.asset_id.to_string())?;
    encoder.encode_field(&l.assignment_id.to_string())?;
    encoder.encode_field(&l.date.to_string())?;
    encoder.encode_field(&time_text(l.start_time))?;
    encoder.encode_field(&time_text(l.end_time))?;
    encoder.encode_field(&l.hours)?;
    encoder.encode_field(&l.status.as_str())?;
    encoder.encode_field(&l.verified)?;
    encoder.encode_field(&l.notes)?;
    Ok(encoder.take_row())
}

#[async_trait]
impl SimpleQueryHandler for FleetDayHandler {
    async fn do_query<C>(
        &self,
        _client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct FleetDayQueryParser;

#[async_trait]
impl QueryParser for FleetDayQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for FleetDayHandler {
    type Statement = String;
    type QueryParser = FleetDayQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.run(&substitute_params(portal)).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    let mut max = 0;
    let mut rest = sql;
    while let Some(pos) = rest.find('$') {
        rest = &rest[pos + 1..];
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if let Ok(n) = rest[..digits].parse::<usize>() {
            max = max.max(n);
        }
        rest = &rest[digits..];
    }
    max
}

/// Inline bound text parameters as quoted literals, highest index first so
/// `$1` does not clobber `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut sql = portal.statement.statement.clone();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let value = match param {
            Some(bytes) => format!("'{}'", String::from_utf8_lossy(bytes).replace('\'', "''")),
            None => "NULL".to_string(),
        };
        sql = sql.replace(&format!("${}", i + 1), &value);
    }
    sql
}

// ── Factory ──────────────────────────────────────────────────────

pub struct FleetDayFactory {
    handler: Arc<FleetDayHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<FleetDayAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl FleetDayFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        Self {
            handler: Arc::new(FleetDayHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                FleetDayAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for FleetDayFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error("P0001", e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}
