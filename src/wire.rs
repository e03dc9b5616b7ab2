use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
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
use pgwire::messages::data::DataRow;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::{Actor, SpelplautAuthSource};
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::ratelimit::RateLimitStore;
use crate::sql::{self, Command, ReservationFilter};

pub struct SpelplautHandler {
    engine: Arc<Engine>,
    admins: Arc<Vec<String>>,
    query_parser: Arc<SpelplautQueryParser>,
}

impl SpelplautHandler {
    pub fn new(engine: Arc<Engine>, admins: Vec<String>) -> Self {
        Self {
            engine,
            admins: Arc::new(admins),
            query_parser: Arc::new(SpelplautQueryParser),
        }
    }

    fn actor<C: ClientInfo>(&self, client: &C) -> PgWireResult<Actor> {
        let user = client
            .metadata()
            .get("user")
            .ok_or_else(|| user_error("28000", "no user in startup packet".into()))?;
        Ok(Actor::from_login(user, &self.admins))
    }

    async fn run(&self, actor: &Actor, sql: &str) -> PgWireResult<Vec<Response>> {
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(actor, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, actor: &Actor, cmd: Command) -> PgWireResult<Vec<Response>> {
        let engine = &self.engine;
        match cmd {
            Command::InsertCourt {
                id,
                name,
                owner_id,
                open,
                close,
                slot_minutes,
                operating_days,
            } => {
                let window = OperatingWindow::new(open, close, operating_days)
                    .map_err(|e| engine_err(e.into()))?;
                let owner_id = owner_id.unwrap_or_else(|| actor.id.clone());
                engine
                    .create_court(actor, id, name, owner_id, window, slot_minutes)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateCourt { id, patch } => {
                engine.update_court(actor, id, patch).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteCourt { id } => {
                engine.delete_court(actor, id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::BlockDate {
                court_id,
                date,
                reason,
            } => {
                engine
                    .block_date(actor, court_id, date, reason)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UnblockDate { court_id, date } => {
                let removed = engine
                    .unblock_date(actor, court_id, date)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(
                    Tag::new("DELETE").with_rows(usize::from(removed)),
                )])
            }
            Command::InsertReservation {
                id,
                court_id,
                date,
                start,
                end,
            } => {
                engine
                    .request_reservation(actor, id, court_id, date, &start, &end)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::Reschedule {
                id,
                date,
                start,
                end,
            } => {
                engine
                    .reschedule_reservation(actor, id, date, &start, &end)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::SetState { id, state } => {
                match state {
                    ReservationState::Confirmed => engine.confirm_reservation(actor, id).await,
                    ReservationState::Cancelled => engine.cancel_reservation(actor, id).await,
                    other => {
                        return Err(user_error(
                            "22023",
                            format!("state cannot be set to {other}; use confirmed or cancelled"),
                        ));
                    }
                }
                .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::SetPaid { id, paid } => {
                engine.set_paid(actor, id, paid).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::SelectCourts { id } => {
                let courts = match id {
                    Some(id) => vec![engine.court_info(id).await.map_err(engine_err)?],
                    None => engine.list_courts().await,
                };
                Ok(vec![court_rows(courts)])
            }
            Command::SelectReservations { filter } => {
                let found = match filter {
                    ReservationFilter::Id(id) => {
                        vec![engine.get_reservation(id).await.map_err(engine_err)?]
                    }
                    ReservationFilter::Day { court_id, date } => engine
                        .day_reservations(court_id, date)
                        .await
                        .map_err(engine_err)?,
                    ReservationFilter::User(user) => engine.reservations_for_user(&user).await,
                };
                Ok(vec![reservation_rows(found)])
            }
            Command::SelectSlots { court_id, date } => {
                let day = engine.free_slots(court_id, date).await.map_err(engine_err)?;
                Ok(vec![slot_rows(day)])
            }
            Command::SelectFreeRanges {
                court_id,
                date,
                min_duration,
            } => {
                let free = engine
                    .free_ranges(court_id, date, min_duration)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![free_range_rows(free)])
            }
            Command::SelectReport { court_id, from, to } => {
                let report = engine
                    .court_report(court_id, from, to)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![report_rows(report)])
            }
        }
    }
}

// ── Result schemas ───────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn courts_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("owner_id", Type::VARCHAR),
        field("opens_at", Type::VARCHAR),
        field("closes_at", Type::VARCHAR),
        field("slot_minutes", Type::INT8),
        field("operating_days", Type::VARCHAR),
        field("blocked_dates", Type::VARCHAR),
    ]
}

fn reservations_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("court_id", Type::VARCHAR),
        field("user_id", Type::VARCHAR),
        field("date", Type::VARCHAR),
        field("start", Type::VARCHAR),
        field("end", Type::VARCHAR),
        field("state", Type::VARCHAR),
        field("paid", Type::BOOL),
        field("created_at", Type::VARCHAR),
    ]
}

fn slots_schema() -> Vec<FieldInfo> {
    vec![
        field("date", Type::VARCHAR),
        field("start", Type::VARCHAR),
        field("end", Type::VARCHAR),
        field("available", Type::BOOL),
        field("held_by", Type::VARCHAR),
        field("closure", Type::VARCHAR),
    ]
}

fn free_ranges_schema() -> Vec<FieldInfo> {
    vec![
        field("start", Type::VARCHAR),
        field("end", Type::VARCHAR),
        field("minutes", Type::INT8),
    ]
}

fn report_schema() -> Vec<FieldInfo> {
    vec![
        field("court_id", Type::VARCHAR),
        field("total", Type::INT8),
        field("pending", Type::INT8),
        field("confirmed", Type::INT8),
        field("cancelled", Type::INT8),
        field("completed", Type::INT8),
        field("paid", Type::INT8),
        field("booked_minutes", Type::INT8),
    ]
}

/// Table named after the first FROM of a SELECT, if any.
fn select_table(sql: &str) -> Option<String> {
    let lower = sql.trim_start().to_lowercase();
    if !lower.starts_with("select") {
        return None;
    }
    let after = &lower[lower.find(" from ")? + " from ".len()..];
    let name = after
        .split(|c: char| c.is_whitespace() || c == ';')
        .find(|s| !s.is_empty())?;
    Some(name.trim_matches('"').to_string())
}

fn schema_for(sql: &str) -> Vec<FieldInfo> {
    match select_table(sql).as_deref() {
        Some("courts") => courts_schema(),
        Some("reservations") => reservations_schema(),
        Some("slots") => slots_schema(),
        Some("free_ranges") => free_ranges_schema(),
        Some("report") => report_schema(),
        _ => vec![],
    }
}

type Schema = Arc<Vec<FieldInfo>>;

fn query_response(schema: Schema, rows: Vec<PgWireResult<DataRow>>) -> Response {
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn encode_court(schema: &Schema, c: &CourtInfo) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&c.id.to_string())?;
    encoder.encode_field(&c.name)?;
    encoder.encode_field(&c.owner_id)?;
    encoder.encode_field(&format_hhmm(c.window.open))?;
    encoder.encode_field(&format_hhmm(c.window.close))?;
    encoder.encode_field(&i64::from(c.slot_minutes))?;
    encoder.encode_field(&c.window.operating_days.as_deref().map(format_weekdays))?;
    let blocked: Vec<String> = c.blocked.iter().map(|b| b.date.to_string()).collect();
    encoder.encode_field(&blocked.join(","))?;
    Ok(encoder.take_row())
}

fn encode_reservation(schema: &Schema, r: &Reservation) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&r.id.to_string())?;
    encoder.encode_field(&r.court_id.to_string())?;
    encoder.encode_field(&r.user_id)?;
    encoder.encode_field(&r.date.to_string())?;
    encoder.encode_field(&format_hhmm(r.range.start))?;
    encoder.encode_field(&format_hhmm(r.range.end))?;
    encoder.encode_field(&r.state.as_str().to_string())?;
    encoder.encode_field(&r.paid)?;
    encoder.encode_field(&r.created_at.format("%Y-%m-%d %H:%M:%S").to_string())?;
    Ok(encoder.take_row())
}

fn encode_slot(schema: &Schema, date: &str, slot: &TimeSlot) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&date.to_string())?;
    encoder.encode_field(&Some(format_hhmm(slot.range.start)))?;
    encoder.encode_field(&Some(format_hhmm(slot.range.end)))?;
    encoder.encode_field(&slot.available)?;
    encoder.encode_field(&slot.blocking_state.map(|s| s.as_str().to_string()))?;
    encoder.encode_field(&None::<String>)?;
    Ok(encoder.take_row())
}

/// A closed day is a single row with no times and the closure reason.
fn encode_closure(schema: &Schema, date: &str, closure: &Closure) -> PgWireResult<DataRow> {
    let reason = match closure {
        Closure::Blocked { reason: Some(r) } => format!("blocked: {r}"),
        Closure::Blocked { reason: None } => "blocked".to_string(),
        Closure::ClosedWeekday(d) => format!("closed on {d}"),
    };
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&date.to_string())?;
    encoder.encode_field(&None::<String>)?;
    encoder.encode_field(&None::<String>)?;
    encoder.encode_field(&false)?;
    encoder.encode_field(&None::<String>)?;
    encoder.encode_field(&Some(reason))?;
    Ok(encoder.take_row())
}

fn encode_free_range(schema: &Schema, range: &TimeRange) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&format_hhmm(range.start))?;
    encoder.encode_field(&format_hhmm(range.end))?;
    encoder.encode_field(&i64::from(range.duration()))?;
    Ok(encoder.take_row())
}

fn encode_report(schema: &Schema, report: &CourtReport) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&report.court_id.to_string())?;
    for n in [
        report.total,
        report.pending,
        report.confirmed,
        report.cancelled,
        report.completed,
        report.paid,
        report.booked_minutes,
    ] {
        encoder.encode_field(&(n as i64))?;
    }
    Ok(encoder.take_row())
}

fn court_rows(courts: Vec<CourtInfo>) -> Response {
    let schema = Arc::new(courts_schema());
    let rows = courts.iter().map(|c| encode_court(&schema, c)).collect();
    query_response(schema, rows)
}

fn reservation_rows(found: Vec<Reservation>) -> Response {
    let schema = Arc::new(reservations_schema());
    let rows = found.iter().map(|r| encode_reservation(&schema, r)).collect();
    query_response(schema, rows)
}

fn slot_rows(day: DaySlots) -> Response {
    let schema = Arc::new(slots_schema());
    let date = day.date.to_string();
    let rows = match &day.closure {
        Some(closure) => vec![encode_closure(&schema, &date, closure)],
        None => day.slots.iter().map(|s| encode_slot(&schema, &date, s)).collect(),
    };
    query_response(schema, rows)
}

fn free_range_rows(free: Vec<TimeRange>) -> Response {
    let schema = Arc::new(free_ranges_schema());
    let rows = free.iter().map(|r| encode_free_range(&schema, r)).collect();
    query_response(schema, rows)
}

fn report_rows(report: CourtReport) -> Response {
    let schema = Arc::new(report_schema());
    let rows = vec![encode_report(&schema, &report)];
    query_response(schema, rows)
}

#[async_trait]
impl SimpleQueryHandler for SpelplautHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let actor = self.actor(client)?;
        self.run(&actor, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SpelplautQueryParser;

#[async_trait]
impl QueryParser for SpelplautQueryParser {
    type Statement = String;

    async fn parse_sql<C>(&self, _client: &C, sql: &str, _types: &[Option<Type>]) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(&self, stmt: &String, _column_format: Option<&Format>) -> PgWireResult<Vec<FieldInfo>> {
        Ok(schema_for(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for SpelplautHandler {
    type Statement = String;
    type QueryParser = SpelplautQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let actor = self.actor(client)?;
        let sql = substitute_params(portal);
        let mut responses = self.run(&actor, &sql).await?;
        responses
            .pop()
            .ok_or_else(|| user_error("XX000", "statement produced no response".into()))
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
        Ok(DescribeStatementResponse::new(param_types, schema_for(&target.statement)))
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
        Ok(DescribePortalResponse::new(schema_for(&target.statement.statement)))
    }
}

/// Highest `$N` placeholder outside single-quoted literals.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    for_each_placeholder(sql, |_, n| max = max.max(n));
    max
}

/// Calls `f(byte_range, n)` for each `$N` outside single-quoted literals.
fn for_each_placeholder(sql: &str, mut f: impl FnMut(std::ops::Range<usize>, usize)) {
    let bytes = sql.as_bytes();
    let mut in_literal = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                in_literal = !in_literal;
                i += 1;
            }
            b'$' if !in_literal => {
                let start = i;
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if let Ok(n) = sql[start + 1..i].parse::<usize>() {
                    f(start..i, n);
                }
            }
            _ => i += 1,
        }
    }
}

/// Replace each `$N` with its bound value as a quoted literal, in one
/// left-to-right pass. Inserted text is never rescanned.
fn bind_params(sql: &str, params: &[Option<String>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;
    for_each_placeholder(sql, |range, n| {
        let Some(param) = n.checked_sub(1).and_then(|k| params.get(k)) else {
            return;
        };
        out.push_str(&sql[copied..range.start]);
        match param {
            Some(value) => {
                out.push('\'');
                out.push_str(&value.replace('\'', "''"));
                out.push('\'');
            }
            None => out.push_str("NULL"),
        }
        copied = range.end;
    });
    out.push_str(&sql[copied..]);
    out
}

fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<String>> = portal
        .parameters
        .iter()
        .map(|p| p.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
        .collect();
    bind_params(&portal.statement.statement, &params)
}

// ── Factory ──────────────────────────────────────────────────────

pub struct SpelplautFactory {
    handler: Arc<SpelplautHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<SpelplautAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl SpelplautFactory {
    pub fn new(
        engine: Arc<Engine>,
        password: String,
        admins: Vec<String>,
        login_limiter: Arc<dyn RateLimitStore>,
    ) -> Self {
        let auth_source = SpelplautAuthSource::new(password, login_limiter);
        Self {
            handler: Arc::new(SpelplautHandler::new(engine, admins)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SpelplautFactory {
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

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    factory: Arc<SpelplautFactory>,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(e.sqlstate(), e.to_string())
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_counted_by_highest_index() {
        assert_eq!(count_params("SELECT * FROM slots WHERE court_id = $1 AND \"date\" = $2"), 2);
        assert_eq!(count_params("UPDATE reservations SET paid = $12 WHERE id = $3"), 12);
        assert_eq!(count_params("SELECT * FROM courts"), 0);
        assert_eq!(count_params("SELECT '$' FROM courts"), 0);
        assert_eq!(count_params("SELECT '$7' FROM courts WHERE id = $1"), 1);
    }

    #[test]
    fn bound_values_are_not_rescanned() {
        let sql = r#"INSERT INTO blocked_dates (court_id, "date", reason) VALUES ($1,$2,$3)"#;
        let params = vec![
            Some("01ARZ3NDEKTSV4RRFFQ69G5FAV".to_string()),
            Some("2025-06-10".to_string()),
            Some("promo costs $1, it's $2".to_string()),
        ];
        assert_eq!(
            bind_params(sql, &params),
            r#"INSERT INTO blocked_dates (court_id, "date", reason) VALUES ('01ARZ3NDEKTSV4RRFFQ69G5FAV','2025-06-10','promo costs $1, it''s $2')"#
        );
    }

    #[test]
    fn literals_and_unbound_placeholders_kept() {
        let params = vec![Some("x".to_string()), None];
        assert_eq!(bind_params("SELECT '$1' WHERE a = $1 AND b = $2", &params), "SELECT '$1' WHERE a = 'x' AND b = NULL");
        assert_eq!(bind_params("SELECT $3", &params), "SELECT $3");

        let many: Vec<_> = (1..=10).map(|n| Some(n.to_string())).collect();
        assert_eq!(bind_params("VALUES ($10, $1)", &many), "VALUES ('10', '1')");
    }

    #[test]
    fn schemas_follow_the_selected_table() {
        assert_eq!(select_table("SELECT * FROM slots WHERE court_id = $1").as_deref(), Some("slots"));
        assert_eq!(select_table("  select * from \"report\";").as_deref(), Some("report"));
        assert_eq!(select_table("INSERT INTO courts VALUES ($1)"), None);
        assert_eq!(schema_for("SELECT * FROM free_ranges").len(), 3);
        assert_eq!(schema_for("SELECT * FROM reservations").len(), 9);
        assert!(schema_for("UPDATE reservations SET paid = true").is_empty());
    }

    #[test]
    fn engine_errors_become_user_errors() {
        let err = engine_err(EngineError::Forbidden("only admins can create courts"));
        assert!(matches!(err, PgWireError::UserError(_)));
        let err = sql_err(sql::SqlError::Empty);
        assert!(matches!(err, PgWireError::UserError(_)));
    }
}
