use std::fmt::Debug;
use std::io;
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{AuthSource, DefaultServerParameterProvider, LoginInfo, Password, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo, QueryResponse,
    Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, SqlError, TimeArg};
use crate::tenant::ClubManager;

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    clubs: Arc<ClubManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(CourtsideFactory::new(clubs, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

pub struct CourtsideHandler {
    clubs: Arc<ClubManager>,
    query_parser: Arc<CourtsideQueryParser>,
}

impl CourtsideHandler {
    pub fn new(clubs: Arc<ClubManager>) -> Self {
        Self {
            clubs,
            query_parser: Arc::new(CourtsideQueryParser),
        }
    }

    /// The database name picks the club.
    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let club = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.clubs.get_or_create(&club).map_err(|e| {
            metrics::counter!(observability::CLUB_OPEN_FAILURES_TOTAL).increment(1);
            user_error("08006", format!("club error: {e}"))
        })
    }

    /// Parse and run one statement, recording latency and outcome.
    async fn run(&self, engine: &Engine, query: &str) -> PgWireResult<Response> {
        let started = Instant::now();
        let cmd = sql::parse_sql(query).map_err(|e| {
            metrics::counter!(observability::QUERIES_TOTAL, "command" => "unparsed", "status" => "error").increment(1);
            sql_err(e)
        })?;
        let label = cmd.label();
        let result = self.execute_command(engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Response> {
        match cmd {
            Command::InsertCourt { id, name, hourly_rate } => {
                engine.register_court(id, name, hourly_rate).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::SelectCourts => {
                let courts = engine.list_courts().await;
                rows(courts_schema(), courts, |enc, c| {
                    enc.encode_field(&c.id.to_string())?;
                    enc.encode_field(&c.name)?;
                    enc.encode_field(&c.hourly_rate.to_string())?;
                    enc.encode_field(&c.available)?;
                    enc.encode_field(&c.configured)
                })
            }
            Command::SetCourtAvailable { court_id, available } => {
                engine
                    .set_court_available(court_id, available)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::UpsertSchedule { court_id, config } => {
                engine.set_schedule(court_id, Some(config)).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::DeleteSchedule { court_id } => {
                engine.set_schedule(court_id, None).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectSchedule { court_id } => {
                let (config, configured) = engine.schedule(court_id).await.map_err(engine_err)?;
                rows(schedule_schema(), vec![config], |enc, s| {
                    enc.encode_field(&court_id.to_string())?;
                    enc.encode_field(&s.open_time.format("%H:%M").to_string())?;
                    enc.encode_field(&s.close_time.format("%H:%M").to_string())?;
                    enc.encode_field(&(s.slot_minutes as i32))?;
                    enc.encode_field(&s.weekdays.to_string())?;
                    enc.encode_field(&(s.min_advance_hours as i32))?;
                    enc.encode_field(&(s.max_advance_days as i32))?;
                    enc.encode_field(&s.trailing_slot.as_str().to_string())?;
                    enc.encode_field(&s.timezone.name().to_string())?;
                    enc.encode_field(&configured)
                })
            }
            Command::InsertPricePeriod { court_id, period } => {
                engine.add_price_period(court_id, period).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::DeletePricePeriod { id } => {
                engine.remove_price_period(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectPricePeriods { court_id } => {
                let periods = engine.price_periods(court_id).await.map_err(engine_err)?;
                let court = court_id.to_string();
                rows(price_periods_schema(), periods, move |enc, p| {
                    enc.encode_field(&p.id.to_string())?;
                    enc.encode_field(&court)?;
                    enc.encode_field(&p.start_time.format("%H:%M").to_string())?;
                    enc.encode_field(&p.end_time.format("%H:%M").to_string())?;
                    enc.encode_field(&p.label)?;
                    enc.encode_field(&p.adjustment_percent.to_string())
                })
            }
            Command::SelectSlots { court_id, date } => {
                let slots = engine.slots_for(court_id, date).await.map_err(engine_err)?;
                let court = court_id.to_string();
                rows(slots_schema(), slots, move |enc, slot| {
                    enc.encode_field(&court)?;
                    enc.encode_field(&slot.start.format("%H:%M").to_string())?;
                    enc.encode_field(&slot.end.format("%H:%M").to_string())?;
                    enc.encode_field(&slot.base_price.to_string())?;
                    enc.encode_field(&slot.price.to_string())?;
                    enc.encode_field(&slot.state.as_str().to_string())
                })
            }
            Command::InsertReservation {
                id,
                court_id,
                start,
                end,
                player_id,
            } => {
                let span = resolve_span(engine, court_id, start, end).await?;
                engine
                    .try_reserve(id, court_id, span, player_id)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateReservationStatus { id, status } => {
                match status {
                    ReservationStatus::Confirmed => engine.confirm_reservation(id).await,
                    ReservationStatus::Cancelled => engine.cancel_reservation(id).await,
                    ReservationStatus::Completed => engine.complete_reservation(id).await,
                    ReservationStatus::Pending => {
                        return Err(user_error("55000", "a reservation cannot be set back to pending"));
                    }
                }
                .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::SelectReservations { court_id } => {
                let reservations = engine.reservations(court_id).await.map_err(engine_err)?;
                rows(reservations_schema(), reservations, encode_reservation)
            }
            Command::SelectPlayerReservations { player_id, court_id } => {
                let mut reservations = engine.reservations_for_player(&player_id).await;
                if let Some(court_id) = court_id {
                    reservations.retain(|r| r.court_id == court_id);
                }
                rows(reservations_schema(), reservations, encode_reservation)
            }
            Command::InsertBlock {
                id,
                court_id,
                start,
                end,
                reason,
            } => {
                let span = resolve_span(engine, court_id, start, end).await?;
                engine.place_block(id, court_id, span, reason).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::DeleteBlock { id } => {
                engine.release_block(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectBlocks { court_id } => {
                let blocks = engine.blocks(court_id).await.map_err(engine_err)?;
                rows(blocks_schema(), blocks, |enc, b| {
                    enc.encode_field(&b.id.to_string())?;
                    enc.encode_field(&b.court_id.to_string())?;
                    enc.encode_field(&b.span.start)?;
                    enc.encode_field(&b.span.end)?;
                    enc.encode_field(&b.reason)
                })
            }
        }
    }
}

/// Turn client timestamps into a span, reading wall-clock ones in the
/// court's zone. Ordering and range are checked by the engine.
async fn resolve_span(engine: &Engine, court_id: Ulid, start: TimeArg, end: TimeArg) -> PgWireResult<Span> {
    let config = match (start, end) {
        (TimeArg::Ms(_), TimeArg::Ms(_)) => None,
        _ => Some(engine.schedule(court_id).await.map_err(engine_err)?.0),
    };
    let resolve = |t: TimeArg| match (t, &config) {
        (TimeArg::Ms(ms), _) => Ok(ms),
        (TimeArg::Local(local), Some(config)) => TimeArg::Local(local)
            .resolve(config)
            .ok_or_else(|| user_error("22007", format!("{local} does not exist in {}", config.timezone))),
        (TimeArg::Local(_), None) => Err(user_error("XX000", "court schedule not loaded")),
    };
    Ok(Span {
        start: resolve(start)?,
        end: resolve(end)?,
    })
}

fn rows<T>(
    schema: Vec<FieldInfo>,
    items: Vec<T>,
    encode: impl Fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> PgWireResult<Response> {
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<_>> = items
        .iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn encode_reservation(enc: &mut DataRowEncoder, r: &Reservation) -> PgWireResult<()> {
    enc.encode_field(&r.id.to_string())?;
    enc.encode_field(&r.court_id.to_string())?;
    enc.encode_field(&r.span.start)?;
    enc.encode_field(&r.span.end)?;
    enc.encode_field(&r.status.as_str().to_string())?;
    enc.encode_field(&r.player_id)?;
    enc.encode_field(&r.price.to_string())
}

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn courts_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("hourly_rate", Type::NUMERIC),
        field("available", Type::BOOL),
        field("configured", Type::BOOL),
    ]
}

fn schedule_schema() -> Vec<FieldInfo> {
    vec![
        field("court_id", Type::VARCHAR),
        field("open_time", Type::VARCHAR),
        field("close_time", Type::VARCHAR),
        field("slot_minutes", Type::INT4),
        field("weekdays", Type::VARCHAR),
        field("min_advance_hours", Type::INT4),
        field("max_advance_days", Type::INT4),
        field("trailing_slot", Type::VARCHAR),
        field("timezone", Type::VARCHAR),
        field("configured", Type::BOOL),
    ]
}

fn price_periods_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("court_id", Type::VARCHAR),
        field("start_time", Type::VARCHAR),
        field("end_time", Type::VARCHAR),
        field("label", Type::VARCHAR),
        field("adjustment_percent", Type::NUMERIC),
    ]
}

fn slots_schema() -> Vec<FieldInfo> {
    vec![
        field("court_id", Type::VARCHAR),
        field("start", Type::VARCHAR),
        field("end", Type::VARCHAR),
        field("base_price", Type::NUMERIC),
        field("price", Type::NUMERIC),
        field("state", Type::VARCHAR),
    ]
}

fn reservations_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("court_id", Type::VARCHAR),
        field("start", Type::INT8),
        field("end", Type::INT8),
        field("status", Type::VARCHAR),
        field("player_id", Type::VARCHAR),
        field("price", Type::NUMERIC),
    ]
}

fn blocks_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("court_id", Type::VARCHAR),
        field("start", Type::INT8),
        field("end", Type::INT8),
        field("reason", Type::VARCHAR),
    ]
}

/// Row shape of a statement, judged from its `FROM` table so that
/// statements with unbound `$n` parameters can be described.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.trim_start().to_uppercase();
    if !upper.starts_with("SELECT") {
        return vec![];
    }
    let table = upper
        .split_once(" FROM ")
        .and_then(|(_, rest)| rest.split_whitespace().next())
        .map(|t| t.trim_matches(|c| c == ';' || c == '"'));
    match table {
        Some("COURTS") => courts_schema(),
        Some("SCHEDULES") => schedule_schema(),
        Some("PRICE_PERIODS") => price_periods_schema(),
        Some("SLOTS") => slots_schema(),
        Some("RESERVATIONS") => reservations_schema(),
        Some("BLOCKS") => blocks_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for CourtsideHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        Ok(vec![self.run(&engine, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct CourtsideQueryParser;

#[async_trait]
impl QueryParser for CourtsideQueryParser {
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
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for CourtsideHandler {
    type Statement = String;
    type QueryParser = CourtsideQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(&self, client: &mut C, portal: &Portal<Self::Statement>, _max_rows: usize) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(&portal.statement.statement, &portal.parameters);
        self.run(&engine, &sql).await
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
        Ok(DescribeStatementResponse::new(param_types, result_schema(&target.statement)))
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
        Ok(DescribePortalResponse::new(result_schema(&target.statement.statement)))
    }
}

/// `$n` placeholders outside string literals and quoted identifiers, as
/// `(byte range, n)` in order of appearance.
fn placeholders(sql: &str) -> Vec<(Range<usize>, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"') => {
                // A doubled quote is an escaped one and keeps the literal open.
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == quote {
                        if bytes.get(i + 1) == Some(&quote) {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
                i += 1;
            }
            b'$' => {
                let start = i;
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if let Ok(n) = sql[start + 1..i].parse::<usize>() {
                    found.push((start..i, n));
                }
            }
            _ => i += 1,
        }
    }
    found
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    placeholders(sql).into_iter().map(|(_, n)| n).max().unwrap_or(0)
}

/// Substitute `$1, $2, ...` with the bound values (text format) as quoted
/// literals, in one left-to-right pass so bound text is never rescanned.
/// Placeholders without a bound value are left alone.
fn substitute_params(sql: &str, params: &[Option<impl AsRef<[u8]>>]) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut copied = 0;
    for (range, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|i| params.get(i)) else {
            continue;
        };
        result.push_str(&sql[copied..range.start]);
        match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                result.push('\'');
                result.push_str(&text.replace('\'', "''"));
                result.push('\'');
            }
            None => result.push_str("NULL"),
        }
        copied = range.end;
    }
    result.push_str(&sql[copied..]);
    result
}

// ── Startup / factory ────────────────────────────────────────────

/// One shared password for every user and club.
#[derive(Debug)]
pub struct CourtsideAuthSource {
    password: String,
}

#[async_trait]
impl AuthSource for CourtsideAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

pub struct CourtsideFactory {
    handler: Arc<CourtsideHandler>,
    auth_handler: Arc<CleartextPasswordAuthStartupHandler<CourtsideAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl CourtsideFactory {
    pub fn new(clubs: Arc<ClubManager>, password: String) -> Self {
        Self {
            handler: Arc::new(CourtsideHandler::new(clubs)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                CourtsideAuthSource { password },
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for CourtsideFactory {
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

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: impl Into<String>) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message.into())))
}

fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Conflict(_) => "23P01",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::Config(_) => "23514",
        EngineError::BookingWindow(_) => "22023",
        EngineError::NotFound(_) => "42704",
        EngineError::InvalidTransition { .. }
        | EngineError::PaymentWindowClosed(_)
        | EngineError::CourtUnavailable(_) => "55000",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::Timeout => "57014",
        EngineError::Storage(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    tracing::debug!(error = %e, retryable = e.is_retryable(), "command failed");
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    let code = match e {
        SqlError::Config(_) => "23514",
        _ => "42601",
    };
    user_error(code, e.to_string())
}
