use std::collections::HashSet;
use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
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
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::{self, InnkeepAuthSource};
use crate::engine::{Engine, EngineError};
use crate::limits::MAX_SQL_LEN;
use crate::model::*;
use crate::observability as obs;
use crate::sql::{self, Command, ResultShape, SqlError};

pub struct InnkeepHandler {
    engine: Arc<Engine>,
    admins: Arc<HashSet<UserId>>,
    query_parser: Arc<InnkeepQueryParser>,
}

impl InnkeepHandler {
    pub fn new(engine: Arc<Engine>, admins: Arc<HashSet<UserId>>) -> Self {
        Self {
            engine,
            admins,
            query_parser: Arc::new(InnkeepQueryParser),
        }
    }

    fn resolve_actor<C: ClientInfo>(&self, client: &C) -> PgWireResult<Actor> {
        auth::actor_from_metadata(client.metadata(), &self.admins)
            .ok_or_else(|| user_error("28000", "user: missing or invalid user name".into()))
    }

    /// Parse, execute and record metrics for one statement.
    async fn run(&self, actor: &Actor, query: &str) -> PgWireResult<Vec<Response>> {
        if query.len() > MAX_SQL_LEN {
            return Err(user_error("54000", "request: statement too long".into()));
        }
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = obs::command_label(&cmd);
        tracing::debug!(command = label, user = %actor.user_id, "executing");

        let started = Instant::now();
        let result = self.execute_command(actor, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(obs::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(obs::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, actor: &Actor, cmd: Command) -> PgWireResult<Vec<Response>> {
        let engine = &self.engine;
        match cmd {
            Command::InsertRoom { id, spec } => {
                engine.create_room(actor, id, spec).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateRoom { id, patch } => {
                engine.patch_room(actor, id, patch).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteRoom { id } => {
                engine.delete_room(actor, id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectRooms { id, filter } => {
                let rooms = match id {
                    Some(id) => match engine.get_room(&id) {
                        Ok(room) => vec![room],
                        Err(EngineError::NotFound(_)) => vec![],
                        Err(e) => return Err(engine_err(e)),
                    },
                    None => engine.list_rooms(&filter),
                };
                Ok(vec![room_response(&rooms)?])
            }
            Command::InsertBooking {
                id,
                room_id,
                check_in,
                check_out,
                returning,
            } => {
                let booking = engine
                    .create_booking(actor, id, room_id, StayRange::new(check_in, check_out))
                    .await
                    .map_err(engine_err)?;
                self.booking_result("INSERT", booking, returning)
            }
            Command::UpdateBooking {
                id,
                check_in,
                check_out,
                returning,
            } => {
                let moved = engine
                    .reschedule_booking(actor, id, check_in, check_out)
                    .await
                    .map_err(engine_err)?;
                self.booking_result("UPDATE", moved.booking, returning)
            }
            Command::DeleteBooking { id, returning } => {
                let booking = engine.cancel_booking(actor, id).await.map_err(engine_err)?;
                self.booking_result("DELETE", booking, returning)
            }
            Command::SelectBookings { id, filter } => {
                let bookings = match id {
                    Some(id) => match engine.get_booking(actor, &id).await {
                        Ok(b) if filter.matches(&b, engine.clock().today()) => vec![b],
                        Ok(_) | Err(EngineError::NotFound(_)) => vec![],
                        Err(e) => return Err(engine_err(e)),
                    },
                    None => engine.list_bookings(actor, &filter).await,
                };
                Ok(vec![self.booking_response(&bookings)?])
            }
            Command::SelectAvailableRooms {
                check_in,
                check_out,
            } => {
                let rooms = engine
                    .available_rooms(StayRange::new(check_in, check_out))
                    .map_err(engine_err)?;
                Ok(vec![room_response(&rooms)?])
            }
            Command::SelectAvailability {
                room_id,
                check_in,
                check_out,
                exclude_id,
            } => {
                let stay = StayRange::new(check_in, check_out);
                let conflict = engine
                    .room_availability(room_id, stay, exclude_id)
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(availability_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&room_id.to_string())?;
                encoder.encode_field(&check_in.to_string())?;
                encoder.encode_field(&check_out.to_string())?;
                encoder.encode_field(&conflict.is_none())?;
                encoder.encode_field(&conflict.map(|c| c.booking_id.to_string()))?;
                encoder.encode_field(&conflict.map(|c| c.stay.check_in.to_string()))?;
                encoder.encode_field(&conflict.map(|c| c.stay.check_out.to_string()))?;
                let rows: Vec<PgWireResult<DataRow>> = vec![Ok(encoder.take_row())];

                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
        }
    }

    fn booking_result(
        &self,
        tag: &str,
        booking: Booking,
        returning: bool,
    ) -> PgWireResult<Vec<Response>> {
        if returning {
            Ok(vec![self.booking_response(&[booking])?])
        } else {
            Ok(vec![Response::Execution(Tag::new(tag).with_rows(1))])
        }
    }

    fn booking_response(&self, bookings: &[Booking]) -> PgWireResult<Response> {
        let today = self.engine.clock().today();
        let schema = Arc::new(booking_schema());
        let rows: Vec<PgWireResult<DataRow>> = bookings
            .iter()
            .map(|b| {
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&b.id.to_string())?;
                encoder.encode_field(&b.room_id.to_string())?;
                encoder.encode_field(&b.user_id)?;
                encoder.encode_field(&b.stay.check_in.to_string())?;
                encoder.encode_field(&b.stay.check_out.to_string())?;
                encoder.encode_field(&b.nights())?;
                encoder.encode_field(&b.total_price.to_string())?;
                encoder.encode_field(&b.status.label().to_string())?;
                encoder.encode_field(&b.cancelled_by().map(str::to_string))?;
                encoder.encode_field(&b.cancelled_at().map(|at| at.to_rfc3339()))?;
                encoder.encode_field(&b.created_at.to_rfc3339())?;
                encoder.encode_field(&b.updated_at.to_rfc3339())?;
                encoder.encode_field(&b.is_past(today))?;
                encoder.encode_field(&b.is_upcoming(today))?;
                encoder.encode_field(&b.is_current(today))?;
                Ok(encoder.take_row())
            })
            .collect();
        Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
    }
}

fn room_response(rooms: &[RoomInfo]) -> PgWireResult<Response> {
    let schema = Arc::new(room_schema());
    let rows: Vec<PgWireResult<DataRow>> = rooms
        .iter()
        .map(|r| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&r.id.to_string())?;
            encoder.encode_field(&r.number)?;
            encoder.encode_field(&r.price_per_night.to_string())?;
            encoder.encode_field(&(r.capacity as i32))?;
            encoder.encode_field(&r.is_active)?;
            encoder.encode_field(&r.description)?;
            encoder.encode_field(&r.created_at.to_rfc3339())?;
            encoder.encode_field(&r.updated_at.to_rfc3339())?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn room_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("room_number", Type::VARCHAR),
        field("price_per_night", Type::NUMERIC),
        field("capacity", Type::INT4),
        field("is_active", Type::BOOL),
        field("description", Type::VARCHAR),
        field("created_at", Type::TIMESTAMPTZ),
        field("updated_at", Type::TIMESTAMPTZ),
    ]
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("room_id", Type::VARCHAR),
        field("user_id", Type::VARCHAR),
        field("check_in", Type::DATE),
        field("check_out", Type::DATE),
        field("nights", Type::INT8),
        field("total_price", Type::NUMERIC),
        field("status", Type::VARCHAR),
        field("cancelled_by", Type::VARCHAR),
        field("cancelled_at", Type::TIMESTAMPTZ),
        field("created_at", Type::TIMESTAMPTZ),
        field("updated_at", Type::TIMESTAMPTZ),
        field("is_past", Type::BOOL),
        field("is_upcoming", Type::BOOL),
        field("is_current", Type::BOOL),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        field("room_id", Type::VARCHAR),
        field("check_in", Type::DATE),
        field("check_out", Type::DATE),
        field("available", Type::BOOL),
        field("conflicting_booking_id", Type::VARCHAR),
        field("conflicting_check_in", Type::DATE),
        field("conflicting_check_out", Type::DATE),
    ]
}

/// Result columns a statement will produce. Works before parameters are bound.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    match sql::result_shape(sql) {
        Some(ResultShape::Rooms) => room_schema(),
        Some(ResultShape::Bookings) => booking_schema(),
        Some(ResultShape::Availability) => availability_schema(),
        None => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for InnkeepHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let actor = self.resolve_actor(client)?;
        self.run(&actor, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct InnkeepQueryParser;

#[async_trait]
impl QueryParser for InnkeepQueryParser {
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
impl ExtendedQueryHandler for InnkeepHandler {
    type Statement = String;
    type QueryParser = InnkeepQueryParser;

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
        let actor = self.resolve_actor(client)?;
        let sql = substitute_params(portal);
        let mut responses = self.run(&actor, &sql).await?;
        if responses.is_empty() {
            return Ok(Response::EmptyQuery);
        }
        Ok(responses.remove(0))
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

enum Piece<'a> {
    Text(&'a str),
    /// `$N` with its 1-based index and the placeholder text itself.
    Param(usize, &'a str),
}

/// Split a statement into literal text and `$N` placeholders. A `$` inside a
/// single-quoted string is text.
fn pieces(sql: &str) -> Vec<Piece<'_>> {
    let bytes = sql.as_bytes();
    let mut out = Vec::new();
    let mut text_start = 0;
    let mut in_quote = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                in_quote = !in_quote;
                i += 1;
            }
            b'$' if !in_quote => {
                let start = i;
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if let Ok(n) = sql[start + 1..i].parse::<usize>() {
                    if text_start < start {
                        out.push(Piece::Text(&sql[text_start..start]));
                    }
                    out.push(Piece::Param(n, &sql[start..i]));
                    text_start = i;
                }
            }
            _ => i += 1,
        }
    }
    if text_start < sql.len() {
        out.push(Piece::Text(&sql[text_start..]));
    }
    out
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    pieces(sql)
        .iter()
        .filter_map(|p| match p {
            Piece::Param(n, _) => Some(*n),
            Piece::Text(_) => None,
        })
        .max()
        .unwrap_or(0)
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<String>> = portal
        .parameters
        .iter()
        .map(|p| p.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
        .collect();
    substitute(&portal.statement.statement, &params)
}

/// One pass over the original statement: bound values are never rescanned
/// for placeholders. Unbound indexes are left as written.
fn substitute(sql: &str, params: &[Option<String>]) -> String {
    let mut result = String::with_capacity(sql.len());
    for piece in pieces(sql) {
        match piece {
            Piece::Text(text) => result.push_str(text),
            Piece::Param(n, raw) => match n.checked_sub(1).and_then(|i| params.get(i)) {
                Some(Some(text)) => {
                    result.push('\'');
                    result.push_str(&text.replace('\'', "''"));
                    result.push('\'');
                }
                Some(None) => result.push_str("NULL"),
                None => result.push_str(raw),
            },
        }
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

#[derive(Clone)]
pub struct InnkeepFactory {
    handler: Arc<InnkeepHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<InnkeepAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl InnkeepFactory {
    pub fn new(engine: Arc<Engine>, password: String, admins: HashSet<UserId>) -> Self {
        let auth_source = InnkeepAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(InnkeepHandler::new(engine, Arc::new(admins))),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for InnkeepFactory {
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
    factory: InnkeepFactory,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::RoomUnavailable { .. } => "23P01",
        EngineError::InvalidRange { .. }
        | EngineError::PastDate { .. }
        | EngineError::RoomInactive(_)
        | EngineError::InvalidPrice(_)
        | EngineError::InvalidCapacity(_)
        | EngineError::LimitExceeded(_) => "23514",
        EngineError::NotFound(_) => "P0002",
        EngineError::Forbidden(_) => "42501",
        EngineError::AlreadyExists(_) | EngineError::DuplicateRoomNumber(_) => "23505",
        EngineError::RoomHasBookings(_) => "23503",
        EngineError::NotEditable(_) | EngineError::AlreadyCancelled(_) => "55000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_message(e: &EngineError) -> String {
    format!("{}: {e}", e.field())
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(sqlstate(&e), engine_message(&e))
}

fn sql_err(e: SqlError) -> PgWireError {
    let message = match e.field() {
        Some(field) => format!("{field}: {e}"),
        None => e.to_string(),
    };
    user_error("42601", message)
}
