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
    QueryResponse, Response,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::ItemShareAuthSource;
use crate::engine::{Engine, EngineError, Scope};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, SqlError};

pub struct ItemShareHandler {
    engine: Arc<Engine>,
    query_parser: Arc<ItemShareQueryParser>,
}

impl ItemShareHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(ItemShareQueryParser),
        }
    }

    /// Parse, execute and record metrics for one statement.
    async fn run(&self, sql: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result.map_err(engine_err)
    }

    async fn execute_command(&self, cmd: Command) -> Result<Response, EngineError> {
        let engine = &self.engine;
        match cmd {
            Command::InsertUser { name, email } => {
                let user = engine.create_user(name, email).await?;
                Ok(user_response(&user))
            }
            Command::InsertItem {
                owner_id,
                name,
                description,
                available,
            } => {
                let item = engine
                    .create_item(owner_id, name, description, available)
                    .await?;
                Ok(item_response(vec![bare_details(item)]))
            }
            Command::SetAvailability {
                item_id,
                user_id,
                available,
            } => {
                let item = engine
                    .set_item_available(user_id, item_id, available)
                    .await?;
                Ok(item_response(vec![bare_details(item)]))
            }
            Command::InsertBooking {
                booker_id,
                item_id,
                start,
                end,
            } => {
                let view = engine.create_booking(booker_id, item_id, start, end).await?;
                Ok(booking_response(vec![view]))
            }
            Command::DecideBooking {
                booking_id,
                user_id,
                approved,
            } => {
                let view = engine.decide_booking(user_id, booking_id, approved).await?;
                metrics::counter!(
                    observability::BOOKING_DECISIONS_TOTAL,
                    "status" => view.status.as_str()
                )
                .increment(1);
                Ok(booking_response(vec![view]))
            }
            Command::SelectBooking { id, user_id } => {
                let view = engine.get_booking(user_id, id).await?;
                Ok(booking_response(vec![view]))
            }
            Command::SelectBookings {
                scope,
                state,
                offset,
                limit,
            } => {
                let views = match scope {
                    Scope::Booker(renter_id) => {
                        engine
                            .list_bookings_for_renter(renter_id, &state, offset, limit)
                            .await?
                    }
                    Scope::Owner(owner_id) => {
                        engine
                            .list_bookings_for_owner(owner_id, &state, offset, limit)
                            .await?
                    }
                };
                Ok(booking_response(views))
            }
            Command::SelectItem { id, user_id } => {
                let details = engine.item_details(user_id, id).await?;
                Ok(item_response(vec![details]))
            }
            Command::SelectOwnerItems {
                owner_id,
                offset,
                limit,
            } => {
                let details = engine.items_for_owner(owner_id, offset, limit).await?;
                Ok(item_response(details))
            }
            Command::SearchItems {
                text,
                offset,
                limit,
            } => {
                let items = engine.search_items(&text, offset, limit).await?;
                Ok(item_response(items.into_iter().map(bare_details).collect()))
            }
        }
    }
}

// ── Result rows ──────────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

/// Ids are unsigned in the engine; Postgres has no unsigned 64-bit type.
fn pg_id(id: Id) -> i64 {
    id as i64
}

fn user_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::INT8),
        field("name", Type::VARCHAR),
        field("email", Type::VARCHAR),
    ]
}

fn item_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::INT8),
        field("owner_id", Type::INT8),
        field("name", Type::VARCHAR),
        field("description", Type::VARCHAR),
        field("available", Type::BOOL),
        field("last_booking_id", Type::INT8),
        field("last_booker_id", Type::INT8),
        field("next_booking_id", Type::INT8),
        field("next_booker_id", Type::INT8),
    ]
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::INT8),
        field("start", Type::INT8),
        field("end", Type::INT8),
        field("status", Type::VARCHAR),
        field("item_id", Type::INT8),
        field("item_name", Type::VARCHAR),
        field("owner_id", Type::INT8),
        field("booker_id", Type::INT8),
    ]
}

fn bare_details(item: Item) -> ItemDetails {
    ItemDetails {
        item,
        last_booking: None,
        next_booking: None,
    }
}

fn user_response(user: &User) -> Response {
    let schema = Arc::new(user_schema());
    let rows: Vec<PgWireResult<_>> = std::iter::once(user)
        .map(|u| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&pg_id(u.id))?;
            encoder.encode_field(&u.name)?;
            encoder.encode_field(&u.email)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn item_response(details: Vec<ItemDetails>) -> Response {
    let schema = Arc::new(item_schema());
    let rows: Vec<PgWireResult<_>> = details
        .into_iter()
        .map(|d| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&pg_id(d.item.id))?;
            encoder.encode_field(&pg_id(d.item.owner_id))?;
            encoder.encode_field(&d.item.name)?;
            encoder.encode_field(&d.item.description)?;
            encoder.encode_field(&d.item.available)?;
            encoder.encode_field(&d.last_booking.map(|b| pg_id(b.id)))?;
            encoder.encode_field(&d.last_booking.map(|b| pg_id(b.booker_id)))?;
            encoder.encode_field(&d.next_booking.map(|b| pg_id(b.id)))?;
            encoder.encode_field(&d.next_booking.map(|b| pg_id(b.booker_id)))?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn booking_response(views: Vec<BookingView>) -> Response {
    let schema = Arc::new(booking_schema());
    let rows: Vec<PgWireResult<_>> = views
        .into_iter()
        .map(|v| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&pg_id(v.id))?;
            encoder.encode_field(&v.start)?;
            encoder.encode_field(&v.end)?;
            encoder.encode_field(&v.status.to_string())?;
            encoder.encode_field(&pg_id(v.item.id))?;
            encoder.encode_field(&v.item.name)?;
            encoder.encode_field(&pg_id(v.item.owner_id))?;
            encoder.encode_field(&pg_id(v.booker.id))?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

/// The table a statement reads from or inserts into, lowercased.
fn target_table(sql: &str) -> Option<String> {
    let mut tokens = sql.split_whitespace();
    while let Some(token) = tokens.next() {
        if token.eq_ignore_ascii_case("FROM") || token.eq_ignore_ascii_case("INTO") {
            return tokens.next().map(|t| {
                t.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '_')
                    .to_lowercase()
            });
        }
    }
    None
}

/// Row shape a statement produces, for Describe.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    match target_table(sql).as_deref() {
        Some("users") => user_schema(),
        Some("items" | "availability") => item_schema(),
        Some("bookings" | "decisions") => booking_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for ItemShareHandler {
    async fn do_query<C>(&self, _client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
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
pub struct ItemShareQueryParser;

#[async_trait]
impl QueryParser for ItemShareQueryParser {
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
impl ExtendedQueryHandler for ItemShareHandler {
    type Statement = String;
    type QueryParser = ItemShareQueryParser;

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
        let sql = substitute_params(portal);
        self.run(&sql).await
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

/// Highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
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

/// Single pass over `sql`: each `$N` token is replaced once, and bound text is
/// never scanned again. Placeholders without a bound value are left as-is.
fn substitute(sql: &str, params: &[Option<String>]) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut rest = sql;
    while let Some(pos) = rest.find('$') {
        result.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let digits = after.bytes().take_while(u8::is_ascii_digit).count();
        let param = after[..digits]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| params.get(i));
        match param {
            Some(Some(text)) => {
                result.push('\'');
                result.push_str(&text.replace('\'', "''"));
                result.push('\'');
            }
            Some(None) => result.push_str("NULL"),
            None => result.push_str(&rest[pos..pos + 1 + digits]),
        }
        rest = &after[digits..];
    }
    result.push_str(rest);
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct ItemShareFactory {
    handler: Arc<ItemShareHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<ItemShareAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl ItemShareFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        let auth_source = ItemShareAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(ItemShareHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for ItemShareFactory {
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
    engine: Arc<Engine>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(ItemShareFactory::new(engine, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::NotFound(..) => "P0002",
        EngineError::Forbidden(_) => "42501",
        EngineError::InvalidInput(_) => "22023",
        EngineError::InvalidState(_) => "55000",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    if let EngineError::WalError(msg) = &e {
        tracing::error!("WAL failure: {msg}");
    }
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
