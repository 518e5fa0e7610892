use std::fmt::Debug;
use std::sync::Arc;

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
use ulid::Ulid;

use crate::auth::AgendaAuthSource;
use crate::engine::Engine;
use crate::model::TimeSpan;
use crate::observability;
use crate::sql::{self, Command};
use crate::tenant::TenantManager;
use crate::timegrid::from_minutes;

pub struct AgendaHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<AgendaQueryParser>,
}

impl AgendaHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(AgendaQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    /// Execute a parsed command, recording per-command RED metrics.
    async fn execute(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        let label = observability::command_label(&cmd);
        let start = std::time::Instant::now();
        let result = self.execute_command(engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertProfessional { id, name } => {
                engine.create_professional(id, name).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateProfessional { id, name } => {
                engine.rename_professional(id, name).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteProfessional { id } => {
                engine.delete_professional(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertWindow {
                id,
                professional_id,
                weekday,
                start,
                end,
            } => {
                engine
                    .add_window(id, professional_id, weekday, TimeSpan::new(start, end))
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteWindow { id } => {
                engine.remove_window(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertBreak {
                id,
                professional_id,
                start,
                end,
            } => {
                engine
                    .add_break(id, professional_id, TimeSpan::new(start, end))
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteBreak { id } => {
                engine.remove_break(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertDayOff {
                id,
                professional_id,
                day,
            } => {
                engine
                    .add_day_off(id, professional_id, day)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteDayOff { id } => {
                engine.remove_day_off(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertAppointment {
                id,
                professional_id,
                day,
                start,
                duration,
                customer,
            } => {
                engine
                    .book_appointment(id, professional_id, day, start, duration, customer)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateAppointmentStatus { id, status } => {
                engine
                    .set_appointment_status(id, status)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::SelectProfessionals => {
                let schema = Arc::new(professionals_schema());
                let rows: Vec<PgWireResult<_>> = engine
                    .list_professionals()
                    .await
                    .into_iter()
                    .map(|p| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&p.id.to_string())?;
                        encoder.encode_field(&p.name)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectWindows { professional_id } => {
                let schema = Arc::new(windows_schema());
                let pid = professional_id.to_string();
                let rows: Vec<PgWireResult<_>> = engine
                    .get_windows(professional_id)
                    .await
                    .into_iter()
                    .map(|w| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&w.id.to_string())?;
                        encoder.encode_field(&pid)?;
                        encoder.encode_field(&w.weekday.as_str())?;
                        encoder.encode_field(&from_minutes(w.span.start))?;
                        encoder.encode_field(&from_minutes(w.span.end))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectBreaks { professional_id } => {
                let schema = Arc::new(breaks_schema());
                let pid = professional_id.to_string();
                let rows: Vec<PgWireResult<_>> = engine
                    .get_breaks(professional_id)
                    .await
                    .into_iter()
                    .map(|b| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&b.id.to_string())?;
                        encoder.encode_field(&pid)?;
                        encoder.encode_field(&from_minutes(b.span.start))?;
                        encoder.encode_field(&from_minutes(b.span.end))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectDaysOff { professional_id } => {
                let schema = Arc::new(days_off_schema());
                let pid = professional_id.to_string();
                let rows: Vec<PgWireResult<_>> = engine
                    .get_days_off(professional_id)
                    .await
                    .into_iter()
                    .map(|d| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&d.id.to_string())?;
                        encoder.encode_field(&pid)?;
                        encoder.encode_field(&d.date.to_string())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectAppointments {
                professional_id,
                day,
            } => {
                let schema = Arc::new(appointments_schema());
                let pid = professional_id.to_string();
                let rows: Vec<PgWireResult<_>> = engine
                    .get_appointments(professional_id, day)
                    .await
                    .into_iter()
                    .map(|a| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&a.id.to_string())?;
                        encoder.encode_field(&pid)?;
                        encoder.encode_field(&a.date.to_string())?;
                        encoder.encode_field(&from_minutes(a.span.start))?;
                        encoder.encode_field(&from_minutes(a.span.end))?;
                        encoder.encode_field(&a.span.duration_min())?;
                        encoder.encode_field(&a.status.as_str())?;
                        encoder.encode_field(&a.customer)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectSlots {
                professional_id,
                day,
                duration,
            } => {
                let slots = engine
                    .available_slots(professional_id, day, duration)
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(slots_schema());
                let pid = professional_id.to_string();
                let day_str = day.to_string();
                let rows: Vec<PgWireResult<_>> = slots
                    .into_iter()
                    .map(|start| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&pid)?;
                        encoder.encode_field(&day_str)?;
                        encoder.encode_field(&from_minutes(start))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::Listen { channel } => {
                parse_channel(&channel)?;
                Ok(vec![Response::Execution(Tag::new("LISTEN"))])
            }
            Command::Unlisten { channel } => {
                parse_channel(&channel)?;
                Ok(vec![Response::Execution(Tag::new("UNLISTEN"))])
            }
            Command::UnlistenAll => Ok(vec![Response::Execution(Tag::new("UNLISTEN"))]),
        }
    }
}

fn parse_channel(channel: &str) -> PgWireResult<Ulid> {
    let id_str = channel.strip_prefix("professional_").ok_or_else(|| {
        PgWireError::UserError(Box::new(ErrorInfo::new(
            "ERROR".into(),
            "42000".into(),
            format!("invalid channel: {channel} (expected professional_{{id}})"),
        )))
    })?;
    Ulid::from_string(id_str).map_err(|e| {
        PgWireError::UserError(Box::new(ErrorInfo::new(
            "ERROR".into(),
            "42000".into(),
            format!("bad ULID in channel: {e}"),
        )))
    })
}

fn varchar(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn slots_schema() -> Vec<FieldInfo> {
    vec![
        varchar("professional_id"),
        varchar("day"),
        varchar("start_time"),
    ]
}

fn professionals_schema() -> Vec<FieldInfo> {
    vec![varchar("id"), varchar("name")]
}

fn windows_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("professional_id"),
        varchar("weekday"),
        varchar("start_time"),
        varchar("end_time"),
    ]
}

fn breaks_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("professional_id"),
        varchar("start_time"),
        varchar("end_time"),
    ]
}

fn days_off_schema() -> Vec<FieldInfo> {
    vec![varchar("id"), varchar("professional_id"), varchar("day")]
}

fn appointments_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("professional_id"),
        varchar("day"),
        varchar("start_time"),
        varchar("end_time"),
        FieldInfo::new("duration".into(), None, None, Type::INT8, FieldFormat::Text),
        varchar("status"),
        varchar("customer"),
    ]
}

/// Result schema for a SQL text, used by Describe before execution.
fn schema_for_statement(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if !upper.contains("SELECT") {
        return vec![];
    }
    if upper.contains("SLOTS") {
        slots_schema()
    } else if upper.contains("APPOINTMENTS") {
        appointments_schema()
    } else if upper.contains("WORK_WINDOWS") {
        windows_schema()
    } else if upper.contains("BREAKS") {
        breaks_schema()
    } else if upper.contains("DAYS_OFF") {
        days_off_schema()
    } else if upper.contains("PROFESSIONALS") {
        professionals_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for AgendaHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.execute(&engine, cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct AgendaQueryParser;

#[async_trait]
impl QueryParser for AgendaQueryParser {
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
        Ok(schema_for_statement(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for AgendaHandler {
    type Statement = String;
    type QueryParser = AgendaQueryParser;

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
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.execute(&engine, cmd).await?;
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
            schema_for_statement(&target.statement),
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
        Ok(DescribePortalResponse::new(schema_for_statement(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
                && n > max
            {
                max = n;
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    splice_params(&portal.statement.statement.to_string(), &portal.parameters)
}

/// Single left-to-right scan over the SQL text. Spliced values are never
/// rescanned, so a bound value containing `$1` stays literal.
fn splice_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let bytes = sql.as_bytes();
    let mut result = String::with_capacity(sql.len());
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'$' {
            let start = i + 1;
            let mut end = start;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
            if end > start
                && let Ok(n) = sql[start..end].parse::<usize>()
                && let Some(param) = n.checked_sub(1).and_then(|k| params.get(k))
            {
                result.push_str(&sql[copied..i]);
                match param {
                    Some(value) => {
                        let text = String::from_utf8_lossy(value.as_ref());
                        result.push('\'');
                        result.push_str(&text.replace('\'', "''"));
                        result.push('\'');
                    }
                    None => result.push_str("NULL"),
                }
                i = end;
                copied = end;
                continue;
            }
        }
        i += 1;
    }
    result.push_str(&sql[copied..]);
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct AgendaFactory {
    handler: Arc<AgendaHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<AgendaAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl AgendaFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = AgendaAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(AgendaHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for AgendaFactory {
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

/// Drive one client connection through the pgwire protocol state machine.
pub async fn process_connection(
    socket: tokio::net::TcpStream,
    factory: Arc<AgendaFactory>,
    tls: Option<pgwire::tokio::TlsAcceptor>,
) -> Result<(), std::io::Error> {
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: crate::engine::EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "P0001".into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
