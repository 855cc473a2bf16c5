//! Query executor: the single chokepoint for every SQL round trip.
//!
//! Stage code never touches a connection pool directly. It builds a
//! [`QueryRequest`] naming the engine ([`Vendor`]), the SQL text, bound
//! parameters and the calling site, and gets back a [`QueryResult`] with the
//! same shape whichever engine ran it.
//!
//! Two flags on the request control failure and connection handling:
//!
//! - `process_exit_on_error`: a failure is logged and the process exits with
//!   the error's exit code. Used for checks the run cannot recover from; the
//!   ledger existence check at boot is the one built-in caller.
//! - `should_return_client`: the pooled connection is handed back inside the
//!   result so the caller can run a follow-up sequence on the same session.

mod db;
mod tls;

pub use db::DbExecutor;
pub use tls::SslMode;

use async_trait::async_trait;
use sqlx::mysql::MySql;
use sqlx::pool::PoolConnection;
use std::fmt;

use crate::error::{MigrateError, Result};

/// Database engine a request is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Vendor {
    /// MySQL source.
    Source,
    /// PostgreSQL target.
    Target,
}

impl Vendor {
    /// Engine name used in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Vendor::Source => "MySQL",
            Vendor::Target => "PostgreSQL",
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Vendor-neutral scalar used for parameters and result cells.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    /// Bound as BIGINT on PostgreSQL.
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view; text cells from the simple query protocol are parsed.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Boolean view; accepts PostgreSQL text forms (`t`/`f`) and MySQL 0/1.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            Value::Text(s) => match s.as_str() {
                "t" | "true" | "TRUE" | "1" | "YES" | "yes" => Some(true),
                "f" | "false" | "FALSE" | "0" | "NO" | "no" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value::Text(s.clone())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// One result row. Column lookup by name is case-insensitive because
/// MySQL's `information_schema` reports upper-case names.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn value(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .and_then(|idx| self.values.get(idx))
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_i64)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }
}

/// Description of one SQL execution.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub vendor: Vendor,
    pub sql: String,
    pub params: Vec<Value>,
    /// Originating call site, reported in diagnostics.
    pub caller: String,
    pub process_exit_on_error: bool,
    pub should_return_client: bool,
}

impl QueryRequest {
    pub fn new(caller: impl Into<String>, vendor: Vendor, sql: impl Into<String>) -> Self {
        Self {
            vendor,
            sql: sql.into(),
            params: Vec::new(),
            caller: caller.into(),
            process_exit_on_error: false,
            should_return_client: false,
        }
    }

    /// Request against the MySQL source.
    pub fn source(caller: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::new(caller, Vendor::Source, sql)
    }

    /// Request against the PostgreSQL target.
    pub fn target(caller: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::new(caller, Vendor::Target, sql)
    }

    /// Bind the next positional parameter (`?` on MySQL, `$n` on PostgreSQL).
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    /// Terminate the process if this request fails.
    pub fn exit_on_error(mut self) -> Self {
        self.process_exit_on_error = true;
        self
    }

    /// Keep the connection checked out and return it with the result.
    pub fn return_client(mut self) -> Self {
        self.should_return_client = true;
        self
    }
}

/// A pooled connection handed back to the caller by a `return_client` request.
///
/// Dropping the handle (or passing it to [`QueryExecutor::release`]) returns
/// the connection to its pool.
pub enum ClientHandle {
    Source(PoolConnection<MySql>),
    Target(deadpool_postgres::Object),
}

impl ClientHandle {
    pub fn vendor(&self) -> Vendor {
        match self {
            ClientHandle::Source(_) => Vendor::Source,
            ClientHandle::Target(_) => Vendor::Target,
        }
    }

    /// Run one or more `;`-separated statements on this connection.
    ///
    /// Only target connections take batches; a source handle is an error.
    pub async fn batch_execute(&mut self, sql: &str) -> Result<()> {
        match self {
            ClientHandle::Target(client) => {
                client.batch_execute(sql).await?;
                Ok(())
            }
            ClientHandle::Source(_) => Err(MigrateError::pool(
                "statement batches need a PostgreSQL connection",
                "ClientHandle::batch_execute",
            )),
        }
    }

    /// The PostgreSQL client, for protocol features such as COPY.
    pub fn target_client(&self) -> Option<&tokio_postgres::Client> {
        match self {
            ClientHandle::Target(object) => {
                let client: &tokio_postgres::Client = object;
                Some(client)
            }
            ClientHandle::Source(_) => None,
        }
    }
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientHandle({})", self.vendor())
    }
}

/// Outcome of one request: rows, an error, and the connection when asked for.
#[derive(Debug, Default)]
pub struct QueryResult {
    pub rows: Vec<Row>,
    pub error: Option<MigrateError>,
    pub client: Option<ClientHandle>,
}

impl QueryResult {
    pub fn ok(rows: Vec<Row>) -> Self {
        Self {
            rows,
            error: None,
            client: None,
        }
    }

    pub fn failed(error: MigrateError) -> Self {
        Self {
            rows: Vec::new(),
            error: Some(error),
            client: None,
        }
    }

    pub fn with_client(mut self, client: Option<ClientHandle>) -> Self {
        self.client = client;
        self
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Rows, or the error. A returned client is released.
    pub fn into_rows(self) -> Result<Vec<Row>> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.rows),
        }
    }

    /// The returned client, or the error.
    pub fn into_client(self) -> Result<ClientHandle> {
        if let Some(e) = self.error {
            return Err(e);
        }
        self.client
            .ok_or_else(|| MigrateError::pool("no connection returned", "into_client"))
    }
}

/// Executes SQL against either engine.
///
/// Implementations must be safe to share between concurrently running
/// per-table units of work.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Execute one request. Never fails at the type level; errors are carried
    /// in the result unless `process_exit_on_error` terminated the process.
    async fn execute(&self, request: QueryRequest) -> QueryResult;

    /// Return a connection obtained with `return_client` to its pool.
    fn release(&self, client: ClientHandle) {
        drop(client);
    }

    /// Execute and convert the result into rows or an error.
    async fn query(&self, request: QueryRequest) -> Result<Vec<Row>> {
        self.execute(request).await.into_rows()
    }
}
