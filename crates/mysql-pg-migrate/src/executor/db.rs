//! Pooled executor over a MySQL source (sqlx) and a PostgreSQL target
//! (deadpool-postgres).

use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use sqlx::mysql::{MySql, MySqlArguments, MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column as _, Row as _};
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Config as PgConfig, SimpleQueryMessage};
use tracing::{debug, error, info};

use super::tls::{self, SslMode};
use super::{ClientHandle, QueryExecutor, QueryRequest, QueryResult, Row, Value, Vendor};
use crate::config::Config;
use crate::error::{MigrateError, Result};

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

type PgParam = Box<dyn ToSql + Sync + Send>;

/// Executor backed by one connection pool per engine.
///
/// Both pools are created lazily; no connection is opened until the first
/// request.
pub struct DbExecutor {
    mysql: MySqlPool,
    pg: Pool,
}

impl DbExecutor {
    /// Build both pools from configuration.
    pub fn new(config: &Config) -> Result<Self> {
        let max_conns = config.migration.max_connections;

        let options = MySqlConnectOptions::new()
            .host(&config.source.host)
            .port(config.source.port)
            .database(&config.source.database)
            .username(&config.source.user)
            .password(&config.source.password)
            .charset("utf8mb4");

        let mysql = MySqlPoolOptions::new()
            .max_connections(max_conns as u32)
            .acquire_timeout(POOL_CONNECTION_TIMEOUT)
            .connect_lazy_with(options);

        let mut pg_config = PgConfig::new();
        pg_config.host(&config.target.host);
        pg_config.port(config.target.port);
        pg_config.dbname(&config.target.database);
        pg_config.user(&config.target.user);
        pg_config.password(&config.target.password);
        pg_config.application_name("mysql-pg-migrate");

        // Connection options for reliability
        pg_config.keepalives(true);
        pg_config.keepalives_idle(Duration::from_secs(30));
        pg_config.connect_timeout(POOL_CONNECTION_TIMEOUT);

        let ssl_mode = SslMode::parse(&config.target.ssl_mode)?;
        pg_config.ssl_mode(ssl_mode.as_pg());

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let mgr = match tls::connector(ssl_mode)? {
            Some(tls_connector) => Manager::from_config(pg_config, tls_connector, mgr_config),
            None => Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config),
        };
        let pg = Pool::builder(mgr)
            .max_size(max_conns)
            .build()
            .map_err(|e| MigrateError::pool(e, "creating PostgreSQL target pool"))?;

        info!(
            "Configured pools: MySQL {}:{}/{}, PostgreSQL {}:{}/{} (max {} connections each)",
            config.source.host,
            config.source.port,
            config.source.database,
            config.target.host,
            config.target.port,
            config.target.database,
            max_conns
        );

        Ok(Self { mysql, pg })
    }

    async fn execute_source(
        &self,
        request: &QueryRequest,
    ) -> Result<(Vec<Row>, Option<ClientHandle>)> {
        let mut conn = self
            .mysql
            .acquire()
            .await
            .map_err(|e| MigrateError::pool(e, "acquiring MySQL source connection"))?;

        let mut query = sqlx::query(&request.sql);
        for param in &request.params {
            query = bind_mysql(query, param);
        }
        let rows: Vec<Row> = query
            .fetch_all(&mut *conn)
            .await?
            .iter()
            .map(mysql_row)
            .collect();

        let client = request
            .should_return_client
            .then(|| ClientHandle::Source(conn));
        Ok((rows, client))
    }

    async fn execute_target(
        &self,
        request: &QueryRequest,
    ) -> Result<(Vec<Row>, Option<ClientHandle>)> {
        let client = self
            .pg
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "acquiring PostgreSQL target connection"))?;

        // Unparameterized statements go through the simple protocol so that
        // multi-statement text and utility commands (VACUUM) are accepted.
        let rows = if request.params.is_empty() {
            simple_rows(client.simple_query(&request.sql).await?)
        } else {
            let params: Vec<PgParam> = request.params.iter().map(pg_param).collect();
            let refs: Vec<&(dyn ToSql + Sync)> = params
                .iter()
                .map(|p| p.as_ref() as &(dyn ToSql + Sync))
                .collect();
            client
                .query(request.sql.as_str(), &refs)
                .await?
                .iter()
                .map(pg_row)
                .collect()
        };

        let client = request
            .should_return_client
            .then(|| ClientHandle::Target(client));
        Ok((rows, client))
    }
}

#[async_trait]
impl QueryExecutor for DbExecutor {
    async fn execute(&self, request: QueryRequest) -> QueryResult {
        debug!(
            caller = %request.caller,
            vendor = %request.vendor,
            "executing: {}",
            request.sql
        );

        let outcome = match request.vendor {
            Vendor::Source => self.execute_source(&request).await,
            Vendor::Target => self.execute_target(&request).await,
        };

        match outcome {
            Ok((rows, client)) => QueryResult::ok(rows).with_client(client),
            Err(e) => {
                let err = MigrateError::Query {
                    vendor: request.vendor.to_string(),
                    caller: request.caller.clone(),
                    message: e.to_string(),
                };
                if request.process_exit_on_error {
                    terminate(&request, &err);
                }
                debug!(caller = %request.caller, "query failed: {}", err);
                QueryResult::failed(err)
            }
        }
    }
}

/// Log a fatal query failure and end the process.
fn terminate(request: &QueryRequest, err: &MigrateError) -> ! {
    error!(
        caller = %request.caller,
        vendor = %request.vendor,
        sql = %request.sql,
        "{}",
        err
    );
    eprintln!("{}", err.format_detailed());
    std::process::exit(i32::from(err.exit_code()))
}

fn bind_mysql<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &Value,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Int(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        Value::Text(s) => query.bind(s.clone()),
    }
}

fn mysql_row(row: &MySqlRow) -> Row {
    let columns = row
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    let values = (0..row.len()).map(|idx| mysql_value(row, idx)).collect();
    Row::new(columns, values)
}

/// Decode one MySQL cell, trying the widest compatible Rust type first.
fn mysql_value(row: &MySqlRow, idx: usize) -> Value {
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v.map_or(Value::Null, Value::Int);
    }
    if let Ok(v) = row.try_get::<Option<u64>, _>(idx) {
        return v.map_or(Value::Null, |u| match i64::try_from(u) {
            Ok(i) => Value::Int(i),
            Err(_) => Value::Text(u.to_string()),
        });
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return v.map_or(Value::Null, Value::Float);
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
        return v.map_or(Value::Null, Value::Bool);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return v.map_or(Value::Null, Value::Text);
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
        return v.map_or(Value::Null, |bytes| {
            Value::Text(String::from_utf8_lossy(&bytes).into_owned())
        });
    }
    Value::Null
}

fn pg_param(value: &Value) -> PgParam {
    match value {
        Value::Null => Box::new(None::<String>),
        Value::Bool(b) => Box::new(*b),
        Value::Int(i) => Box::new(*i),
        Value::Float(f) => Box::new(*f),
        Value::Text(s) => Box::new(s.clone()),
    }
}

fn simple_rows(messages: Vec<SimpleQueryMessage>) -> Vec<Row> {
    messages
        .into_iter()
        .filter_map(|message| match message {
            SimpleQueryMessage::Row(row) => {
                let columns = row
                    .columns()
                    .iter()
                    .map(|c| c.name().to_string())
                    .collect();
                let values = (0..row.len())
                    .map(|idx| {
                        row.get(idx)
                            .map_or(Value::Null, |text| Value::Text(text.to_string()))
                    })
                    .collect();
                Some(Row::new(columns, values))
            }
            _ => None,
        })
        .collect()
}

fn pg_row(row: &tokio_postgres::Row) -> Row {
    let columns = row
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    let values = row
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| pg_value(row, idx, column.type_()))
        .collect();
    Row::new(columns, values)
}

fn pg_value(row: &tokio_postgres::Row, idx: usize, ty: &Type) -> Value {
    let decoded = if *ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(idx)
            .map(|v| v.map(Value::Bool))
    } else if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(idx)
            .map(|v| v.map(|i| Value::Int(i64::from(i))))
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(idx)
            .map(|v| v.map(|i| Value::Int(i64::from(i))))
    } else if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(idx).map(|v| v.map(Value::Int))
    } else if *ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(idx)
            .map(|v| v.map(|f| Value::Float(f64::from(f))))
    } else if *ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(idx).map(|v| v.map(Value::Float))
    } else {
        row.try_get::<_, Option<String>>(idx).map(|v| v.map(Value::Text))
    };
    decoded.ok().flatten().unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config::from_yaml(
            r#"
source:
  host: 127.0.0.1
  database: shop
  user: root
target:
  host: 127.0.0.1
  database: warehouse
  user: postgres
  ssl_mode: disable
"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_pools_are_lazy() {
        // No server is listening; construction must still succeed.
        assert!(DbExecutor::new(&config()).is_ok());
    }

    #[test]
    fn test_simple_rows_skip_command_complete() {
        let rows = simple_rows(vec![SimpleQueryMessage::CommandComplete(0)]);
        assert!(rows.is_empty());
    }
}
