use crate::{
    command::{Command, CommandKind, params_object},
    deferred::reject_deferred,
    mapping::{MultiRow, SetTuple, combine_joined},
    parameters::{self, BoundStatement},
    result::{ConduitError, Result},
    row::{Row, from_row, scalar_value},
    str_utils,
};
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::VecDeque;
use tokio_postgres::{Client, GenericClient, NoTls, Statement};
use tracing::{debug, warn};

// PostgreSQL type OIDs for the supported column types
const OID_BOOL: u32 = 16;
const OID_BYTEA: u32 = 17;
const OID_INT8: u32 = 20;
const OID_INT2: u32 = 21;
const OID_INT4: u32 = 23;
const OID_TEXT: u32 = 25;
const OID_JSON: u32 = 114;
const OID_FLOAT4: u32 = 700;
const OID_FLOAT8: u32 = 701;
const OID_BPCHAR: u32 = 1042;
const OID_VARCHAR: u32 = 1043;
const OID_JSONB: u32 = 3802;

/// Suspending execution facade backed by PostgreSQL.
///
/// The counterpart of [`crate::SqliteConduit`] with an identical operation
/// surface and identical resource contracts; the database round trips
/// suspend the caller instead of blocking a thread. Every operation
/// connects fresh; the connection task ends when the client drops.
#[derive(Debug, Clone)]
pub struct PostgresConduit {
    conn_str: String,
}

impl PostgresConduit {
    pub fn new(conn_str: impl Into<String>) -> Self {
        PostgresConduit {
            conn_str: conn_str.into(),
        }
    }

    async fn connect(&self) -> Result<Client> {
        let (client, connection) = tokio_postgres::connect(&self.conn_str, NoTls).await?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                warn!(error = %err, "connection task ended with error");
            }
        });
        Ok(client)
    }

    /// Run a non-query command and return the number of rows affected.
    pub async fn execute(&self, cmd: &Command) -> Result<u64> {
        let client = self.connect().await?;
        execute_command(&client, cmd).await
    }

    /// First column of the first row, or null when the query returns no rows.
    pub async fn query_scalar(&self, cmd: &Command) -> Result<Value> {
        let client = self.connect().await?;
        let rows = query_rows(&client, cmd).await?;
        Ok(scalar_value(rows))
    }

    /// Run a query and materialize each row into `T`.
    pub async fn query<T: DeserializeOwned>(&self, cmd: &Command) -> Result<Vec<T>> {
        let client = self.connect().await?;
        let rows = query_rows(&client, cmd).await?;
        rows.iter().map(from_row).collect()
    }

    /// Multi-mapping query across the shape tuple `S`; see
    /// [`crate::SqliteConduit::query_joined`].
    pub async fn query_joined<S, R, F>(
        &self,
        cmd: &Command,
        split_on: &[&str],
        combine: F,
    ) -> Result<Vec<R>>
    where
        S: MultiRow,
        F: FnMut(S) -> R,
    {
        let client = self.connect().await?;
        let rows = query_rows(&client, cmd).await?;
        combine_joined(rows, split_on, combine)
    }

    /// Run several statements on one connection and return one eagerly
    /// materialized result set per statement.
    pub async fn query_batch(&self, sqls: &[&str], params: &Value) -> Result<Vec<Vec<Row>>> {
        let client = self.connect().await?;
        let params = params_object(params)?;
        let mut sets = Vec::with_capacity(sqls.len());
        for sql in sqls {
            let bound = bind_postgres(sql, &params)?;
            sets.push(run_query(&client, &bound).await?);
        }
        Ok(sets)
    }

    /// Typed tuple form of [`PostgresConduit::query_batch`].
    pub async fn query_batch_as<S: SetTuple>(&self, sqls: &[&str], params: &Value) -> Result<S> {
        S::from_sets(self.query_batch(sqls, params).await?)
    }

    /// Un-materialized batch: the returned reader owns the client and yields
    /// one result set per call. Statements are prepared during setup; a
    /// setup failure drops the client before the error propagates.
    pub async fn query_batch_reader(
        &self,
        sqls: &[&str],
        params: &Value,
    ) -> Result<PostgresBatchReader> {
        let client = self.connect().await?;
        let params = params_object(params)?;
        let mut pending = VecDeque::with_capacity(sqls.len());
        for sql in sqls {
            let bound = bind_postgres(sql, &params)?;
            let statement = client.prepare(&bound.sql).await?;
            pending.push_back((statement, bound));
        }
        Ok(PostgresBatchReader { client, pending })
    }

    /// Execute an ordered transaction script as one atomic unit; same
    /// contract as [`crate::SqliteConduit::execute_transaction`].
    pub async fn execute_transaction(&self, scripts: &[Command]) -> Result<u64> {
        for cmd in scripts {
            if let Some(keyword) = str_utils::find_transaction_keyword(&cmd.sql) {
                return Err(ConduitError::ExplicitTransactionControl(keyword));
            }
        }

        let mut client = self.connect().await?;
        let tx = client.transaction().await?;
        let mut total = 0u64;
        for cmd in scripts {
            match execute_command(&tx, cmd).await {
                Ok(count) => total += count,
                Err(err) => {
                    warn!(error = %err, "transaction statement failed, rolling back");
                    if let Err(rollback_err) = tx.rollback().await {
                        warn!(error = %rollback_err, "rollback failed");
                    }
                    return Ok(0);
                }
            }
        }
        match tx.commit().await {
            Ok(()) => Ok(total),
            Err(err) => {
                warn!(error = %err, "commit failed, transaction rolled back");
                Ok(0)
            }
        }
    }

    /// Run a caller-supplied suspending operation inside one transaction.
    /// The [`PostgresTxn`] handle is valid only while the returned future
    /// runs; the executor awaits it before deciding commit or rollback, so
    /// the transactional work always completes before commit. Operations
    /// declaring a deferred result type are refused up front.
    pub async fn execute_transaction_with<T, F>(&self, op: F) -> Result<T>
    where
        T: Default,
        F: for<'t> FnOnce(PostgresTxn<'t>) -> BoxFuture<'t, Result<T>>,
    {
        reject_deferred::<T>()?;

        let client = self.connect().await?;
        client.batch_execute("BEGIN").await?;
        match op(PostgresTxn { client: &client }).await {
            Ok(value) => match client.batch_execute("COMMIT").await {
                Ok(()) => Ok(value),
                Err(err) => {
                    warn!(error = %err, "commit failed, returning default");
                    Ok(T::default())
                }
            },
            Err(err) => {
                warn!(error = %err, "transaction operation failed, rolling back");
                if let Err(rollback_err) = client.batch_execute("ROLLBACK").await {
                    warn!(error = %rollback_err, "rollback failed");
                }
                Ok(T::default())
            }
        }
    }
}

/// Capability-scoped handle to a live transaction, passed to the closure of
/// [`PostgresConduit::execute_transaction_with`].
#[derive(Clone, Copy)]
pub struct PostgresTxn<'a> {
    client: &'a Client,
}

impl PostgresTxn<'_> {
    pub async fn execute(&self, cmd: &Command) -> Result<u64> {
        execute_command(self.client, cmd).await
    }

    pub async fn query<T: DeserializeOwned>(&self, cmd: &Command) -> Result<Vec<T>> {
        let rows = query_rows(self.client, cmd).await?;
        rows.iter().map(from_row).collect()
    }

    pub async fn query_scalar(&self, cmd: &Command) -> Result<Value> {
        Ok(scalar_value(query_rows(self.client, cmd).await?))
    }
}

/// Forward-only reader over the result sets of a multi-statement batch.
/// Owns its client; dropping the reader releases the connection whether or
/// not every set was consumed.
pub struct PostgresBatchReader {
    client: Client,
    pending: VecDeque<(Statement, BoundStatement)>,
}

impl PostgresBatchReader {
    /// Next result set, or `None` once every statement has run.
    pub async fn next_set(&mut self) -> Result<Option<Vec<Row>>> {
        let Some((statement, bound)) = self.pending.pop_front() else {
            return Ok(None);
        };
        let owned = to_sql_values(&bound);
        let refs: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> =
            owned.iter().map(|value| value.as_ref() as &(dyn tokio_postgres::types::ToSql + Sync)).collect();
        let pg_rows = self.client.query(&statement, &refs).await?;
        Ok(Some(rows_from_postgres(&pg_rows)?))
    }

    /// Typed form of [`PostgresBatchReader::next_set`].
    pub async fn next_set_as<T: DeserializeOwned>(&mut self) -> Result<Option<Vec<T>>> {
        match self.next_set().await? {
            Some(rows) => Ok(Some(rows.iter().map(from_row).collect::<Result<Vec<T>>>()?)),
            None => Ok(None),
        }
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

fn bind_postgres(sql: &str, params: &serde_json::Map<String, Value>) -> Result<BoundStatement> {
    parameters::bind_statement(sql, params, |idx, _| format!("${idx}"))
}

/// Render a stored procedure invocation. Parameters bind in map (name
/// sorted) order; the name must be a plain identifier path.
fn render_procedure(cmd: &Command, as_query: bool) -> Result<BoundStatement> {
    let name = cmd.sql.trim();
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '.')
    {
        return Err(ConduitError::new_type_mismatch(
            "procedure name (alphanumeric, underscores, dots)",
            name.to_string(),
        ));
    }

    let mut values = Vec::with_capacity(cmd.params.len());
    for (param_name, value) in &cmd.params {
        values.push((param_name.clone(), parameters::ParamValue::from_json(value)?));
    }
    let args = (1..=values.len())
        .map(|idx| format!("${idx}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = if as_query {
        format!("SELECT * FROM {name}({args})")
    } else {
        format!("CALL {name}({args})")
    };
    Ok(BoundStatement { sql, values })
}

fn to_sql_values(bound: &BoundStatement) -> Vec<Box<dyn tokio_postgres::types::ToSql + Sync + Send>> {
    bound
        .values
        .iter()
        .map(|(_, value)| parameters::to_postgres_sql(value.clone()))
        .collect()
}

async fn run_execute<C: GenericClient>(client: &C, bound: &BoundStatement) -> Result<u64> {
    let owned = to_sql_values(bound);
    let refs: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> =
        owned.iter().map(|value| value.as_ref() as &(dyn tokio_postgres::types::ToSql + Sync)).collect();
    Ok(client.execute(bound.sql.as_str(), &refs).await?)
}

async fn execute_command<C: GenericClient>(client: &C, cmd: &Command) -> Result<u64> {
    debug!(sql = %cmd.sql, "executing command");
    if cmd.kind == CommandKind::Procedure {
        let bound = render_procedure(cmd, false)?;
        return run_execute(client, &bound).await;
    }

    let mut affected = 0u64;
    for statement_sql in str_utils::split_sql_statements(&cmd.sql) {
        let bound = bind_postgres(&statement_sql, &cmd.params)?;
        affected += run_execute(client, &bound).await?;
    }
    Ok(affected)
}

async fn query_rows<C: GenericClient>(client: &C, cmd: &Command) -> Result<Vec<Row>> {
    debug!(sql = %cmd.sql, "running query");
    let bound = match cmd.kind {
        CommandKind::Procedure => render_procedure(cmd, true)?,
        CommandKind::Text => bind_postgres(&cmd.sql, &cmd.params)?,
    };
    run_query(client, &bound).await
}

async fn run_query<C: GenericClient>(client: &C, bound: &BoundStatement) -> Result<Vec<Row>> {
    let owned = to_sql_values(bound);
    let refs: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> =
        owned.iter().map(|value| value.as_ref() as &(dyn tokio_postgres::types::ToSql + Sync)).collect();
    let pg_rows = client.query(bound.sql.as_str(), &refs).await?;
    rows_from_postgres(&pg_rows)
}

fn rows_from_postgres(pg_rows: &[tokio_postgres::Row]) -> Result<Vec<Row>> {
    let mut out = Vec::with_capacity(pg_rows.len());
    for pg_row in pg_rows {
        let columns: Vec<String> = pg_row
            .columns()
            .iter()
            .map(|column| column.name().to_string())
            .collect();
        let mut values = Vec::with_capacity(columns.len());
        for (idx, column) in pg_row.columns().iter().enumerate() {
            values.push(cell_to_json(column.type_(), pg_row, idx)?);
        }
        out.push(Row::new(columns, values));
    }
    Ok(out)
}

/// Convert one PostgreSQL column value to JSON, OID-keyed for stability.
fn cell_to_json(
    column_type: &tokio_postgres::types::Type,
    row: &tokio_postgres::Row,
    idx: usize,
) -> Result<Value> {
    let oid = column_type.oid();
    let value = match oid {
        OID_BOOL => row
            .try_get::<_, Option<bool>>(idx)?
            .map(Value::Bool)
            .unwrap_or(Value::Null),
        OID_INT2 => number_or_null(row.try_get::<_, Option<i16>>(idx)?.map(i64::from)),
        OID_INT4 => number_or_null(row.try_get::<_, Option<i32>>(idx)?.map(i64::from)),
        OID_INT8 => number_or_null(row.try_get::<_, Option<i64>>(idx)?),
        OID_FLOAT4 => float_or_null(row.try_get::<_, Option<f32>>(idx)?.map(f64::from)),
        OID_FLOAT8 => float_or_null(row.try_get::<_, Option<f64>>(idx)?),
        OID_TEXT | OID_VARCHAR | OID_BPCHAR => row
            .try_get::<_, Option<String>>(idx)?
            .map(Value::String)
            .unwrap_or(Value::Null),
        OID_BYTEA => row
            .try_get::<_, Option<Vec<u8>>>(idx)?
            .map(|bytes| Value::Array(bytes.iter().map(|&byte| Value::Number(byte.into())).collect()))
            .unwrap_or(Value::Null),
        OID_JSON | OID_JSONB => row
            .try_get::<_, Option<Value>>(idx)?
            .unwrap_or(Value::Null),
        // Fall back to a marker string for unsupported types
        _ => Value::String(format!("unsupported postgres type oid {oid}")),
    };
    Ok(value)
}

fn number_or_null(value: Option<i64>) -> Value {
    value.map(|int_val| Value::Number(int_val.into())).unwrap_or(Value::Null)
}

fn float_or_null(value: Option<f64>) -> Value {
    value.map(Value::from).unwrap_or(Value::Null)
}
