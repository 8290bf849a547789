use crate::{
    command::{Command, CommandKind, params_object},
    deferred::reject_deferred,
    mapping::{MultiRow, SetTuple, combine_joined},
    parameters::{self, BoundStatement},
    result::{ConduitError, Result},
    row::{Row, from_row, scalar_value},
    str_utils,
};
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Blocking execution facade backed by SQLite.
///
/// Holds only the connection string (a database path). Every operation opens
/// a fresh connection and drops it, closing it, on every exit path before
/// the operation returns. The one exception is
/// [`SqliteConduit::query_batch_reader`], which transfers connection
/// ownership to the returned reader.
#[derive(Debug, Clone)]
pub struct SqliteConduit {
    conn_str: String,
}

impl SqliteConduit {
    pub fn new(conn_str: impl Into<String>) -> Self {
        SqliteConduit {
            conn_str: conn_str.into(),
        }
    }

    fn connect(&self) -> Result<Connection> {
        Ok(Connection::open(&self.conn_str)?)
    }

    /// Run a non-query command and return the number of rows affected.
    /// Multi-statement command text is split quote-aware and executed
    /// statement by statement on the one connection, counts summed.
    pub fn execute(&self, cmd: &Command) -> Result<u64> {
        let conn = self.connect()?;
        execute_command(&conn, cmd)
    }

    /// First column of the first row, or null when the query returns no rows.
    pub fn query_scalar(&self, cmd: &Command) -> Result<Value> {
        let conn = self.connect()?;
        let rows = query_rows(&conn, cmd)?;
        Ok(scalar_value(rows))
    }

    /// Run a query and materialize each row into `T`.
    pub fn query<T: DeserializeOwned>(&self, cmd: &Command) -> Result<Vec<T>> {
        let conn = self.connect()?;
        let rows = query_rows(&conn, cmd)?;
        rows.iter().map(from_row).collect()
    }

    /// Multi-mapping query: each joined row is split into the tuple of
    /// shapes `S` at the `split_on` boundary columns and fed through
    /// `combine` to produce one result per row.
    pub fn query_joined<S, R, F>(&self, cmd: &Command, split_on: &[&str], combine: F) -> Result<Vec<R>>
    where
        S: MultiRow,
        F: FnMut(S) -> R,
    {
        let conn = self.connect()?;
        let rows = query_rows(&conn, cmd)?;
        combine_joined(rows, split_on, combine)
    }

    /// Run several statements on one connection and return one eagerly
    /// materialized result set per statement. `params` (a JSON object or
    /// null) is shared by all statements.
    pub fn query_batch(&self, sqls: &[&str], params: &Value) -> Result<Vec<Vec<Row>>> {
        let conn = self.connect()?;
        let params = params_object(params)?;
        let mut sets = Vec::with_capacity(sqls.len());
        for sql in sqls {
            let bound = bind_sqlite(sql, &params)?;
            sets.push(run_query(&conn, &bound)?);
        }
        Ok(sets)
    }

    /// Typed tuple form of [`SqliteConduit::query_batch`]: one `Vec` per
    /// statement, arity checked against the statement count.
    pub fn query_batch_as<S: SetTuple>(&self, sqls: &[&str], params: &Value) -> Result<S> {
        S::from_sets(self.query_batch(sqls, params)?)
    }

    /// Un-materialized batch: returns a reader that owns the connection and
    /// yields one result set per call. Every statement is prepared up front;
    /// a setup failure closes the connection before the error propagates.
    /// After a successful return the caller owns the connection through the
    /// reader and releases it by dropping the reader.
    pub fn query_batch_reader(&self, sqls: &[&str], params: &Value) -> Result<SqliteBatchReader> {
        let conn = self.connect()?;
        let params = params_object(params)?;
        let mut pending = VecDeque::with_capacity(sqls.len());
        for sql in sqls {
            let bound = bind_sqlite(sql, &params)?;
            let _ = conn.prepare(&bound.sql)?;
            pending.push_back(bound);
        }
        Ok(SqliteBatchReader { conn, pending })
    }

    /// Execute an ordered transaction script as one atomic unit: one
    /// connection, one transaction, summed affected rows on commit. A
    /// statement failure rolls the transaction back and the call reports
    /// the zero sentinel instead of the error. Setup failures and scripts
    /// carrying their own transaction control propagate as errors before
    /// any statement runs.
    pub fn execute_transaction(&self, scripts: &[Command]) -> Result<u64> {
        for cmd in scripts {
            if let Some(keyword) = str_utils::find_transaction_keyword(&cmd.sql) {
                return Err(ConduitError::ExplicitTransactionControl(keyword));
            }
        }

        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let mut total = 0u64;
        for cmd in scripts {
            match execute_command(&tx, cmd) {
                Ok(count) => total += count,
                Err(err) => {
                    warn!(error = %err, "transaction statement failed, rolling back");
                    if let Err(rollback_err) = tx.rollback() {
                        warn!(error = %rollback_err, "rollback failed");
                    }
                    return Ok(0);
                }
            }
        }
        match tx.commit() {
            Ok(()) => Ok(total),
            Err(err) => {
                warn!(error = %err, "commit failed, transaction rolled back");
                Ok(0)
            }
        }
    }

    /// Run a caller-supplied operation inside one transaction. The
    /// [`SqliteTxn`] handle is valid only for the duration of the call.
    /// Commit on `Ok`; on operation failure the transaction rolls back and
    /// the call reports `T::default()`. Operations declaring a deferred
    /// result (futures, join handles) are refused before a connection is
    /// provisioned.
    pub fn execute_transaction_with<T, F>(&self, op: F) -> Result<T>
    where
        T: Default,
        F: FnOnce(&SqliteTxn<'_>) -> Result<T>,
    {
        reject_deferred::<T>()?;

        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let outcome = op(&SqliteTxn { conn: &*tx });
        match outcome {
            Ok(value) => match tx.commit() {
                Ok(()) => Ok(value),
                Err(err) => {
                    warn!(error = %err, "commit failed, returning default");
                    Ok(T::default())
                }
            },
            Err(err) => {
                warn!(error = %err, "transaction operation failed, rolling back");
                if let Err(rollback_err) = tx.rollback() {
                    warn!(error = %rollback_err, "rollback failed");
                }
                Ok(T::default())
            }
        }
    }
}

/// Capability-scoped handle to a live transaction, passed to the closure of
/// [`SqliteConduit::execute_transaction_with`]. Commands issued through it
/// share the transaction's connection and commit or roll back as a unit.
pub struct SqliteTxn<'a> {
    conn: &'a Connection,
}

impl SqliteTxn<'_> {
    pub fn execute(&self, cmd: &Command) -> Result<u64> {
        execute_command(self.conn, cmd)
    }

    pub fn query<T: DeserializeOwned>(&self, cmd: &Command) -> Result<Vec<T>> {
        let rows = query_rows(self.conn, cmd)?;
        rows.iter().map(from_row).collect()
    }

    pub fn query_scalar(&self, cmd: &Command) -> Result<Value> {
        Ok(scalar_value(query_rows(self.conn, cmd)?))
    }
}

/// Forward-only reader over the result sets of a multi-statement batch.
/// Owns its connection; dropping the reader closes it whether or not every
/// set was consumed.
pub struct SqliteBatchReader {
    conn: Connection,
    pending: VecDeque<BoundStatement>,
}

impl SqliteBatchReader {
    /// Next result set, or `None` once every statement has run.
    pub fn next_set(&mut self) -> Result<Option<Vec<Row>>> {
        let Some(bound) = self.pending.pop_front() else {
            return Ok(None);
        };
        run_query(&self.conn, &bound).map(Some)
    }

    /// Typed form of [`SqliteBatchReader::next_set`].
    pub fn next_set_as<T: DeserializeOwned>(&mut self) -> Result<Option<Vec<T>>> {
        match self.next_set()? {
            Some(rows) => Ok(Some(rows.iter().map(from_row).collect::<Result<Vec<T>>>()?)),
            None => Ok(None),
        }
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

fn bind_sqlite(sql: &str, params: &serde_json::Map<String, Value>) -> Result<BoundStatement> {
    parameters::bind_statement(sql, params, |_, name| format!(":{name}"))
}

fn to_named_params(bound: &BoundStatement) -> Vec<(String, Box<dyn rusqlite::ToSql>)> {
    bound
        .values
        .iter()
        .map(|(name, value)| (format!(":{name}"), value.clone().into()))
        .collect()
}

fn execute_command(conn: &Connection, cmd: &Command) -> Result<u64> {
    if cmd.kind == CommandKind::Procedure {
        return Err(ConduitError::ProcedureNotSupported(cmd.sql.clone()));
    }
    debug!(sql = %cmd.sql, "executing command");

    let mut affected = 0u64;
    for statement_sql in str_utils::split_sql_statements(&cmd.sql) {
        let bound = bind_sqlite(&statement_sql, &cmd.params)?;
        let owned = to_named_params(&bound);
        let named: Vec<(&str, &dyn rusqlite::ToSql)> = owned
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_ref()))
            .collect();
        let mut stmt = conn.prepare(&bound.sql)?;
        affected += stmt.execute(&named[..])? as u64;
    }
    Ok(affected)
}

fn query_rows(conn: &Connection, cmd: &Command) -> Result<Vec<Row>> {
    if cmd.kind == CommandKind::Procedure {
        return Err(ConduitError::ProcedureNotSupported(cmd.sql.clone()));
    }
    debug!(sql = %cmd.sql, "running query");

    let bound = bind_sqlite(&cmd.sql, &cmd.params)?;
    run_query(conn, &bound)
}

fn run_query(conn: &Connection, bound: &BoundStatement) -> Result<Vec<Row>> {
    let owned = to_named_params(bound);
    let named: Vec<(&str, &dyn rusqlite::ToSql)> = owned
        .iter()
        .map(|(name, value)| (name.as_str(), value.as_ref()))
        .collect();

    let mut stmt = conn.prepare(&bound.sql)?;
    let columns: Vec<String> = stmt
        .column_names()
        .iter()
        .map(|name| name.to_string())
        .collect();

    let mut rows = stmt.query(&named[..])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(columns.len());
        for idx in 0..columns.len() {
            values.push(cell_to_json(row.get_ref(idx)?));
        }
        out.push(Row::new(columns.clone(), values));
    }
    Ok(out)
}

fn cell_to_json(cell: rusqlite::types::ValueRef<'_>) -> Value {
    match cell {
        rusqlite::types::ValueRef::Null => Value::Null,
        rusqlite::types::ValueRef::Integer(i) => Value::Number(i.into()),
        rusqlite::types::ValueRef::Real(r) => Value::from(r),
        rusqlite::types::ValueRef::Text(s) => {
            Value::String(String::from_utf8_lossy(s).to_string())
        }
        rusqlite::types::ValueRef::Blob(b) => {
            Value::Array(b.iter().map(|&byte| Value::Number(byte.into())).collect())
        }
    }
}
