//! Prepared statements handed out by a [`BatchConnection`](super::BatchConnection).
//!
//! A deferred statement never touches the driver on `execute_update`: it
//! records its parameter commands and queues them under its SQL text, to be
//! replayed when the batch is flushed.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::connection::{BatchState, Connection};
use super::error::{BatchError, BatchResult};
use super::statement::DmlStatement;

// ==================== Parameters ====================

/// A value bound to a statement parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Null => write!(f, "NULL"),
            ParamValue::Bool(b) => write!(f, "{}", b),
            ParamValue::Int(i) => write!(f, "{}", i),
            ParamValue::Float(x) => write!(f, "{}", x),
            ParamValue::Text(s) => write!(f, "'{}'", s),
            ParamValue::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            ParamValue::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
        }
    }
}

/// A recorded call against a deferred statement.
#[derive(Debug, Clone, PartialEq)]
pub enum StatementCommand {
    SetParam { index: usize, value: ParamValue },
    ClearParameters,
}

/// Replay recorded commands into a positional parameter row.
///
/// Indexes are 1-based; unset positions below the highest index are `Null`.
pub fn replay(commands: &[StatementCommand]) -> Vec<ParamValue> {
    let mut row: Vec<ParamValue> = Vec::new();
    for command in commands {
        match command {
            StatementCommand::SetParam { index, value } => {
                if row.len() < *index {
                    row.resize(*index, ParamValue::Null);
                }
                row[index - 1] = value.clone();
            }
            StatementCommand::ClearParameters => row.clear(),
        }
    }
    row
}

// ==================== PreparedStatement ====================

/// A parameterized DML statement.
pub trait PreparedStatement: Send {
    /// SQL text this statement was prepared from.
    fn sql(&self) -> &str;

    /// Bind `value` to the 1-based parameter `index`.
    fn set_param(&mut self, index: usize, value: ParamValue) -> BatchResult<()>;

    fn set_int(&mut self, index: usize, value: i64) -> BatchResult<()> {
        self.set_param(index, ParamValue::Int(value))
    }

    fn set_string(&mut self, index: usize, value: &str) -> BatchResult<()> {
        self.set_param(index, ParamValue::Text(value.to_string()))
    }

    fn set_null(&mut self, index: usize) -> BatchResult<()> {
        self.set_param(index, ParamValue::Null)
    }

    /// Drop every bound parameter.
    fn clear_parameters(&mut self) -> BatchResult<()>;

    /// Run the statement. Deferred statements report 0 affected rows.
    fn execute_update(&mut self) -> BatchResult<u64>;

    /// Release the statement. Later calls fail with [`BatchError::Closed`].
    fn close(&mut self);
}

/// Shared handle on a batch connection's state.
pub(crate) type SharedState<C> = Arc<Mutex<BatchState<C>>>;

// ==================== DeferredStatement ====================

/// Records parameter commands and queues them on `execute_update`.
pub struct DeferredStatement<C: Connection> {
    sql: String,
    dml: DmlStatement,
    commands: Vec<StatementCommand>,
    state: SharedState<C>,
    closed: bool,
}

impl<C: Connection> DeferredStatement<C> {
    pub(crate) fn new(sql: String, dml: DmlStatement, state: SharedState<C>) -> Self {
        Self {
            sql,
            dml,
            commands: Vec::new(),
            state,
            closed: false,
        }
    }

    /// Parsed verb and table.
    pub fn dml(&self) -> &DmlStatement {
        &self.dml
    }

    /// Commands recorded so far.
    pub fn commands(&self) -> &[StatementCommand] {
        &self.commands
    }

    fn ensure_open(&self) -> BatchResult<()> {
        if self.closed {
            return Err(BatchError::Closed);
        }
        Ok(())
    }
}

impl<C: Connection> PreparedStatement for DeferredStatement<C> {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn set_param(&mut self, index: usize, value: ParamValue) -> BatchResult<()> {
        self.ensure_open()?;
        if index == 0 {
            return Err(BatchError::ParameterIndex(index));
        }
        self.commands.push(StatementCommand::SetParam { index, value });
        Ok(())
    }

    fn clear_parameters(&mut self) -> BatchResult<()> {
        self.ensure_open()?;
        self.commands.push(StatementCommand::ClearParameters);
        Ok(())
    }

    fn execute_update(&mut self) -> BatchResult<u64> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        if !state.batch_mode() {
            state.execute_batch()?;
            return state.execute_direct(&self.sql, &replay(&self.commands));
        }
        state.next_executed(&self.sql, &self.dml)?;
        state.add_batch(&self.sql, self.commands.clone());
        state.execute_batch_if_necessary()?;
        Ok(0)
    }

    fn close(&mut self) {
        self.closed = true;
        self.commands.clear();
    }
}

impl<C: Connection> fmt::Debug for DeferredStatement<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredStatement")
            .field("sql", &self.sql)
            .field("commands", &self.commands.len())
            .field("closed", &self.closed)
            .finish()
    }
}

// ==================== DirectStatement ====================

/// Flushes pending work, then runs against the driver immediately.
///
/// Used for SQL the batcher cannot classify.
pub struct DirectStatement<C: Connection> {
    sql: String,
    params: Vec<StatementCommand>,
    state: SharedState<C>,
    closed: bool,
}

impl<C: Connection> DirectStatement<C> {
    pub(crate) fn new(sql: String, state: SharedState<C>) -> Self {
        Self {
            sql,
            params: Vec::new(),
            state,
            closed: false,
        }
    }
}

impl<C: Connection> PreparedStatement for DirectStatement<C> {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn set_param(&mut self, index: usize, value: ParamValue) -> BatchResult<()> {
        if self.closed {
            return Err(BatchError::Closed);
        }
        if index == 0 {
            return Err(BatchError::ParameterIndex(index));
        }
        self.params.push(StatementCommand::SetParam { index, value });
        Ok(())
    }

    fn clear_parameters(&mut self) -> BatchResult<()> {
        if self.closed {
            return Err(BatchError::Closed);
        }
        self.params.clear();
        Ok(())
    }

    fn execute_update(&mut self) -> BatchResult<u64> {
        if self.closed {
            return Err(BatchError::Closed);
        }
        let mut state = self.state.lock();
        state.execute_batch()?;
        state.execute_direct(&self.sql, &replay(&self.params))
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

impl<C: Connection> fmt::Debug for DirectStatement<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectStatement")
            .field("sql", &self.sql)
            .field("closed", &self.closed)
            .finish()
    }
}
