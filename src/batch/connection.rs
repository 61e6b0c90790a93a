//! Batching connection: groups DML per SQL text while keeping
//! referential-integrity order.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::error::BatchResult;
use super::foreign_keys::ForeignKeyMap;
use super::prepared::{
    replay, DeferredStatement, DirectStatement, ParamValue, PreparedStatement, SharedState,
    StatementCommand,
};
use super::statement::{DmlKind, DmlStatement};
use crate::config::BatchConfig;
use crate::metadata::DescriptorRepository;

/// Statements queued before an automatic flush.
pub const DEFAULT_MAX_COUNT: usize = 100;

/// Driver-level connection.
pub trait Connection: Send {
    /// Stable identity of the underlying database, used to share
    /// foreign-key maps between connections.
    fn connection_id(&self) -> String;

    /// Execute one statement, returning the affected row count.
    fn execute(&mut self, sql: &str, params: &[ParamValue]) -> BatchResult<u64>;

    /// Execute `sql` once per parameter row.
    fn execute_batch(&mut self, sql: &str, rows: &[Vec<ParamValue>]) -> BatchResult<Vec<u64>> {
        rows.iter().map(|row| self.execute(sql, row)).collect()
    }

    fn commit(&mut self) -> BatchResult<()>;

    fn rollback(&mut self) -> BatchResult<()>;
}

// ==================== BatchState ====================

/// Queue and working sets, shared with the deferred statements.
pub(crate) struct BatchState<C> {
    conn: C,
    fk: Arc<ForeignKeyMap>,
    batch_mode: bool,
    max_count: usize,
    count: usize,
    /// distinct SQL texts in first-queued order
    order: Vec<String>,
    queued: HashMap<String, Vec<Vec<StatementCommand>>>,
    /// table → SQL text that touched it since the last flush
    touched: HashMap<String, String>,
    dont_insert: HashSet<String>,
    deleted: HashSet<String>,
}

impl<C: Connection> BatchState<C> {
    pub(crate) fn batch_mode(&self) -> bool {
        self.batch_mode
    }

    /// Decide whether `sql` can join the current batch, flushing first if
    /// not, and record it in the working sets.
    pub(crate) fn next_executed(&mut self, sql: &str, dml: &DmlStatement) -> BatchResult<()> {
        let table = dml.table.as_str();

        let must_flush = match self.touched.get(table) {
            Some(previous) if previous != sql => true,
            _ => match dml.kind {
                DmlKind::Insert => self.dont_insert.contains(table),
                DmlKind::Update | DmlKind::Delete => self
                    .fk
                    .referencing_tables(table)
                    .any(|child| self.deleted.contains(child)),
            },
        };
        if must_flush {
            tracing::trace!(table, kind = %dml.kind, "dependency conflict, flushing");
            self.execute_batch()?;
        }

        if !self.queued.contains_key(sql) {
            self.order.push(sql.to_string());
            self.queued.insert(sql.to_string(), Vec::new());
        }
        self.touched.insert(table.to_string(), sql.to_string());
        match dml.kind {
            DmlKind::Insert => {
                let parents: Vec<String> = self.fk.referenced_tables(table).cloned().collect();
                self.dont_insert.extend(parents);
            }
            DmlKind::Delete => {
                self.deleted.insert(table.to_string());
            }
            DmlKind::Update => {}
        }
        Ok(())
    }

    /// Queue one parameter row under `sql`.
    pub(crate) fn add_batch(&mut self, sql: &str, commands: Vec<StatementCommand>) {
        if !self.queued.contains_key(sql) {
            self.order.push(sql.to_string());
        }
        self.queued.entry(sql.to_string()).or_default().push(commands);
        self.count += 1;
        tracing::trace!(sql, pending = self.count, "statement queued");
    }

    /// Flush once the queue reaches the configured size.
    pub(crate) fn execute_batch_if_necessary(&mut self) -> BatchResult<()> {
        if self.count >= self.max_count {
            self.execute_batch()?;
        }
        Ok(())
    }

    /// Run everything queued, in recorded order. The queue and working sets
    /// are cleared before the first statement runs; on failure the
    /// remaining statements are dropped.
    pub(crate) fn execute_batch(&mut self) -> BatchResult<()> {
        let order = std::mem::take(&mut self.order);
        let mut queued = std::mem::take(&mut self.queued);
        let count = self.count;
        self.reset();

        if order.is_empty() {
            return Ok(());
        }
        tracing::debug!(statements = count, batches = order.len(), "flushing batch");

        for sql in order {
            let Some(rows) = queued.remove(&sql) else {
                continue;
            };
            if rows.is_empty() {
                continue;
            }
            let params: Vec<Vec<ParamValue>> = rows.iter().map(|cmds| replay(cmds)).collect();
            if let Err(e) = self.conn.execute_batch(&sql, &params) {
                tracing::warn!(sql = %sql, error = %e, "batch execution failed");
                return Err(e);
            }
        }
        Ok(())
    }

    pub(crate) fn execute_direct(&mut self, sql: &str, params: &[ParamValue]) -> BatchResult<u64> {
        self.conn.execute(sql, params)
    }

    fn reset(&mut self) {
        self.order.clear();
        self.queued.clear();
        self.touched.clear();
        self.dont_insert.clear();
        self.deleted.clear();
        self.count = 0;
    }
}

// ==================== BatchConnection ====================

/// Wraps a driver [`Connection`] and defers DML into ordered batches.
pub struct BatchConnection<C: Connection> {
    state: SharedState<C>,
}

impl<C: Connection + 'static> BatchConnection<C> {
    /// Wrap `conn`, using the foreign-key map cached for its
    /// [`connection_id`](Connection::connection_id).
    pub fn new(conn: C, repository: &DescriptorRepository) -> BatchResult<Self> {
        let fk = ForeignKeyMap::cached(&conn.connection_id(), repository)?;
        Ok(Self::with_foreign_keys(conn, fk))
    }

    /// Wrap `conn` with the batching settings of a kit configuration.
    pub fn from_config(
        conn: C,
        repository: &DescriptorRepository,
        config: &BatchConfig,
    ) -> BatchResult<Self> {
        let connection = Self::new(conn, repository)?.with_max_count(config.max_count);
        connection.state.lock().batch_mode = config.enabled;
        Ok(connection)
    }

    /// Wrap `conn` with an explicit foreign-key map.
    pub fn with_foreign_keys(conn: C, fk: Arc<ForeignKeyMap>) -> Self {
        Self {
            state: Arc::new(Mutex::new(BatchState {
                conn,
                fk,
                batch_mode: true,
                max_count: DEFAULT_MAX_COUNT,
                count: 0,
                order: Vec::new(),
                queued: HashMap::new(),
                touched: HashMap::new(),
                dont_insert: HashSet::new(),
                deleted: HashSet::new(),
            })),
        }
    }

    /// Set the automatic flush threshold. Zero is treated as one.
    pub fn with_max_count(self, max_count: usize) -> Self {
        self.state.lock().max_count = max_count.max(1);
        self
    }

    /// Prepare `sql`. INSERT, UPDATE and DELETE are deferred while batch
    /// mode is on; anything else runs directly.
    pub fn prepare_statement(&self, sql: &str) -> BatchResult<Box<dyn PreparedStatement>> {
        let batch_mode = self.state.lock().batch_mode;
        let dml = match DmlStatement::parse(sql) {
            Ok(dml) => dml,
            Err(e) => {
                tracing::trace!(sql, error = %e, "statement not classified, running directly");
                None
            }
        };
        match dml {
            Some(dml) if batch_mode => Ok(Box::new(DeferredStatement::new(
                sql.to_string(),
                dml,
                Arc::clone(&self.state),
            ))),
            _ => Ok(Box::new(DirectStatement::new(
                sql.to_string(),
                Arc::clone(&self.state),
            ))),
        }
    }

    /// Turn batching on or off. Turning it off flushes pending work.
    pub fn set_batch_mode(&self, enabled: bool) -> BatchResult<()> {
        let mut state = self.state.lock();
        if state.batch_mode && !enabled {
            state.execute_batch()?;
        }
        state.batch_mode = enabled;
        Ok(())
    }

    pub fn batch_mode(&self) -> bool {
        self.state.lock().batch_mode
    }

    /// Flush the queue now.
    pub fn execute_batch(&self) -> BatchResult<()> {
        self.state.lock().execute_batch()
    }

    /// Flush if the queue has reached the threshold.
    pub fn execute_batch_if_necessary(&self) -> BatchResult<()> {
        self.state.lock().execute_batch_if_necessary()
    }

    /// Flush, then commit the driver connection.
    pub fn commit(&self) -> BatchResult<()> {
        let mut state = self.state.lock();
        state.execute_batch()?;
        state.conn.commit()?;
        tracing::debug!("batch connection committed");
        Ok(())
    }

    /// Discard the queue, then roll back the driver connection.
    pub fn rollback(&self) -> BatchResult<()> {
        let mut state = self.state.lock();
        let discarded = state.count;
        state.reset();
        state.conn.rollback()?;
        tracing::debug!(discarded, "batch connection rolled back");
        Ok(())
    }

    /// Number of queued statement executions.
    pub fn pending(&self) -> usize {
        self.state.lock().count
    }

    /// Run `f` against the wrapped driver connection.
    pub fn with_connection<R>(&self, f: impl FnOnce(&mut C) -> R) -> R {
        f(&mut self.state.lock().conn)
    }
}

impl<C: Connection> fmt::Debug for BatchConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BatchConnection")
            .field("batch_mode", &state.batch_mode)
            .field("max_count", &state.max_count)
            .field("pending", &state.count)
            .finish()
    }
}
