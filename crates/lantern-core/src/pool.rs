//! Bounded connection pool and the borrow-run-commit gateway.
//!
//! Every backend operation borrows one connection for a single unit of work:
//! `BEGIN`, the caller's statements, then `COMMIT` on success or `ROLLBACK`
//! on error. The connection goes back to the pool in every case, including
//! a panic inside the unit of work.

use crate::builder::Statement;
use crate::catalog;
use crate::config::PoolConfig;
use crate::error::{LanternError, Result};
use crate::params::{Param, Translator};
use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex};
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, info, warn};

/// One decoded column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Json(Value),
    Vector(Vec<f32>),
}

impl Cell {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Cell::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    cells: Vec<Cell>,
}

impl Row {
    pub fn new(columns: Vec<String>, cells: Vec<Cell>) -> Self {
        Self { columns, cells }
    }

    pub fn get(&self, column: &str) -> Option<&Cell> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.cells.get(i))
    }

    pub fn first(&self) -> Option<&Cell> {
        self.cells.first()
    }

    pub fn text(&self, column: &str) -> Result<String> {
        self.get(column)
            .and_then(Cell::as_text)
            .map(str::to_string)
            .ok_or_else(|| LanternError::decode(column, "expected text"))
    }

    pub fn int(&self, column: &str) -> Result<i64> {
        self.get(column)
            .and_then(Cell::as_int)
            .ok_or_else(|| LanternError::decode(column, "expected integer"))
    }

    pub fn opt_int(&self, column: &str) -> Result<Option<i64>> {
        match self.get(column) {
            Some(Cell::Null) => Ok(None),
            Some(Cell::Int(i)) => Ok(Some(*i)),
            _ => Err(LanternError::decode(column, "expected integer or null")),
        }
    }
}

/// A live backend connection. SQL handed to these methods is already
/// translated; `params[i]` binds placeholder `$i+1`.
pub trait Connection: Send {
    fn execute(&mut self, sql: &str, params: &[Param]) -> Result<u64>;
    fn query(&mut self, sql: &str, params: &[Param]) -> Result<Vec<Row>>;
    /// Simple-protocol execution; may hold several `;`-separated statements.
    fn batch_execute(&mut self, sql: &str) -> Result<()>;
    fn copy_in(&mut self, sql: &str, data: &[u8]) -> Result<u64>;
    fn is_broken(&self) -> bool {
        false
    }
}

pub trait ManageConnection: Send + Sync {
    fn connect(&self) -> Result<Box<dyn Connection>>;
}

/// The unit-of-work handle passed to [`Pool::with_connection`].
pub struct Session<'a> {
    conn: &'a mut Box<dyn Connection>,
    translator: &'a Translator,
}

impl Session<'_> {
    /// Parameterless statements go through the simple protocol so DDL
    /// scripts with several commands run in one call.
    pub fn execute(&mut self, stmt: &Statement) -> Result<u64> {
        if stmt.params.is_empty() {
            debug!(sql = %stmt.sql, "batch");
            self.conn.batch_execute(&stmt.sql)?;
            return Ok(0);
        }
        let sql = self.translator.translate(&stmt.sql, &stmt.params);
        debug!(sql = %sql, params = stmt.params.len(), "execute");
        self.conn.execute(&sql, &stmt.params)
    }

    pub fn query(&mut self, stmt: &Statement) -> Result<Vec<Row>> {
        let sql = self.translator.translate(&stmt.sql, &stmt.params);
        debug!(sql = %sql, params = stmt.params.len(), "query");
        self.conn.query(&sql, &stmt.params)
    }

    pub fn batch_execute(&mut self, sql: &str) -> Result<()> {
        debug!(sql, "batch");
        self.conn.batch_execute(sql)
    }

    pub fn copy_in(&mut self, sql: &str, data: &[u8]) -> Result<u64> {
        debug!(sql, bytes = data.len(), "copy");
        self.conn.copy_in(sql, data)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub open: usize,
    pub idle: usize,
}

struct PoolState {
    idle: Vec<Box<dyn Connection>>,
    open: usize,
    closed: bool,
}

pub struct Pool {
    manager: Box<dyn ManageConnection>,
    config: PoolConfig,
    capacity: OnceCell<usize>,
    state: Mutex<PoolState>,
    available: Condvar,
    translator: Translator,
}

impl Pool {
    /// No connection is opened until the first unit of work.
    pub fn new(manager: impl ManageConnection + 'static, config: PoolConfig) -> Self {
        Self {
            manager: Box::new(manager),
            config,
            capacity: OnceCell::new(),
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                open: 0,
                closed: false,
            }),
            available: Condvar::new(),
            translator: Translator::new(),
        }
    }

    /// Pool over the Postgres backend described by `config`.
    pub fn connect(config: PoolConfig) -> Result<Self> {
        config.validate()?;
        let manager = crate::pg::PgManager::new(&config)?;
        Ok(Self::new(manager, config))
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn translator(&self) -> &Translator {
        &self.translator
    }

    /// Configured size, or the server's spare connection count computed
    /// once on first use.
    pub fn capacity(&self) -> Result<usize> {
        self.capacity
            .get_or_try_init(|| match self.config.max_size {
                Some(n) => Ok(n.max(1)),
                None => self.probe_capacity(),
            })
            .copied()
    }

    fn probe_capacity(&self) -> Result<usize> {
        let mut conn = self.manager.connect()?;
        let probe = catalog::connection_limit_probe();
        let rows = conn.query(&probe.sql, &[])?;
        let spare = rows
            .first()
            .and_then(Row::first)
            .and_then(Cell::as_int)
            .ok_or_else(|| LanternError::decode("connections", "empty probe result"))?;
        let capacity = spare.max(1) as usize;
        info!(capacity, "sized connection pool from server limits");
        Ok(capacity)
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.state.lock();
        PoolStatus {
            open: state.open,
            idle: state.idle.len(),
        }
    }

    fn acquire(&self) -> Result<Pooled<'_>> {
        let capacity = self.capacity()?;
        let deadline = self.config.acquire_timeout.map(|t| (t, Instant::now() + t));
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(LanternError::PoolClosed);
            }
            if let Some(conn) = state.idle.pop() {
                return Ok(Pooled {
                    pool: self,
                    conn: Some(conn),
                    in_transaction: false,
                });
            }
            if state.open < capacity {
                state.open += 1;
                drop(state);
                return match self.manager.connect() {
                    Ok(conn) => Ok(Pooled {
                        pool: self,
                        conn: Some(conn),
                        in_transaction: false,
                    }),
                    Err(err) => {
                        self.state.lock().open -= 1;
                        self.available.notify_one();
                        Err(err)
                    }
                };
            }
            let timed_out = match deadline {
                Some((_, at)) => self.available.wait_until(&mut state, at).timed_out(),
                None => {
                    self.available.wait(&mut state);
                    false
                }
            };
            if timed_out && state.idle.is_empty() && state.open >= capacity {
                let waited = deadline.map(|(t, _)| t).unwrap_or_default();
                return Err(LanternError::PoolTimeout(waited));
            }
        }
    }

    fn release(&self, conn: Box<dyn Connection>, reusable: bool) {
        let discard = {
            let mut state = self.state.lock();
            if state.closed || !reusable || conn.is_broken() {
                state.open -= 1;
                Some(conn)
            } else {
                state.idle.push(conn);
                None
            }
        };
        if discard.is_some() {
            debug!("discarding connection");
        }
        drop(discard);
        self.available.notify_one();
    }

    /// Borrow a connection, run `op` inside a transaction, commit on `Ok`,
    /// roll back on `Err`, and always hand the connection back.
    pub fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut Session<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut pooled = self.acquire()?;
        pooled.begin()?;
        let result = match pooled.conn.as_mut() {
            Some(conn) => op(&mut Session {
                conn,
                translator: &self.translator,
            }),
            None => return Err(LanternError::PoolClosed),
        };
        // a panic in `op` leaves the transaction open for `Pooled::drop`
        let end = if result.is_ok() { "COMMIT" } else { "ROLLBACK" };
        pooled.finish(end)?;
        result
    }

    /// Drop idle connections and refuse further work. Connections still
    /// borrowed are closed when they come back.
    pub fn close(&self) {
        let idle = {
            let mut state = self.state.lock();
            state.closed = true;
            state.open -= state.idle.len();
            std::mem::take(&mut state.idle)
        };
        drop(idle);
        self.available.notify_all();
        info!("connection pool closed");
    }
}

struct Pooled<'a> {
    pool: &'a Pool,
    conn: Option<Box<dyn Connection>>,
    in_transaction: bool,
}

impl Pooled<'_> {
    fn begin(&mut self) -> Result<()> {
        let Some(conn) = self.conn.as_mut() else {
            return Err(LanternError::PoolClosed);
        };
        conn.batch_execute("BEGIN")?;
        self.in_transaction = true;
        Ok(())
    }

    /// Ends the open transaction with `COMMIT` or `ROLLBACK`. A failed
    /// `ROLLBACK` is only logged; the connection is then discarded on drop.
    fn finish(&mut self, end: &str) -> Result<()> {
        let Some(conn) = self.conn.as_mut() else {
            return Ok(());
        };
        match conn.batch_execute(end) {
            Ok(()) => {
                self.in_transaction = false;
                Ok(())
            }
            Err(err) if end == "ROLLBACK" => {
                warn!(error = %err, "rollback failed");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

impl Drop for Pooled<'_> {
    fn drop(&mut self) {
        if self.in_transaction {
            if let Some(conn) = self.conn.as_mut() {
                match conn.batch_execute("ROLLBACK") {
                    Ok(()) => self.in_transaction = false,
                    Err(err) => warn!(error = %err, "rollback of abandoned unit failed"),
                }
            }
        }
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn, !self.in_transaction);
        }
    }
}
