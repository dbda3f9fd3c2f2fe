//! Cursor: buffered query results drained row by row.
//!
//! A cursor holds a weak reference to its connection, so it never keeps the
//! connection alive and every operation fails with a "Lost connection"
//! programming error once the connection is closed, broken, or dropped.
//! Execution replaces the cursor's buffered state wholesale; a failed
//! execute leaves the cursor empty, never showing stale rows.

use std::collections::VecDeque;
use std::sync::Weak;

use tokio::sync::Mutex;

use crate::error::{CqlError, CqlResult};
use crate::proto::{decode_cell, Consistency};
use crate::value::Value;

use super::connection::{ConnectionInner, ConnectionState};
use super::query::{ColumnSpec, ResultKind};

/// A cursor over one connection.
///
/// Behaves like a DB-API cursor: `execute` buffers one result page, the
/// fetch methods drain it in server order, and `rowcount` reports the
/// buffered row count (or -1 for statements that return no rows).
pub struct Cursor {
    conn: Weak<Mutex<ConnectionInner>>,
    consistency: Consistency,
    description: Vec<ColumnSpec>,
    rows: VecDeque<Vec<Option<Vec<u8>>>>,
    rowcount: i64,
    paging_state: Option<Vec<u8>>,
}

impl Cursor {
    pub(crate) fn new(conn: Weak<Mutex<ConnectionInner>>, consistency: Consistency) -> Self {
        Self {
            conn,
            consistency,
            description: Vec::new(),
            rows: VecDeque::new(),
            rowcount: -1,
            paging_state: None,
        }
    }

    /// Fail unless the connection is alive and query-ready.
    async fn check_alive(&self) -> CqlResult<()> {
        let conn = self.conn.upgrade().ok_or_else(CqlError::lost_connection)?;
        let inner = conn.lock().await;
        if inner.state() != ConnectionState::Ready {
            return Err(CqlError::lost_connection());
        }
        Ok(())
    }

    /// Run one query and buffer its result.
    ///
    /// Stale state is discarded before the request goes out, so an error
    /// from the server leaves the cursor empty with `rowcount` -1.
    pub async fn execute(&mut self, query: &str) -> CqlResult<()> {
        self.description.clear();
        self.rows.clear();
        self.rowcount = -1;
        self.paging_state = None;

        let conn = self.conn.upgrade().ok_or_else(CqlError::lost_connection)?;
        let page = {
            let mut inner = conn.lock().await;
            inner.execute(query, self.consistency).await?
        };

        if page.kind == Some(ResultKind::Rows) {
            self.rowcount = page.rows.len() as i64;
            self.description = page.columns;
            self.rows = page.rows;
            self.paging_state = page.paging_state;
        }
        Ok(())
    }

    /// Run pre-rendered statements back to back, stopping at the first
    /// error. `rowcount` afterwards is the sum over row-returning
    /// statements, or -1 if none returned rows; the buffered rows are
    /// those of the last statement.
    pub async fn execute_many<I, S>(&mut self, statements: I) -> CqlResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut total: Option<i64> = None;
        for statement in statements {
            self.execute(statement.as_ref()).await?;
            if self.rowcount >= 0 {
                total = Some(total.unwrap_or(0) + self.rowcount);
            }
        }
        if let Some(total) = total {
            self.rowcount = total;
        }
        Ok(())
    }

    /// Pop and decode the next buffered row, or `None` when the buffer is
    /// drained.
    pub async fn fetchone(&mut self) -> CqlResult<Option<Vec<Value>>> {
        self.check_alive().await?;
        match self.rows.pop_front() {
            Some(raw) => Ok(Some(self.decode_row(raw)?)),
            None => Ok(None),
        }
    }

    /// Pop and decode up to `size` rows.
    pub async fn fetchmany(&mut self, size: usize) -> CqlResult<Vec<Vec<Value>>> {
        self.check_alive().await?;
        let mut out = Vec::with_capacity(size.min(self.rows.len()));
        while out.len() < size {
            match self.rows.pop_front() {
                Some(raw) => out.push(self.decode_row(raw)?),
                None => break,
            }
        }
        Ok(out)
    }

    /// Pop and decode every remaining row.
    pub async fn fetchall(&mut self) -> CqlResult<Vec<Vec<Value>>> {
        self.check_alive().await?;
        let mut out = Vec::with_capacity(self.rows.len());
        while let Some(raw) = self.rows.pop_front() {
            out.push(self.decode_row(raw)?);
        }
        Ok(out)
    }

    fn decode_row(&self, raw: Vec<Option<Vec<u8>>>) -> CqlResult<Vec<Value>> {
        if raw.len() != self.description.len() {
            return Err(CqlError::internal(format!(
                "row has {} cells but metadata describes {} columns",
                raw.len(),
                self.description.len()
            )));
        }
        raw.into_iter()
            .zip(&self.description)
            .map(|(cell, spec)| decode_cell(&spec.data_type, cell.as_deref()))
            .collect()
    }

    /// Column metadata of the buffered result, empty before the first
    /// row-returning query.
    pub fn description(&self) -> &[ColumnSpec] {
        &self.description
    }

    /// Buffered row count of the last result, -1 for statements that
    /// return no rows.
    pub fn rowcount(&self) -> i64 {
        self.rowcount
    }

    /// Continuation token when the server reported more pages.
    pub fn paging_state(&self) -> Option<&[u8]> {
        self.paging_state.as_deref()
    }

    /// Detach from the connection and drop buffered rows. Further
    /// operations fail with a "Lost connection" error.
    pub fn close(&mut self) {
        self.conn = Weak::new();
        self.description.clear();
        self.rows.clear();
        self.rowcount = -1;
        self.paging_state = None;
    }
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("rowcount", &self.rowcount)
            .field("buffered", &self.rows.len())
            .field("columns", &self.description.len())
            .finish()
    }
}
