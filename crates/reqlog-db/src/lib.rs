//! Storage layer for analyzed requests.
//!
//! Persists every request that reaches the summarizer, its matched lines and
//! the parse warnings using `rusqlite`, so a run can be inspected with plain
//! SQL afterwards.
//!
//! # Schema
//!
//! - `requests`: one row per request, with its source, line range and
//!   sortable timestamp (`YYYYMMDDhhmmss` as an integer).
//! - `lines`: one row per matched line; `fields` holds the converted
//!   captures as a JSON object.
//! - `warnings`: one row per parse warning.
//!
//! # Thread Safety
//!
//! [`RequestDatabase`] wraps a `rusqlite::Connection`, which is `Send` but not
//! `Sync`. Move it between threads freely, but do not share it.

use std::path::Path;

use reqlog_core::{RecordSink, Request, SinkError, Warning};
use rusqlite::{Connection, params};
use thiserror::Error;

/// Number of requests buffered by [`RecordWriter`] before a transaction is committed.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Failed to encode or decode line fields.
    #[error("invalid line fields: {0}")]
    Fields(#[from] serde_json::Error),
}

/// A matched line ready to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineRecord {
    pub line_type: String,
    pub lineno: i64,
    /// Converted captures as a JSON object.
    pub fields: String,
}

/// A request ready to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    pub source: Option<String>,
    pub first_lineno: i64,
    pub last_lineno: i64,
    pub timestamp: Option<i64>,
    pub completed: bool,
    pub lines: Vec<LineRecord>,
}

impl RequestRecord {
    pub fn from_request(request: &Request) -> Result<Self, DbError> {
        let lines = request
            .lines()
            .iter()
            .map(|line| -> Result<LineRecord, DbError> {
                Ok(LineRecord {
                    line_type: line.line_type.to_string(),
                    lineno: to_sql_int(line.lineno),
                    fields: serde_json::to_string(&line.fields)?,
                })
            })
            .collect::<Result<Vec<_>, DbError>>()?;
        Ok(Self {
            source: request.source().map(str::to_string),
            first_lineno: request.first_lineno().map_or(0, to_sql_int),
            last_lineno: request.last_lineno().map_or(0, to_sql_int),
            timestamp: request.timestamp(),
            completed: request.is_completed(),
            lines,
        })
    }
}

/// A stored request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRequest {
    pub id: i64,
    pub source: Option<String>,
    pub first_lineno: i64,
    pub last_lineno: i64,
    pub timestamp: Option<i64>,
    pub completed: bool,
}

/// A stored warning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarningRecord {
    pub kind: String,
    pub lineno: i64,
    pub message: String,
}

impl From<&Warning> for WarningRecord {
    fn from(warning: &Warning) -> Self {
        Self {
            kind: warning.kind.as_str().to_string(),
            lineno: to_sql_int(warning.lineno),
            message: warning.message.clone(),
        }
    }
}

fn to_sql_int(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// Database connection wrapper.
pub struct RequestDatabase {
    conn: Connection,
}

impl RequestDatabase {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema. Idempotent.
    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS requests (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source TEXT,
                first_lineno INTEGER NOT NULL,
                last_lineno INTEGER NOT NULL,
                timestamp INTEGER,
                completed INTEGER NOT NULL DEFAULT 1
            );

            CREATE INDEX IF NOT EXISTS idx_requests_timestamp ON requests(timestamp);

            -- fields: JSON object of converted captures
            CREATE TABLE IF NOT EXISTS lines (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                request_id INTEGER NOT NULL,
                line_type TEXT NOT NULL,
                lineno INTEGER NOT NULL,
                fields TEXT NOT NULL,
                FOREIGN KEY (request_id) REFERENCES requests(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_lines_request ON lines(request_id);
            CREATE INDEX IF NOT EXISTS idx_lines_type ON lines(line_type);

            CREATE TABLE IF NOT EXISTS warnings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                lineno INTEGER NOT NULL,
                message TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_warnings_kind ON warnings(kind);
            ",
        )?;
        Ok(())
    }

    /// Inserts a batch of requests with their lines in one transaction.
    pub fn insert_requests(&mut self, requests: &[RequestRecord]) -> Result<usize, DbError> {
        if requests.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        {
            let mut insert_request = tx.prepare(
                "
                INSERT INTO requests (source, first_lineno, last_lineno, timestamp, completed)
                VALUES (?, ?, ?, ?, ?)
                ",
            )?;
            let mut insert_line = tx.prepare(
                "
                INSERT INTO lines (request_id, line_type, lineno, fields)
                VALUES (?, ?, ?, ?)
                ",
            )?;
            for request in requests {
                let request_id = insert_request.insert(params![
                    request.source,
                    request.first_lineno,
                    request.last_lineno,
                    request.timestamp,
                    request.completed,
                ])?;
                for line in &request.lines {
                    insert_line.execute(params![
                        request_id,
                        line.line_type,
                        line.lineno,
                        line.fields,
                    ])?;
                }
            }
        }
        tx.commit()?;
        tracing::debug!(count = requests.len(), "stored requests");
        Ok(requests.len())
    }

    /// Inserts a batch of warnings in one transaction.
    pub fn insert_warnings(&mut self, warnings: &[WarningRecord]) -> Result<usize, DbError> {
        if warnings.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        {
            let mut stmt =
                tx.prepare("INSERT INTO warnings (kind, lineno, message) VALUES (?, ?, ?)")?;
            for warning in warnings {
                stmt.execute(params![warning.kind, warning.lineno, warning.message])?;
            }
        }
        tx.commit()?;
        Ok(warnings.len())
    }

    /// Lists all requests in insertion order.
    pub fn list_requests(&self) -> Result<Vec<StoredRequest>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT id, source, first_lineno, last_lineno, timestamp, completed
            FROM requests
            ORDER BY id ASC
            ",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(StoredRequest {
                id: row.get(0)?,
                source: row.get(1)?,
                first_lineno: row.get(2)?,
                last_lineno: row.get(3)?,
                timestamp: row.get(4)?,
                completed: row.get(5)?,
            })
        })?;
        let mut requests = Vec::new();
        for row in rows {
            requests.push(row?);
        }
        Ok(requests)
    }

    /// Lists the lines of one request in line order.
    pub fn lines_for_request(&self, request_id: i64) -> Result<Vec<LineRecord>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT line_type, lineno, fields
            FROM lines
            WHERE request_id = ?
            ORDER BY lineno ASC
            ",
        )?;
        let rows = stmt.query_map([request_id], |row| {
            Ok(LineRecord {
                line_type: row.get(0)?,
                lineno: row.get(1)?,
                fields: row.get(2)?,
            })
        })?;
        let mut lines = Vec::new();
        for row in rows {
            lines.push(row?);
        }
        Ok(lines)
    }

    /// Decoded fields of every line of the given type, in storage order.
    pub fn fields_of_type(
        &self,
        line_type: &str,
    ) -> Result<Vec<serde_json::Map<String, serde_json::Value>>, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT fields FROM lines WHERE line_type = ? ORDER BY id ASC")?;
        let rows = stmt.query_map([line_type], |row| row.get::<_, String>(0))?;
        let mut fields = Vec::new();
        for row in rows {
            fields.push(serde_json::from_str(&row?)?);
        }
        Ok(fields)
    }

    /// Lists all warnings in insertion order.
    pub fn list_warnings(&self) -> Result<Vec<WarningRecord>, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT kind, lineno, message FROM warnings ORDER BY id ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok(WarningRecord {
                kind: row.get(0)?,
                lineno: row.get(1)?,
                message: row.get(2)?,
            })
        })?;
        let mut warnings = Vec::new();
        for row in rows {
            warnings.push(row?);
        }
        Ok(warnings)
    }

    pub fn count_requests(&self) -> Result<i64, DbError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM requests", [], |row| row.get(0))?)
    }
}

/// Buffers requests and warnings and writes them in batches.
pub struct RecordWriter {
    db: RequestDatabase,
    batch_size: usize,
    requests: Vec<RequestRecord>,
    warnings: Vec<WarningRecord>,
}

impl RecordWriter {
    pub fn new(db: RequestDatabase) -> Self {
        Self::with_batch_size(db, DEFAULT_BATCH_SIZE)
    }

    pub fn with_batch_size(db: RequestDatabase, batch_size: usize) -> Self {
        Self {
            db,
            batch_size: batch_size.max(1),
            requests: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Writes everything buffered so far.
    pub fn flush(&mut self) -> Result<(), DbError> {
        self.db.insert_requests(&self.requests)?;
        self.requests.clear();
        self.db.insert_warnings(&self.warnings)?;
        self.warnings.clear();
        Ok(())
    }

    /// The underlying database. Buffered records are not visible until flushed.
    pub const fn database(&self) -> &RequestDatabase {
        &self.db
    }
}

impl RecordSink for RecordWriter {
    fn insert(&mut self, request: &Request) -> Result<(), SinkError> {
        self.requests.push(RequestRecord::from_request(request)?);
        if self.requests.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    fn warning(&mut self, warning: &Warning) -> Result<(), SinkError> {
        self.warnings.push(WarningRecord::from(warning));
        if self.warnings.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        self.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use reqlog_core::{ParsedLine, Value, WarningKind};

    use super::*;

    fn sample_request(lineno: u64, action: &str) -> Request {
        let header = ParsedLine::new(
            "processing",
            lineno,
            [
                ("action".to_string(), Value::from(action)),
                ("timestamp".to_string(), Value::Integer(20_240_301_101_500)),
            ]
            .into_iter()
            .collect(),
        )
        .header()
        .with_source("production.log".into());
        let mut request = Request::new(header);
        request.push(
            ParsedLine::new(
                "completed",
                lineno + 1,
                [("duration".to_string(), Value::Float(0.12))]
                    .into_iter()
                    .collect(),
            )
            .footer(),
        );
        request
    }

    #[test]
    fn test_open_in_memory_is_idempotent() {
        let db = RequestDatabase::open_in_memory().unwrap();
        db.init().unwrap();
        assert_eq!(db.count_requests().unwrap(), 0);
    }

    #[test]
    fn test_insert_and_list_requests() {
        let mut db = RequestDatabase::open_in_memory().unwrap();
        let records = vec![
            RequestRecord::from_request(&sample_request(1, "show")).unwrap(),
            RequestRecord::from_request(&sample_request(3, "index")).unwrap(),
        ];
        assert_eq!(db.insert_requests(&records).unwrap(), 2);

        let stored = db.list_requests().unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].source.as_deref(), Some("production.log"));
        assert_eq!(stored[0].first_lineno, 1);
        assert_eq!(stored[0].last_lineno, 2);
        assert_eq!(stored[0].timestamp, Some(20_240_301_101_500));
        assert!(stored[0].completed);

        let lines = db.lines_for_request(stored[1].id).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].line_type, "processing");
        assert_eq!(lines[0].lineno, 3);
        assert_eq!(lines[1].fields, r#"{"duration":0.12}"#);
    }

    #[test]
    fn test_fields_round_trip_as_json() {
        let mut db = RequestDatabase::open_in_memory().unwrap();
        let record = RequestRecord::from_request(&sample_request(1, "show")).unwrap();
        db.insert_requests(&[record]).unwrap();
        let fields = db.fields_of_type("processing").unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0]["action"], "show");
        assert_eq!(fields[0]["timestamp"], 20_240_301_101_500_i64);
    }

    #[test]
    fn test_writer_batches_and_flushes_on_finish() {
        let db = RequestDatabase::open_in_memory().unwrap();
        let mut writer = RecordWriter::with_batch_size(db, 2);
        writer.insert(&sample_request(1, "a")).unwrap();
        assert_eq!(writer.database().count_requests().unwrap(), 0);
        writer.insert(&sample_request(3, "b")).unwrap();
        assert_eq!(writer.database().count_requests().unwrap(), 2);
        writer.insert(&sample_request(5, "c")).unwrap();
        writer
            .warning(&Warning::new(WarningKind::NoCurrentRequest, "stray line", 9))
            .unwrap();
        writer.finish().unwrap();

        assert_eq!(writer.database().count_requests().unwrap(), 3);
        let warnings = writer.database().list_warnings().unwrap();
        assert_eq!(
            warnings,
            vec![WarningRecord {
                kind: "no_current_request".into(),
                lineno: 9,
                message: "stray line".into(),
            }]
        );
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requests.db");
        {
            let mut db = RequestDatabase::open(&path).unwrap();
            let record = RequestRecord::from_request(&sample_request(1, "show")).unwrap();
            db.insert_requests(&[record]).unwrap();
        }
        let db = RequestDatabase::open(&path).unwrap();
        assert_eq!(db.count_requests().unwrap(), 1);
    }

    #[test]
    fn test_deleting_request_cascades_to_lines() {
        let mut db = RequestDatabase::open_in_memory().unwrap();
        let record = RequestRecord::from_request(&sample_request(1, "show")).unwrap();
        db.insert_requests(&[record]).unwrap();
        db.conn.execute("DELETE FROM requests", []).unwrap();
        let remaining: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM lines", [], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
    }
}
