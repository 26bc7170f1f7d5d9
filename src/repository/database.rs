use crate::error::StoreError;
use rusqlite::Connection;
use std::time::Duration;
use tracing::{info, warn};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A single SQLite connection. The sync engine owns one exclusively; other
/// callers open their own.
pub struct Database {
    conn: Option<Connection>,
    path: String,
}

impl Database {
    pub fn new(db_url: &str) -> Result<Self, StoreError> {
        let db = Self::connect(db_url)?;
        db.ensure_schema()?;
        Ok(db)
    }

    /// Opens the database without touching the schema. A failure here means
    /// the location is wrong or unreadable and is not worth retrying.
    pub fn connect(db_url: &str) -> Result<Self, StoreError> {
        let path = db_url.strip_prefix("sqlite:").unwrap_or(db_url).to_string();
        let conn = Self::open(&path)?;
        info!(path = %path, "Database connected");
        Ok(Database {
            conn: Some(conn),
            path,
        })
    }

    fn open(path: &str) -> Result<Connection, StoreError> {
        let conn = Connection::open(path).map_err(|source| StoreError::Connect {
            path: path.to_string(),
            source,
        })?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    pub fn conn(&self) -> Result<&Connection, StoreError> {
        self.conn.as_ref().ok_or(StoreError::Closed)
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    pub fn is_alive(&self) -> bool {
        self.conn
            .as_ref()
            .is_some_and(|conn| conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)).is_ok())
    }

    pub fn reconnect(&mut self) -> Result<(), StoreError> {
        warn!(path = %self.path, "Reconnecting to database");
        self.conn = None;
        self.conn = Some(Self::open(&self.path)?);
        info!(path = %self.path, "Database reconnected");
        Ok(())
    }

    /// Releases the connection. Further calls fail with `StoreError::Closed`
    /// until `reconnect` is called.
    pub fn close(&mut self) -> Result<(), StoreError> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| StoreError::Sqlite(e))?;
            info!(path = %self.path, "Database connection closed");
        }
        Ok(())
    }

    pub fn ensure_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS token_transfers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                mode TEXT NOT NULL,
                block_number INTEGER NOT NULL,
                transaction_hash TEXT NOT NULL,
                log_index INTEGER NOT NULL DEFAULT 0,
                from_address TEXT NOT NULL,
                to_address TEXT NOT NULL,
                token_address TEXT NOT NULL,
                token_symbol TEXT NOT NULL,
                value TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'PENDING',
                lottery_numbers TEXT,
                lottery_period INTEGER,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
                updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
            )",
            [],
        )?;

        // Indexes for the sync cursor, assignment lookups and period stats
        conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_transfers_mode ON token_transfers(mode);
             CREATE INDEX IF NOT EXISTS idx_transfers_block_number ON token_transfers(block_number);
             CREATE INDEX IF NOT EXISTS idx_transfers_tx_hash ON token_transfers(transaction_hash);
             CREATE INDEX IF NOT EXISTS idx_transfers_from ON token_transfers(from_address);
             CREATE INDEX IF NOT EXISTS idx_transfers_to ON token_transfers(to_address);
             CREATE INDEX IF NOT EXISTS idx_transfers_token ON token_transfers(token_address);
             CREATE INDEX IF NOT EXISTS idx_transfers_status ON token_transfers(status);
             CREATE INDEX IF NOT EXISTS idx_transfers_timestamp ON token_transfers(timestamp);
             CREATE INDEX IF NOT EXISTS idx_transfers_lottery_period ON token_transfers(lottery_period);",
        )?;

        info!("Table token_transfers checked/created");
        Ok(())
    }
}
