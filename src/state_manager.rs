// Trade Data Store
// SQLite-based persistence with JSON backup
//
// Durable backing for the per-trade "DCA" and "SL" records so that averaging
// history and protective stops survive a process restart.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::config::{StateBackend, StateConfig};
use crate::error::{EngineError, EngineResult};
use crate::host::{InMemoryTradeStore, TradeDataStore};
use crate::TradeId;

// =============================================================================
// Store Implementation
// =============================================================================

pub struct SqliteTradeStore {
    conn: Arc<Mutex<Connection>>,
    json_backup_path: Option<PathBuf>,
}

impl SqliteTradeStore {
    pub fn new<P: AsRef<Path>>(db_path: P, json_backup_path: Option<PathBuf>) -> EngineResult<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if let Some(parent) = json_backup_path.as_ref().and_then(|p| p.parent()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;

        // WAL keeps readers (e.g. a dashboard) off the writer's back
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            json_backup_path,
        };

        store.create_tables()?;
        info!("SQLite trade store initialized at {}", db_path.display());

        Ok(store)
    }

    /// Store backed by a private in-memory database
    pub fn in_memory() -> EngineResult<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
            json_backup_path: None,
        };
        store.create_tables()?;
        Ok(store)
    }

    fn lock(&self) -> EngineResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| EngineError::Store("connection mutex poisoned".to_string()))
    }

    fn create_tables(&self) -> EngineResult<()> {
        let conn = self.lock()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS custom_data (
                trade_id INTEGER NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (trade_id, key)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_custom_data_trade ON custom_data(trade_id)",
            [],
        )?;

        debug!("Database schema created/verified");
        Ok(())
    }

    /// Drop every record kept for a trade
    pub fn delete_trade(&self, trade_id: TradeId) -> EngineResult<usize> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM custom_data WHERE trade_id = ?1",
            params![trade_id.0],
        )?;
        debug!("Deleted {} records for trade {}", removed, trade_id);
        Ok(removed)
    }

    /// Trade ids with at least one stored record
    pub fn trade_ids(&self) -> EngineResult<Vec<TradeId>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT DISTINCT trade_id FROM custom_data ORDER BY trade_id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids.into_iter().map(TradeId).collect())
    }

    pub fn export_json(&self) -> EngineResult<()> {
        let Some(path) = &self.json_backup_path else {
            return Ok(());
        };

        let records = {
            let conn = self.lock()?;
            let mut stmt =
                conn.prepare("SELECT trade_id, key, value FROM custom_data ORDER BY trade_id, key")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let records: Vec<Value> = records
            .into_iter()
            .map(|(trade_id, key, raw)| {
                let value = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
                serde_json::json!({ "trade_id": trade_id, "key": key, "value": value })
            })
            .collect();

        let state = serde_json::json!({
            "exported_at": Utc::now().to_rfc3339(),
            "custom_data": records,
        });

        std::fs::write(path, serde_json::to_string_pretty(&state)?)?;
        debug!("State exported to: {}", path.display());
        Ok(())
    }
}

impl TradeDataStore for SqliteTradeStore {
    fn get(&self, trade_id: TradeId, key: &str) -> EngineResult<Option<Value>> {
        let raw: Option<String> = {
            let conn = self.lock()?;
            conn.query_row(
                "SELECT value FROM custom_data WHERE trade_id = ?1 AND key = ?2",
                params![trade_id.0, key],
                |row| row.get(0),
            )
            .optional()?
        };

        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn set(&mut self, trade_id: TradeId, key: &str, value: Value) -> EngineResult<()> {
        let raw = serde_json::to_string(&value)?;
        {
            let conn = self.lock()?;
            conn.execute(
                "INSERT OR REPLACE INTO custom_data (trade_id, key, value, updated_at)
                 VALUES (?1, ?2, ?3, CURRENT_TIMESTAMP)",
                params![trade_id.0, key, raw],
            )?;
        }

        debug!("Trade data saved: trade={} key={} value={}", trade_id, key, raw);

        // The database row is committed; a stale backup is not a failed write
        if let Err(e) = self.export_json() {
            warn!("JSON backup export failed: {}", e);
        }
        Ok(())
    }
}

// =============================================================================
// Factory Function
// =============================================================================

pub fn create_trade_store<P: AsRef<Path>>(state_dir: P) -> EngineResult<SqliteTradeStore> {
    let state_dir = state_dir.as_ref();
    std::fs::create_dir_all(state_dir)?;

    let db_path = state_dir.join("trade_data.db");
    let json_path = state_dir.join("trade_data.json");

    SqliteTradeStore::new(db_path, Some(json_path))
}

/// Trade store for the configured backend
pub fn open_trade_store(config: &StateConfig) -> EngineResult<Box<dyn TradeDataStore>> {
    match config.backend {
        StateBackend::Memory => Ok(Box::new(InMemoryTradeStore::new())),
        StateBackend::Sqlite => Ok(Box::new(create_trade_store(&config.state_dir)?)),
    }
}
