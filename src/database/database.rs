use crate::llm::chat::{ChatTurn, Role};
use chrono::{DateTime, Utc};
use log::info;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio_rusqlite::Connection;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] tokio_rusqlite::Error),
    #[error("Database connection error: {0}")]
    Connection(String),
}

/// SQLite-backed transcript so a session can be restored after a restart.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Connection>,
}

impl Database {
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DatabaseError::Connection(e.to_string()))?;
            }
        }

        let conn = Connection::open(path)
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;
        Self::with_connection(conn).await
    }

    pub async fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;
        Self::with_connection(conn).await
    }

    async fn with_connection(conn: Connection) -> Result<Self, DatabaseError> {
        let db = Self {
            conn: Arc::new(conn),
        };
        db.initialize().await?;
        Ok(db)
    }

    async fn initialize(&self) -> Result<(), DatabaseError> {
        self.conn
            .call(|conn| {
                conn.execute_batch(
                    "CREATE TABLE IF NOT EXISTS transcript (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        role TEXT NOT NULL,
                        text TEXT NOT NULL,
                        at TEXT NOT NULL
                    );",
                )?;
                Ok(())
            })
            .await?;

        info!("Transcript database initialized successfully");
        Ok(())
    }

    pub async fn save_turn(&self, turn: &ChatTurn) -> Result<(), DatabaseError> {
        let role = turn.role.as_str().to_string();
        let text = turn.text.clone();
        let at = turn.at.to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO transcript (role, text, at) VALUES (?1, ?2, ?3)",
                    [&role, &text, &at],
                )?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    /// Every stored turn in the order it was appended. Rows with an unknown
    /// role are skipped.
    pub async fn load_transcript(&self) -> Result<Vec<ChatTurn>, DatabaseError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT role, text, at FROM transcript ORDER BY id ASC")?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(role, text, at)| {
                let role = role.parse::<Role>().ok()?;
                let at = DateTime::parse_from_rfc3339(&at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now());
                Some(ChatTurn { role, text, at })
            })
            .collect())
    }

    pub async fn clear_transcript(&self) -> Result<(), DatabaseError> {
        self.conn
            .call(|conn| {
                conn.execute("DELETE FROM transcript", [])?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}
