use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_postgres::NoTls;
use tracing::{debug, warn};

use crate::errors::{Result, SamAreaError};
use crate::traits::DetectionStore;

const CREATE_DETECTIONS_TABLE: &str = "CREATE TABLE IF NOT EXISTS detections (
    id SERIAL PRIMARY KEY,
    filename TEXT NOT NULL,
    area DOUBLE PRECISION NOT NULL,
    created_at TIMESTAMP NOT NULL
)";

const INSERT_DETECTION: &str =
    "INSERT INTO detections (filename, area, created_at) VALUES ($1, $2, $3)";

/// One row of the `detections` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionRecord {
    pub filename: String,
    pub area: f64,
    pub created_at: DateTime<Utc>,
}

impl DetectionRecord {
    pub fn new(filename: impl Into<String>, area: f64) -> Self {
        Self {
            filename: filename.into(),
            area,
            created_at: Utc::now(),
        }
    }
}

/// Connection parameters, all optional except the port so the service can
/// start (and answer `/health`) with no database configured.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseSettings {
    pub host: Option<String>,
    pub port: u16,
    pub name: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl DatabaseSettings {
    pub fn to_pg_config(&self) -> tokio_postgres::Config {
        let mut config = tokio_postgres::Config::new();
        config.port(self.port);
        if let Some(host) = &self.host {
            config.host(host);
        }
        if let Some(name) = &self.name {
            config.dbname(name);
        }
        if let Some(user) = &self.user {
            config.user(user);
        }
        if let Some(password) = &self.password {
            config.password(password);
        }
        config
    }
}

/// PostgreSQL store that opens one connection per call and closes it when
/// the call returns.
#[derive(Debug, Clone)]
pub struct PostgresDetectionStore {
    settings: DatabaseSettings,
}

impl PostgresDetectionStore {
    pub const fn new(settings: DatabaseSettings) -> Self {
        Self { settings }
    }

    async fn connect(&self) -> Result<tokio_postgres::Client> {
        let (client, connection) = self
            .settings
            .to_pg_config()
            .connect(NoTls)
            .await
            .map_err(|e| SamAreaError::Database {
                operation: "connect".to_string(),
                source: e,
            })?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "postgres connection error");
            }
        });

        Ok(client)
    }

    /// Create the `detections` table if it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<()> {
        let client = self.connect().await?;
        client
            .batch_execute(CREATE_DETECTIONS_TABLE)
            .await
            .map_err(|e| SamAreaError::Database {
                operation: "create detections table".to_string(),
                source: e,
            })
    }
}

#[async_trait]
impl DetectionStore for PostgresDetectionStore {
    async fn record_detection(&self, record: &DetectionRecord) -> Result<()> {
        let client = self.connect().await?;
        let created_at = record.created_at.naive_utc();
        let rows = client
            .execute(
                INSERT_DETECTION,
                &[&record.filename, &record.area, &created_at],
            )
            .await
            .map_err(|e| SamAreaError::Database {
                operation: "insert detection".to_string(),
                source: e,
            })?;
        debug!(filename = %record.filename, rows, "detection recorded");
        Ok(())
    }
}
