//! PostgreSQL store backed by sqlx

use super::{EventStore, StoreTransaction};
use crate::{EventRecord, Result, SinkError};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgStatement, Postgres};
use sqlx::{Executor, Statement, Transaction};
use std::time::Duration;
use tracing::info;

/// PostgreSQL connection settings
#[derive(Debug, Clone)]
pub struct PgStoreConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_connections: u32,
    pub connect_timeout: Duration,
}

impl Default for PgStoreConfig {
    fn default() -> Self {
        Self {
            host: "postgres".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            database: "postgres".to_string(),
            max_connections: 5,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl PgStoreConfig {
    fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
    }
}

/// Event store writing to the `logs` table
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    /// Connect to the database; fails if it cannot be reached
    pub async fn connect(config: &PgStoreConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout)
            .connect_with(config.connect_options())
            .await?;

        info!(
            "Connected to postgres at {}:{}/{}",
            config.host, config.port, config.database
        );
        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the embedded schema migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database schema is up to date");
        Ok(())
    }

    /// Close all pooled connections
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction {
            tx,
            statement: None,
            poisoned: false,
        }))
    }

    fn name(&self) -> &str {
        "postgres"
    }
}

struct PgTransaction {
    tx: Transaction<'static, Postgres>,
    statement: Option<PgStatement<'static>>,
    poisoned: bool,
}

impl PgTransaction {
    fn check_usable(&self) -> Result<()> {
        if self.poisoned {
            return Err(SinkError::Transaction(
                "transaction failed earlier, only rollback is allowed".into(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn prepare(&mut self, sql: &'static str) -> Result<()> {
        self.check_usable()?;
        match (&mut *self.tx).prepare(sql).await {
            Ok(statement) => {
                self.statement = Some(statement);
                Ok(())
            }
            Err(e) => {
                self.poisoned = true;
                Err(e.into())
            }
        }
    }

    async fn execute(&mut self, record: &EventRecord) -> Result<()> {
        self.check_usable()?;
        let statement = self
            .statement
            .as_ref()
            .ok_or_else(|| SinkError::Transaction("execute called before prepare".into()))?;

        let result = statement
            .query()
            .bind(record.timestamp())
            .bind(record.subject_id())
            .bind(record.event_name().to_string())
            .execute(&mut *self.tx)
            .await;

        if let Err(e) = result {
            self.poisoned = true;
            return Err(e.into());
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.check_usable()?;
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
