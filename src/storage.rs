//! SQLite storage layer for Clientele.
//!
//! Two record sets live here, `clients` and `prestations`, both keyed by the
//! deterministic ids from [`crate::keys`]. Every write is a merge-upsert:
//! fields missing from the payload keep their stored value.
//!
//! Writes are grouped into [`WriteBatch`]es, each committed in a single
//! transaction. A batch never holds more than
//! [`StorageConfig::max_batch_writes`] operations.

use chrono::NaiveDate;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};
use tracing::debug;

use crate::keys::{default_color, normalize_emails};
use crate::model::{
    Client, ClientSegmentation, ClientStats, ClientUpsert, Prestation, PrestationSource,
};

/// Default upper bound on writes per committed batch.
pub const DEFAULT_MAX_BATCH_WRITES: usize = 500;

/// Tunables of the storage collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageConfig {
    /// Maximum number of operations committed in one transaction.
    pub max_batch_writes: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_batch_writes: DEFAULT_MAX_BATCH_WRITES,
        }
    }
}

/// A single write against one of the record sets.
#[derive(Debug, Clone)]
pub enum WriteOp {
    UpsertClient(ClientUpsert),
    UpsertPrestation(Prestation),
    DeletePrestation(String),
}

/// Writes committed together, all or nothing.
#[derive(Debug, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Totals of a [`BatchWriter`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub batches: usize,
    pub writes: usize,
}

/// Queues writes and commits them in bounded batches.
///
/// A batch is committed as soon as it reaches the storage bound;
/// [`BatchWriter::finish`] commits whatever is left.
pub struct BatchWriter<'a> {
    storage: &'a Storage,
    batch: WriteBatch,
    summary: BatchSummary,
}

impl<'a> BatchWriter<'a> {
    fn new(storage: &'a Storage) -> Self {
        Self {
            storage,
            batch: WriteBatch::new(),
            summary: BatchSummary::default(),
        }
    }

    /// Queue a write, committing the current batch if it is full.
    pub async fn push(&mut self, op: WriteOp) -> anyhow::Result<()> {
        self.batch.push(op);
        if self.batch.len() >= self.storage.max_batch_writes() {
            self.flush().await?;
        }
        Ok(())
    }

    /// Commit the pending batch, if any.
    pub async fn flush(&mut self) -> anyhow::Result<()> {
        if self.batch.is_empty() {
            return Ok(());
        }

        let batch = std::mem::take(&mut self.batch);
        let writes = self.storage.commit(batch).await?;
        self.summary.batches += 1;
        self.summary.writes += writes;

        debug!(
            batch = self.summary.batches,
            writes, "Write batch committed"
        );
        Ok(())
    }

    /// Commit the trailing partial batch and report totals.
    pub async fn finish(mut self) -> anyhow::Result<BatchSummary> {
        self.flush().await?;
        Ok(self.summary)
    }
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
    config: StorageConfig,
}

impl Storage {
    /// Create a new storage instance with default settings and initialize the schema.
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite connection string (e.g., "sqlite:clientele.db" or "sqlite::memory:")
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        Self::with_config(database_url, StorageConfig::default()).await
    }

    /// Create a new storage instance with explicit settings.
    pub async fn with_config(database_url: &str, config: StorageConfig) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        let storage = Self { pool, config };
        storage.initialize_schema().await?;

        Ok(storage)
    }

    /// Writes allowed per batch, never below one.
    pub fn max_batch_writes(&self) -> usize {
        self.config.max_batch_writes.max(1)
    }

    /// Start a bounded batch writer over this storage.
    pub fn writer(&self) -> BatchWriter<'_> {
        BatchWriter::new(self)
    }

    /// Create the database schema if it doesn't exist.
    ///
    /// List-valued and derived fields are stored as JSON text.
    async fn initialize_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS clients (
                id TEXT PRIMARY KEY NOT NULL,
                name TEXT NOT NULL,
                address TEXT,
                notes TEXT,
                color TEXT NOT NULL,
                email TEXT,
                alternate_emails TEXT,
                emails TEXT,
                stats TEXT,
                segmentation TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS prestations (
                id TEXT PRIMARY KEY NOT NULL,
                client_id TEXT NOT NULL,
                client_name TEXT NOT NULL,
                date TEXT NOT NULL,
                amount REAL NOT NULL,
                invoice_number TEXT,
                reference TEXT NOT NULL,
                description TEXT NOT NULL,
                source TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Per-client lookups drive stats recomputation
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_prestations_client
            ON prestations(client_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Commit a batch in one transaction and return the number of writes.
    ///
    /// Either every write of the batch is applied or none is. Batches larger
    /// than the configured bound are rejected before touching the database.
    pub async fn commit(&self, batch: WriteBatch) -> anyhow::Result<usize> {
        let max = self.max_batch_writes();
        if batch.len() > max {
            anyhow::bail!(
                "write batch of {} operations exceeds the limit of {}",
                batch.len(),
                max
            );
        }

        let writes = batch.len();
        let mut tx = self.pool.begin().await?;

        for op in batch.ops {
            match op {
                WriteOp::UpsertClient(client) => upsert_client(&mut tx, &client).await?,
                WriteOp::UpsertPrestation(prestation) => {
                    upsert_prestation(&mut tx, &prestation).await?
                }
                WriteOp::DeletePrestation(id) => {
                    sqlx::query("DELETE FROM prestations WHERE id = ?")
                        .bind(&id)
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }

        tx.commit().await?;
        Ok(writes)
    }

    /// Merge-write a single client outside of any batch.
    pub async fn upsert_client(&self, client: &ClientUpsert) -> anyhow::Result<()> {
        let mut batch = WriteBatch::new();
        batch.push(WriteOp::UpsertClient(client.clone()));
        self.commit(batch).await?;
        Ok(())
    }

    /// Merge-write a single prestation outside of any batch.
    pub async fn upsert_prestation(&self, prestation: &Prestation) -> anyhow::Result<()> {
        let mut batch = WriteBatch::new();
        batch.push(WriteOp::UpsertPrestation(prestation.clone()));
        self.commit(batch).await?;
        Ok(())
    }

    /// Delete a prestation. Returns `false` if it did not exist.
    pub async fn delete_prestation(&self, id: &str) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM prestations WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Reassign a prestation to another client, keeping its id.
    ///
    /// Returns `false` if the prestation did not exist.
    pub async fn reassign_prestation(
        &self,
        id: &str,
        client_id: &str,
        client_name: &str,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE prestations
            SET client_id = ?, client_name = ?
            WHERE id = ?
            "#,
        )
        .bind(client_id)
        .bind(client_name)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Fetch a client by id.
    pub async fn get_client(&self, id: &str) -> anyhow::Result<Option<Client>> {
        let row = sqlx::query("SELECT * FROM clients WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(client_from_row).transpose()
    }

    /// All clients, ordered by name.
    pub async fn list_clients(&self) -> anyhow::Result<Vec<Client>> {
        let rows = sqlx::query("SELECT * FROM clients ORDER BY name, id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(client_from_row).collect()
    }

    /// Fetch a prestation by id.
    pub async fn get_prestation(&self, id: &str) -> anyhow::Result<Option<Prestation>> {
        let row = sqlx::query("SELECT * FROM prestations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(prestation_from_row).transpose()
    }

    /// All prestations in the order they were first written.
    pub async fn list_prestations(&self) -> anyhow::Result<Vec<Prestation>> {
        let rows = sqlx::query("SELECT * FROM prestations ORDER BY rowid")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(prestation_from_row).collect()
    }

    /// Prestations of one client, oldest first.
    pub async fn list_client_prestations(
        &self,
        client_id: &str,
    ) -> anyhow::Result<Vec<Prestation>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM prestations
            WHERE client_id = ?
            ORDER BY date, rowid
            "#,
        )
        .bind(client_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(prestation_from_row).collect()
    }

    /// Number of stored prestations.
    pub async fn count_prestations(&self) -> anyhow::Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as total FROM prestations")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.try_get("total")?)
    }
}

async fn upsert_client(
    tx: &mut Transaction<'static, Sqlite>,
    client: &ClientUpsert,
) -> anyhow::Result<()> {
    // The matching set follows the merged primary and alternates
    let emails = if client.email.is_some() || client.alternate_emails.is_some() {
        let (stored_email, stored_alternates) = stored_emails(tx, &client.id).await?;
        let email = client.email.as_deref().or(stored_email.as_deref());
        let alternates = client.alternate_emails.as_ref().unwrap_or(&stored_alternates);
        Some(serde_json::to_string(&normalize_emails(
            email,
            alternates.iter().map(String::as_str),
        ))?)
    } else {
        None
    };
    let alternate_emails = client
        .alternate_emails
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let stats = client.stats.as_ref().map(serde_json::to_string).transpose()?;
    let segmentation = client
        .segmentation
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    // The explicit color is bound twice: the insert falls back to the palette,
    // the update falls back to the stored color.
    sqlx::query(
        r#"
        INSERT INTO clients (
            id, name, address, notes, color, email,
            alternate_emails, emails, stats, segmentation
        )
        VALUES (?, ?, ?, ?, COALESCE(?, ?), ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            address = COALESCE(excluded.address, clients.address),
            notes = COALESCE(excluded.notes, clients.notes),
            color = COALESCE(?, clients.color),
            email = COALESCE(excluded.email, clients.email),
            alternate_emails = COALESCE(excluded.alternate_emails, clients.alternate_emails),
            emails = COALESCE(excluded.emails, clients.emails),
            stats = COALESCE(excluded.stats, clients.stats),
            segmentation = COALESCE(excluded.segmentation, clients.segmentation)
        "#,
    )
    .bind(&client.id)
    .bind(&client.name)
    .bind(&client.address)
    .bind(&client.notes)
    .bind(&client.color)
    .bind(default_color(&client.id))
    .bind(&client.email)
    .bind(alternate_emails)
    .bind(emails)
    .bind(stats)
    .bind(segmentation)
    .bind(&client.color)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Primary and alternate emails currently stored for a client.
async fn stored_emails(
    tx: &mut Transaction<'static, Sqlite>,
    id: &str,
) -> anyhow::Result<(Option<String>, Vec<String>)> {
    let row = sqlx::query("SELECT email, alternate_emails FROM clients WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;

    match row {
        Some(row) => Ok((
            row.try_get("email")?,
            json_column(&row, "alternate_emails")?.unwrap_or_default(),
        )),
        None => Ok((None, Vec::new())),
    }
}

async fn upsert_prestation(
    tx: &mut Transaction<'static, Sqlite>,
    prestation: &Prestation,
) -> anyhow::Result<()> {
    // `source` records how the row first arrived and is never rewritten
    sqlx::query(
        r#"
        INSERT INTO prestations (
            id, client_id, client_name, date, amount,
            invoice_number, reference, description, source
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            client_id = excluded.client_id,
            client_name = excluded.client_name,
            date = excluded.date,
            amount = excluded.amount,
            invoice_number = COALESCE(excluded.invoice_number, prestations.invoice_number),
            reference = excluded.reference,
            description = excluded.description
        "#,
    )
    .bind(&prestation.id)
    .bind(&prestation.client_id)
    .bind(&prestation.client_name)
    .bind(prestation.date.format("%Y-%m-%d").to_string())
    .bind(prestation.amount)
    .bind(&prestation.invoice_number)
    .bind(&prestation.reference)
    .bind(&prestation.description)
    .bind(prestation.source.as_str())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

fn json_column<T: serde::de::DeserializeOwned>(
    row: &SqliteRow,
    column: &str,
) -> anyhow::Result<Option<T>> {
    let raw: Option<String> = row.try_get(column)?;
    Ok(raw.map(|text| serde_json::from_str(&text)).transpose()?)
}

fn client_from_row(row: &SqliteRow) -> anyhow::Result<Client> {
    // Clients written without metrics read back as never having collaborated
    let stats: ClientStats = json_column(row, "stats")?.unwrap_or_else(ClientStats::empty);
    let segmentation = json_column(row, "segmentation")?
        .unwrap_or_else(|| ClientSegmentation::from_stats(&stats));

    Ok(Client {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        address: row.try_get("address")?,
        notes: row.try_get("notes")?,
        color: row.try_get("color")?,
        email: row.try_get("email")?,
        alternate_emails: json_column(row, "alternate_emails")?.unwrap_or_default(),
        emails: json_column(row, "emails")?.unwrap_or_default(),
        stats,
        segmentation,
    })
}

fn prestation_from_row(row: &SqliteRow) -> anyhow::Result<Prestation> {
    let date: String = row.try_get("date")?;
    let source: String = row.try_get("source")?;

    Ok(Prestation {
        id: row.try_get("id")?,
        client_id: row.try_get("client_id")?,
        client_name: row.try_get("client_name")?,
        date: NaiveDate::parse_from_str(&date, "%Y-%m-%d")?,
        amount: row.try_get("amount")?,
        invoice_number: row.try_get("invoice_number")?,
        reference: row.try_get("reference")?,
        description: row.try_get("description")?,
        source: PrestationSource::from_tag(&source),
    })
}
