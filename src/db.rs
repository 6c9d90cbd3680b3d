//! Database connection handling
//!
//! Wraps one `tokio_postgres::Client` per side with the small catalog
//! queries the orchestrator needs (table existence, column lists). The
//! top-level pair is never shared into workers; threaded and process
//! workers each open their own pair for the duration of a job.

use anyhow::Context;
use tokio_postgres::{Client, NoTls};
use tracing::warn;

use crate::resolver::TableDescriptor;

/// One side of the sync: a live connection plus the role name used in
/// error messages ("source" or "destination").
pub struct DataSource {
    role: &'static str,
    client: Client,
}

impl DataSource {
    pub async fn connect(role: &'static str, url: &str) -> anyhow::Result<DataSource> {
        let (client, connection) = tokio_postgres::connect(url, NoTls)
            .await
            .with_context(|| format!("failed to connect to {role} database"))?;

        // Drive the connection until the client is dropped.
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!("{role} connection error: {e}");
            }
        });

        Ok(DataSource { role, client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// "source" or "destination", for error messages.
    pub fn role(&self) -> &'static str {
        self.role
    }

    /// Run one or more statements through the simple query protocol.
    /// Transaction control statements go through here.
    pub async fn batch_execute(&self, sql: &str) -> anyhow::Result<()> {
        self.client
            .batch_execute(sql)
            .await
            .with_context(|| format!("statement failed on {}: {sql}", self.role))
    }

    /// Execute a single statement, returning the affected row count.
    pub async fn execute(&self, sql: &str) -> anyhow::Result<u64> {
        self.client
            .execute(sql, &[])
            .await
            .with_context(|| format!("statement failed on {}: {sql}", self.role))
    }

    pub async fn table_exists(&self, table: &TableDescriptor) -> anyhow::Result<bool> {
        let row = self
            .client
            .query_one("SELECT to_regclass($1) IS NOT NULL", &[&table.quoted()])
            .await
            .with_context(|| format!("failed to check {} on {}", table.qualified(), self.role))?;
        Ok(row.get(0))
    }

    /// Column names of a table in ordinal order.
    pub async fn columns(&self, table: &TableDescriptor) -> anyhow::Result<Vec<String>> {
        let rows = self
            .client
            .query(
                "SELECT column_name FROM information_schema.columns \
                 WHERE table_schema = $1 AND table_name = $2 \
                 ORDER BY ordinal_position",
                &[&table.schema, &table.name],
            )
            .await
            .with_context(|| {
                format!("failed to read columns of {} on {}", table.qualified(), self.role)
            })?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    /// All ordinary tables in the given schemas, in (schema, name) order.
    pub async fn user_tables(&self, schemas: &[String]) -> anyhow::Result<Vec<TableDescriptor>> {
        let rows = self
            .client
            .query(
                "SELECT schemaname, tablename FROM pg_tables \
                 WHERE schemaname = ANY($1) \
                 ORDER BY schemaname, tablename",
                &[&schemas.to_vec()],
            )
            .await
            .with_context(|| format!("failed to list tables on {}", self.role))?;
        Ok(rows
            .iter()
            .map(|r| TableDescriptor {
                schema: r.get(0),
                name: r.get(1),
                filter: None,
            })
            .collect())
    }
}

/// The source/destination handles one execution scope works with. Acquired
/// at batch start for the top-level path and freshly per worker otherwise;
/// connections are released when the pair is dropped at the end of the
/// owning scope.
pub struct ConnectionPair {
    pub source: DataSource,
    pub destination: DataSource,
}

impl ConnectionPair {
    pub async fn connect(from: &str, to: &str) -> anyhow::Result<ConnectionPair> {
        let source = DataSource::connect("source", from).await?;
        let destination = DataSource::connect("destination", to).await?;
        Ok(ConnectionPair {
            source,
            destination,
        })
    }
}

/// Quote an identifier for interpolation into SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
