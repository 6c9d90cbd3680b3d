//! Per-table data transfer
//!
//! Copies one table's rows from source to destination over a COPY pipe:
//! `COPY (SELECT shared columns [WHERE filter]) TO STDOUT` on the source,
//! streamed into `COPY table (shared columns) FROM STDIN` on the
//! destination. Only the column intersection of the two sides is copied;
//! a table with no shared columns is not syncable.
//!
//! Destination rows are deleted (or truncated with `--truncate`) before
//! the copy. With `--preserve` the copy lands in a temp table instead and
//! existing rows are kept via `INSERT ... ON CONFLICT DO NOTHING`.

use anyhow::{bail, Context};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio_postgres::CopyInSink;
use tracing::debug;

use crate::db::{quote_ident, ConnectionPair, DataSource};
use crate::options::EffectiveOptions;
use crate::resolver::TableDescriptor;

pub struct TableSyncer<'a> {
    table: &'a TableDescriptor,
    options: &'a EffectiveOptions,
}

impl<'a> TableSyncer<'a> {
    pub fn new(table: &'a TableDescriptor, options: &'a EffectiveOptions) -> TableSyncer<'a> {
        TableSyncer { table, options }
    }

    /// Columns present on both sides, in source ordinal order. An empty
    /// result means the table has no correspondence between the two
    /// databases and its job should be dropped.
    pub async fn shared_fields(&self, pair: &ConnectionPair) -> anyhow::Result<Vec<String>> {
        let source = pair.source.columns(self.table).await?;
        let destination = pair.destination.columns(self.table).await?;
        Ok(source
            .into_iter()
            .filter(|c| destination.contains(c))
            .collect())
    }

    /// Advisory warnings shown before dispatch.
    pub async fn notes(&self, pair: &ConnectionPair) -> anyhow::Result<Vec<String>> {
        let source = pair.source.columns(self.table).await?;
        let destination = pair.destination.columns(self.table).await?;

        let mut notes = Vec::new();
        let only_source: Vec<&str> = source
            .iter()
            .filter(|c| !destination.contains(c))
            .map(|c| c.as_str())
            .collect();
        if !only_source.is_empty() {
            notes.push(format!(
                "{}: columns only on source are not copied: {}",
                self.table,
                only_source.join(", ")
            ));
        }
        let only_destination: Vec<&str> = destination
            .iter()
            .filter(|c| !source.contains(c))
            .map(|c| c.as_str())
            .collect();
        if !only_destination.is_empty() {
            notes.push(format!(
                "{}: columns only on destination are left untouched: {}",
                self.table,
                only_destination.join(", ")
            ));
        }
        Ok(notes)
    }

    /// Copy the table, returning the number of rows written.
    pub async fn sync(&self, pair: &ConnectionPair) -> anyhow::Result<u64> {
        let fields = self.shared_fields(pair).await?;
        if fields.is_empty() {
            bail!(
                "{} has no columns in common between source and destination",
                self.table
            );
        }
        let column_list = fields
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let target = self.table.quoted();

        let select = match &self.table.filter {
            Some(filter) => format!("SELECT {column_list} FROM {target} WHERE {filter}"),
            None => format!("SELECT {column_list} FROM {target}"),
        };
        let copy_out = format!("COPY ({select}) TO STDOUT");

        if self.options.preserve {
            // Land the copy in a temp table, then keep existing rows.
            let staging = quote_ident(&format!("relsync_staging_{}", self.table.name));
            pair.destination
                .execute(&format!(
                    "CREATE TEMP TABLE {staging} (LIKE {target} INCLUDING DEFAULTS)"
                ))
                .await?;
            let copied = copy_stream(
                &pair.source,
                &pair.destination,
                &copy_out,
                &format!("COPY {staging} ({column_list}) FROM STDIN"),
            )
            .await?;
            let inserted = pair
                .destination
                .execute(&format!(
                    "INSERT INTO {target} ({column_list}) \
                     SELECT {column_list} FROM {staging} ON CONFLICT DO NOTHING"
                ))
                .await?;
            pair.destination
                .execute(&format!("DROP TABLE {staging}"))
                .await?;
            debug!(
                "{}: staged {copied} rows, inserted {inserted} new",
                self.table
            );
            return Ok(inserted);
        }

        if self.options.truncate {
            pair.destination
                .execute(&format!("TRUNCATE {target}"))
                .await?;
        } else {
            pair.destination
                .execute(&format!("DELETE FROM {target}"))
                .await?;
        }

        copy_stream(
            &pair.source,
            &pair.destination,
            &copy_out,
            &format!("COPY {target} ({column_list}) FROM STDIN"),
        )
        .await
    }
}

/// Pipe a COPY OUT stream on the source into a COPY IN sink on the
/// destination, returning the row count reported by the destination.
async fn copy_stream(
    source: &DataSource,
    destination: &DataSource,
    copy_out: &str,
    copy_in: &str,
) -> anyhow::Result<u64> {
    let stream = source
        .client()
        .copy_out(copy_out)
        .await
        .context("failed to start COPY from source")?;
    let sink: CopyInSink<Bytes> = destination
        .client()
        .copy_in(copy_in)
        .await
        .context("failed to start COPY to destination")?;
    futures::pin_mut!(stream, sink);

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("error reading COPY data from source")?;
        sink.send(chunk)
            .await
            .context("error writing COPY data to destination")?;
    }

    let rows = sink.finish().await.context("error completing COPY")?;
    Ok(rows)
}
