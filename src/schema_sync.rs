//! Schema dump and apply
//!
//! Runs once, synchronously, before any data job: `pg_dump --schema-only`
//! for the resolved tables on the source, piped into `psql` against the
//! destination. Not parallelized.

use anyhow::{bail, Context};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::info;

use crate::resolver::TableDescriptor;

pub struct SchemaSync<'a> {
    from: &'a str,
    to: &'a str,
    tables: &'a [TableDescriptor],
}

impl<'a> SchemaSync<'a> {
    pub fn new(from: &'a str, to: &'a str, tables: &'a [TableDescriptor]) -> SchemaSync<'a> {
        SchemaSync { from, to, tables }
    }

    pub async fn perform(&self) -> anyhow::Result<()> {
        info!("dumping schema for {} table(s)", self.tables.len());

        let mut dump = Command::new("pg_dump");
        dump.args(["--schema-only", "--no-owner", "--no-privileges"]);
        for table in self.tables {
            dump.arg("--table").arg(table.qualified());
        }
        dump.arg("--dbname").arg(self.from);
        let dump = dump
            .stdin(Stdio::null())
            .output()
            .await
            .context("failed to run pg_dump (is it installed?)")?;
        if !dump.status.success() {
            bail!(
                "pg_dump failed ({}): {}",
                dump.status,
                String::from_utf8_lossy(&dump.stderr).trim()
            );
        }

        let mut apply = Command::new("psql")
            .args(["--quiet", "--no-psqlrc", "--set", "ON_ERROR_STOP=1"])
            .arg("--dbname")
            .arg(self.to)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .context("failed to run psql (is it installed?)")?;
        let Some(mut stdin) = apply.stdin.take() else {
            bail!("failed to open psql stdin");
        };
        stdin
            .write_all(&dump.stdout)
            .await
            .context("failed to feed schema dump to psql")?;
        drop(stdin);

        let apply = apply
            .wait_with_output()
            .await
            .context("failed to wait for psql")?;
        if !apply.status.success() {
            bail!(
                "schema apply failed ({}): {}",
                apply.status,
                String::from_utf8_lossy(&apply.stderr).trim()
            );
        }

        info!("schema applied to destination");
        Ok(())
    }
}
