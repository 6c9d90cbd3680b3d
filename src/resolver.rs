//! Table resolution
//!
//! Turns the positional CLI arguments into the ordered list of tables the
//! batch will sync. An argument names either a group from the config file
//! or a table (`schema.table`, bare names default to `public`). With no
//! arguments, every table in the selected schemas is resolved from the
//! source catalog. Exclusions and per-table filters from the config file
//! are applied here, so the orchestrator consumes a fully materialized
//! list.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::config::ConfigFile;
use crate::db::{quote_ident, DataSource};
use crate::error::SyncError;
use crate::options::EffectiveOptions;

/// One table to sync, immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub schema: String,
    pub name: String,
    /// SQL WHERE fragment applied to the source SELECT.
    pub filter: Option<String>,
}

impl TableDescriptor {
    /// Parse `schema.table` or a bare table name (schema defaults to
    /// `public`).
    pub fn parse(input: &str) -> Result<TableDescriptor, SyncError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(SyncError::Configuration("empty table name".into()));
        }
        let (schema, name) = match input.split_once('.') {
            Some((schema, name)) => (schema, name),
            None => ("public", input),
        };
        if schema.is_empty() || name.is_empty() || name.contains('.') {
            return Err(SyncError::Configuration(format!(
                "malformed table name: {input}"
            )));
        }
        Ok(TableDescriptor {
            schema: schema.to_string(),
            name: name.to_string(),
            filter: None,
        })
    }

    pub fn qualified(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Quoted form for interpolation into SQL.
    pub fn quoted(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.name))
    }
}

impl fmt::Display for TableDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified())
    }
}

pub struct TableResolver<'a> {
    config: &'a ConfigFile,
    options: &'a EffectiveOptions,
}

impl<'a> TableResolver<'a> {
    pub fn new(config: &'a ConfigFile, options: &'a EffectiveOptions) -> TableResolver<'a> {
        TableResolver { config, options }
    }

    /// Resolve the ordered table list for this batch. Queries the source
    /// catalog only when no explicit tables were named.
    pub async fn tables(
        &self,
        args: &[String],
        source: &DataSource,
    ) -> anyhow::Result<Vec<TableDescriptor>> {
        if args.is_empty() {
            let tables = source.user_tables(&self.options.schemas).await?;
            Ok(self.finalize(tables))
        } else {
            Ok(self.resolve_explicit(args)?)
        }
    }

    /// Resolve explicitly named tables and groups without touching the
    /// database.
    pub fn resolve_explicit(&self, args: &[String]) -> Result<Vec<TableDescriptor>, SyncError> {
        Ok(self.finalize(self.expand_args(args)?))
    }

    fn expand_args(&self, args: &[String]) -> Result<Vec<TableDescriptor>, SyncError> {
        let mut tables = Vec::new();
        for name in args.iter().flat_map(|a| a.split(',')) {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            if let Some(members) = self.config.groups.get(name) {
                for member in members {
                    tables.push(TableDescriptor::parse(member)?);
                }
            } else {
                tables.push(TableDescriptor::parse(name)?);
            }
        }
        Ok(tables)
    }

    /// Apply exclusions, per-table overrides, and de-duplication while
    /// preserving order.
    fn finalize(&self, tables: Vec<TableDescriptor>) -> Vec<TableDescriptor> {
        let excluded: HashSet<&str> = self
            .options
            .exclude
            .iter()
            .map(|e| e.trim())
            .filter(|e| !e.is_empty())
            .collect();

        let mut seen = HashSet::new();
        let mut resolved = Vec::new();
        for mut table in tables {
            let qualified = table.qualified();
            if excluded.contains(qualified.as_str()) || excluded.contains(table.name.as_str()) {
                continue;
            }
            if !seen.insert(qualified.clone()) {
                continue;
            }
            if table.filter.is_none() {
                if let Some(overrides) = self.config.table_options(&qualified, &table.name) {
                    table.filter = overrides.filter.clone();
                }
            }
            resolved.push(table);
        }
        resolved
    }
}
