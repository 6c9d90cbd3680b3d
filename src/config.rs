//! Config file loading
//!
//! relsync reads an optional `.relsync.yml` from the working directory (or
//! an explicit `--config` path). The file can carry the two locators, a
//! default worker width, named table groups, exclusions, and per-table
//! overrides such as a row filter.
//!
//! `$VAR` / `${VAR}` references in the file are replaced with environment
//! variable values at load time. Shell command substitution (`$(...)`) is
//! deliberately not supported; locators must already be resolved strings.

use anyhow::Context;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Per-table option overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TableOptions {
    /// SQL WHERE fragment applied to the source SELECT for this table.
    pub filter: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    pub from: Option<String>,
    pub to: Option<String>,
    pub jobs: Option<usize>,
    #[serde(default)]
    pub schemas: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Named groups expanding to lists of table names.
    #[serde(default)]
    pub groups: HashMap<String, Vec<String>>,
    /// Per-table overrides, keyed by qualified or bare table name.
    #[serde(default)]
    pub tables: HashMap<String, TableOptions>,
    pub fail_fast: Option<bool>,
    pub defer_constraints: Option<bool>,
    pub preserve: Option<bool>,
    pub truncate: Option<bool>,
}

const DEFAULT_PATHS: [&str; 2] = [".relsync.yml", ".relsync.yaml"];

impl ConfigFile {
    /// Load the config file. An explicit path must exist; the default paths
    /// are optional and an empty config is returned when none is present.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<ConfigFile> {
        let path = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => DEFAULT_PATHS
                .iter()
                .map(PathBuf::from)
                .find(|p| p.exists()),
        };
        let Some(path) = path else {
            return Ok(ConfigFile::default());
        };

        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file {path:?}"))?;
        let raw = interpolate_env(&raw);
        let config: ConfigFile = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {path:?}"))?;
        Ok(config)
    }

    /// Look up per-table overrides by qualified name, falling back to the
    /// bare table name.
    pub fn table_options(&self, qualified: &str, bare: &str) -> Option<&TableOptions> {
        self.tables
            .get(qualified)
            .or_else(|| self.tables.get(bare))
    }
}

/// Replace `$VAR` and `${VAR}` with environment variable values. Unset
/// variables are left verbatim so the resulting parse error points at the
/// original reference. `$$` escapes a literal dollar sign.
pub fn interpolate_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some(&(_, '$')) => {
                chars.next();
                out.push('$');
            }
            Some(&(_, '{')) => {
                chars.next();
                let mut name = String::new();
                let mut closed = false;
                for (_, c) in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    name.push(c);
                }
                match std::env::var(&name) {
                    Ok(value) if closed => out.push_str(&value),
                    _ => {
                        out.push_str("${");
                        out.push_str(&name);
                        if closed {
                            out.push('}');
                        }
                    }
                }
            }
            Some(&(_, c)) if c.is_ascii_alphabetic() || c == '_' => {
                let mut name = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        name.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match std::env::var(&name) {
                    Ok(value) => out.push_str(&value),
                    Err(_) => {
                        out.push('$');
                        out.push_str(&name);
                    }
                }
            }
            _ => out.push('$'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolates_set_variables() {
        std::env::set_var("RELSYNC_TEST_HOST", "db.example.com");
        let out = interpolate_env("host: $RELSYNC_TEST_HOST port: ${RELSYNC_TEST_HOST}");
        assert_eq!(out, "host: db.example.com port: db.example.com");
    }

    #[test]
    fn leaves_unset_variables_verbatim() {
        let out = interpolate_env("url: $RELSYNC_TEST_UNSET_XYZ/db");
        assert_eq!(out, "url: $RELSYNC_TEST_UNSET_XYZ/db");
    }

    #[test]
    fn escapes_double_dollar() {
        assert_eq!(interpolate_env("pa$$word"), "pa$word");
    }
}
