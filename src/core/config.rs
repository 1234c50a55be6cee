//! Store configuration
//!
//! Loaded from TOML, then overridden from `ZEROSTORE_*` environment
//! variables:
//!
//! | variable               | field                                        |
//! |------------------------|----------------------------------------------|
//! | `ZEROSTORE_PATH`       | `path`                                       |
//! | `ZEROSTORE_MAX_TABLES` | `max_tables`                                 |
//! | `ZEROSTORE_MAP_SIZE`   | `map_size`                                   |
//! | `ZEROSTORE_DURABLE`    | `durable`                                    |
//! | `ZEROSTORE_TABLES`     | `tables`, as `name[:aligned\|:unaligned],...` |

use crate::core::alignment::validate_alignment;
use crate::core::env::{EnvOptions, TableMode, MAX_TABLES};
use crate::core::error::StoreError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "ZEROSTORE_";

fn default_max_tables() -> u32 {
    EnvOptions::default().max_tables
}

fn default_map_size() -> u64 {
    EnvOptions::default().map_size
}

fn default_true() -> bool {
    true
}

fn default_record_align() -> usize {
    TableMode::DEFAULT_RECORD_ALIGN
}

/// One table opened at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConfig {
    pub name: String,

    /// Write through reservations and let readers skip the alignment check
    #[serde(default = "default_true")]
    pub alignment_guaranteed: bool,

    /// Payload alignment for alignment-guaranteed tables
    #[serde(default = "default_record_align")]
    pub record_align: usize,
}

impl TableConfig {
    pub fn aligned(name: impl Into<String>) -> Self {
        TableConfig {
            name: name.into(),
            alignment_guaranteed: true,
            record_align: TableMode::DEFAULT_RECORD_ALIGN,
        }
    }

    pub fn unaligned(name: impl Into<String>) -> Self {
        TableConfig {
            alignment_guaranteed: false,
            ..Self::aligned(name)
        }
    }

    pub fn mode(&self) -> TableMode {
        if self.alignment_guaranteed {
            TableMode::Aligned {
                record_align: self.record_align,
            }
        } else {
            TableMode::Unaligned
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Environment directory
    pub path: PathBuf,

    #[serde(default = "default_max_tables")]
    pub max_tables: u32,

    #[serde(default = "default_map_size")]
    pub map_size: u64,

    #[serde(default = "default_true")]
    pub durable: bool,

    #[serde(default)]
    pub tables: Vec<TableConfig>,
}

impl StoreConfig {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let defaults = EnvOptions::default();
        StoreConfig {
            path: path.as_ref().to_path_buf(),
            max_tables: defaults.max_tables,
            map_size: defaults.map_size,
            durable: defaults.durable,
            tables: Vec::new(),
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, StoreError> {
        let config: StoreConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Load `path` if given (else start from defaults rooted at `./data`),
    /// then apply the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, StoreError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::new("data"),
        };
        config.apply_env(std::env::vars())?;
        Ok(config)
    }

    /// Apply `ZEROSTORE_*` overrides from `vars`.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<(), StoreError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            let Some(field) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match field {
                "PATH" => self.path = PathBuf::from(value),
                "MAX_TABLES" => self.max_tables = parse_var(&name, &value)?,
                "MAP_SIZE" => self.map_size = parse_var(&name, &value)?,
                "DURABLE" => self.durable = parse_bool(&name, &value)?,
                "TABLES" => self.tables = parse_tables(&value)?,
                _ => {}
            }
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        if self.max_tables > MAX_TABLES {
            return Err(StoreError::InvalidConfig(format!(
                "max_tables {} exceeds {}",
                self.max_tables, MAX_TABLES
            )));
        }
        self.env_options().validate()?;

        let mut seen = HashSet::new();
        for table in &self.tables {
            if table.name.is_empty() {
                return Err(StoreError::InvalidConfig("table name is empty".into()));
            }
            if !seen.insert(table.name.as_str()) {
                return Err(StoreError::InvalidConfig(format!(
                    "table {:?} listed twice",
                    table.name
                )));
            }
            if table.alignment_guaranteed {
                validate_alignment(table.record_align)?;
            }
        }
        Ok(())
    }

    pub fn env_options(&self) -> EnvOptions {
        EnvOptions {
            max_tables: self.max_tables,
            map_size: self.map_size,
            durable: self.durable,
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, StoreError> {
    value
        .trim()
        .parse()
        .map_err(|_| StoreError::InvalidConfig(format!("{name}: invalid value {value:?}")))
}

fn parse_bool(name: &str, value: &str) -> Result<bool, StoreError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(StoreError::InvalidConfig(format!(
            "{name}: invalid boolean {value:?}"
        ))),
    }
}

fn parse_tables(value: &str) -> Result<Vec<TableConfig>, StoreError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| match item.split_once(':') {
            None => Ok(TableConfig::aligned(item)),
            Some((name, "aligned")) => Ok(TableConfig::aligned(name)),
            Some((name, "unaligned")) => Ok(TableConfig::unaligned(name)),
            Some((_, mode)) => Err(StoreError::InvalidConfig(format!(
                "{ENV_PREFIX}TABLES: unknown table mode {mode:?}"
            ))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_toml_defaults() {
        let config = StoreConfig::from_toml_str(
            r#"
            path = "/var/lib/graph"

            [[tables]]
            name = "nodes"

            [[tables]]
            name = "edges"
            alignment_guaranteed = false
            "#,
        )
        .unwrap();

        assert_eq!(config.path, PathBuf::from("/var/lib/graph"));
        assert_eq!(config.max_tables, 10);
        assert!(config.durable);
        assert_eq!(config.tables[0].mode(), TableMode::aligned());
        assert_eq!(config.tables[1].mode(), TableMode::Unaligned);
    }

    #[test]
    fn test_toml_parse_error() {
        assert!(matches!(
            StoreConfig::from_toml_str("path = "),
            Err(StoreError::Config(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = StoreConfig::new("/tmp/a");
        config
            .apply_env(vars(&[
                ("ZEROSTORE_PATH", "/srv/store"),
                ("ZEROSTORE_MAX_TABLES", "4"),
                ("ZEROSTORE_MAP_SIZE", "1048576"),
                ("ZEROSTORE_DURABLE", "off"),
                ("ZEROSTORE_TABLES", "nodes, edges:unaligned ,props:aligned"),
                ("HOME", "/root"),
            ]))
            .unwrap();

        assert_eq!(config.path, PathBuf::from("/srv/store"));
        assert_eq!(config.max_tables, 4);
        assert_eq!(config.map_size, 1 << 20);
        assert!(!config.durable);
        assert_eq!(
            config.tables,
            vec![
                TableConfig::aligned("nodes"),
                TableConfig::unaligned("edges"),
                TableConfig::aligned("props"),
            ]
        );
    }

    #[test]
    fn test_bad_env_values() {
        let mut config = StoreConfig::new("/tmp/a");
        assert!(config
            .apply_env(vars(&[("ZEROSTORE_MAX_TABLES", "lots")]))
            .is_err());
        assert!(config
            .apply_env(vars(&[("ZEROSTORE_TABLES", "nodes:sideways")]))
            .is_err());
        assert!(config
            .apply_env(vars(&[("ZEROSTORE_DURABLE", "maybe")]))
            .is_err());
    }

    #[test]
    fn test_validation() {
        let mut config = StoreConfig::new("/tmp/a");
        config.tables = vec![TableConfig::aligned("t"), TableConfig::unaligned("t")];
        assert!(matches!(config.validate(), Err(StoreError::InvalidConfig(_))));

        config.tables = vec![TableConfig {
            record_align: 24,
            ..TableConfig::aligned("t")
        }];
        assert!(matches!(
            config.validate(),
            Err(StoreError::InvalidAlignment(24))
        ));

        config.tables.clear();
        config.max_tables = 0;
        assert!(config.validate().is_ok());

        config.max_tables = MAX_TABLES + 1;
        assert!(matches!(config.validate(), Err(StoreError::InvalidConfig(_))));

        config.max_tables = 4;
        config.map_size = u64::MAX - 1;
        assert!(matches!(config.validate(), Err(StoreError::InvalidConfig(_))));
    }

    #[test]
    fn test_env_options() {
        let mut config = StoreConfig::new("/tmp/a");
        config.max_tables = 3;
        config.durable = false;
        let options = config.env_options();
        assert_eq!(options.max_tables, 3);
        assert!(!options.durable);
    }
}
