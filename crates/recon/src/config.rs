use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::Deserialize;

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PassConfig {
    pub name: String,
    /// Identity applied to every fresh record loaded for this pass.
    pub identifying_fields: Vec<String>,
    pub store: StoreConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub input: Option<InputConfig>,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Database path, relative to the config file's directory.
    pub path: String,
    #[serde(default = "default_table")]
    pub table: String,
}

fn default_table() -> String {
    "records".into()
}

// ---------------------------------------------------------------------------
// Retention
// ---------------------------------------------------------------------------

/// Components are summed. An absent `[retention]` table means one day.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionConfig {
    #[serde(default)]
    pub days: i64,
    #[serde(default)]
    pub hours: i64,
    #[serde(default)]
    pub minutes: i64,
    #[serde(default)]
    pub seconds: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            days: 1,
            hours: 0,
            minutes: 0,
            seconds: 0,
        }
    }
}

impl RetentionConfig {
    pub fn period(&self) -> Result<Duration, ConfigError> {
        let overflow = || ConfigError::Validation("retention period overflows".into());
        let total = self
            .days
            .checked_mul(86_400)
            .and_then(|s| s.checked_add(self.hours.checked_mul(3_600)?))
            .and_then(|s| s.checked_add(self.minutes.checked_mul(60)?))
            .and_then(|s| s.checked_add(self.seconds))
            .ok_or_else(overflow)?;
        Duration::try_seconds(total).ok_or_else(overflow)
    }
}

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputConfig {
    #[serde(default)]
    pub file: Option<String>,
    /// When absent, the file extension decides (falling back to JSON).
    #[serde(default)]
    pub format: Option<InputFormat>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputFormat {
    /// A JSON array of objects.
    #[default]
    Json,
    /// One JSON object per line.
    Ndjson,
    /// Header row plus string-valued rows.
    Csv,
}

impl std::fmt::Display for InputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::Ndjson => write!(f, "ndjson"),
            Self::Csv => write!(f, "csv"),
        }
    }
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl PassConfig {
    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        let config: PassConfig =
            toml::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Validation("name must not be empty".into()));
        }

        // An empty identity would make every record identical to every other.
        if self.identifying_fields.is_empty() {
            return Err(ConfigError::Validation(
                "at least one identifying field is required".into(),
            ));
        }
        if let Some(blank) = self.identifying_fields.iter().position(|f| f.trim().is_empty()) {
            return Err(ConfigError::Validation(format!(
                "identifying_fields[{blank}] is blank"
            )));
        }

        if self.store.path.trim().is_empty() {
            return Err(ConfigError::Validation("store.path must not be empty".into()));
        }
        if !is_sql_identifier(&self.store.table) {
            return Err(ConfigError::Validation(format!(
                "store.table '{}' must match [A-Za-z_][A-Za-z0-9_]*",
                self.store.table
            )));
        }

        let period = self.retention.period()?;
        if period < Duration::zero() {
            return Err(ConfigError::Validation(format!(
                "retention period must not be negative, got {}s",
                period.num_seconds()
            )));
        }

        Ok(())
    }

    pub fn retention_period(&self) -> Result<Duration, ConfigError> {
        self.retention.period()
    }

    /// Store path resolved against `base_dir` (normally the config's directory).
    pub fn store_path(&self, base_dir: &Path) -> PathBuf {
        base_dir.join(&self.store.path)
    }

    /// Input file resolved against `base_dir`, if the config names one.
    pub fn input_path(&self, base_dir: &Path) -> Option<PathBuf> {
        self.input
            .as_ref()
            .and_then(|i| i.file.as_ref())
            .map(|f| base_dir.join(f))
    }

    /// Format named in `[input]`, if any.
    pub fn input_format(&self) -> Option<InputFormat> {
        self.input.as_ref().and_then(|i| i.format)
    }
}

pub fn is_sql_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
name = "listings"
identifying_fields = ["id", "site"]

[store]
path = "state.db"

[retention]
hours = 36

[input]
file = "fresh.ndjson"
format = "ndjson"
"#;

    #[test]
    fn parse_valid() {
        let config = PassConfig::from_toml(VALID).unwrap();
        assert_eq!(config.name, "listings");
        assert_eq!(config.identifying_fields, vec!["id", "site"]);
        assert_eq!(config.store.table, "records");
        assert_eq!(config.retention_period().unwrap(), Duration::hours(36));
        assert_eq!(config.input_format(), Some(InputFormat::Ndjson));
        assert_eq!(
            config.input_path(Path::new("/data")),
            Some(PathBuf::from("/data/fresh.ndjson"))
        );
        assert_eq!(config.store_path(Path::new("/data")), PathBuf::from("/data/state.db"));
    }

    #[test]
    fn retention_defaults_to_one_day() {
        let config = PassConfig::from_toml(
            r#"
name = "x"
identifying_fields = ["id"]
[store]
path = "s.db"
"#,
        )
        .unwrap();
        assert_eq!(config.retention_period().unwrap(), Duration::days(1));
        assert_eq!(config.input_format(), None);
        assert!(config.input_path(Path::new(".")).is_none());
    }

    #[test]
    fn retention_components_are_summed() {
        let r = RetentionConfig {
            days: 1,
            hours: 2,
            minutes: 3,
            seconds: 4,
        };
        assert_eq!(r.period().unwrap(), Duration::seconds(86_400 + 7_200 + 180 + 4));
    }

    #[test]
    fn reject_empty_identity() {
        let err = PassConfig::from_toml(
            r#"
name = "x"
identifying_fields = []
[store]
path = "s.db"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("identifying field"));
    }

    #[test]
    fn reject_bad_table_name() {
        let err = PassConfig::from_toml(
            r#"
name = "x"
identifying_fields = ["id"]
[store]
path = "s.db"
table = "records; DROP TABLE x"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("store.table"));
    }

    #[test]
    fn reject_negative_retention() {
        let err = PassConfig::from_toml(
            r#"
name = "x"
identifying_fields = ["id"]
[store]
path = "s.db"
[retention]
days = 0
hours = -1
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("negative"));
    }

    #[test]
    fn reject_unknown_format() {
        let err = PassConfig::from_toml(
            r#"
name = "x"
identifying_fields = ["id"]
[store]
path = "s.db"
[input]
format = "xml"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn sql_identifiers() {
        assert!(is_sql_identifier("records"));
        assert!(is_sql_identifier("_state_2"));
        assert!(!is_sql_identifier("2state"));
        assert!(!is_sql_identifier(""));
        assert!(!is_sql_identifier("a-b"));
    }
}
