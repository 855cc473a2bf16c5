//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::Result;
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Effective target schema: the configured one, or the source database name.
    pub fn target_schema(&self) -> String {
        self.target
            .schema
            .clone()
            .unwrap_or_else(|| self.source.database.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
source:
  host: mysql.local
  database: shop
  user: root
  password: secret
target:
  host: pg.local
  database: warehouse
  user: postgres
  password: secret
"#;

    #[test]
    fn test_defaults_applied() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.source.port, 3306);
        assert_eq!(config.target.port, 5432);
        assert_eq!(config.target.ssl_mode, "prefer");
        assert_eq!(config.migration.max_connections, 10);
        assert_eq!(config.migration.batch_size, 10_000);
        assert!(!config.migration.migrate_only_data);
        assert_eq!(config.target_schema(), "shop");
    }

    #[test]
    fn test_explicit_target_schema() {
        let yaml = format!("{}  schema: staging\n", MINIMAL);
        let config = Config::from_yaml(&yaml).unwrap();
        assert_eq!(config.target_schema(), "staging");
    }

    #[test]
    fn test_migration_section() {
        let yaml = format!(
            "{}migration:\n  migrate_only_data: true\n  include_tables: [\"user*\"]\n  logs_dir: /tmp/migrate-logs\n",
            MINIMAL
        );
        let config = Config::from_yaml(&yaml).unwrap();
        assert!(config.migration.migrate_only_data);
        assert_eq!(config.migration.include_tables, vec!["user*".to_string()]);
        assert_eq!(
            config.migration.logs_dir,
            std::path::PathBuf::from("/tmp/migrate-logs")
        );
    }

    #[test]
    fn test_missing_section_is_yaml_error() {
        let err = Config::from_yaml("source:\n  host: x\n").unwrap_err();
        assert_eq!(err.exit_code(), crate::error::EXIT_CONFIG_ERROR);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.source.database, "shop");
    }
}
