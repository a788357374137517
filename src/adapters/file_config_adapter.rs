//! INI file configuration adapter.

use crate::domain::error::StocksimError;
use crate::ports::config_port::ConfigPort;
use configparser::ini::Ini;
use std::path::Path;

pub struct FileConfigAdapter {
    config: Ini,
}

impl FileConfigAdapter {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, StocksimError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(StocksimError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("config file {} not found", path.display()),
            )));
        }
        let mut config = Ini::new();
        config
            .load(path)
            .map_err(|reason| StocksimError::ConfigParse {
                file: path.display().to_string(),
                reason,
            })?;
        Ok(Self { config })
    }

    pub fn from_string(content: &str) -> Result<Self, StocksimError> {
        let mut config = Ini::new();
        config
            .read(content.to_string())
            .map_err(|reason| StocksimError::ConfigParse {
                file: "<string>".into(),
                reason,
            })?;
        Ok(Self { config })
    }

    fn parse_bool(value: &str) -> Option<bool> {
        match value.to_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Some(true),
            "false" | "no" | "off" | "0" => Some(false),
            _ => None,
        }
    }
}

impl ConfigPort for FileConfigAdapter {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.config.get(section, key)
    }

    fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
        self.config
            .getint(section, key)
            .ok()
            .flatten()
            .unwrap_or(default)
    }

    fn get_double(&self, section: &str, key: &str, default: f64) -> f64 {
        self.config
            .getfloat(section, key)
            .ok()
            .flatten()
            .unwrap_or(default)
    }

    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        self.config
            .get(section, key)
            .as_ref()
            .and_then(|v| Self::parse_bool(v))
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
[database]
backend = sqlite
path = /var/lib/stocksim/ledger.db
pool_size = 4

[portfolio]
starting_balance = 25000.5
default_name = Savings

[scheduler]
alert_interval_secs = 60
run_dividends = yes

[logging]
level = debug
"#;

    #[test]
    fn reads_every_section() {
        let adapter = FileConfigAdapter::from_string(SAMPLE).unwrap();
        assert_eq!(
            adapter.get_string("database", "path"),
            Some("/var/lib/stocksim/ledger.db".to_string())
        );
        assert_eq!(adapter.get_int("database", "pool_size", 1), 4);
        assert_eq!(
            adapter.get_double("portfolio", "starting_balance", 0.0),
            25000.5
        );
        assert_eq!(
            adapter.get_string("portfolio", "default_name"),
            Some("Savings".to_string())
        );
        assert_eq!(adapter.get_int("scheduler", "alert_interval_secs", 300), 60);
        assert!(adapter.get_bool("scheduler", "run_dividends", false));
        assert_eq!(adapter.get_string("logging", "level"), Some("debug".into()));
    }

    #[test]
    fn missing_keys_fall_back() {
        let adapter = FileConfigAdapter::from_string(SAMPLE).unwrap();
        assert_eq!(adapter.get_string("database", "conninfo"), None);
        assert_eq!(adapter.get_string("nope", "key"), None);
        assert_eq!(
            adapter.get_int("scheduler", "dividend_interval_secs", 86_400),
            86_400
        );
        assert_eq!(adapter.get_double("portfolio", "missing", 9.5), 9.5);
        assert!(adapter.get_bool("scheduler", "missing", true));
    }

    #[test]
    fn non_numeric_values_fall_back() {
        let adapter =
            FileConfigAdapter::from_string("[scheduler]\nalert_interval_secs = soon\n[portfolio]\nstarting_balance = lots\n")
                .unwrap();
        assert_eq!(adapter.get_int("scheduler", "alert_interval_secs", 300), 300);
        assert_eq!(
            adapter.get_double("portfolio", "starting_balance", 10_000.0),
            10_000.0
        );
    }

    #[test]
    fn bool_spellings() {
        let adapter = FileConfigAdapter::from_string(
            "[flags]\na = true\nb = on\nc = 0\nd = No\ne = maybe\n",
        )
        .unwrap();
        assert!(adapter.get_bool("flags", "a", false));
        assert!(adapter.get_bool("flags", "b", false));
        assert!(!adapter.get_bool("flags", "c", true));
        assert!(!adapter.get_bool("flags", "d", true));
        assert!(adapter.get_bool("flags", "e", true));
    }

    #[test]
    fn require_string_reports_missing_key() {
        let adapter = FileConfigAdapter::from_string("[database]\npath =\n").unwrap();
        assert!(matches!(
            adapter.require_string("database", "path"),
            Err(StocksimError::ConfigMissing { .. })
        ));
    }

    #[test]
    fn from_file_reads_config() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "[database]\npath = ledger.db\n").unwrap();
        let adapter = FileConfigAdapter::from_file(file.path()).unwrap();
        assert_eq!(
            adapter.get_string("database", "path"),
            Some("ledger.db".to_string())
        );
    }

    #[test]
    fn from_file_missing_is_io_error() {
        let result = FileConfigAdapter::from_file("/nonexistent/path/stocksim.ini");
        assert!(matches!(result, Err(StocksimError::Io(_))));
    }
}
