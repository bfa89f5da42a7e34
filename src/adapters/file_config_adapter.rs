//! INI file configuration adapter.
//!
//! Keys are case-sensitive so `[params]` entries can name script inputs by
//! their display title.

use crate::ports::config_port::ConfigPort;
use configparser::ini::Ini;
use std::path::Path;

pub struct FileConfigAdapter {
    config: Ini,
}

impl FileConfigAdapter {
    pub fn from_file<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let mut config = Ini::new_cs();
        config.load(path).map_err(std::io::Error::other)?;
        Ok(Self { config })
    }

    pub fn from_string(content: &str) -> Result<Self, String> {
        let mut config = Ini::new_cs();
        config.read(content.to_string())?;
        Ok(Self { config })
    }
}

impl ConfigPort for FileConfigAdapter {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.config.get(section, key)
    }

    fn keys(&self, section: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .config
            .get_map_ref()
            .get(section)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    const SAMPLE: &str = r#"
[backtest]
initial_capital = 25000.5
commission_pct = 0.1
mode = magnifier
loop_budget = 500
start = 2024-01-01

[params]
Fast Length = 9
slow = 30
"#;

    #[test]
    fn from_string_parses_sections() {
        let adapter = FileConfigAdapter::from_string(SAMPLE).unwrap();
        assert_eq!(
            adapter.get_string("backtest", "mode"),
            Some("magnifier".to_string())
        );
        assert_eq!(
            adapter.get_string("backtest", "initial_capital"),
            Some("25000.5".to_string())
        );
        assert_eq!(adapter.keys("backtest").len(), 5);
    }

    #[test]
    fn keys_preserve_case() {
        let adapter = FileConfigAdapter::from_string(SAMPLE).unwrap();
        assert_eq!(adapter.keys("params"), vec!["Fast Length", "slow"]);
        assert_eq!(adapter.get_string("params", "Fast Length"), Some("9".to_string()));
        assert!(adapter.keys("missing").is_empty());
    }

    #[test]
    fn get_string_returns_none_for_missing_key() {
        let adapter = FileConfigAdapter::from_string("[backtest]\ninitial_capital = 100\n").unwrap();
        assert_eq!(adapter.get_string("backtest", "missing"), None);
        assert_eq!(adapter.get_string("missing_section", "key"), None);
    }

    #[test]
    fn values_are_trimmed_but_not_interpreted() {
        let adapter = FileConfigAdapter::from_string("[backtest]\nmax_trades =   abc  \n").unwrap();
        assert_eq!(adapter.get_string("backtest", "max_trades"), Some("abc".to_string()));
    }

    #[test]
    fn from_file_reads_config() {
        let file = create_temp_config("[backtest]\nslippage_pct = 0.05\n");
        let adapter = FileConfigAdapter::from_file(file.path()).unwrap();
        assert_eq!(
            adapter.get_string("backtest", "slippage_pct"),
            Some("0.05".to_string())
        );
    }

    #[test]
    fn from_file_returns_error_for_missing_file() {
        let result = FileConfigAdapter::from_file("/nonexistent/path/config.ini");
        assert!(result.is_err());
    }
}
