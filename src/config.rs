use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error)]
#[error("{var}: cannot parse {value:?}")]
pub struct ConfigError {
    var: &'static str,
    value: String,
}

/// Server settings, read from `FLEETDAY_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends after which the compactor rewrites the log.
    pub compact_threshold: u64,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub metrics_port: Option<u16>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            port: parsed(&lookup, "FLEETDAY_PORT")?.unwrap_or(5433),
            bind: lookup("FLEETDAY_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir: lookup("FLEETDAY_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            password: lookup("FLEETDAY_PASSWORD").unwrap_or_else(|| "fleetday".into()),
            max_connections: parsed(&lookup, "FLEETDAY_MAX_CONNECTIONS")?.unwrap_or(256),
            compact_threshold: parsed(&lookup, "FLEETDAY_COMPACT_THRESHOLD")?.unwrap_or(1000),
            tls_cert: lookup("FLEETDAY_TLS_CERT"),
            tls_key: lookup("FLEETDAY_TLS_KEY"),
            metrics_port: parsed(&lookup, "FLEETDAY_METRICS_PORT")?,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("fleetday.wal")
    }
}

fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    let Some(value) = lookup(var) else {
        return Ok(None);
    };
    match value.trim().parse() {
        Ok(v) => Ok(Some(v)),
        Err(_) => Err(ConfigError { var, value }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|var| map.get(var).cloned())
    }

    #[test]
    fn defaults() {
        let c = config(&[]).unwrap();
        assert_eq!(c.addr(), "0.0.0.0:5433");
        assert_eq!(c.wal_path(), PathBuf::from("./data/fleetday.wal"));
        assert_eq!(c.max_connections, 256);
        assert_eq!(c.compact_threshold, 1000);
        assert_eq!(c.metrics_port, None);
        assert!(c.tls_cert.is_none());
    }

    #[test]
    fn overrides() {
        let c = config(&[
            ("FLEETDAY_PORT", "6000"),
            ("FLEETDAY_BIND", "127.0.0.1"),
            ("FLEETDAY_DATA_DIR", "/var/lib/fleetday"),
            ("FLEETDAY_COMPACT_THRESHOLD", "50"),
            ("FLEETDAY_METRICS_PORT", "9100"),
        ])
        .unwrap();
        assert_eq!(c.addr(), "127.0.0.1:6000");
        assert_eq!(c.wal_path(), PathBuf::from("/var/lib/fleetday/fleetday.wal"));
        assert_eq!(c.compact_threshold, 50);
        assert_eq!(c.metrics_port, Some(9100));
    }

    #[test]
    fn bad_number_names_variable() {
        let err = config(&[("FLEETDAY_PORT", "eighty")]).unwrap_err();
        assert!(err.to_string().contains("FLEETDAY_PORT"));
    }
}
