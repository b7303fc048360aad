use std::path::PathBuf;
use std::str::FromStr;

/// Server settings, read from `BOOKD_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends since the last compaction before the compactor rewrites it.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "bookd".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable numbers fall back to
    /// the default with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            port: parsed(&lookup, "BOOKD_PORT").unwrap_or(defaults.port),
            bind: lookup("BOOKD_BIND").unwrap_or(defaults.bind),
            data_dir: lookup("BOOKD_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            password: lookup("BOOKD_PASSWORD").unwrap_or(defaults.password),
            max_connections: parsed(&lookup, "BOOKD_MAX_CONNECTIONS")
                .unwrap_or(defaults.max_connections),
            compact_threshold: parsed(&lookup, "BOOKD_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            metrics_port: parsed(&lookup, "BOOKD_METRICS_PORT"),
            tls_cert: lookup("BOOKD_TLS_CERT").map(PathBuf::from),
            tls_key: lookup("BOOKD_TLS_KEY").map(PathBuf::from),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("ignoring {key}={raw:?}: not a valid number");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = from_pairs(&[]);
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.listen_addr(), "0.0.0.0:5433");
    }

    #[test]
    fn overrides_are_read() {
        let cfg = from_pairs(&[
            ("BOOKD_PORT", "6000"),
            ("BOOKD_BIND", "127.0.0.1"),
            ("BOOKD_DATA_DIR", "/var/lib/bookd"),
            ("BOOKD_PASSWORD", "s3cret"),
            ("BOOKD_MAX_CONNECTIONS", "8"),
            ("BOOKD_COMPACT_THRESHOLD", "50"),
            ("BOOKD_METRICS_PORT", "9100"),
            ("BOOKD_TLS_CERT", "cert.pem"),
            ("BOOKD_TLS_KEY", "key.pem"),
        ]);
        assert_eq!(cfg.listen_addr(), "127.0.0.1:6000");
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/bookd"));
        assert_eq!(cfg.password, "s3cret");
        assert_eq!(cfg.max_connections, 8);
        assert_eq!(cfg.compact_threshold, 50);
        assert_eq!(cfg.metrics_port, Some(9100));
        assert_eq!(cfg.tls_cert, Some(PathBuf::from("cert.pem")));
        assert_eq!(cfg.tls_key, Some(PathBuf::from("key.pem")));
    }

    #[test]
    fn bad_numbers_fall_back() {
        let cfg = from_pairs(&[("BOOKD_PORT", "http"), ("BOOKD_METRICS_PORT", "-1")]);
        assert_eq!(cfg.port, 5433);
        assert_eq!(cfg.metrics_port, None);
    }
}
