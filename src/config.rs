use std::path::PathBuf;
use std::str::FromStr;

use chrono::NaiveTime;
use tracing::warn;

use crate::engine::Settings;

const WAL_FILE: &str = "innkeep.wal";

/// Server settings, read once from `INNKEEP_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    /// WAL appends since the last compaction before the compactor runs.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub overnight_checkout: NaiveTime,
    pub seed_file: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable values fall back to the default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Settings::default();
        Self {
            bind: lookup("INNKEEP_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed(&lookup, "INNKEEP_PORT").unwrap_or(7433),
            data_dir: lookup("INNKEEP_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            max_connections: parsed(&lookup, "INNKEEP_MAX_CONNECTIONS").unwrap_or(256),
            compact_threshold: parsed(&lookup, "INNKEEP_COMPACT_THRESHOLD").unwrap_or(1000),
            metrics_port: parsed(&lookup, "INNKEEP_METRICS_PORT"),
            overnight_checkout: lookup("INNKEEP_OVERNIGHT_CHECKOUT")
                .and_then(|s| parse_time_of_day(&s))
                .unwrap_or(defaults.overnight_checkout),
            seed_file: lookup("INNKEEP_SEED_FILE").map(PathBuf::from),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(WAL_FILE)
    }

    pub fn settings(&self) -> Settings {
        Settings {
            overnight_checkout: self.overnight_checkout,
        }
    }
}

fn parsed<F, T>(lookup: &F, key: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("ignoring unparseable {key}={raw}");
            None
        }
    }
}

/// `HH:MM` or `HH:MM:SS`.
fn parse_time_of_day(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let c = config(&[]);
        assert_eq!(c.listen_addr(), "0.0.0.0:7433");
        assert_eq!(c.wal_path(), PathBuf::from("./data").join("innkeep.wal"));
        assert_eq!(c.max_connections, 256);
        assert_eq!(c.compact_threshold, 1000);
        assert_eq!(c.metrics_port, None);
        assert_eq!(c.overnight_checkout, NaiveTime::from_hms_opt(12, 0, 0).unwrap());
        assert_eq!(c.seed_file, None);
    }

    #[test]
    fn overrides() {
        let c = config(&[
            ("INNKEEP_BIND", "127.0.0.1"),
            ("INNKEEP_PORT", "9000"),
            ("INNKEEP_DATA_DIR", "/var/lib/innkeep"),
            ("INNKEEP_COMPACT_THRESHOLD", "50"),
            ("INNKEEP_METRICS_PORT", "9100"),
            ("INNKEEP_OVERNIGHT_CHECKOUT", "11:30"),
            ("INNKEEP_SEED_FILE", "seed.json"),
        ]);
        assert_eq!(c.listen_addr(), "127.0.0.1:9000");
        assert_eq!(c.wal_path(), PathBuf::from("/var/lib/innkeep/innkeep.wal"));
        assert_eq!(c.compact_threshold, 50);
        assert_eq!(c.metrics_port, Some(9100));
        assert_eq!(
            c.settings().overnight_checkout,
            NaiveTime::from_hms_opt(11, 30, 0).unwrap()
        );
        assert_eq!(c.seed_file, Some(PathBuf::from("seed.json")));
    }

    #[test]
    fn bad_values_fall_back() {
        let c = config(&[
            ("INNKEEP_PORT", "not-a-port"),
            ("INNKEEP_MAX_CONNECTIONS", "-3"),
            ("INNKEEP_OVERNIGHT_CHECKOUT", "noon"),
        ]);
        assert_eq!(c.port, 7433);
        assert_eq!(c.max_connections, 256);
        assert_eq!(c.overnight_checkout, Settings::default().overnight_checkout);
    }
}
