use crate::toggle::rules::{EnvVarRule, Rule, YamlFileRule};
use crate::toggle::service::{ListenConfig, DEFAULT_SHUTDOWN_GRACE};
use crate::toggle::telemetry::{LogFormat, LoggingConfig};
use crate::toggle::toggler::{TogglerConfig, MIN_POLL_INTERVAL};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Resolved configuration for the `pproftoggle` binary.
#[derive(Debug, Clone)]
pub struct FileConfig {
    pub endpoint_prefix: String,
    pub poll_interval: Duration,
    pub listen: ListenConfig,
    pub rules: Vec<RuleSpec>,
    pub logging: LoggingConfig,
}

impl FileConfig {
    pub fn toggler_config(&self) -> TogglerConfig {
        let mut cfg = TogglerConfig::new(self.listen.clone())
            .endpoint_prefix(self.endpoint_prefix.clone())
            .poll_interval(self.poll_interval);
        cfg.rules = self.rules.iter().map(RuleSpec::build).collect();
        cfg
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RuleSpec {
    Env { key: String, value: String },
    Yaml { path: PathBuf, key: String, value: String },
}

impl RuleSpec {
    pub fn build(&self) -> Box<dyn Rule> {
        match self {
            RuleSpec::Env { key, value } => Box::new(EnvVarRule::new(key.clone(), value.clone())),
            RuleSpec::Yaml { path, key, value } => {
                Box::new(YamlFileRule::new(path.clone(), key.clone(), value.clone()))
            }
        }
    }
}

// -------- YAML file schema (strict) --------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    endpoint_prefix: String,
    #[serde(default, deserialize_with = "deserialize_duration_opt")]
    poll_interval: Option<Duration>,
    #[serde(default)]
    listen: Option<ListenConfigFile>,
    #[serde(default)]
    rules: Vec<RuleSpec>,
    #[serde(default)]
    logging: Option<LoggingConfigFile>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ListenConfigFile {
    #[serde(default = "default_bind")]
    bind: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default, deserialize_with = "deserialize_duration_opt")]
    request_timeout: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_duration_opt")]
    shutdown_grace: Option<Duration>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct LoggingConfigFile {
    #[serde(default = "default_log_filter")]
    filter: String,
    #[serde(default)]
    format: LogFormat,
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    6060
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn deserialize_duration_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error as _;
    let v = Option::<serde_yaml::Value>::deserialize(deserializer)?;
    match v {
        None | Some(serde_yaml::Value::Null) => Ok(None),
        Some(serde_yaml::Value::Number(n)) => n
            .as_u64()
            .map(|ms| Some(Duration::from_millis(ms)))
            .ok_or_else(|| D::Error::custom("duration must be a positive integer (ms)")),
        Some(serde_yaml::Value::String(s)) => parse_duration_str(&s).map(Some).map_err(D::Error::custom),
        Some(_) => Err(D::Error::custom(
            "duration must be an integer milliseconds or string like \"1s\"",
        )),
    }
}

/// Parses `1500ms`, `10s`, `1m`, `2h` (fractions allowed, e.g. `1.5s`).
pub fn parse_duration_str(s: &str) -> Result<Duration, String> {
    let t = s.trim();
    if t.is_empty() {
        return Err("empty duration".to_string());
    }
    let idx = t
        .char_indices()
        .find(|(_, ch)| !(ch.is_ascii_digit() || *ch == '.'))
        .map(|(i, _)| i)
        .unwrap_or(t.len());
    if idx == 0 {
        return Err(format!("invalid duration: {s}"));
    }
    let (num_s, unit_s) = t.split_at(idx);
    let num: f64 = num_s
        .parse()
        .map_err(|e| format!("invalid duration number {num_s:?}: {e}"))?;
    let unit = unit_s.trim().to_ascii_lowercase();
    let mult: f64 = match unit.as_str() {
        "ms" => 1.0,
        "s" => 1000.0,
        "m" => 60_000.0,
        "h" => 3_600_000.0,
        _ => return Err(format!("unknown duration unit {unit_s:?} (use ms/s/m/h)")),
    };
    Ok(Duration::from_millis((num * mult).round() as u64))
}

pub fn parse_config(raw: &str, base: &Path) -> anyhow::Result<FileConfig> {
    let file_cfg: ConfigFile = serde_yaml::from_str(raw)?;

    let Some(listen) = file_cfg.listen else {
        anyhow::bail!("missing required config section: listen");
    };
    let addr: SocketAddr = format!("{}:{}", listen.bind, listen.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("listen bind/port invalid: {e}"))?;
    anyhow::ensure!(!file_cfg.rules.is_empty(), "rules must not be empty");

    let poll_interval = file_cfg.poll_interval.unwrap_or(MIN_POLL_INTERVAL);

    // Resolve relative rule paths against the config file directory.
    let rules = file_cfg
        .rules
        .into_iter()
        .map(|r| match r {
            RuleSpec::Yaml { path, key, value } if path.is_relative() => RuleSpec::Yaml {
                path: base.join(path),
                key,
                value,
            },
            other => other,
        })
        .collect();

    let logging = file_cfg
        .logging
        .map(|l| LoggingConfig {
            filter: l.filter,
            format: l.format,
        })
        .unwrap_or_default();

    Ok(FileConfig {
        endpoint_prefix: file_cfg.endpoint_prefix,
        poll_interval,
        listen: ListenConfig {
            addr,
            request_timeout: listen.request_timeout,
            shutdown_grace: listen.shutdown_grace.unwrap_or(DEFAULT_SHUTDOWN_GRACE),
        },
        rules,
        logging,
    })
}

pub fn load_config(config_path: &Path) -> anyhow::Result<FileConfig> {
    let raw = std::fs::read_to_string(config_path)
        .map_err(|e| anyhow::anyhow!("failed to read config {}: {e}", config_path.display()))?;
    let base = config_path.parent().unwrap_or_else(|| Path::new("."));
    parse_config(&raw, base)
        .map_err(|e| anyhow::anyhow!("failed to load config {}: {e}", config_path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const FULL: &str = r#"
endpoint_prefix: /extra
poll_interval: 2s
listen:
  bind: 0.0.0.0
  port: 7070
  request_timeout: 1500ms
  shutdown_grace: 1m
rules:
  - type: env
    key: ENABLE_PPROF
    value: "true"
  - type: yaml
    path: toggle.yaml
    key: enablepprof
    value: "true"
logging:
  filter: debug
  format: json
"#;

    #[test]
    fn parses_full_config() {
        let cfg = parse_config(FULL, Path::new("/etc/pproftoggle")).expect("parse");
        assert_eq!(cfg.endpoint_prefix, "/extra");
        assert_eq!(cfg.poll_interval, Duration::from_secs(2));
        assert_eq!(cfg.listen.addr, "0.0.0.0:7070".parse::<SocketAddr>().expect("addr"));
        assert_eq!(cfg.listen.request_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(cfg.listen.shutdown_grace, Duration::from_secs(60));
        assert_eq!(
            cfg.rules,
            vec![
                RuleSpec::Env {
                    key: "ENABLE_PPROF".into(),
                    value: "true".into()
                },
                RuleSpec::Yaml {
                    path: PathBuf::from("/etc/pproftoggle/toggle.yaml"),
                    key: "enablepprof".into(),
                    value: "true".into()
                },
            ]
        );
        assert_eq!(cfg.logging.filter, "debug");
        assert_eq!(cfg.logging.format, LogFormat::Json);
    }

    #[test]
    fn applies_defaults() {
        let raw = "listen: {}\nrules:\n  - type: env\n    key: K\n    value: V\n";
        let cfg = parse_config(raw, Path::new(".")).expect("parse");
        assert_eq!(cfg.endpoint_prefix, "");
        assert_eq!(cfg.poll_interval, MIN_POLL_INTERVAL);
        assert_eq!(cfg.listen.addr, "127.0.0.1:6060".parse::<SocketAddr>().expect("addr"));
        assert_eq!(cfg.listen.request_timeout, None);
        assert_eq!(cfg.listen.shutdown_grace, DEFAULT_SHUTDOWN_GRACE);
        assert_eq!(cfg.logging, LoggingConfig::default());
        assert_eq!(cfg.toggler_config().rules.len(), 1);
    }

    #[test]
    fn absolute_rule_paths_are_kept() {
        let raw = "listen: {}\nrules:\n  - type: yaml\n    path: /srv/flags.yaml\n    key: k\n    value: v\n";
        let cfg = parse_config(raw, Path::new("/etc")).expect("parse");
        assert!(matches!(&cfg.rules[0], RuleSpec::Yaml { path, .. } if path.as_path() == Path::new("/srv/flags.yaml")));
    }

    #[rstest]
    #[case::missing_listen("rules:\n  - type: env\n    key: K\n    value: V\n", "listen")]
    #[case::empty_rules("listen: {}\nrules: []\n", "rules must not be empty")]
    #[case::bad_bind("listen: {bind: 'not an ip'}\nrules:\n  - type: env\n    key: K\n    value: V\n", "bind/port")]
    #[case::unknown_field("listen: {}\nbogus: 1\nrules:\n  - type: env\n    key: K\n    value: V\n", "bogus")]
    #[case::unknown_rule("listen: {}\nrules:\n  - type: file\n    key: K\n    value: V\n", "file")]
    #[case::bad_duration("poll_interval: 5 parsecs\nlisten: {}\nrules:\n  - type: env\n    key: K\n    value: V\n", "duration")]
    fn rejects_invalid_configs(#[case] raw: &str, #[case] needle: &str) {
        let err = parse_config(raw, Path::new(".")).expect_err("should fail");
        let msg = format!("{err:#}");
        assert!(msg.contains(needle), "{msg:?} should mention {needle:?}");
    }

    #[rstest]
    #[case("1500ms", Duration::from_millis(1500))]
    #[case("10s", Duration::from_secs(10))]
    #[case("1.5s", Duration::from_millis(1500))]
    #[case("2m", Duration::from_secs(120))]
    #[case(" 1h ", Duration::from_secs(3600))]
    fn parses_durations(#[case] raw: &str, #[case] expected: Duration) {
        assert_eq!(parse_duration_str(raw).expect("parse"), expected);
    }

    #[test]
    fn durations_need_a_unit() {
        assert!(parse_duration_str("3").is_err());
        assert!(parse_duration_str("").is_err());
        assert!(parse_duration_str("s").is_err());
    }

    #[test]
    fn integer_durations_are_milliseconds() {
        let raw = "poll_interval: 2500\nlisten: {}\nrules:\n  - type: env\n    key: K\n    value: V\n";
        let cfg = parse_config(raw, Path::new(".")).expect("parse");
        assert_eq!(cfg.poll_interval, Duration::from_millis(2500));
    }

    #[test]
    fn load_config_reports_missing_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let err = load_config(&dir.path().join("nope.yaml")).expect_err("missing");
        assert!(err.to_string().contains("failed to read config"));
    }
}
