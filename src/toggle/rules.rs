use anyhow::Context as _;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

const RULES_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::rules");

/// A condition that decides whether the diagnostic endpoint should be up.
///
/// Rules are evaluated on every poll tick, in the order they were configured.
/// An `Err` means the condition could not be determined at all; the toggler
/// treats that as fatal rather than as "no match".
pub trait Rule: Send + Sync {
    /// Descriptive name, used only in logs and error messages.
    fn name(&self) -> String;

    fn matches(&self) -> anyhow::Result<bool>;
}

impl<R: Rule + ?Sized> Rule for Box<R> {
    fn name(&self) -> String {
        (**self).name()
    }

    fn matches(&self) -> anyhow::Result<bool> {
        (**self).matches()
    }
}

impl<R: Rule + ?Sized> Rule for Arc<R> {
    fn name(&self) -> String {
        (**self).name()
    }

    fn matches(&self) -> anyhow::Result<bool> {
        (**self).matches()
    }
}

/// Matches while environment variable `key` is set to exactly `value`.
#[derive(Debug, Clone)]
pub struct EnvVarRule {
    pub key: String,
    pub value: String,
}

impl EnvVarRule {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl Rule for EnvVarRule {
    fn name(&self) -> String {
        format!("envvar key:{} value:{}", self.key, self.value)
    }

    fn matches(&self) -> anyhow::Result<bool> {
        Ok(std::env::var(&self.key).is_ok_and(|v| v == self.value))
    }
}

/// Matches while the root mapping of the YAML file at `path` holds `key`
/// with the string value `value`.
///
/// The file is re-read on every evaluation. An unreadable file or invalid
/// YAML is an error; a missing key or a non-string value is simply no match.
#[derive(Debug, Clone)]
pub struct YamlFileRule {
    pub path: PathBuf,
    pub key: String,
    pub value: String,
}

impl YamlFileRule {
    pub fn new(path: impl Into<PathBuf>, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            key: key.into(),
            value: value.into(),
        }
    }
}

impl Rule for YamlFileRule {
    fn name(&self) -> String {
        format!(
            "yaml key:{} value:{} path:{}",
            self.key,
            self.value,
            self.path.display()
        )
    }

    fn matches(&self) -> anyhow::Result<bool> {
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let root: serde_yaml::Mapping = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse {}", self.path.display()))?;
        let matched = match root.get(self.key.as_str()) {
            Some(serde_yaml::Value::String(s)) => *s == self.value,
            Some(other) => {
                debug!(
                    target: RULES_TARGET,
                    path = %self.path.display(),
                    key = %self.key,
                    value = ?other,
                    "key is not a string; treating as no match"
                );
                false
            }
            None => false,
        };
        Ok(matched)
    }
}

/// In-process switch. Clones share the same flag, so a program can keep one
/// handle and hand another to the toggler.
#[derive(Debug, Clone)]
pub struct FlagRule {
    name: String,
    flag: Arc<AtomicBool>,
}

impl FlagRule {
    pub fn new(name: impl Into<String>, initial: bool) -> Self {
        Self {
            name: name.into(),
            flag: Arc::new(AtomicBool::new(initial)),
        }
    }

    pub fn set(&self, on: bool) {
        self.flag.store(on, Ordering::SeqCst);
    }

    pub fn get(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

impl Rule for FlagRule {
    fn name(&self) -> String {
        format!("flag {}", self.name)
    }

    fn matches(&self) -> anyhow::Result<bool> {
        Ok(self.get())
    }
}
