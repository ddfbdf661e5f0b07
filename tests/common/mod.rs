#![allow(dead_code)]

use pproftoggle::{ListenConfig, Rule};
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub fn loopback() -> ListenConfig {
    ListenConfig::new("127.0.0.1:0".parse().expect("loopback addr"))
}

/// Polls `cond` every 20ms until it holds or `limit` elapses.
pub async fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}

pub async fn wait_until_async<F, Fut>(limit: Duration, mut cond: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if cond().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond().await
}

pub async fn fetch(url: &str) -> Result<(reqwest::StatusCode, String), reqwest::Error> {
    let resp = reqwest::get(url).await?;
    let status = resp.status();
    Ok((status, resp.text().await?))
}

/// Rule whose outcome is driven by the test: off, on, or failing.
#[derive(Clone)]
pub struct ScriptedRule {
    state: Arc<AtomicU8>,
}

impl ScriptedRule {
    const OFF: u8 = 0;
    const ON: u8 = 1;
    const FAIL: u8 = 2;

    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(Self::OFF)),
        }
    }

    pub fn on(&self) {
        self.state.store(Self::ON, Ordering::SeqCst);
    }

    pub fn off(&self) {
        self.state.store(Self::OFF, Ordering::SeqCst);
    }

    pub fn fail(&self) {
        self.state.store(Self::FAIL, Ordering::SeqCst);
    }
}

impl Rule for ScriptedRule {
    fn name(&self) -> String {
        "scripted".to_string()
    }

    fn matches(&self) -> anyhow::Result<bool> {
        match self.state.load(Ordering::SeqCst) {
            Self::ON => Ok(true),
            Self::FAIL => anyhow::bail!("condition source unavailable"),
            _ => Ok(false),
        }
    }
}
