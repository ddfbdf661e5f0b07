use std::env;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

fn build_epoch() -> u64 {
    env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs()
        })
}

fn build_host() -> String {
    if let Some(host) = env::var("HOSTNAME").ok().filter(|h| !h.trim().is_empty()) {
        return host;
    }
    Command::new("hostname")
        .output()
        .ok()
        .filter(|out| out.status.success())
        .map(|out| String::from_utf8_lossy(&out.stdout).trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");

    println!("cargo:rustc-env=PPROFTOGGLE_BUILD_TIME=epoch:{}", build_epoch());
    println!("cargo:rustc-env=PPROFTOGGLE_BUILD_HOST={}", build_host());
}
