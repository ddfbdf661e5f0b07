pub fn build_host() -> &'static str {
    option_env!("PPROFTOGGLE_BUILD_HOST").unwrap_or("unknown")
}

pub fn build_time_raw() -> &'static str {
    option_env!("PPROFTOGGLE_BUILD_TIME").unwrap_or("unknown")
}

pub fn build_time_pretty() -> String {
    format_build_time_pretty(build_time_raw())
}

pub fn format_build_time_pretty(raw: &str) -> String {
    let raw = raw.trim();
    if let Some(epoch) = raw.strip_prefix("epoch:") {
        if let Ok(secs) = epoch.trim().parse::<i64>() {
            // Rendered in UTC so the banner is stable across hosts.
            return chrono::DateTime::<chrono::Utc>::from_timestamp(secs, 0)
                .unwrap_or(chrono::DateTime::<chrono::Utc>::UNIX_EPOCH)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string();
        }
    }

    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return dt
            .with_timezone(&chrono::Utc)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();
    }

    raw.replace('T', " ").trim_end_matches('Z').to_string()
}

pub fn banner() -> String {
    format!(
        "pproftoggle {} (built on {} at {}).",
        env!("CARGO_PKG_VERSION"),
        build_host(),
        build_time_pretty()
    )
}
