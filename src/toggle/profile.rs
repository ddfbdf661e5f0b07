//! CPU profile capture for the `profile` endpoint.

use std::time::Duration;
use thiserror::Error;

#[cfg(unix)]
static CAPTURE: std::sync::Mutex<()> = std::sync::Mutex::new(());

pub const DEFAULT_PROFILE_SECONDS: u64 = 30;

/// Sampling rate in Hz.
pub const PROFILE_FREQUENCY: i32 = 100;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("a cpu profile is already being captured")]
    Busy,
    #[error("profile duration must be at least one second")]
    TooShort,
    #[error("profile duration {requested:?} exceeds the request timeout {limit:?}")]
    ExceedsTimeout { requested: Duration, limit: Duration },
    #[cfg(unix)]
    #[error("cpu profiler failed: {0}")]
    Profiler(#[from] pprof::Error),
    #[error("cpu profiling is not supported on this platform")]
    Unsupported,
    #[error("profiling task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Checks a requested duration against the server's per-request limit.
pub fn validate_duration(seconds: u64, limit: Option<Duration>) -> Result<Duration, ProfileError> {
    if seconds == 0 {
        return Err(ProfileError::TooShort);
    }
    let requested = Duration::from_secs(seconds);
    match limit {
        Some(limit) if requested >= limit => Err(ProfileError::ExceedsTimeout { requested, limit }),
        _ => Ok(requested),
    }
}

/// Samples the whole process for `duration` and returns an uncompressed
/// pprof protobuf. Only one capture runs at a time; a concurrent request
/// fails with [`ProfileError::Busy`].
pub async fn capture_cpu_profile(duration: Duration) -> Result<Vec<u8>, ProfileError> {
    // The profiler guard is tied to the sampling thread, so keep it off the runtime.
    tokio::task::spawn_blocking(move || capture_blocking(duration)).await?
}

#[cfg(unix)]
fn capture_blocking(duration: Duration) -> Result<Vec<u8>, ProfileError> {
    use pprof::protos::Message as _;

    let _capturing = match CAPTURE.try_lock() {
        Ok(guard) => guard,
        Err(std::sync::TryLockError::WouldBlock) => return Err(ProfileError::Busy),
        // A panicked capture leaves nothing behind worth protecting.
        Err(std::sync::TryLockError::Poisoned(p)) => p.into_inner(),
    };

    let guard = pprof::ProfilerGuardBuilder::default()
        .frequency(PROFILE_FREQUENCY)
        .build()?;
    std::thread::sleep(duration);
    let profile = guard.report().build()?.pprof()?;
    Ok(profile.encode_to_vec())
}

#[cfg(not(unix))]
fn capture_blocking(_duration: Duration) -> Result<Vec<u8>, ProfileError> {
    Err(ProfileError::Unsupported)
}
