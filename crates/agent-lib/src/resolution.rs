//! Sampling resolution normalization
//!
//! CloudWatch only accepts a storage resolution of 1 (high resolution) or
//! 60 (standard). Any other granularity is approximated by the poll cadence
//! while publishing one of the two legal tags.

use crate::models::{ResolutionConfig, StorageResolution};
use std::time::Duration;
use tracing::warn;

/// Resolution used when the requested value is unusable
pub const DEFAULT_RESOLUTION_SECS: u32 = 60;

/// Resolution requested by `--hi-res`
pub const HI_RES_RESOLUTION_SECS: u32 = 5;

/// Normalize a raw, user-supplied resolution (seconds)
pub fn from_raw(raw: &str) -> ResolutionConfig {
    match raw.trim().parse::<i64>() {
        Ok(value) => normalize(value),
        Err(_) => {
            warn!(
                requested = %raw,
                fallback_secs = DEFAULT_RESOLUTION_SECS,
                "Resolution is not an integer, using default"
            );
            build(DEFAULT_RESOLUTION_SECS)
        }
    }
}

/// Normalize a requested resolution (seconds) into a legal configuration.
///
/// Never fails: out-of-range values are clamped or replaced with a warning.
pub fn normalize(requested: i64) -> ResolutionConfig {
    let mut seconds = requested;

    if seconds <= 0 {
        warn!(
            requested = requested,
            fallback_secs = DEFAULT_RESOLUTION_SECS,
            "Resolution must be a positive integer, using default"
        );
        seconds = DEFAULT_RESOLUTION_SECS as i64;
    }

    if seconds < 1 {
        warn!(requested = requested, "Resolution below 1 second, clamping");
        seconds = 1;
    }

    if seconds > 60 && seconds % 60 != 0 {
        let rounded = ((seconds / 60) * 60).max(60);
        warn!(
            requested = requested,
            rounded_secs = rounded,
            "Resolutions above 60 seconds must be a multiple of 60, rounding down"
        );
        seconds = rounded;
    }

    let seconds = u32::try_from(seconds).unwrap_or(u32::MAX - u32::MAX % 60);
    build(seconds)
}

fn build(seconds: u32) -> ResolutionConfig {
    let storage_resolution = if seconds < 60 {
        StorageResolution::High
    } else {
        StorageResolution::Standard
    };

    ResolutionConfig {
        requested_seconds: seconds,
        poll_period: Duration::from_millis(u64::from(seconds) * 1000),
        storage_resolution,
    }
}
