// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Small helpers shared by the executors.

use std::time::Instant;

/// Resident memory of the current process in megabytes, read from
/// `/proc/self/status` (`VmRSS`). Returns 0.0 where procfs is unavailable,
/// which disables memory-pressure handling rather than failing the run.
pub fn memory_usage_mb() -> f64 {
    let Ok(status) = std::fs::read_to_string("/proc/self/status") else {
        return 0.0;
    };
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            let kb: f64 = rest
                .trim()
                .trim_end_matches("kB")
                .trim()
                .parse()
                .unwrap_or(0.0);
            return kb / 1024.0;
        }
    }
    0.0
}

/// Seconds elapsed since `since`, as the fractional value used in progress
/// log lines.
pub fn elapsed_secs(since: Instant) -> f64 {
    since.elapsed().as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_usage_is_nonnegative() {
        assert!(memory_usage_mb() >= 0.0);
    }

    #[test]
    fn elapsed_increases() {
        let t0 = Instant::now();
        let first = elapsed_secs(t0);
        let second = elapsed_secs(t0);
        assert!(second >= first);
        assert!(first >= 0.0);
    }
}
