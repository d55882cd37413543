// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Results-directory policy, queried exactly once at startup.
//!
//! The engine itself only needs the resolved directory; the policy governs
//! what happens when a previous run already left results there.

use serde::Deserialize;
use std::io;
use std::path::{Path, PathBuf};

/// Policy when the results directory already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HowSaving {
    /// Create a fresh sibling directory with a numeric suffix.
    NewDir,
    /// Reuse the directory, computing only what is missing.
    Complete,
    /// Reuse the directory, overwriting previous results.
    Recompute,
    /// Defer the decision to the caller-provided resolver (interactive
    /// prompt in the demo binary).
    #[default]
    Ask,
}

/// Make the results directory, if required, and return its path together
/// with the policy actually applied.
///
/// The directory defaults to the input directory's name with `.{postfix}`
/// appended, next to the input. When the directory already exists and the
/// policy is [`HowSaving::Ask`], `resolve_ask` is consulted once; it must
/// return one of the non-`Ask` policies.
pub fn prepare_result_dir(
    path_dir_input: &Path,
    path_saving: Option<&Path>,
    postfix: &str,
    how: HowSaving,
    resolve_ask: impl FnOnce() -> HowSaving,
) -> io::Result<(PathBuf, HowSaving)> {
    let mut path_dir_result = match path_saving {
        Some(path) => path.to_path_buf(),
        None => {
            let name = path_dir_input
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "results".to_string());
            path_dir_input.with_file_name(format!("{}.{}", name, postfix))
        }
    };

    let mut how = how;
    if path_dir_result.exists() {
        if how == HowSaving::Ask {
            how = resolve_ask();
            debug_assert_ne!(how, HowSaving::Ask, "ask resolver must decide a policy");
        }
        if how == HowSaving::NewDir {
            let base = path_dir_result.as_os_str().to_string_lossy().into_owned();
            let mut i = 0;
            while PathBuf::from(format!("{}{}", base, i)).exists() {
                i += 1;
            }
            path_dir_result = PathBuf::from(format!("{}{}", base, i));
        }
    }

    std::fs::create_dir_all(&path_dir_result)?;
    Ok((path_dir_result, how))
}
