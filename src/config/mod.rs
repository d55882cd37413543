// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

mod loader;
mod results;

pub use loader::{
    load_and_validate_config, load_config, validate_config, Config, ConfigError, ExecutorOptions,
    ResultsOptions, Strategy,
};
pub use results::{prepare_result_dir, HowSaving};
