// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::config::{Config, Strategy};
use crate::engine::cooperative::CooperativeExecutor;
use crate::engine::distributed::DistributedExecutor;
use crate::engine::hybrid::HybridExecutor;
use crate::engine::sequential::SequentialExecutor;
use crate::traits::PipelineExecutor;

/// Factory for creating pipeline executors from configuration
pub struct ExecutorFactory;

impl ExecutorFactory {
    /// Create a pipeline executor based on the configuration strategy
    pub fn from_config(cfg: &Config) -> Box<dyn PipelineExecutor> {
        let options = &cfg.executor;
        match cfg.strategy {
            Strategy::Sequential => Box::new(SequentialExecutor::new(options.queue_capacity())),
            Strategy::Cooperative => Box::new(
                CooperativeExecutor::new(options.max_workers(), options.queue_capacity())
                    .with_poll_interval(options.poll_interval()),
            ),
            Strategy::Hybrid => {
                let mut executor = HybridExecutor::new(
                    options.max_workers(),
                    options.queue_capacity(),
                    options.worker_command(),
                )
                .with_tick(options.poll_interval())
                .with_watchdog_timeout(options.watchdog_timeout());
                if let Some(limit) = options.memory_limit_mb {
                    executor = executor.with_memory_limit_mb(limit);
                }
                Box::new(executor)
            }
            Strategy::Distributed => Box::new(
                DistributedExecutor::new(options.servers(), options.worker_command())
                    .with_max_outstanding(options.max_outstanding())
                    .with_poll_interval(options.poll_interval()),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_strategy_builds_an_executor() {
        for strategy in ["sequential", "cooperative", "hybrid", "distributed"] {
            let cfg: Config =
                serde_yaml::from_str(&format!("strategy: {}\n", strategy)).unwrap();
            let _executor = ExecutorFactory::from_config(&cfg);
        }
    }
}
