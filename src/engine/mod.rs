pub mod cooperative;
pub mod distributed;
pub mod factory;
pub mod hybrid;
pub mod sequential;
#[cfg(test)]
mod integration_tests;

pub use cooperative::CooperativeExecutor;
pub use distributed::{partition_range, DistributedExecutor, SeriesRange};
pub use factory::ExecutorFactory;
pub use hybrid::HybridExecutor;
pub use sequential::SequentialExecutor;
