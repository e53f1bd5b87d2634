pub mod aggregator;
pub mod client;
pub mod config;
pub mod config_merge;
pub mod config_validation;
pub mod context;
pub mod errors;
pub mod invoker;
pub mod metrics;
pub mod percentiles;
pub mod plan;
pub mod pool;
pub mod report;
pub mod scheduler;
pub mod think_time;
pub mod utils;
pub mod yaml_config;
