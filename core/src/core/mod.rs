pub mod cache;
pub mod config_store;
pub mod engine;
pub mod mutator;
pub mod result_aggregator;
pub mod throttle;
