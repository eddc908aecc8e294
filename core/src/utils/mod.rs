pub mod classifier;
pub mod scenario;
