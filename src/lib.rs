// Re-export modules
pub mod baseline;
pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod features;
pub mod models;
pub mod utils;

#[cfg(test)]
pub mod test_support;
