pub mod aws;
pub mod collector;
pub mod config;
pub mod error;
pub mod health;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod retry;
pub mod scheduler;
pub mod snapshot;
pub mod store;

#[cfg(test)]
mod testing;
