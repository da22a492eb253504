//! Core translation orchestration engine

pub mod batcher;
pub mod cache;
pub mod client;
pub mod collector;
pub mod config;
pub mod context;
pub mod errors;
pub mod health;
pub mod models;
pub mod orchestrator;
pub mod performance;
pub mod provider;
pub mod recovery;
pub mod registry;
pub mod tracker;

#[cfg(test)]
pub(crate) mod test_support;
