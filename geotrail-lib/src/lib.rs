pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod geo;
pub mod indexer;
pub mod location_log;
pub mod pipeline;
pub mod progress;
pub mod timeline;

#[cfg(test)]
mod testing;

pub use coordinator::{LoadCoordinator, LoadState};
pub use pipeline::LoadRequest;
