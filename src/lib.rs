pub mod classifier;
pub mod config;
pub mod fetcher;
pub mod links;
pub mod pipeline;
pub mod relay;
pub mod report;
