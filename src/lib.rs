// Library root module for downloads-exporter
// This file defines the public API and module structure: fetchers that poll
// download counts, the aggregator that runs them, and the metrics surface
//
// Numan Thabit 2025 Nov

pub mod aggregator;
pub mod config;
pub mod counter;
pub mod errors;
pub mod fetchers;
pub mod metrics;
pub mod server;
pub mod transport;
