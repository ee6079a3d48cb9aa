//! Measure latency and throughput through a set of proxies and sort out the
//! ones worth keeping.

pub mod errors;
pub mod measurements;
pub mod proxy;
pub mod report;
pub mod results;
pub mod scoring;
pub mod speedtest;
pub mod stats;
pub(crate) mod tls;
