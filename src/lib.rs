//! UDP metrics collector.
//!
//! Clients send fire-and-forget datagrams naming a metric, a count and an
//! aggregation kind. The collector reduces samples per name over fixed
//! windows and hands each closed window to a set of output sinks.

pub mod aggregate;
pub mod collector;
pub mod config;
pub mod export;
pub mod ingest;
pub mod protocol;
pub mod sink;
