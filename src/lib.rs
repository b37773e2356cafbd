//! # chunk-tracker
//!
//! Chunk dependency tracking for sink delivery.
//!
//! Every chunk submitted to a sink gets a tracker recording which earlier
//! chunks touching the same logical records it has to wait for. Trackers
//! live in a partitioned in-memory map written through to Postgres; queries,
//! aggregations and atomic mutators run next to the data, and the
//! [`service::DependencyTrackingService`] drives registration and the
//! completion cascade on top of them.

pub mod aggregate;
pub mod config;
pub mod db;
pub mod error;
pub mod event;
pub mod grid;
pub mod model;
pub mod processor;
pub mod query;
pub mod service;
pub mod store;
pub mod telemetry;
