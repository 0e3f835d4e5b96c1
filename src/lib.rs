//! Core library for the funding-arbitrage-detector project.
//!
//! Fetches funding-rate histories from exchanges, keeps them in an
//! in-memory store and ranks perp-perp and perp-spot funding arbitrage
//! opportunities. The binary (`main.rs`) only wires configuration and the
//! pipeline together.

pub mod aggregator;
pub mod arbitrage;
pub mod cex;
pub mod config;
pub mod errors;
pub mod models;
pub mod persistence;
pub mod pipeline;
pub mod stats;
pub mod store;
pub mod utils;
