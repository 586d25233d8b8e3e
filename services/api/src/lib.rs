//! services/api/src/lib.rs
//!
//! The HTTP service: configuration, adapters for the core ports, and the axum web layer.

pub mod adapters;
pub mod config;
pub mod error;
pub mod web;
