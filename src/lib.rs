//! Securities borrow fee pricing engine.
//!
//! Exposes the core modules so both the binary and integration tests under
//! `tests/` can build an `AppState` and an `api::router` without going
//! through `main`.

pub mod api;
pub mod audit;
pub mod auth;
pub mod cache;
pub mod clock;
pub mod config;
pub mod decimal;
pub mod engine;
pub mod error;
pub mod middleware;
pub mod models;
pub mod ratelimit;
pub mod repository;
pub mod rng;
pub mod state;
pub mod upstream;
pub mod validation;
