//! Request-logging middleware shared by every route.

pub mod logging;

pub use logging::request_logging_simple;
