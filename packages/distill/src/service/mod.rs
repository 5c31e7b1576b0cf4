//! Completion service implementations.

pub mod http;

pub use http::HttpCompletionService;
