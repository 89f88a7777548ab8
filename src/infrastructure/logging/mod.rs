//! Logging infrastructure
//!
//! Structured logging using tracing and tracing-subscriber, to stderr and
//! optionally to rotated JSON files.

pub mod logger;

pub use logger::LoggerImpl;
