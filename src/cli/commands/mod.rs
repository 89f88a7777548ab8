//! CLI command implementations.

pub mod bot;
pub mod heads;
pub mod pipeline;
pub mod process;
pub mod register;
pub mod serve;
