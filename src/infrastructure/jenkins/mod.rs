//! Jenkins adapter: REST client and job configuration XML.

pub mod client;
pub mod xml;

pub use client::JenkinsClient;
