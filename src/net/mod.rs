//! Shared networking infrastructure.

pub mod client;

pub use client::{HttpClient, HttpClientBuilder, join_url};
