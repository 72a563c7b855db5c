//! Decrypt an encrypted HLS playlist payload, resolve its indirection segment
//! URLs to their final CDN locations, and serve the result to a local
//! downloader over loopback HTTP.

pub mod cipher;
pub mod config;
pub mod error;
pub mod hls;
pub mod metrics;
pub mod resolve;
pub mod server;
