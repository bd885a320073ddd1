// Runtime configuration
pub mod config;

// Error taxonomy
pub mod error;

// Multi-account credential storage and resolution
pub mod credentials;

// OAuth flows against the identity provider
pub mod oauth;

// Authenticated API client
pub mod client;

pub use client::YouTubeClient;
pub use error::{Error, Result};
