pub mod config;
pub mod error;
pub mod provider;
pub mod stream;
