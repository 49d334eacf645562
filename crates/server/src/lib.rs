pub mod config;
pub mod http;
pub mod mail;
mod metrics;
mod rate_limit;
mod render;
