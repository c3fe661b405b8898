pub mod config;
pub mod connector;
pub mod download;
pub mod http_client;
pub mod output;
pub mod prompt;
pub mod throttle;
