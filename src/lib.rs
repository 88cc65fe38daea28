pub mod access;
pub mod api;
pub mod config;
pub mod diagnosis;
pub mod error;
pub mod metadata;
pub mod server;
pub mod shutdown;
pub mod workspace;
