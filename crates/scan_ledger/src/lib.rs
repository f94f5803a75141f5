pub mod config;
pub mod error;
pub mod records;
pub mod scanner;
pub mod server;
pub mod service;
pub mod state;
pub mod targets;
