pub mod config;
pub mod engine;
pub mod errors;
pub mod gates;
pub mod graph;
pub mod init;
pub mod logging;
pub mod stages;
pub mod store;
pub mod ui;
