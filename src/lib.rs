// Holocron 隧道编排库
pub mod config;
pub mod error;
pub mod geo;
pub mod ipc;
pub mod models;
pub mod native;
pub mod orchestrator;
pub mod routing;
pub mod system;
pub mod utils;
