pub mod caller;
pub mod chat;
pub mod cli;
pub mod config;
pub mod doctor;
pub mod error;
pub mod message;
pub mod moa;
pub mod profiles;
pub mod provider;
pub mod runner;
pub mod telemetry;
