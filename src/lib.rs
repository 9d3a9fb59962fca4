pub mod accounts;
pub mod app;
pub mod billing;
pub mod catalog;
pub mod config;
pub mod conversations;
pub mod error;
pub mod handlers;
pub mod providers;
pub mod upstream;
pub mod usage;
pub mod wire;
