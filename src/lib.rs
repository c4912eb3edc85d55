pub mod assistant;
pub mod chat;
pub mod citations;
pub mod config;
pub mod error;
pub mod models;
pub mod run;
pub mod server;
pub mod sources;
pub mod tools;
pub mod web_search;

pub use config::AppConfig;
pub use server::run_server;
