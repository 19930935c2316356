pub mod audit;
pub mod cli;
pub mod config;
pub mod context;
pub mod database;
pub mod error;
pub mod filter;
pub mod handlers;
pub mod jobs;
pub mod middleware;
pub mod observer;
pub mod testing;
