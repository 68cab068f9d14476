pub mod chat;
pub mod config;
pub mod health;
pub mod history;
pub mod ingest;
pub mod webhook;
