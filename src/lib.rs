pub mod admin;
pub mod auth;
pub mod calendar;
pub mod config;
pub mod engine;
pub mod forms;
pub mod http;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reaper;
pub mod render;
pub mod repository;
pub mod session;
pub mod wal;
pub mod workflow;
