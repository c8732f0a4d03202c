pub mod alerts;
pub mod api;
pub mod app;
pub mod audio;
pub mod capture;
pub mod cli;
pub mod config;
pub mod controller;
pub mod global;
pub mod inference;
pub mod lease;
pub mod polling;
pub mod streaming;
