pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod push;
pub mod services;
pub mod state;
