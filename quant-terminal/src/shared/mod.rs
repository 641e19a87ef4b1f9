//! Shared modules for the Quant Terminal
pub mod auth;
pub mod backfill;
pub mod buffer;
pub mod config;
pub mod controller;
pub mod error;
pub mod http;
pub mod order;
pub mod session;
pub mod types;
pub mod websocket;
