// Comment Stream - posts, threaded comments, and real-time comment fan-out

// HTTP + WebSocket surface
pub mod api;

// Application wiring
pub mod app_state;

// Topic-based pub/sub for live comment delivery
pub mod broadcast;

// Environment-driven configuration
pub mod config;

// Domain entities
pub mod models;

// Create-comment glue between storage and broadcaster
pub mod service;

// Storage contract and its two backends
pub mod storage;

// Common utilities
pub mod error;

// Re-exports for convenience
pub use error::{AppError, AppResult};
