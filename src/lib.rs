// World state and change notification
pub mod state;

// Subscriber fan-out
pub mod subscription;

// HTTP and WebSocket APIs
pub mod api;

// Configuration
pub mod config;
