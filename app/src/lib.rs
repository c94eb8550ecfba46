pub mod actor;
pub mod app;
pub mod bus;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod gc;
pub mod inbox;
pub mod manifest;
pub mod metrics;
pub mod mood;
pub mod peers;
pub mod scheduler;
pub mod selector;
pub mod state;

// for main.rs
pub use app::run;
