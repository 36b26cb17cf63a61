pub mod api;
pub mod capture;
pub mod click;
pub mod config;
pub mod detector;
pub mod diagnostics;
pub mod events;
pub mod monitor;
pub mod scheduler;
pub mod state;
pub mod templates;
