//! Core cardiochat library (session state, turn pipeline, providers, config).

pub mod config;
pub mod core;
pub mod logging;
pub mod prompts;
pub mod providers;
