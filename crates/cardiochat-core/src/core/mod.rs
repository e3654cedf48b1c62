//! Core module: UI-agnostic domain and runtime.
//!
//! This module contains:
//! - `session`: Conversations, messages and the session state transitions
//! - `title`: Display title derivation
//! - `persistence`: Persistent store contract and load/persist glue
//! - `turn`: The send pipeline (request assembly, reply extraction)
//! - `chat`: Shared runtime that serialises mutations and guards sends

pub mod chat;
pub mod persistence;
pub mod session;
pub mod title;
pub mod turn;
