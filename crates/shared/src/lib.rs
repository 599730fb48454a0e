//! Support Chat Shared Types
//!
//! This crate contains the domain types and the UI-facing error taxonomy
//! shared by the dispatch engine and the widget that embeds it.

pub mod error;
pub mod types;

pub use error::*;
pub use types::*;
