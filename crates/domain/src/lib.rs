//! Shared types for kbask: the error enum, provider-agnostic message and
//! stream types, persisted conversation turns, structured trace events, and
//! the configuration tree.

pub mod config;
pub mod conversation;
pub mod error;
pub mod stream;
pub mod tool;
pub mod trace;
