//! Command implementations for the vmscout CLI

pub mod clear;
pub mod config;
pub mod discover;
pub mod version;
