pub mod commands;
pub mod compiler;
pub mod config;
pub mod dsl;
pub mod error;
pub mod runtime;
