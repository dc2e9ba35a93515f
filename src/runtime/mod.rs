pub mod activity_instance;
pub mod context;
pub mod definition;
pub mod engine;
pub mod execution;
pub mod mapping;
pub mod operations;
pub mod services;
pub mod storage;
pub mod walker;
