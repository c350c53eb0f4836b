pub mod aggregator;
pub mod categories;
pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod models;
pub mod portfolio;
pub mod report;
pub mod row_utils;
pub mod scheduler;
pub mod scheduler_status;
pub mod summary;
pub mod task;
