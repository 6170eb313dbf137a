pub mod admission;
pub mod analytics;
pub mod cache;
pub mod config;
pub mod error;
pub mod event;
pub mod funnel;
pub mod report;
pub mod revenue;
pub mod session;
pub mod spike;
pub mod timeseries;
pub mod visitor;
