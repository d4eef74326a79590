pub mod accumulator;
pub mod config;
pub mod error;
pub mod forecast;
pub mod http;
pub mod hub;
pub mod pipeline;
pub mod scheduler;
pub mod source;
pub mod store;
pub mod telemetry;
