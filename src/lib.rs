pub mod builder;
pub mod cache;
pub mod config;
pub mod export;
pub mod fetch;
pub mod geo;
pub mod issues;
pub mod model;
pub mod output;
pub mod parser;
pub mod partition;
pub mod pipeline;
pub mod registry;
pub mod report;
pub mod stats;
pub mod store;
pub mod validator;
