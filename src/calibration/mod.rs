pub mod config;
pub mod hybrid;
pub mod pipeline;
pub mod types;
