pub mod agent;
pub mod checkpoint;
pub mod config;
pub mod extract;
pub mod gateway;
pub mod graph;
pub mod memory;
pub mod types;
