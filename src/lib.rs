pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod error;
pub mod eval;
pub mod pose;
pub mod projection;
pub mod render;
