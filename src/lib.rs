// src/lib.rs

//! regwatch: change detection for regulator registries

pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
