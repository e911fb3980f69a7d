// src/lib.rs

//! labormap: county employment figures merged into geometry documents

pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
