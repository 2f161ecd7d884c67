#![recursion_limit = "256"]

pub mod config;
pub mod debug;
pub mod detection;
pub mod error;
pub mod foreign;
pub mod import;
pub mod layers;
pub mod models;
pub mod priors;
pub mod t7;
