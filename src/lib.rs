#![forbid(unsafe_code)]

pub mod chapter;
pub mod checkpoint;
pub mod classify;
pub mod cli;
pub mod commands;
pub mod completion;
pub mod config;
pub mod error;
pub mod formats;
pub mod logging;
pub mod pipeline;
pub mod render;
pub mod segment;
pub mod source;
pub mod state;

pub use error::Error;
