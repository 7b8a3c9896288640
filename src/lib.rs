pub mod cli;
pub mod config;
pub mod error;
pub mod export;
pub mod preview;
pub mod project;
pub mod runtime;
pub mod session;

pub use error::{Result, SandlotError};
