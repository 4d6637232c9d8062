pub mod config;
pub mod embedding;
pub mod error;
pub mod ffi;
pub mod models;
pub mod progress;
pub mod prompts;
pub mod terminology;
pub mod textio;
pub mod textutil;
pub mod tmx;
pub mod xliff;
pub mod xml;

pub use error::{CleanError, EmbedError};
