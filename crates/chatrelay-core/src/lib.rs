//! ChatRelay Core — configuration and error types shared by the relay crates.

pub mod config;
pub mod error;

pub use config::{load_dotenv, OllamaSettings, OpenAiSettings, RelayConfig};
pub use error::{Error, Result};
