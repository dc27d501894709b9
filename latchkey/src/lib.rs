pub mod analysis;
pub mod config;
mod error;

pub use latchkey_cfa as cfa;

pub use config::LatchkeyConfig;
pub use error::LatchkeyError;
