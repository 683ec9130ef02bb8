pub mod config;
pub mod upload;

pub use self::config::*;
pub use self::upload::*;
