mod raw;
mod loader;
pub mod error;
pub mod presets;

pub use loader::{load_plan, parse_plan};
pub use error::ConfigError;
