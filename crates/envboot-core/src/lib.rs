pub mod action;
pub mod descriptor;
pub mod error;
pub mod io;
pub mod lock;
pub mod orchestrator;
pub mod paths;
pub mod process;
pub mod record;
pub mod vars;

pub use error::{BootError, ConfigError, Result};
