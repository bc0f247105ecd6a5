//! Configuration handling for tokwatch.

mod settings;

pub use settings::{Command, Config, Settings};
