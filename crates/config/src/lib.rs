//! Layered configuration.
//!
//! Settings are merged, later layers winning:
//!
//! 1. built-in defaults,
//! 2. a TOML file: the path given on the command line, otherwise `ketl.toml`
//!    in the working directory, otherwise `ketl.toml` in the platform
//!    configuration directory,
//! 3. environment variables prefixed with `KETL_`, nested keys separated by
//!    a double underscore (`KETL_HTTP__TIMEOUT_SECS=30`).
//!
//! Besides runtime settings the file can declare APIs (`[[apis]]`), which are
//! registered in the store by `ketl setup`.

mod definition;
pub mod error;
mod settings;

pub use crate::definition::{ApiDefinition, FileDefinition, SourceDefinition};
pub use crate::settings::{HttpSettings, LogFormat, LogSettings, Settings};
