//! Logging setup.
//!
//! The engine only talks to the `log` facade; `init_logging` installs
//! `env_logger` for binaries and tests that want output.

mod init;

pub use init::{init_logging, init_test_logging, LoggingConfig};
