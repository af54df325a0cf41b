//! Configuration management module
//!
//! The broker's entire configuration surface is environment variables
//! layered under CLI flags — there is no on-disk config file.

mod config;

pub use config::Configuration;
