//! CLI-specific functionality for the node agent
//!
//! This module contains argument parsing and configuration discovery
//! reporting for the `node-admin` binary.

pub mod args;
pub mod config;

pub use args::{Args, EtcHostsConfig, ExecConfig, ExecutionMode, Target};
pub use config::ConfigDiscovery;
