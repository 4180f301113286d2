//! Command line argument parsing
//!
//! Subcommands:
//! - `disk-usage`: Print bytes used under a path
//! - `translate`: Print the agent and host views of a workload path
//! - `clean-files`: Remove old files from a container (throttled)
//! - `core-dumps`: Process and report a container's core dumps
//! - `cleanup-storage`: Archive and clear a container's storage
//! - `etc-hosts`: Generate and stage a container's `/etc/hosts`
//! - `exec`: Run a command in a container or its network namespace
//! - `show-config`: Show configuration discovery information

use crate::container::ContainerName;
use clap::{Parser, Subcommand};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;

#[derive(Debug)]
pub enum ExecutionMode {
    DiskUsage(PathBuf),
    Translate { target: Target, path: PathBuf },
    CleanFiles(Target),
    CoreDumps(Target),
    CleanupStorage(Target),
    EtcHosts(EtcHostsConfig),
    Exec(ExecConfig),
    ShowConfig,
}

/// Container addressed by its host name
#[derive(Debug, Clone)]
pub struct Target {
    pub hostname: String,
    pub container: ContainerName,
    /// JSON node specification, otherwise defaults for `hostname`
    pub node_spec: Option<PathBuf>,
}

#[derive(Debug)]
pub struct EtcHostsConfig {
    pub target: Target,
    pub ipv6: Ipv6Addr,
    pub ipv4: Option<Ipv4Addr>,
}

#[derive(Debug)]
pub struct ExecConfig {
    pub target: Target,
    pub network_namespace: bool,
    pub command: Vec<String>,
}

#[derive(Debug, Parser)]
#[command(name = "node-admin")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Host agent for workload container maintenance and identity")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print the bytes allocated under a path (agent view)
    DiskUsage { path: PathBuf },
    /// Print the agent and host paths of a path inside a workload container
    Translate {
        hostname: String,
        /// Absolute path inside the container
        path: PathBuf,
    },
    /// Remove old files from a container, unless throttled
    CleanFiles { hostname: String },
    /// Process and report the core dumps of a container
    CoreDumps {
        hostname: String,
        /// Node specification as JSON
        #[arg(long = "node-spec", value_name = "FILE")]
        node_spec: Option<PathBuf>,
    },
    /// Move a container's storage to a timestamped cleanup directory
    CleanupStorage {
        hostname: String,
        /// Node specification as JSON
        #[arg(long = "node-spec", value_name = "FILE")]
        node_spec: Option<PathBuf>,
    },
    /// Generate and stage /etc/hosts for a container
    EtcHosts {
        hostname: String,
        #[arg(long = "ipv6")]
        ipv6: Ipv6Addr,
        #[arg(long = "ipv4")]
        ipv4: Option<Ipv4Addr>,
    },
    /// Execute a command as root in a container
    Exec {
        hostname: String,
        /// Run on the host inside the container's network namespace instead
        #[arg(long = "netns")]
        netns: bool,
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
    /// Show configuration discovery information and the effective configuration
    ShowConfig,
}

impl Args {
    pub fn parse() -> Self {
        Parser::parse()
    }

    pub fn mode(&self) -> Result<ExecutionMode, String> {
        match &self.command {
            Some(Commands::DiskUsage { path }) => Ok(ExecutionMode::DiskUsage(path.clone())),
            Some(Commands::Translate { hostname, path }) => {
                if !path.is_absolute() {
                    return Err(format!("Path must be absolute: {}", path.display()));
                }
                Ok(ExecutionMode::Translate {
                    target: Self::target(hostname, None)?,
                    path: path.clone(),
                })
            }
            Some(Commands::CleanFiles { hostname }) => {
                Ok(ExecutionMode::CleanFiles(Self::target(hostname, None)?))
            }
            Some(Commands::CoreDumps {
                hostname,
                node_spec,
            }) => Ok(ExecutionMode::CoreDumps(Self::target(
                hostname,
                node_spec.clone(),
            )?)),
            Some(Commands::CleanupStorage {
                hostname,
                node_spec,
            }) => Ok(ExecutionMode::CleanupStorage(Self::target(
                hostname,
                node_spec.clone(),
            )?)),
            Some(Commands::EtcHosts {
                hostname,
                ipv6,
                ipv4,
            }) => Ok(ExecutionMode::EtcHosts(EtcHostsConfig {
                target: Self::target(hostname, None)?,
                ipv6: *ipv6,
                ipv4: *ipv4,
            })),
            Some(Commands::Exec {
                hostname,
                netns,
                command,
            }) => Ok(ExecutionMode::Exec(ExecConfig {
                target: Self::target(hostname, None)?,
                network_namespace: *netns,
                command: command.clone(),
            })),
            Some(Commands::ShowConfig) => Ok(ExecutionMode::ShowConfig),
            None => Err(
                "No command specified. Use 'node-admin --help' to see available commands."
                    .to_string(),
            ),
        }
    }

    fn target(hostname: &str, node_spec: Option<PathBuf>) -> Result<Target, String> {
        let container = ContainerName::from_hostname(hostname).map_err(|e| e.to_string())?;
        Ok(Target {
            hostname: hostname.to_string(),
            container,
            node_spec,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_global_flags() {
        let args = parse(&["node-admin", "clean-files", "node-1.example.com", "-v", "--config", "/tmp/a.toml"]);
        assert!(args.verbose);
        assert_eq!(args.config, Some(PathBuf::from("/tmp/a.toml")));

        match args.mode().unwrap() {
            ExecutionMode::CleanFiles(target) => {
                assert_eq!(target.container.as_str(), "node-1");
                assert_eq!(target.hostname, "node-1.example.com");
            }
            other => panic!("unexpected mode: {:?}", other),
        }
    }

    #[test]
    fn test_exec_command() {
        let args = parse(&["node-admin", "exec", "node-2.example.com", "--netns", "--", "ip", "-6", "addr"]);
        match args.mode().unwrap() {
            ExecutionMode::Exec(config) => {
                assert!(config.network_namespace);
                assert_eq!(config.command, vec!["ip", "-6", "addr"]);
            }
            other => panic!("unexpected mode: {:?}", other),
        }
    }

    #[test]
    fn test_etc_hosts_addresses() {
        let args = parse(&["node-admin", "etc-hosts", "node-3.example.com", "--ipv6", "::1"]);
        match args.mode().unwrap() {
            ExecutionMode::EtcHosts(config) => {
                assert_eq!(config.ipv6, Ipv6Addr::LOCALHOST);
                assert!(config.ipv4.is_none());
            }
            other => panic!("unexpected mode: {:?}", other),
        }

        assert!(Args::try_parse_from(["node-admin", "etc-hosts", "node-3", "--ipv6", "10.0.0.1"]).is_err());
    }

    #[test]
    fn test_translate_requires_absolute_path() {
        let args = parse(&["node-admin", "translate", "node-1.example.com", "var/crash"]);
        assert!(args.mode().is_err());

        let args = parse(&["node-admin", "translate", "node-1.example.com", "/var/crash"]);
        assert!(matches!(args.mode().unwrap(), ExecutionMode::Translate { .. }));
    }

    #[test]
    fn test_invalid_hostname() {
        let args = parse(&["node-admin", "clean-files", "bad_host!.example.com"]);
        assert!(args.mode().is_err());
    }
}
