//! # Node Admin
//!
//! Host-resident agent that manages tenant workload containers on one host:
//! it runs commands in containers and in their network namespaces, keeps their
//! storage tidy with failure-aware throttling, and authenticates outbound
//! connections with a continuously rotated TLS identity.
//!
//! ## Architecture Overview
//!
//! - **[`config`]**: immutable configuration, built once and shared by reference
//! - **[`paths`]**: translation between host, agent-container and workload-container paths
//! - **[`executor`]**: host process execution with a bounded wait
//! - **[`container`]**: container engine access, namespace entry and file staging
//! - **[`maintenance`]**: disk usage, stale files, core dumps and storage cleanup
//! - **[`identity`]**: hot-swappable mutual-TLS credential and socket factory
//! - **[`node`]**: node metadata used to annotate reports
//!
//! ```text
//!  scheduler ──▶ StorageMaintainer ──▶ MaintenanceThrottle
//!                      │
//!                      ▼
//!            ContainerRuntimeClient ──▶ ContainerEngine / ProcessExecutor
//!                      │
//!                      ▼
//!                 PathResolver
//!
//!  identity provider ──▶ IdentityTlsConnector ──▶ outbound TLS (core-dump feed)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use node_admin::{ContainerName, ContainerRuntimeClient, NodeAdminConfig, StorageMaintainer};
//! use node_admin::container::DockerEngine;
//! use node_admin::executor::HostExecutor;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Arc::new(NodeAdminConfig::discover(None)?);
//!     let engine = Arc::new(DockerEngine::new().await?);
//!     let runtime = ContainerRuntimeClient::new(engine, Arc::new(HostExecutor::new()), config.clone());
//!     let maintainer = StorageMaintainer::new(runtime, &config);
//!
//!     let container = ContainerName::from_hostname("node-123.us-north-1.example.com")?;
//!     maintainer.remove_old_files_from_node(&container).await?;
//!     Ok(())
//! }
//! ```

pub mod config;

/// Path translation between the three filesystem views.
pub mod paths;

/// Host process execution.
pub mod executor;

pub mod container;

pub mod maintenance;

pub mod identity;

pub mod node;

/// Command line interface of the `node-admin` binary.
pub mod cli;

pub use config::NodeAdminConfig;
pub use container::{ContainerError, ContainerName, ContainerRuntimeClient};
pub use identity::{Credential, CredentialListener, IdentityTlsConnector};
pub use maintenance::{MaintenanceError, MaintenanceThrottle, StorageMaintainer};
pub use node::NodeSpec;
pub use paths::PathResolver;
