//! Node metadata as handed to the agent by the orchestrator.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a node in the orchestrator's repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Provisioned,
    Ready,
    Reserved,
    Active,
    Inactive,
    Dirty,
    Failed,
    Parked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Tenant,
    Host,
    Proxy,
    Config,
}

/// Application owning a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub tenant: String,
    pub application: String,
    pub instance: String,
}

/// Specification of one node (workload container).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub hostname: String,
    pub state: NodeState,
    pub node_type: NodeType,
    pub flavor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Owner>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wanted_docker_image: Option<String>,
    pub min_cpu_cores: f64,
    pub min_main_memory_available_gb: f64,
    pub min_disk_available_gb: f64,
}

impl NodeSpec {
    pub fn builder(hostname: impl Into<String>) -> NodeSpecBuilder {
        NodeSpecBuilder::new(hostname)
    }
}

/// Builder for [`NodeSpec`].
#[derive(Debug, Clone)]
pub struct NodeSpecBuilder {
    spec: NodeSpec,
}

impl NodeSpecBuilder {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            spec: NodeSpec {
                hostname: hostname.into(),
                state: NodeState::Active,
                node_type: NodeType::Tenant,
                flavor: "docker".to_string(),
                owner: None,
                wanted_docker_image: None,
                min_cpu_cores: 1.0,
                min_main_memory_available_gb: 1.0,
                min_disk_available_gb: 1.0,
            },
        }
    }

    pub fn state(mut self, state: NodeState) -> Self {
        self.spec.state = state;
        self
    }

    pub fn node_type(mut self, node_type: NodeType) -> Self {
        self.spec.node_type = node_type;
        self
    }

    pub fn flavor(mut self, flavor: impl Into<String>) -> Self {
        self.spec.flavor = flavor.into();
        self
    }

    pub fn owner(
        mut self,
        tenant: impl Into<String>,
        application: impl Into<String>,
        instance: impl Into<String>,
    ) -> Self {
        self.spec.owner = Some(Owner {
            tenant: tenant.into(),
            application: application.into(),
            instance: instance.into(),
        });
        self
    }

    pub fn wanted_docker_image(mut self, image: impl Into<String>) -> Self {
        self.spec.wanted_docker_image = Some(image.into());
        self
    }

    pub fn resources(mut self, cpu_cores: f64, memory_gb: f64, disk_gb: f64) -> Self {
        self.spec.min_cpu_cores = cpu_cores;
        self.spec.min_main_memory_available_gb = memory_gb;
        self.spec.min_disk_available_gb = disk_gb;
        self
    }

    pub fn build(self) -> NodeSpec {
        self.spec
    }
}
