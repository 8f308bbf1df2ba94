use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::RuntimeError;

pub mod docker;
pub mod login;
pub use docker::DockerRuntime;
pub use login::RegistryLogin;

#[cfg(test)]
pub mod mock;

/// A container as returned by a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortBinding {
    pub host_ip: Option<String>,
    pub host_port: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartPolicy {
    /// `no`, `always`, `unless-stopped` or `on-failure`.
    pub name: String,
    pub maximum_retry_count: Option<i64>,
}

/// The runtime configuration carried over when a container is recreated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub env: Vec<String>,
    /// Keyed by container port, e.g. `80/tcp`.
    pub port_bindings: BTreeMap<String, Vec<PortBinding>>,
    pub binds: Vec<String>,
    pub network_mode: Option<String>,
    pub restart_policy: Option<RestartPolicy>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerDetails {
    pub id: String,
    pub name: String,
    /// Configured image reference, e.g. `nginx:1.25`.
    pub image: String,
    /// Id of the image the container currently runs.
    pub image_id: String,
    pub state: String,
    pub config: RuntimeConfig,
}

impl ContainerDetails {
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }
}

pub fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub id: String,
    pub created: Option<String>,
}

/// What is needed to create a replacement container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub config: RuntimeConfig,
}

/// Credentials for one registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegistryCredentials {
    pub username: String,
    pub token: String,
    pub registry_url: String,
}

/// Docker-compatible container runtime.
///
/// Every call blocks the calling trigger until the daemon answers; the
/// engine never holds a shared lock across one of these except the
/// per-container lock.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// All containers, running or not.
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, RuntimeError>;

    /// Look up a container by id, id prefix or name.
    async fn inspect_container(&self, id_or_name: &str) -> Result<ContainerDetails, RuntimeError>;

    /// Authenticate against a registry.
    async fn login(&self, credentials: &RegistryCredentials) -> Result<(), RuntimeError>;

    /// Pull `image` and return the id it now resolves to locally.
    async fn pull_image(
        &self,
        image: &str,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<ImageInfo, RuntimeError>;

    async fn stop_container(&self, id: &str) -> Result<(), RuntimeError>;

    async fn rename_container(&self, id: &str, new_name: &str) -> Result<(), RuntimeError>;

    /// Create and start a container, returning its id.
    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError>;

    async fn remove_image(&self, image_id: &str) -> Result<(), RuntimeError>;
}
