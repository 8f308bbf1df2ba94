use super::{
    ContainerDetails, ContainerRuntime, ContainerSpec, ContainerSummary, ImageInfo, PortBinding,
    RegistryCredentials, RegistryLogin, RestartPolicy, RuntimeConfig,
};
use crate::error::RuntimeError;
use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
    RemoveContainerOptions, RenameContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::{CreateImageOptions, RemoveImageOptions};
use bollard::models::{
    ContainerInspectResponse, HostConfig, PortBinding as DockerPortBinding,
    RestartPolicy as DockerRestartPolicy, RestartPolicyNameEnum,
};
use bollard::Docker;
use futures_util::stream::StreamExt;
use log::{debug, info, warn};
use std::collections::HashMap;

const CONNECT_TIMEOUT_SECS: u64 = 120;

pub struct DockerRuntime {
    docker: Docker,
    registry: RegistryLogin,
    stop_timeout_secs: i64,
}

impl DockerRuntime {
    pub fn new(docker: Docker, stop_timeout_secs: i64) -> Result<Self, RuntimeError> {
        Ok(Self {
            docker,
            registry: RegistryLogin::new()?,
            stop_timeout_secs,
        })
    }

    /// Connect to the daemon, either through `socket` or the platform's
    /// local defaults (unix socket on Linux, `DOCKER_HOST` if set).
    pub fn connect(socket: Option<&str>, stop_timeout_secs: i64) -> Result<Self, RuntimeError> {
        let docker = match socket {
            Some(path) => Docker::connect_with_socket(
                path,
                CONNECT_TIMEOUT_SECS,
                bollard::API_DEFAULT_VERSION,
            ),
            None => Docker::connect_with_local_defaults(),
        }
        .map_err(|e| RuntimeError::Connection(e.to_string()))?;
        Self::new(docker, stop_timeout_secs)
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let opts = ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(opts))
            .await
            .map_err(|e| map_err("list containers", e))?;

        let mut out = Vec::with_capacity(containers.len());
        for c in containers {
            let id = match c.id {
                Some(id) => id,
                None => continue,
            };
            let name = c
                .names
                .as_ref()
                .and_then(|n| n.first())
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_else(|| id.clone());
            out.push(ContainerSummary {
                id,
                name,
                image: c.image.unwrap_or_default(),
                state: c.state.unwrap_or_default(),
            });
        }
        Ok(out)
    }

    async fn inspect_container(&self, id_or_name: &str) -> Result<ContainerDetails, RuntimeError> {
        let detail = self
            .docker
            .inspect_container(id_or_name, None::<InspectContainerOptions>)
            .await
            .map_err(|e| map_err(id_or_name, e))?;
        details_from_inspect(detail).ok_or_else(|| {
            RuntimeError::Api(format!("incomplete inspect response for {id_or_name}"))
        })
    }

    async fn login(&self, credentials: &RegistryCredentials) -> Result<(), RuntimeError> {
        self.registry.verify(credentials).await?;
        debug!(
            "Registry {} accepted credentials for {}",
            credentials.registry_url, credentials.username
        );
        Ok(())
    }

    async fn pull_image(
        &self,
        image: &str,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<ImageInfo, RuntimeError> {
        let (repo, tag) = split_reference(image);
        let opts = CreateImageOptions {
            from_image: repo,
            tag,
            ..Default::default()
        };
        let creds = credentials.map(|c| DockerCredentials {
            username: Some(c.username.clone()),
            password: Some(c.token.clone()),
            serveraddress: Some(c.registry_url.clone()),
            ..Default::default()
        });

        let mut stream = self.docker.create_image(Some(opts), None, creds);
        while let Some(progress) = stream.next().await {
            let progress = progress.map_err(|e| map_err(image, e))?;
            if let Some(err) = progress.error {
                return Err(RuntimeError::Api(err));
            }
        }

        let inspected = self
            .docker
            .inspect_image(image)
            .await
            .map_err(|e| map_err(image, e))?;
        let id = inspected
            .id
            .ok_or_else(|| RuntimeError::Api(format!("pulled image {image} has no id")))?;
        Ok(ImageInfo {
            id,
            created: inspected.created,
        })
    }

    async fn stop_container(&self, id: &str) -> Result<(), RuntimeError> {
        match self
            .docker
            .stop_container(
                id,
                Some(StopContainerOptions {
                    t: self.stop_timeout_secs,
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            // 304: already stopped
            Err(BollardError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(map_err(id, e)),
        }
    }

    async fn rename_container(&self, id: &str, new_name: &str) -> Result<(), RuntimeError> {
        self.docker
            .rename_container(id, RenameContainerOptions { name: new_name })
            .await
            .map_err(|e| map_err(id, e))
    }

    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let cfg = &spec.config;
        let exposed_ports: HashMap<String, HashMap<(), ()>> = cfg
            .port_bindings
            .keys()
            .map(|port| (port.clone(), HashMap::new()))
            .collect();
        let port_bindings: HashMap<String, Option<Vec<DockerPortBinding>>> = cfg
            .port_bindings
            .iter()
            .map(|(port, bindings)| {
                let bindings = bindings
                    .iter()
                    .map(|b| DockerPortBinding {
                        host_ip: b.host_ip.clone(),
                        host_port: b.host_port.clone(),
                    })
                    .collect();
                (port.clone(), Some(bindings))
            })
            .collect();

        let host_config = HostConfig {
            port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
            binds: (!cfg.binds.is_empty()).then(|| cfg.binds.clone()),
            network_mode: cfg.network_mode.clone(),
            restart_policy: cfg.restart_policy.as_ref().map(to_docker_restart_policy),
            ..Default::default()
        };
        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(cfg.env.clone()),
            exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|e| map_err(&spec.name, e))?;
        for warning in &created.warnings {
            warn!("Docker warning creating {}: {}", spec.name, warning);
        }

        if let Err(e) = self
            .docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
        {
            // Free the name again so the renamed original can be restored by hand.
            if let Err(rm) = self.remove_container(&created.id).await {
                warn!("Failed to remove unstarted container {}: {}", created.id, rm);
            }
            return Err(map_err(&spec.name, e));
        }

        info!("Started container {} ({})", spec.name, created.id);
        Ok(created.id)
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| map_err(id, e))
    }

    async fn remove_image(&self, image_id: &str) -> Result<(), RuntimeError> {
        self.docker
            .remove_image(image_id, None::<RemoveImageOptions>, None)
            .await
            .map(|_| ())
            .map_err(|e| map_err(image_id, e))
    }
}

fn map_err(target: &str, err: BollardError) -> RuntimeError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => RuntimeError::NotFound(format!("{target}: {message}")),
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => RuntimeError::Api(format!("{target}: {message} (status {status_code})")),
        other => RuntimeError::Api(format!("{target}: {other}")),
    }
}

/// Split `repo[:tag]` or `repo@digest` into the parts the pull endpoint
/// expects. A missing tag means `latest`.
fn split_reference(image: &str) -> (String, String) {
    if let Some((repo, digest)) = image.split_once('@') {
        return (repo.to_string(), digest.to_string());
    }
    let last_segment = image.rsplit('/').next().unwrap_or(image);
    match last_segment.rsplit_once(':') {
        Some((_, tag)) => {
            let repo = &image[..image.len() - tag.len() - 1];
            (repo.to_string(), tag.to_string())
        }
        None => (image.to_string(), "latest".to_string()),
    }
}

fn details_from_inspect(detail: ContainerInspectResponse) -> Option<ContainerDetails> {
    let id = detail.id?;
    let name = detail
        .name
        .map(|n| n.trim_start_matches('/').to_string())
        .unwrap_or_else(|| id.clone());
    let config = detail.config.unwrap_or_default();
    let host = detail.host_config.unwrap_or_default();

    let port_bindings = host
        .port_bindings
        .unwrap_or_default()
        .into_iter()
        .map(|(port, bindings)| {
            let bindings = bindings
                .unwrap_or_default()
                .into_iter()
                .map(|b| PortBinding {
                    host_ip: b.host_ip,
                    host_port: b.host_port,
                })
                .collect();
            (port, bindings)
        })
        .collect();

    let restart_policy = host.restart_policy.and_then(|p| {
        let name = restart_policy_name(p.name.as_ref()?)?;
        Some(RestartPolicy {
            name: name.to_string(),
            maximum_retry_count: p.maximum_retry_count,
        })
    });

    let state = detail
        .state
        .and_then(|s| s.status)
        .map(|s| format!("{s:?}").to_lowercase())
        .unwrap_or_else(|| "unknown".to_string());

    Some(ContainerDetails {
        id,
        name,
        image: config.image.unwrap_or_default(),
        image_id: detail.image.unwrap_or_default(),
        state,
        config: RuntimeConfig {
            env: config.env.unwrap_or_default(),
            port_bindings,
            binds: host.binds.unwrap_or_default(),
            network_mode: host.network_mode,
            restart_policy,
        },
    })
}

fn restart_policy_name(name: &RestartPolicyNameEnum) -> Option<&'static str> {
    match name {
        RestartPolicyNameEnum::EMPTY => None,
        RestartPolicyNameEnum::NO => Some("no"),
        RestartPolicyNameEnum::ALWAYS => Some("always"),
        RestartPolicyNameEnum::UNLESS_STOPPED => Some("unless-stopped"),
        RestartPolicyNameEnum::ON_FAILURE => Some("on-failure"),
    }
}

fn to_docker_restart_policy(policy: &RestartPolicy) -> DockerRestartPolicy {
    let name = match policy.name.as_str() {
        "always" => RestartPolicyNameEnum::ALWAYS,
        "unless-stopped" => RestartPolicyNameEnum::UNLESS_STOPPED,
        "on-failure" => RestartPolicyNameEnum::ON_FAILURE,
        _ => RestartPolicyNameEnum::NO,
    };
    DockerRestartPolicy {
        name: Some(name),
        maximum_retry_count: policy.maximum_retry_count,
    }
}
