//! In-memory runtime for tests.
//!
//! Holds a set of containers and a fake registry mapping image references
//! to image ids. Every call is appended to a call log so tests can assert
//! that nothing was pulled or mutated.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{
    ContainerDetails, ContainerRuntime, ContainerSpec, ContainerSummary, ImageInfo,
    RegistryCredentials, RuntimeConfig,
};
use crate::error::RuntimeError;

#[derive(Default)]
struct State {
    containers: Vec<ContainerDetails>,
    registry: HashMap<String, String>,
    calls: Vec<String>,
    failing: HashSet<&'static str>,
    created: u32,
}

#[derive(Default)]
pub struct MockRuntime {
    state: Mutex<State>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_container(&self, id: &str, name: &str, image: &str, image_id: &str) {
        self.add_container_with(id, name, image, image_id, RuntimeConfig::default())
            .await;
    }

    pub async fn add_container_with(
        &self,
        id: &str,
        name: &str,
        image: &str,
        image_id: &str,
        config: RuntimeConfig,
    ) {
        self.state.lock().await.containers.push(ContainerDetails {
            id: id.to_string(),
            name: name.to_string(),
            image: image.to_string(),
            image_id: image_id.to_string(),
            state: "running".to_string(),
            config,
        });
    }

    /// Make the registry resolve `image` to `image_id`.
    pub async fn serve_image(&self, image: &str, image_id: &str) {
        self.state
            .lock()
            .await
            .registry
            .insert(image.to_string(), image_id.to_string());
    }

    /// Make every call of `op` fail (`login`, `pull`, `stop`, `rename`,
    /// `create`, `remove`, `remove_image`, `inspect`, `list`).
    pub async fn fail_on(&self, op: &'static str) {
        self.state.lock().await.failing.insert(op);
    }

    pub async fn calls(&self) -> Vec<String> {
        self.state.lock().await.calls.clone()
    }

    pub async fn count_calls(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub async fn containers(&self) -> Vec<ContainerDetails> {
        self.state.lock().await.containers.clone()
    }

    pub async fn find(&self, name: &str) -> Option<ContainerDetails> {
        self.state
            .lock()
            .await
            .containers
            .iter()
            .find(|c| c.name == name)
            .cloned()
    }
}

fn find_index(state: &State, id_or_name: &str) -> Option<usize> {
    state
        .containers
        .iter()
        .position(|c| c.id == id_or_name || c.name == id_or_name)
        .or_else(|| {
            state
                .containers
                .iter()
                .position(|c| c.id.starts_with(id_or_name))
        })
}

fn check(state: &mut State, op: &'static str, call: String) -> Result<(), RuntimeError> {
    state.calls.push(call);
    if state.failing.contains(op) {
        let reason = format!("mock {op} failure");
        return Err(match op {
            "login" => RuntimeError::Unauthorized(reason),
            _ => RuntimeError::Api(reason),
        });
    }
    Ok(())
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let mut state = self.state.lock().await;
        check(&mut state, "list", "list".into())?;
        Ok(state
            .containers
            .iter()
            .map(|c| ContainerSummary {
                id: c.id.clone(),
                name: c.name.clone(),
                image: c.image.clone(),
                state: c.state.clone(),
            })
            .collect())
    }

    async fn inspect_container(&self, id_or_name: &str) -> Result<ContainerDetails, RuntimeError> {
        let mut state = self.state.lock().await;
        check(&mut state, "inspect", format!("inspect:{id_or_name}"))?;
        find_index(&state, id_or_name)
            .map(|i| state.containers[i].clone())
            .ok_or_else(|| RuntimeError::NotFound(id_or_name.to_string()))
    }

    async fn login(&self, credentials: &RegistryCredentials) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().await;
        check(
            &mut state,
            "login",
            format!("login:{}:{}", credentials.registry_url, credentials.username),
        )
    }

    async fn pull_image(
        &self,
        image: &str,
        _credentials: Option<&RegistryCredentials>,
    ) -> Result<ImageInfo, RuntimeError> {
        let mut state = self.state.lock().await;
        check(&mut state, "pull", format!("pull:{image}"))?;
        state
            .registry
            .get(image)
            .map(|id| ImageInfo {
                id: id.clone(),
                created: Some("2026-01-01T00:00:00Z".to_string()),
            })
            .ok_or_else(|| RuntimeError::Api(format!("manifest unknown: {image}")))
    }

    async fn stop_container(&self, id: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().await;
        check(&mut state, "stop", format!("stop:{id}"))?;
        let i = find_index(&state, id).ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        state.containers[i].state = "exited".to_string();
        Ok(())
    }

    async fn rename_container(&self, id: &str, new_name: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().await;
        check(&mut state, "rename", format!("rename:{id}:{new_name}"))?;
        if state.containers.iter().any(|c| c.name == new_name) {
            return Err(RuntimeError::Api(format!("name {new_name} already in use")));
        }
        let i = find_index(&state, id).ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        state.containers[i].name = new_name.to_string();
        Ok(())
    }

    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let mut state = self.state.lock().await;
        check(&mut state, "create", format!("create:{}", spec.name))?;
        if state.containers.iter().any(|c| c.name == spec.name) {
            return Err(RuntimeError::Api(format!("name {} already in use", spec.name)));
        }
        let image_id = state
            .registry
            .get(&spec.image)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(spec.image.clone()))?;
        state.created += 1;
        let id = format!("c0ffee{:06}{}", state.created, "0".repeat(52));
        state.containers.push(ContainerDetails {
            id: id.clone(),
            name: spec.name.clone(),
            image: spec.image.clone(),
            image_id,
            state: "running".to_string(),
            config: spec.config.clone(),
        });
        Ok(id)
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().await;
        check(&mut state, "remove", format!("remove:{id}"))?;
        let i = find_index(&state, id).ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        state.containers.remove(i);
        Ok(())
    }

    async fn remove_image(&self, image_id: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().await;
        check(&mut state, "remove_image", format!("remove_image:{image_id}"))
    }
}
