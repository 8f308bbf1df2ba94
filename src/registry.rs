//! Registry inference and cached login.
//!
//! The leading path segment of an image reference decides which
//! credentials apply. Resolution runs an ordered list of
//! [`RegistryMatcher`]s; the first one that answers wins. New providers
//! are added by pushing another matcher, not by editing string checks.

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::Mutex;

use crate::error::UpdateError;
use crate::runtime::{ContainerRuntime, RegistryCredentials};
use crate::settings::{Settings, SettingsStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryProvider {
    DockerHub,
    Ghcr,
}

impl RegistryProvider {
    pub fn registry_url(self) -> &'static str {
        match self {
            RegistryProvider::DockerHub => "https://index.docker.io/v1/",
            RegistryProvider::Ghcr => "ghcr.io",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "dockerhub" | "docker.io" => Some(RegistryProvider::DockerHub),
            "ghcr" | "ghcr.io" => Some(RegistryProvider::Ghcr),
            _ => None,
        }
    }

    /// Username and token configured for this provider, if both are set.
    pub fn credentials(self, settings: &Settings) -> Option<(String, String)> {
        let (user, token) = match self {
            RegistryProvider::DockerHub => {
                (&settings.dockerhub_username, &settings.dockerhub_token)
            }
            RegistryProvider::Ghcr => (&settings.ghcr_username, &settings.ghcr_token),
        };
        match (user.as_deref(), token.as_deref()) {
            (Some(u), Some(t)) if !u.is_empty() && !t.is_empty() => {
                Some((u.to_string(), t.to_string()))
            }
            _ => None,
        }
    }
}

/// How an image reference's registry was classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryTarget {
    Provider(RegistryProvider),
    /// An explicit host we hold no credentials for; the daemon's own
    /// configuration applies.
    Unmanaged(String),
}

/// One step of registry inference.
///
/// `host` is the leading path segment when it looks like a hostname,
/// `None` when the reference has no explicit registry.
pub trait RegistryMatcher: Send + Sync {
    fn resolve(&self, host: Option<&str>) -> Option<RegistryTarget>;
}

/// Matches an exact hostname.
pub struct HostMatcher {
    hosts: Vec<&'static str>,
    provider: RegistryProvider,
}

impl HostMatcher {
    pub fn new(hosts: Vec<&'static str>, provider: RegistryProvider) -> Self {
        Self { hosts, provider }
    }
}

impl RegistryMatcher for HostMatcher {
    fn resolve(&self, host: Option<&str>) -> Option<RegistryTarget> {
        let host = host?.to_ascii_lowercase();
        self.hosts
            .iter()
            .any(|h| *h == host)
            .then_some(RegistryTarget::Provider(self.provider))
    }
}

/// References without a registry host belong to the public registry.
pub struct ImplicitRegistryMatcher;

impl RegistryMatcher for ImplicitRegistryMatcher {
    fn resolve(&self, host: Option<&str>) -> Option<RegistryTarget> {
        host.is_none()
            .then_some(RegistryTarget::Provider(RegistryProvider::DockerHub))
    }
}

pub fn default_matchers() -> Vec<Box<dyn RegistryMatcher>> {
    vec![
        Box::new(HostMatcher::new(vec!["ghcr.io"], RegistryProvider::Ghcr)),
        Box::new(HostMatcher::new(
            vec!["docker.io", "index.docker.io", "registry-1.docker.io"],
            RegistryProvider::DockerHub,
        )),
        Box::new(ImplicitRegistryMatcher),
    ]
}

/// The registry host of `image`, if its first segment names one.
///
/// A segment counts as a host when it contains a `.` or `:` or is
/// `localhost`; `library/nginx` and `acme/app` have no host.
pub fn registry_host(image: &str) -> Option<&str> {
    let (first, rest) = image.split_once('/')?;
    if rest.is_empty() {
        return None;
    }
    let host_like = first.contains('.') || first.contains(':') || first == "localhost";
    host_like.then_some(first)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LoginKey {
    provider: RegistryProvider,
    username: String,
    token: String,
    registry_url: String,
}

pub struct Authenticator {
    runtime: Arc<dyn ContainerRuntime>,
    settings: Arc<SettingsStore>,
    matchers: Vec<Box<dyn RegistryMatcher>>,
    logged_in: Mutex<HashSet<LoginKey>>,
}

impl Authenticator {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, settings: Arc<SettingsStore>) -> Self {
        Self::with_matchers(runtime, settings, default_matchers())
    }

    pub fn with_matchers(
        runtime: Arc<dyn ContainerRuntime>,
        settings: Arc<SettingsStore>,
        matchers: Vec<Box<dyn RegistryMatcher>>,
    ) -> Self {
        Self {
            runtime,
            settings,
            matchers,
            logged_in: Mutex::new(HashSet::new()),
        }
    }

    pub fn resolve(&self, image: &str) -> RegistryTarget {
        let host = registry_host(image);
        self.matchers
            .iter()
            .find_map(|m| m.resolve(host))
            .unwrap_or_else(|| RegistryTarget::Unmanaged(host.unwrap_or_default().to_string()))
    }

    /// Log in for `image` if its provider has credentials configured.
    ///
    /// Returns the credentials to inject into the pull, or `None` when
    /// the daemon's defaults apply. Successful logins are remembered for
    /// the lifetime of the process.
    pub async fn authenticate(
        &self,
        image: &str,
    ) -> Result<Option<RegistryCredentials>, UpdateError> {
        let provider = match self.resolve(image) {
            RegistryTarget::Provider(p) => p,
            RegistryTarget::Unmanaged(host) => {
                debug!("No managed credentials for registry {}", host);
                return Ok(None);
            }
        };

        let settings = self.settings.get_all().await;
        let Some((username, token)) = provider.credentials(&settings) else {
            return Ok(None);
        };

        let key = LoginKey {
            provider,
            username,
            token,
            registry_url: provider.registry_url().to_string(),
        };
        let credentials = RegistryCredentials {
            username: key.username.clone(),
            token: key.token.clone(),
            registry_url: key.registry_url.clone(),
        };

        if self.logged_in.lock().await.contains(&key) {
            return Ok(Some(credentials));
        }

        self.runtime.login(&credentials).await.map_err(|e| {
            warn!("Login to {} failed: {}", key.registry_url, e);
            UpdateError::Auth(format!("{} ({}): {}", key.registry_url, key.username, e))
        })?;
        info!("Logged in to {} as {}", key.registry_url, key.username);
        self.logged_in.lock().await.insert(key);
        Ok(Some(credentials))
    }

    /// Check a credential pair for a named provider without caching it.
    pub async fn validate(
        &self,
        provider: &str,
        username: &str,
        token: &str,
    ) -> Result<(), UpdateError> {
        let provider = RegistryProvider::parse(provider).ok_or_else(|| {
            UpdateError::Config(format!("unsupported registry provider {provider}"))
        })?;
        let credentials = RegistryCredentials {
            username: username.to_string(),
            token: token.to_string(),
            registry_url: provider.registry_url().to_string(),
        };
        self.runtime
            .login(&credentials)
            .await
            .map_err(|e| UpdateError::Auth(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::mock::MockRuntime;

    fn settings_with_tokens() -> Settings {
        Settings {
            dockerhub_username: Some("hubuser".into()),
            dockerhub_token: Some("hubtoken".into()),
            ghcr_username: Some("octo".into()),
            ghcr_token: Some("ghp_x".into()),
            ..Default::default()
        }
    }

    fn authenticator(runtime: Arc<MockRuntime>, settings: Settings) -> Authenticator {
        Authenticator::new(runtime, Arc::new(SettingsStore::in_memory(settings)))
    }

    #[test]
    fn host_detection() {
        assert_eq!(registry_host("nginx"), None);
        assert_eq!(registry_host("acme/app:v1"), None);
        assert_eq!(registry_host("ghcr.io/acme/app"), Some("ghcr.io"));
        assert_eq!(registry_host("localhost:5000/app"), Some("localhost:5000"));
        assert_eq!(registry_host("localhost/app"), Some("localhost"));
    }

    #[test]
    fn resolves_providers_in_order() {
        let auth = authenticator(Arc::new(MockRuntime::new()), Settings::default());
        assert_eq!(
            auth.resolve("ghcr.io/acme/app:v1"),
            RegistryTarget::Provider(RegistryProvider::Ghcr)
        );
        assert_eq!(
            auth.resolve("redis:7"),
            RegistryTarget::Provider(RegistryProvider::DockerHub)
        );
        assert_eq!(
            auth.resolve("docker.io/library/redis"),
            RegistryTarget::Provider(RegistryProvider::DockerHub)
        );
        assert_eq!(
            auth.resolve("quay.io/coreos/etcd"),
            RegistryTarget::Unmanaged("quay.io".into())
        );
    }

    #[tokio::test]
    async fn login_is_cached_per_credentials() {
        let runtime = Arc::new(MockRuntime::new());
        let auth = authenticator(runtime.clone(), settings_with_tokens());

        let creds = auth.authenticate("ghcr.io/acme/app").await.unwrap().unwrap();
        assert_eq!(creds.registry_url, "ghcr.io");
        auth.authenticate("ghcr.io/acme/other").await.unwrap();
        auth.authenticate("nginx").await.unwrap();
        auth.authenticate("nginx:1.25").await.unwrap();

        assert_eq!(runtime.count_calls("login:ghcr.io").await, 1);
        assert_eq!(runtime.count_calls("login:https://index.docker.io").await, 1);
    }

    #[tokio::test]
    async fn changed_token_logs_in_again() {
        let runtime = Arc::new(MockRuntime::new());
        let store = Arc::new(SettingsStore::in_memory(settings_with_tokens()));
        let auth = Authenticator::new(runtime.clone(), store.clone());

        auth.authenticate("ghcr.io/acme/app").await.unwrap();
        store
            .update(serde_json::json!({"ghcr_token": "ghp_rotated"}))
            .await
            .unwrap();
        auth.authenticate("ghcr.io/acme/app").await.unwrap();

        assert_eq!(runtime.count_calls("login:ghcr.io").await, 2);
    }

    #[tokio::test]
    async fn unmanaged_or_unconfigured_registries_skip_login() {
        let runtime = Arc::new(MockRuntime::new());
        let auth = authenticator(runtime.clone(), Settings::default());

        assert_eq!(auth.authenticate("quay.io/coreos/etcd").await.unwrap(), None);
        assert_eq!(auth.authenticate("nginx").await.unwrap(), None);
        assert_eq!(runtime.count_calls("login").await, 0);
    }

    #[tokio::test]
    async fn login_failure_is_an_auth_error() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.fail_on("login").await;
        let auth = authenticator(runtime.clone(), settings_with_tokens());

        let err = auth.authenticate("ghcr.io/acme/app").await.unwrap_err();
        assert!(matches!(err, UpdateError::Auth(msg) if msg.contains("ghcr.io")));
    }

    #[tokio::test]
    async fn rejected_login_is_not_remembered() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.fail_on("login").await;
        let auth = authenticator(runtime.clone(), settings_with_tokens());

        assert!(auth.authenticate("ghcr.io/acme/app").await.is_err());
        assert!(auth.authenticate("ghcr.io/acme/app").await.is_err());
        assert_eq!(runtime.count_calls("login:ghcr.io").await, 2);
        assert!(matches!(
            auth.validate("ghcr", "octo", "wrong").await,
            Err(UpdateError::Auth(_))
        ));
    }

    #[tokio::test]
    async fn validate_rejects_unknown_provider() {
        let auth = authenticator(Arc::new(MockRuntime::new()), Settings::default());
        assert!(matches!(
            auth.validate("quay", "u", "t").await,
            Err(UpdateError::Config(_))
        ));
        assert!(auth.validate("GHCR", "u", "t").await.is_ok());
    }

    #[tokio::test]
    async fn custom_matcher_extends_inference() {
        struct Mirror;
        impl RegistryMatcher for Mirror {
            fn resolve(&self, host: Option<&str>) -> Option<RegistryTarget> {
                (host == Some("mirror.internal"))
                    .then_some(RegistryTarget::Provider(RegistryProvider::DockerHub))
            }
        }

        let mut matchers = default_matchers();
        matchers.insert(0, Box::new(Mirror));
        let auth = Authenticator::with_matchers(
            Arc::new(MockRuntime::new()),
            Arc::new(SettingsStore::in_memory(Settings::default())),
            matchers,
        );
        assert_eq!(
            auth.resolve("mirror.internal/app"),
            RegistryTarget::Provider(RegistryProvider::DockerHub)
        );
    }
}
