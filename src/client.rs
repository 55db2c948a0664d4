// Consumer-facing client and the capability interface resource facades build on

use futures::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::auth::AuthManager;
use crate::config::Config;
use crate::error::Result;
use crate::http_client::HttpTransport;
use crate::request::RequestSpec;
use crate::utils::require_non_empty;

/// What a resource facade needs from the session layer
///
/// Facades take `&dyn ApiSession` (or a generic `S: ApiSession`) instead of
/// repeating token and network handling per resource.
pub trait ApiSession: Send + Sync {
    /// Make sure a usable bearer token is cached
    fn ensure_valid<'a>(&'a self, cancel: &'a CancellationToken) -> BoxFuture<'a, Result<()>>;

    /// Make sure a network is bound
    fn ensure_network_set<'a>(&'a self, cancel: &'a CancellationToken)
        -> BoxFuture<'a, Result<()>>;

    /// Cached bearer token
    fn get_token(&self) -> Result<String>;

    /// Execute a request spec and return the unwrapped JSON payload
    fn execute_json<'a>(
        &'a self,
        spec: &'a RequestSpec,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Value>>;
}

/// Authenticated BSN.cloud client
#[derive(Clone)]
pub struct BsnClient {
    auth: Arc<AuthManager>,
}

impl BsnClient {
    pub fn new(config: Config) -> Result<Self> {
        let config = Arc::new(config);
        let transport = Arc::new(HttpTransport::new(&config)?);
        Ok(Self {
            auth: Arc::new(AuthManager::new(config, transport)),
        })
    }

    /// Build a client from `.env` and the process environment
    pub fn from_env() -> Result<Self> {
        Self::new(Config::from_env()?)
    }

    /// Session state: token, networks, readiness guards
    pub fn auth(&self) -> &Arc<AuthManager> {
        &self.auth
    }

    /// Ensure token and network (unless the spec opts out), then execute
    pub async fn execute<T: DeserializeOwned>(
        &self,
        spec: &RequestSpec,
        cancel: &CancellationToken,
    ) -> Result<T> {
        require_non_empty(spec.path(), "request path")?;

        self.auth.ensure_valid(cancel).await?;
        if spec.requires_network() {
            self.auth.ensure_network_set(cancel).await?;
        }
        self.auth.execute_authorized(spec, cancel).await
    }

    pub async fn get_with_auth<T: DeserializeOwned>(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<T> {
        self.execute(&RequestSpec::get(path), cancel).await
    }

    pub async fn post_with_auth<T, B>(
        &self,
        path: &str,
        body: &B,
        cancel: &CancellationToken,
    ) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let spec = RequestSpec::post(path).json(body)?;
        self.execute(&spec, cancel).await
    }

    pub async fn put_with_auth<T, B>(
        &self,
        path: &str,
        body: &B,
        cancel: &CancellationToken,
    ) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let spec = RequestSpec::put(path).json(body)?;
        self.execute(&spec, cancel).await
    }

    pub async fn delete_with_auth<T: DeserializeOwned>(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<T> {
        self.execute(&RequestSpec::delete(path), cancel).await
    }
}

impl ApiSession for BsnClient {
    fn ensure_valid<'a>(&'a self, cancel: &'a CancellationToken) -> BoxFuture<'a, Result<()>> {
        self.auth.ensure_valid(cancel).boxed()
    }

    fn ensure_network_set<'a>(
        &'a self,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<()>> {
        self.auth.ensure_network_set(cancel).boxed()
    }

    fn get_token(&self) -> Result<String> {
        self.auth.get_token()
    }

    fn execute_json<'a>(
        &'a self,
        spec: &'a RequestSpec,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Value>> {
        self.execute(spec, cancel).boxed()
    }
}
