use futures::future::{BoxFuture, FutureExt, Shared};
use serde::de::{DeserializeOwned, IgnoredAny};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio_util::sync::CancellationToken;

use super::network::{self, Network};
use super::refresh;
use super::types::Token;
use crate::config::Config;
use crate::error::{BsnError, Result};
use crate::http_client::HttpTransport;
use crate::request::RequestSpec;
use crate::utils::{require_non_empty, require_positive_id};

/// One token exchange shared by every caller that needs it
type Exchange = Shared<BoxFuture<'static, Result<Token>>>;

/// Authentication manager
/// Keeps one bearer token and one bound network, safe under concurrent use
pub struct AuthManager {
    config: Arc<Config>,

    /// Transport for network lookups and binds; its pooled client also
    /// carries the token exchange
    transport: Arc<HttpTransport>,

    /// Current token, replaced whole on every refresh
    token: Arc<RwLock<Option<Token>>>,

    /// Bound network context
    network: Arc<RwLock<Option<Network>>>,

    /// Exchange in flight, if any. Lock order: `in_flight`, then `token`.
    in_flight: Arc<Mutex<Option<Exchange>>>,

    /// Serializes network binds
    bind_lock: tokio::sync::Mutex<()>,

    /// Number of token exchanges issued
    exchanges: Arc<AtomicU64>,
}

impl AuthManager {
    pub fn new(config: Arc<Config>, transport: Arc<HttpTransport>) -> Self {
        Self {
            config,
            transport,
            token: Arc::new(RwLock::new(None)),
            network: Arc::new(RwLock::new(None)),
            in_flight: Arc::new(Mutex::new(None)),
            bind_lock: tokio::sync::Mutex::new(()),
            exchanges: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Perform a client-credentials exchange, joining one already in flight
    pub async fn authenticate(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(BsnError::Cancelled);
        }
        let exchange = {
            let mut slot = lock(&self.in_flight);
            match (*slot).clone() {
                Some(existing) => existing,
                None => self.start_exchange(&mut slot),
            }
        };
        self.await_exchange(exchange, cancel).await
    }

    /// Authenticate only if the cached token is missing or inside the safety margin
    pub async fn ensure_valid(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(BsnError::Cancelled);
        }
        let exchange = {
            let mut slot = lock(&self.in_flight);
            match (*slot).clone() {
                Some(existing) => existing,
                None => {
                    if read(&self.token).as_ref().is_some_and(Token::is_valid) {
                        return Ok(());
                    }
                    tracing::debug!("Access token missing or expiring, authenticating...");
                    self.start_exchange(&mut slot)
                }
            }
        };
        self.await_exchange(exchange, cancel).await
    }

    async fn await_exchange(&self, exchange: Exchange, cancel: &CancellationToken) -> Result<()> {
        // The exchange runs on its own task; cancelling only detaches this waiter
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(BsnError::Cancelled),
            result = exchange => result.map(|_| ()),
        }
    }

    /// Spawn the exchange task and park a shared handle to it in `slot`
    ///
    /// The task is driven by the runtime, not by its waiters, so it finishes
    /// and retires itself even if every caller has gone away.
    fn start_exchange(&self, slot: &mut MutexGuard<'_, Option<Exchange>>) -> Exchange {
        let client = self.transport.client().clone();
        let transport = self.transport.clone();
        let config = self.config.clone();
        let token_slot = self.token.clone();
        let network_slot = self.network.clone();
        let in_flight = self.in_flight.clone();
        let exchanges = self.exchanges.clone();

        let task = async move {
            exchanges.fetch_add(1, Ordering::SeqCst);

            let result = refresh::exchange_client_credentials(
                &client,
                &config.auth_url,
                &config.credentials,
                config.token_refresh_margin,
            )
            .await;

            if let Ok(ref token) = result {
                // The server-side session belongs to the token; carry the tenant over
                let bound = read(&network_slot).clone();
                if let Some(network) = bound {
                    rebind(&transport, &network, token).await;
                }
            }

            // Publish and retire under the slot lock so readers never see a
            // finished exchange without its token
            let mut slot = lock(&in_flight);
            match result {
                Ok(ref token) => *write(&token_slot) = Some(token.clone()),
                Err(ref e) => tracing::error!("Token exchange failed: {}", e),
            }
            *slot = None;
            drop(slot);

            result
        };

        let handle = tokio::spawn(task);
        let retire = self.in_flight.clone();
        let exchange = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => {
                    // The task never reached its own cleanup
                    *lock(&retire) = None;
                    tracing::error!("Token exchange task failed: {}", e);
                    Err(BsnError::Authentication(format!(
                        "token exchange task failed: {}",
                        e
                    )))
                }
            }
        }
        .boxed()
        .shared();

        **slot = Some(exchange.clone());
        exchange
    }

    /// Cached access token; fails if no exchange has succeeded yet
    pub fn get_token(&self) -> Result<String> {
        read(&self.token)
            .as_ref()
            .map(|t| t.access_token.clone())
            .ok_or_else(|| {
                BsnError::Authentication(
                    "no access token available; authenticate first".to_string(),
                )
            })
    }

    /// Snapshot of the cached token
    pub fn current_token(&self) -> Option<Token> {
        read(&self.token).clone()
    }

    pub fn is_authenticated(&self) -> bool {
        read(&self.token).as_ref().is_some_and(Token::is_valid)
    }

    /// Drop the cached token if it is still `stale`
    pub fn invalidate_token(&self, stale: &str) {
        let mut token = write(&self.token);
        if token.as_ref().is_some_and(|t| t.access_token == stale) {
            tracing::debug!("Invalidating rejected access token");
            *token = None;
        }
    }

    /// Number of token exchanges issued so far
    pub fn exchange_count(&self) -> u64 {
        self.exchanges.load(Ordering::SeqCst)
    }

    /// Execute with the current token; a 401 triggers one re-authentication and one retry
    pub async fn execute_authorized<T: DeserializeOwned>(
        &self,
        spec: &RequestSpec,
        cancel: &CancellationToken,
    ) -> Result<T> {
        self.ensure_valid(cancel).await?;
        let token = self.get_token()?;

        match self.transport.execute(spec, Some(&token), cancel).await {
            Err(BsnError::Authentication(reason)) => {
                tracing::warn!("Request rejected ({}), re-authenticating once...", reason);
                self.invalidate_token(&token);
                self.ensure_valid(cancel).await?;
                let token = self.get_token()?;
                self.transport.execute(spec, Some(&token), cancel).await
            }
            other => other,
        }
    }

    /// List all networks visible to the principal; needs a token, not a bound network
    pub async fn get_networks(&self, cancel: &CancellationToken) -> Result<Vec<Network>> {
        let networks: Vec<Network> = self
            .execute_authorized(&network::list_spec(), cancel)
            .await?;
        tracing::debug!("Found {} networks", networks.len());
        Ok(networks)
    }

    /// Bind the session to the network called `name`
    pub async fn set_network(&self, name: &str, cancel: &CancellationToken) -> Result<Network> {
        let name = require_non_empty(name, "network name")?;
        let _guard = self.bind_lock.lock().await;
        self.bind_by_name(name, cancel).await
    }

    /// Bind the session to the network with the given id
    pub async fn set_network_by_id(&self, id: i64, cancel: &CancellationToken) -> Result<Network> {
        let id = require_positive_id(id, "network id")?;
        let _guard = self.bind_lock.lock().await;

        let networks = self.get_networks(cancel).await?;
        let target = network::find_by_id(&networks, id)
            .cloned()
            .ok_or_else(|| network::not_found(format!("with id {}", id), &networks))?;
        self.bind_and_cache(target, cancel).await
    }

    /// Make sure a network is bound, falling back to the configured default
    pub async fn ensure_network_set(&self, cancel: &CancellationToken) -> Result<()> {
        if self.is_network_set() {
            return Ok(());
        }

        let Some(name) = self.config.default_network.clone() else {
            return Err(BsnError::Configuration(
                "no network selected: call set_network or configure BS_NETWORK".to_string(),
            ));
        };

        let _guard = self.bind_lock.lock().await;
        if self.is_network_set() {
            return Ok(());
        }

        tracing::info!("No network bound, selecting default network {:?}", name);
        self.bind_by_name(&name, cancel).await.map(|_| ())
    }

    pub fn is_network_set(&self) -> bool {
        read(&self.network).is_some()
    }

    /// Snapshot of the bound network
    pub fn current_network(&self) -> Option<Network> {
        read(&self.network).clone()
    }

    // Callers hold `bind_lock`
    async fn bind_by_name(&self, name: &str, cancel: &CancellationToken) -> Result<Network> {
        let networks = self.get_networks(cancel).await?;
        let target = network::find_by_name(&networks, name)
            .cloned()
            .ok_or_else(|| network::not_found(format!("{:?}", name), &networks))?;
        self.bind_and_cache(target, cancel).await
    }

    async fn bind_and_cache(&self, target: Network, cancel: &CancellationToken) -> Result<Network> {
        let spec = network::bind_spec(&target.name)?;
        self.execute_authorized::<IgnoredAny>(&spec, cancel).await?;

        *write(&self.network) = Some(target.clone());
        tracing::info!("Network bound: {} (id {})", target.name, target.id);
        Ok(target)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn transport(&self) -> &Arc<HttpTransport> {
        &self.transport
    }

    #[cfg(test)]
    fn set_token(&self, token: Option<Token>) {
        *write(&self.token) = token;
    }
}

async fn rebind(transport: &HttpTransport, network: &Network, token: &Token) {
    let spec = match network::bind_spec(&network.name) {
        Ok(spec) => spec,
        Err(e) => {
            tracing::warn!("Could not build network rebind request: {}", e);
            return;
        }
    };

    match transport
        .execute::<IgnoredAny>(&spec, Some(&token.access_token), &CancellationToken::new())
        .await
    {
        Ok(_) => tracing::debug!("Network {} rebound to refreshed token", network.name),
        Err(e) => tracing::warn!(
            "Failed to rebind network {} after token refresh: {}",
            network.name,
            e
        ),
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(PoisonError::into_inner)
}
