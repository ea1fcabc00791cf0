//! The provider router: one handle per backend, a default, and failover.
//!
//! `call()` follows a fixed sequence:
//!
//! ```text
//! resolve primary → attempt → [fallback chain, strictly in order] → AllBackendsUnavailable
//! ```
//!
//! The primary is the request's explicit backend, else the model route
//! registered for its task type, else the default backend.
//!
//! Every attempt, successful or not, updates the attempted backend's health
//! flag and counters. Counters are atomics on the handle, so concurrent calls
//! never lose updates and no lock is held across an await.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::future::join_all;
use tracing::{debug, error, info, warn};

use steward_contracts::{
    chat::{ChatRequest, ProviderSnapshot, RouteRequest, RoutedResponse},
    config::ModelRoute,
    error::{BackendError, BackendFailure, StewardError, StewardResult},
};
use steward_core::traits::ChatRouter;

use crate::backend::ChatBackend;

/// Per-backend registration options.
#[derive(Debug, Clone, Default)]
pub struct BackendOptions {
    /// Static model catalog, merged ahead of the live model list.
    pub catalog: Vec<String>,
    /// Ordered failover chain. `None` means every other registered backend
    /// in registration order.
    pub fallbacks: Option<Vec<String>>,
}

struct ProviderHandle {
    backend: Arc<dyn ChatBackend>,
    options: BackendOptions,
    healthy: AtomicBool,
    total_requests: AtomicU64,
    failed_requests: AtomicU64,
    last_model: Mutex<Option<String>>,
}

impl ProviderHandle {
    fn name(&self) -> &str {
        self.backend.name()
    }

    fn record_attempt(&self, model: &str, ok: bool) {
        self.total_requests.fetch_add(1, Ordering::SeqCst);
        if !ok {
            self.failed_requests.fetch_add(1, Ordering::SeqCst);
        }
        self.healthy.store(ok, Ordering::SeqCst);
        if let Ok(mut last) = self.last_model.lock() {
            *last = Some(model.to_string());
        }
    }

    fn snapshot(&self) -> ProviderSnapshot {
        ProviderSnapshot {
            name: self.name().to_string(),
            default_model: self.backend.default_model().to_string(),
            healthy: self.healthy.load(Ordering::SeqCst),
            total_requests: self.total_requests.load(Ordering::SeqCst),
            failed_requests: self.failed_requests.load(Ordering::SeqCst),
            last_model: self.last_model.lock().ok().and_then(|m| m.clone()),
        }
    }
}

/// Routes chat requests across registered backends with failover.
#[derive(Default)]
pub struct ProviderRouter {
    /// Registration order is the default failover order.
    handles: Vec<ProviderHandle>,
    default_backend: Option<String>,
    routes: BTreeMap<String, ModelRoute>,
}

impl ProviderRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `backend`. Names must be unique.
    ///
    /// Backends start healthy; the first failed attempt or probe clears the
    /// flag.
    pub fn register(&mut self, backend: Arc<dyn ChatBackend>, options: BackendOptions) -> StewardResult<()> {
        if self.handle(backend.name()).is_some() {
            return Err(StewardError::Config {
                reason: format!("backend '{}' registered twice", backend.name()),
            });
        }
        debug!(backend = %backend.name(), "backend registered");
        self.handles.push(ProviderHandle {
            backend,
            options,
            healthy: AtomicBool::new(true),
            total_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            last_model: Mutex::new(None),
        });
        Ok(())
    }

    /// Builder-style `register` for tests and small setups.
    pub fn with_backend(mut self, backend: Arc<dyn ChatBackend>, options: BackendOptions) -> StewardResult<Self> {
        self.register(backend, options)?;
        Ok(self)
    }

    /// Backend used when a request names none. Without one, the first
    /// registered backend is the default.
    pub fn set_default(&mut self, name: impl Into<String>) {
        self.default_backend = Some(name.into());
    }

    pub fn default_backend(&self) -> Option<&str> {
        self.default_backend
            .as_deref()
            .or_else(|| self.handles.first().map(ProviderHandle::name))
    }

    /// Send requests tagged with `task_type` to `route` unless they name a
    /// backend themselves.
    pub fn set_route(&mut self, task_type: impl Into<String>, route: ModelRoute) {
        self.routes.insert(task_type.into(), route);
    }

    pub fn route(&self, task_type: &str) -> Option<&ModelRoute> {
        self.routes.get(task_type)
    }

    pub fn backend_names(&self) -> Vec<String> {
        self.handles.iter().map(|h| h.name().to_string()).collect()
    }

    pub fn is_healthy(&self, name: &str) -> Option<bool> {
        self.handle(name).map(|h| h.healthy.load(Ordering::SeqCst))
    }

    pub fn snapshot(&self) -> Vec<ProviderSnapshot> {
        self.handles.iter().map(ProviderHandle::snapshot).collect()
    }

    fn handle(&self, name: &str) -> Option<&ProviderHandle> {
        self.handles.iter().find(|h| h.name() == name)
    }

    fn resolve(&self, requested: Option<&str>) -> StewardResult<&ProviderHandle> {
        let name = requested.or_else(|| self.default_backend()).unwrap_or_default();
        self.handle(name).ok_or_else(|| StewardError::BackendNotFound {
            name: name.to_string(),
            available: self.backend_names(),
        })
    }

    /// The primary handle for `request` and the model its route selects.
    /// A route to an unregistered backend is ignored.
    fn resolve_request(&self, request: &RouteRequest) -> StewardResult<(&ProviderHandle, Option<String>)> {
        if request.backend.is_none() {
            if let Some(route) = request.task_type.as_deref().and_then(|t| self.route(t)) {
                match self.handle(&route.backend) {
                    Some(handle) => return Ok((handle, Some(route.model.clone()))),
                    None => warn!(backend = %route.backend, "routed backend is not registered, using default"),
                }
            }
        }
        Ok((self.resolve(request.backend.as_deref())?, None))
    }

    /// Fallback names for `primary`, excluding `primary` itself.
    fn fallback_chain(&self, primary: &ProviderHandle) -> Vec<String> {
        match &primary.options.fallbacks {
            Some(chain) => chain.iter().filter(|n| n.as_str() != primary.name()).cloned().collect(),
            None => self
                .handles
                .iter()
                .map(|h| h.name().to_string())
                .filter(|n| n != primary.name())
                .collect(),
        }
    }

    async fn attempt(
        &self,
        handle: &ProviderHandle,
        model: String,
        request: &RouteRequest,
    ) -> Result<RoutedResponse, BackendError> {
        let chat = ChatRequest {
            model: model.clone(),
            messages: request.messages.clone(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };
        debug!(backend = %handle.name(), model = %model, "calling backend");

        match handle.backend.chat(&chat).await {
            Ok(response) => {
                handle.record_attempt(&model, true);
                Ok(RoutedResponse {
                    content: response.content,
                    served_by: handle.name().to_string(),
                    model: response.model.unwrap_or(model),
                    usage: response.usage,
                })
            }
            Err(err) => {
                handle.record_attempt(&model, false);
                warn!(
                    backend = %handle.name(),
                    kind = err.kind.as_str(),
                    hint = err.diagnostic(),
                    error = %err.message,
                    "backend call failed"
                );
                Err(err)
            }
        }
    }

    /// Route one request.
    ///
    /// # Pipeline
    ///
    /// 1. Resolve the backend (explicit, else routed by task type, else
    ///    default); unknown names fail with `BackendNotFound` before any
    ///    attempt.
    /// 2. Attempt it with the requested model, else the routed model, else
    ///    its default model.
    /// 3. On failure, attempt each fallback in order with that fallback's
    ///    own default model. The first success wins.
    /// 4. If every attempt failed, return `AllBackendsUnavailable` listing
    ///    each classified cause in attempt order.
    pub async fn call(&self, request: RouteRequest) -> StewardResult<RoutedResponse> {
        // ── Step 1: Resolve ──────────────────────────────────────────────────
        let (primary, routed_model) = self.resolve_request(&request)?;

        // ── Step 2: Primary attempt ──────────────────────────────────────────
        let model = request
            .model
            .clone()
            .filter(|m| !m.trim().is_empty())
            .or(routed_model)
            .unwrap_or_else(|| primary.backend.default_model().to_string());

        let mut attempts = Vec::new();
        match self.attempt(primary, model, &request).await {
            Ok(response) => return Ok(response),
            Err(error) => attempts.push(BackendFailure { backend: primary.name().to_string(), error }),
        }

        // ── Step 3: Fallback chain ───────────────────────────────────────────
        for name in self.fallback_chain(primary) {
            let Some(handle) = self.handle(&name) else {
                warn!(backend = %name, "fallback backend is not registered, skipping");
                continue;
            };
            let model = handle.backend.default_model().to_string();
            match self.attempt(handle, model, &request).await {
                Ok(response) => {
                    info!(requested = %primary.name(), served_by = %response.served_by, "served by fallback backend");
                    return Ok(response);
                }
                Err(error) => attempts.push(BackendFailure { backend: name, error }),
            }
        }

        // ── Step 4: Exhausted ────────────────────────────────────────────────
        error!(requested = %primary.name(), attempts = attempts.len(), "all backends unavailable");
        Err(StewardError::AllBackendsUnavailable { attempts })
    }

    /// Probe every backend concurrently and update the health flags.
    pub async fn check_health(&self) -> BTreeMap<String, bool> {
        let probes = self.handles.iter().map(|handle| async move {
            let ok = handle.backend.health_check().await;
            handle.healthy.store(ok, Ordering::SeqCst);
            (handle.name().to_string(), ok)
        });
        let results: BTreeMap<_, _> = join_all(probes).await.into_iter().collect();
        info!(healthy = results.values().filter(|ok| **ok).count(), total = results.len(), "health check complete");
        results
    }

    /// The static catalog followed by the live list, de-duplicated in
    /// first-seen order. A failing live lookup yields the catalog alone.
    pub async fn list_models(&self, name: &str) -> StewardResult<Vec<String>> {
        let handle = self.resolve(Some(name))?;
        let live = match handle.backend.list_models().await {
            Ok(models) => models,
            Err(err) => {
                warn!(backend = %name, error = %err, "live model list unavailable, using catalog");
                Vec::new()
            }
        };
        Ok(merge_models(&handle.options.catalog, &live))
    }

    /// The backend's configured default model, else the first model
    /// `list_models` reports.
    pub async fn default_model(&self, name: &str) -> StewardResult<String> {
        let handle = self.resolve(Some(name))?;
        let configured = handle.backend.default_model();
        if !configured.trim().is_empty() {
            return Ok(configured.to_string());
        }
        self.list_models(name)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StewardError::Config {
                reason: format!("backend '{}' has no default model and lists none", name),
            })
    }
}

/// Concatenate `catalog` and `live`, dropping repeats and blank names.
pub fn merge_models(catalog: &[String], live: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(catalog.len() + live.len());
    for model in catalog.iter().chain(live) {
        if !model.trim().is_empty() && !merged.contains(model) {
            merged.push(model.clone());
        }
    }
    merged
}

#[async_trait]
impl ChatRouter for ProviderRouter {
    async fn call(&self, request: RouteRequest) -> StewardResult<RoutedResponse> {
        ProviderRouter::call(self, request).await
    }
}
