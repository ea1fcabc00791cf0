//! The `ChatBackend` trait: one LLM service the router can send calls to.

use async_trait::async_trait;

use steward_contracts::{
    chat::{ChatRequest, ChatResponse},
    error::BackendError,
};

/// A single chat backend.
///
/// Implementations classify their own failures into `BackendError` so the
/// router can log a useful diagnostic and decide nothing else about them:
/// every failure is treated the same for failover purposes.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Registration name, e.g. `ollama`. Unique within one router.
    fn name(&self) -> &str;

    /// Model used when a request names none, and for every fallback call.
    fn default_model(&self) -> &str;

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, BackendError>;

    /// Cheap liveness probe. Never errors; unreachable means `false`.
    async fn health_check(&self) -> bool;

    /// Models the live service reports.
    async fn list_models(&self) -> Result<Vec<String>, BackendError>;
}
