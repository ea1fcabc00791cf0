//! # steward-providers
//!
//! Routing of chat calls across interchangeable LLM backends.
//!
//! - `ChatBackend`: the seam a concrete backend implements.
//! - `ProviderRouter`: default resolution, ordered failover, per-backend
//!   health and counters, concurrent health probes, model listing.
//! - `OpenAiCompatibleBackend` / `OllamaBackend`: thin HTTP adapters, wired
//!   from configuration by `router_from_config`.
//!
//! The router only knows the trait; nothing in it depends on HTTP.

pub mod backend;
pub mod http;
pub mod router;

pub use backend::ChatBackend;
pub use http::{backend_from_config, router_from_config, OllamaBackend, OpenAiCompatibleBackend};
pub use router::{merge_models, BackendOptions, ProviderRouter};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde_json::json;

    use steward_contracts::{
        chat::{ChatMessage, ChatRequest, ChatResponse, RouteRequest},
        config::{EngineConfig, ModelRoute},
        error::{BackendError, BackendErrorKind, StewardError},
    };

    use super::*;

    // ── Mock backend ──────────────────────────────────────────────────────────

    /// Answers "<name> says hi" unless configured to fail. Records the model
    /// of every call it receives.
    struct MockBackend {
        name: String,
        default_model: String,
        fail_with: Option<BackendErrorKind>,
        healthy: bool,
        live_models: Option<Vec<String>>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl MockBackend {
        fn ok(name: &str) -> Self {
            Self {
                name: name.to_string(),
                default_model: format!("{}-default", name),
                fail_with: None,
                healthy: true,
                live_models: Some(vec![]),
                calls: Arc::new(Mutex::new(vec![])),
            }
        }

        fn failing(name: &str, kind: BackendErrorKind) -> Self {
            Self { fail_with: Some(kind), healthy: false, ..Self::ok(name) }
        }
    }

    #[async_trait]
    impl ChatBackend for MockBackend {
        fn name(&self) -> &str {
            &self.name
        }

        fn default_model(&self) -> &str {
            &self.default_model
        }

        async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, BackendError> {
            self.calls.lock().unwrap().push(request.model.clone());
            match self.fail_with {
                Some(kind) => Err(BackendError::new(kind, format!("{} is down", self.name))),
                None => Ok(ChatResponse {
                    content: format!("{} says hi", self.name),
                    model: None,
                    finish_reason: Some("stop".into()),
                    usage: None,
                }),
            }
        }

        async fn health_check(&self) -> bool {
            self.healthy
        }

        async fn list_models(&self) -> Result<Vec<String>, BackendError> {
            self.live_models
                .clone()
                .ok_or_else(|| BackendError::new(BackendErrorKind::Connection, "refused"))
        }
    }

    fn hello() -> RouteRequest {
        RouteRequest::new(vec![ChatMessage::user("hello")])
    }

    fn router_of(backends: Vec<MockBackend>) -> ProviderRouter {
        let mut router = ProviderRouter::new();
        for backend in backends {
            router.register(Arc::new(backend), BackendOptions::default()).unwrap();
        }
        router
    }

    // ── Failover ──────────────────────────────────────────────────────────────

    /// Alpha fails with a connection error, beta answers. The
    /// response is attributed to beta and the health flags reflect both
    /// attempts.
    #[tokio::test]
    async fn test_failover_to_second_backend() {
        let router = router_of(vec![
            MockBackend::failing("alpha", BackendErrorKind::Connection),
            MockBackend::ok("beta"),
        ]);

        let response = router.call(hello()).await.unwrap();

        assert_eq!(response.served_by, "beta");
        assert_eq!(response.content, "beta says hi");
        assert_eq!(router.is_healthy("alpha"), Some(false));
        assert_eq!(router.is_healthy("beta"), Some(true));

        let snapshot = router.snapshot();
        assert_eq!(snapshot[0].total_requests, 1);
        assert_eq!(snapshot[0].failed_requests, 1);
        assert_eq!(snapshot[1].total_requests, 1);
        assert_eq!(snapshot[1].failed_requests, 0);
        assert_eq!(snapshot[1].last_model.as_deref(), Some("beta-default"));
    }

    /// The requested model goes to the primary only; fallbacks use their own
    /// default model.
    #[tokio::test]
    async fn test_fallback_uses_its_own_default_model() {
        let alpha = MockBackend::failing("alpha", BackendErrorKind::Timeout);
        let beta = MockBackend::ok("beta");
        let (alpha_calls, beta_calls) = (alpha.calls.clone(), beta.calls.clone());
        let router = router_of(vec![alpha, beta]);

        let response = router.call(hello().model(Some("big-model".into()))).await.unwrap();

        assert_eq!(*alpha_calls.lock().unwrap(), vec!["big-model"]);
        assert_eq!(*beta_calls.lock().unwrap(), vec!["beta-default"]);
        assert_eq!(response.model, "beta-default");
    }

    /// When every backend fails, each classified cause is reported in
    /// attempt order.
    #[tokio::test]
    async fn test_all_backends_unavailable() {
        let router = router_of(vec![
            MockBackend::failing("alpha", BackendErrorKind::Auth),
            MockBackend::failing("beta", BackendErrorKind::RateLimit),
        ]);

        match router.call(hello()).await {
            Err(StewardError::AllBackendsUnavailable { attempts }) => {
                assert_eq!(attempts.len(), 2);
                assert_eq!(attempts[0].backend, "alpha");
                assert_eq!(attempts[0].error.kind, BackendErrorKind::Auth);
                assert_eq!(attempts[1].backend, "beta");
                assert_eq!(attempts[1].error.kind, BackendErrorKind::RateLimit);
            }
            other => panic!("expected AllBackendsUnavailable, got {:?}", other),
        }
        assert_eq!(router.is_healthy("alpha"), Some(false));
        assert_eq!(router.is_healthy("beta"), Some(false));
    }

    /// A configured chain is walked strictly in order and limits which
    /// backends are tried.
    #[tokio::test]
    async fn test_configured_fallback_chain() {
        let beta = MockBackend::ok("beta");
        let beta_calls = beta.calls.clone();

        let mut router = ProviderRouter::new();
        router
            .register(
                Arc::new(MockBackend::failing("alpha", BackendErrorKind::Connection)),
                BackendOptions { fallbacks: Some(vec!["gamma".into()]), ..Default::default() },
            )
            .unwrap();
        router.register(Arc::new(beta), BackendOptions::default()).unwrap();
        router.register(Arc::new(MockBackend::ok("gamma")), BackendOptions::default()).unwrap();

        let response = router.call(hello()).await.unwrap();

        assert_eq!(response.served_by, "gamma");
        assert!(beta_calls.lock().unwrap().is_empty(), "beta is not in alpha's chain");
    }

    /// A successful primary never touches the fallbacks.
    #[tokio::test]
    async fn test_primary_success_skips_fallbacks() {
        let beta = MockBackend::ok("beta");
        let beta_calls = beta.calls.clone();
        let router = router_of(vec![MockBackend::ok("alpha"), beta]);

        let response = router.call(hello()).await.unwrap();

        assert_eq!(response.served_by, "alpha");
        assert!(beta_calls.lock().unwrap().is_empty());
    }

    /// A backend that failed earlier is healthy again after it answers.
    #[tokio::test]
    async fn test_health_recovers_on_success() {
        let mut flaky = MockBackend::ok("beta");
        flaky.healthy = false;
        let router = router_of(vec![MockBackend::ok("alpha"), flaky]);
        router.check_health().await;
        assert_eq!(router.is_healthy("beta"), Some(false));

        router.call(hello().backend(Some("beta".into()))).await.unwrap();
        assert_eq!(router.is_healthy("beta"), Some(true));
    }

    // ── Resolution ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_unknown_backend_lists_available() {
        let router = router_of(vec![MockBackend::ok("alpha"), MockBackend::ok("beta")]);

        match router.call(hello().backend(Some("gamma".into()))).await {
            Err(StewardError::BackendNotFound { name, available }) => {
                assert_eq!(name, "gamma");
                assert_eq!(available, vec!["alpha", "beta"]);
            }
            other => panic!("expected BackendNotFound, got {:?}", other),
        }
    }

    /// An omitted backend resolves to the configured default, else the first
    /// registered one.
    #[tokio::test]
    async fn test_default_backend_resolution() {
        let mut router = router_of(vec![MockBackend::ok("alpha"), MockBackend::ok("beta")]);
        assert_eq!(router.call(hello()).await.unwrap().served_by, "alpha");

        router.set_default("beta");
        assert_eq!(router.call(hello()).await.unwrap().served_by, "beta");
    }

    #[tokio::test]
    async fn test_empty_router_reports_not_found() {
        let router = ProviderRouter::new();
        match router.call(hello()).await {
            Err(StewardError::BackendNotFound { available, .. }) => assert!(available.is_empty()),
            other => panic!("expected BackendNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut router = router_of(vec![MockBackend::ok("alpha")]);
        match router.register(Arc::new(MockBackend::ok("alpha")), BackendOptions::default()) {
            Err(StewardError::Config { reason }) => assert!(reason.contains("alpha")),
            other => panic!("expected Config error, got {:?}", other),
        }
    }

    /// Counters are atomics: concurrent calls never lose an update.
    #[tokio::test]
    async fn test_concurrent_calls_count_exactly() {
        let router = router_of(vec![MockBackend::ok("alpha")]);
        let calls = (0..50).map(|_| router.call(hello()));
        let results = futures_util::future::join_all(calls).await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(router.snapshot()[0].total_requests, 50);
    }

    // ── Health and models ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_check_health_updates_flags() {
        let mut down = MockBackend::ok("beta");
        down.healthy = false;
        let router = router_of(vec![MockBackend::ok("alpha"), down]);

        let health = router.check_health().await;

        assert_eq!(health.get("alpha"), Some(&true));
        assert_eq!(health.get("beta"), Some(&false));
        assert_eq!(router.is_healthy("beta"), Some(false));
    }

    /// Catalog first, then live models, de-duplicated in first-seen order.
    #[tokio::test]
    async fn test_list_models_merges_catalog_and_live() {
        let mut backend = MockBackend::ok("alpha");
        backend.live_models = Some(vec!["b".into(), "c".into(), "a".into()]);
        let mut router = ProviderRouter::new();
        router
            .register(
                Arc::new(backend),
                BackendOptions { catalog: vec!["a".into(), "b".into()], ..Default::default() },
            )
            .unwrap();

        assert_eq!(router.list_models("alpha").await.unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_list_models_falls_back_to_catalog() {
        let mut backend = MockBackend::ok("alpha");
        backend.live_models = None;
        let mut router = ProviderRouter::new();
        router
            .register(Arc::new(backend), BackendOptions { catalog: vec!["a".into()], ..Default::default() })
            .unwrap();

        assert_eq!(router.list_models("alpha").await.unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_default_model_from_list_when_unconfigured() {
        let mut backend = MockBackend::ok("alpha");
        backend.default_model = String::new();
        backend.live_models = Some(vec!["live-1".into()]);
        let router = router_of(vec![backend]);

        assert_eq!(router.default_model("alpha").await.unwrap(), "live-1");
    }

    // ── Wire formats ──────────────────────────────────────────────────────────

    #[test]
    fn test_parse_openai_response() {
        let data = json!({
            "model": "qwen-plus",
            "choices": [{ "message": { "role": "assistant", "content": "hi" }, "finish_reason": "stop" }],
            "usage": { "prompt_tokens": 3, "completion_tokens": 1 }
        });
        let response = http::parse_openai_response(&data).unwrap();
        assert_eq!(response.content, "hi");
        assert_eq!(response.model.as_deref(), Some("qwen-plus"));
        assert_eq!(response.usage.unwrap().total_tokens, 4);
    }

    #[test]
    fn test_parse_openai_response_without_choices() {
        let err = http::parse_openai_response(&json!({ "choices": [] })).unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::Other);
    }

    #[test]
    fn test_ollama_body_and_response() {
        let request = ChatRequest {
            model: "qwen2.5-coder".into(),
            messages: vec![ChatMessage::user("hi")],
            temperature: Some(0.5),
            max_tokens: None,
        };
        let body = http::ollama_body(&request);
        assert_eq!(body["stream"], json!(false));
        assert_eq!(body["messages"][0]["role"], json!("user"));
        assert_eq!(body["options"]["temperature"], json!(0.5));

        let response = http::parse_ollama_response(&json!({
            "model": "qwen2.5-coder",
            "message": { "role": "assistant", "content": "hello" },
            "done_reason": "stop",
            "prompt_eval_count": 5,
            "eval_count": 2
        }))
        .unwrap();
        assert_eq!(response.content, "hello");
        assert_eq!(response.usage.unwrap().total_tokens, 7);
    }

    /// The router built from configuration registers the default provider
    /// first and carries each catalog.
    #[tokio::test]
    async fn test_router_from_config() {
        let config = EngineConfig::from_toml_str(
            r#"
            [app]
            default_provider = "ollama"

            [providers.bailian]
            kind = "openai"

            [providers.ollama]
            kind = "ollama"

            [app.model_route]
            writing = "bailian:qwen-turbo"
            "#,
        )
        .unwrap();

        let router = router_from_config(&config).unwrap();
        assert_eq!(router.backend_names(), vec!["ollama", "bailian"]);
        assert_eq!(router.default_backend(), Some("ollama"));
        assert_eq!(router.snapshot()[1].default_model, "qwen-plus");
        let route = router.route("writing").unwrap();
        assert_eq!(route.backend, "bailian");
        assert_eq!(route.model, "qwen-turbo");
    }

    // ── Model routes ──────────────────────────────────────────────────────────

    fn coding_route() -> ModelRoute {
        ModelRoute::parse("beta:beta-coder").unwrap()
    }

    /// A task type with a route goes to the routed backend and model.
    #[tokio::test]
    async fn test_task_type_routes_backend_and_model() {
        let beta = MockBackend::ok("beta");
        let beta_calls = beta.calls.clone();
        let mut router = router_of(vec![MockBackend::ok("alpha"), beta]);
        router.set_route("coding", coding_route());

        let response = router.call(hello().task_type(Some("coding".into()))).await.unwrap();

        assert_eq!(response.served_by, "beta");
        assert_eq!(*beta_calls.lock().unwrap(), vec!["beta-coder"]);
    }

    /// An explicit backend or model beats the route; an unknown task type
    /// uses the default backend.
    #[tokio::test]
    async fn test_route_yields_to_explicit_request_and_default() {
        let alpha = MockBackend::ok("alpha");
        let alpha_calls = alpha.calls.clone();
        let beta = MockBackend::ok("beta");
        let beta_calls = beta.calls.clone();
        let mut router = router_of(vec![alpha, beta]);
        router.set_route("coding", coding_route());

        let explicit = hello().backend(Some("alpha".into())).task_type(Some("coding".into()));
        assert_eq!(router.call(explicit).await.unwrap().served_by, "alpha");

        let own_model = hello().model(Some("beta-large".into())).task_type(Some("coding".into()));
        assert_eq!(router.call(own_model).await.unwrap().served_by, "beta");

        let unrouted = hello().task_type(Some("poetry".into()));
        assert_eq!(router.call(unrouted).await.unwrap().served_by, "alpha");

        assert_eq!(*alpha_calls.lock().unwrap(), vec!["alpha-default", "alpha-default"]);
        assert_eq!(*beta_calls.lock().unwrap(), vec!["beta-large"]);
    }

    /// A route naming an unregistered backend falls back to the default.
    #[tokio::test]
    async fn test_route_to_unregistered_backend_uses_default() {
        let mut router = router_of(vec![MockBackend::ok("alpha")]);
        router.set_route("coding", coding_route());

        let response = router.call(hello().task_type(Some("coding".into()))).await.unwrap();
        assert_eq!(response.served_by, "alpha");
        assert_eq!(response.model, "alpha-default");
    }

    /// A routed backend that fails still walks its fallback chain.
    #[tokio::test]
    async fn test_routed_backend_fails_over() {
        let mut router = router_of(vec![
            MockBackend::ok("alpha"),
            MockBackend::failing("beta", BackendErrorKind::Timeout),
        ]);
        router.set_route("coding", coding_route());

        let response = router.call(hello().task_type(Some("coding".into()))).await.unwrap();
        assert_eq!(response.served_by, "alpha");
        assert_eq!(router.is_healthy("beta"), Some(false));
    }
}
