//! # steward-engine
//!
//! One entry point for embedding the engine: build an [`Engine`] from an
//! `EngineConfig` plus the collaborators configuration cannot describe (a
//! tool executor, a decision source, optionally explicit backends and an
//! audit journal), then run agents, trigger tasks, or start the scheduler.

pub mod engine;

pub use engine::{Engine, EngineBuilder};

// ── Tests ─────────────────────────────────────────────────────────────────────
