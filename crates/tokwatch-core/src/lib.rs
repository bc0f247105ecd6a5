//! Core library for tokwatch.
//!
//! Observes the network traffic of a single browser tab through the
//! Chrome DevTools Protocol, extracts token-usage accounting from the
//! chat service's responses, and reconciles it into a persisted token
//! budget that is broadcast to observer UIs.
//!
//! Component layout (leaf first):
//! - [`parse`] — pure extraction of model identity and usage counts
//! - [`rules`] — read-only model-rules table (context limits, constants)
//! - [`state`] — the canonical `TokenState` and its persistence
//! - [`cdp`] — the DevTools protocol subset we consume
//! - [`fetch`] — bounded response-body retrieval
//! - [`session`] — attach/detach lifecycle for exactly one tab
//! - [`engine`] — the reconciler state machine (single writer)
//! - [`broadcast`] — snapshot fan-out to subscribers
//! - [`ipc`] — ndjson Unix-socket surface for observer UIs
//! - [`audit`] — capped on-disk diagnostics log

pub mod audit;
pub mod broadcast;
pub mod cdp;
pub mod engine;
pub mod fetch;
pub mod ipc;
pub mod parse;
pub mod rules;
pub mod session;
pub mod state;
