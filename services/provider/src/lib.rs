//! Provider library crate.
//!
//! # Purpose
//! Reconciles principal and target assignments into shared remote policy
//! documents without losing sibling entries or concurrent edits. Exposes the
//! store backends, the reconciler, the resource lifecycles, and the wiring the
//! binary and tests share.
//!
//! # Notes
//! Model types live in `grantline-model`; this crate owns everything that talks
//! to the remote service or coordinates concurrent callers.
pub mod app;
pub mod auth;
pub mod config;
pub mod error;
pub mod manifest;
pub mod observability;
pub mod reconcile;
pub mod resources;
pub mod store;
