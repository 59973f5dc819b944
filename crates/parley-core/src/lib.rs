//! # parley-core
//!
//! Foundation types for the Parley correlation layer.
//!
//! This crate provides the shared vocabulary that `parley-link` builds on:
//!
//! - **Branded ID**: [`ConvoId`], the per-conversation correlation identifier
//! - **Errors**: [`LinkError`] hierarchy via `thiserror`
//! - **Socket state**: [`SocketState`] mirror of the underlying transport
//! - **Wire shapes**: envelope tagging and correlation-id extraction for
//!   JSON text frames

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod state;
pub mod wire;

pub use errors::LinkError;
pub use ids::ConvoId;
pub use state::SocketState;
