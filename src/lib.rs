//! CloudKeep library -- per-user file storage API.
//!
//! This crate provides the components for running the CloudKeep HTTP
//! service: request authorization, file lifecycle handlers, a metadata
//! store and pluggable object storage backends.

use std::sync::Arc;

pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod metadata;
pub mod metrics;
pub mod presign;
pub mod server;
pub mod storage;

use crate::auth::Authorizer;
use crate::config::Config;
use crate::metadata::store::MetadataStore;
use crate::presign::UrlSigner;
use crate::storage::backend::ObjectStore;

/// Shared application state passed to all handlers via `axum::extract::State`.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// File metadata records.
    pub metadata: Arc<dyn MetadataStore>,
    /// File content.
    pub storage: Arc<dyn ObjectStore>,
    /// Bearer token authorizer, used in `authorizer` identity mode.
    pub authorizer: Authorizer,
    /// Signs and verifies `/blobs/...` links.
    pub signer: Arc<UrlSigner>,
}
