//! Atelier - per-user workshop module deployments on a shared cluster
//!
//! Atelier exposes a small JSON API through which workshop participants
//! deploy and tear down self-contained workshop modules. Each module is
//! delivered as an Argo CD `Application` resource in the participant's
//! GitOps namespace, together with the module's own namespaces and the
//! role bindings that let the participant and the per-user Argo CD
//! instance work inside them.
//!
//! # Architecture
//!
//! - Deploys are synchronous and idempotent: every sub-step checks before
//!   it creates, so re-submitting a deploy converges instead of failing.
//! - Undeploys are acknowledged immediately; a background watcher polls
//!   until the GitOps controller has finalized the Application, then
//!   removes the module namespaces (or gives up at a deadline and leaves
//!   them for an operator).
//! - The module catalog is loaded once at startup and never mutated.
//!
//! # Modules
//!
//! - [`catalog`] - module catalog loaded from ConfigMaps at startup
//! - [`client`] - narrow cluster-API seam (namespaces, role bindings, Applications)
//! - [`config`] - environment-sourced settings
//! - [`provision`] - idempotent per-user resource provisioning
//! - [`watch`] - deletion confirmation polling and namespace cleanup
//! - [`status`] - deployed/deleting/sync/health aggregation
//! - [`api`] - HTTP surface
//! - [`template`] - user identity and `{{ __user }}` substitution
//! - [`error`] - error types

#![deny(missing_docs)]

pub mod api;
pub mod catalog;
pub mod client;
pub mod config;
pub mod error;
pub mod provision;
pub mod status;
pub mod template;
pub mod watch;

#[cfg(test)]
pub(crate) mod test_fixtures;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Default bind address for the HTTP API
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// ClusterRole granted to workshop users and controller service accounts
/// inside module namespaces
pub const ADMIN_CLUSTER_ROLE: &str = "admin";
