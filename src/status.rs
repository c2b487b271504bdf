//! Deployment status types and aggregation
//!
//! The GitOps controller owns the Application resource and its status
//! fields; this module only reads them. [`aggregate`] is a pure function
//! over the catalog and a snapshot of live Applications - it performs no
//! cluster calls of its own.

use kube::api::DynamicObject;
use serde::Serialize;

use crate::catalog::ModuleCatalog;

/// Whether a deploy/undeploy call changed anything
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    /// The call performed the requested change
    Ok,
    /// The system was already in the requested state (or the module is
    /// unknown); nothing was mutated
    NotChanged,
}

/// Snapshot of one Application's observed state
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationState {
    /// An Application resource exists for this module
    pub deployed: bool,
    /// The Application carries a deletion timestamp or teardown has begun
    pub deleting: bool,
    /// Sync status reported by the GitOps controller, empty when unset
    pub status: String,
    /// Health status reported by the GitOps controller, empty when unset
    pub health: String,
}

impl ApplicationState {
    /// Snapshot of a live Application resource
    pub fn from_resource(resource: &DynamicObject) -> Self {
        Self {
            deployed: true,
            deleting: resource.metadata.deletion_timestamp.is_some(),
            status: status_field(resource, "/status/sync/status"),
            health: status_field(resource, "/status/health/status"),
        }
    }

    /// Snapshot returned while teardown is in flight
    pub fn deleting() -> Self {
        Self {
            deployed: true,
            deleting: true,
            status: String::new(),
            health: String::new(),
        }
    }

    /// Snapshot for a module with no Application resource
    pub fn absent() -> Self {
        Self {
            deployed: false,
            deleting: false,
            status: String::new(),
            health: String::new(),
        }
    }
}

/// Response to a deploy or undeploy request
#[derive(Clone, Debug, Serialize)]
pub struct ChangeSummary {
    /// Whether the call changed anything
    pub status: ChangeStatus,
    /// Snapshot of the affected Application, when one is involved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application: Option<ApplicationState>,
}

impl ChangeSummary {
    /// The call performed the change
    pub fn ok(application: ApplicationState) -> Self {
        Self {
            status: ChangeStatus::Ok,
            application: Some(application),
        }
    }

    /// Nothing needed doing
    pub fn not_changed() -> Self {
        Self {
            status: ChangeStatus::NotChanged,
            application: None,
        }
    }
}

/// One row of the module listing: catalog metadata plus live state
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleStatus {
    /// Display name
    pub name: String,
    /// Display description
    pub description: String,
    /// Primary display tags
    pub primary_tags: Vec<String>,
    /// Secondary display tags
    pub secondary_tags: Vec<String>,
    /// Whether the UI pre-selects this module
    pub is_default: bool,
    /// Application resource name (the deploy/undeploy key)
    pub application: String,
    /// Live state of the module's Application
    #[serde(flatten)]
    pub state: ApplicationState,
}

/// Merge catalog entries with live Applications
///
/// Every catalog entry produces exactly one row. A module whose Application
/// appears in `live` reports the resource's state verbatim; all others
/// report not-deployed with empty status fields.
pub fn aggregate(catalog: &ModuleCatalog, live: &[DynamicObject]) -> Vec<ModuleStatus> {
    catalog
        .modules()
        .iter()
        .map(|module| {
            let state = live
                .iter()
                .find(|app| app.metadata.name.as_deref() == Some(&module.application_name))
                .map(ApplicationState::from_resource)
                .unwrap_or_else(ApplicationState::absent);

            ModuleStatus {
                name: module.name.clone(),
                description: module.description.clone(),
                primary_tags: module.primary_tags.clone(),
                secondary_tags: module.secondary_tags.clone(),
                is_default: module.is_default,
                application: module.application_name.clone(),
                state,
            }
        })
        .collect()
}

fn status_field(resource: &DynamicObject, pointer: &str) -> String {
    resource
        .data
        .pointer(pointer)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}
