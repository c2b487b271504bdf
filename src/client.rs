//! Cluster API access
//!
//! [`ResourceClient`] is the narrow seam between the lifecycle logic and the
//! cluster: just the get/create/delete/list calls the deployer needs, so
//! tests can mock the cluster without dragging in the full client surface.
//! The Argo CD `Application` resource is foreign to this crate and is
//! accessed dynamically by group/version/kind.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::api::rbac::v1::RoleBinding;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, ObjectMeta, PostParams};
use kube::discovery::ApiResource;
use kube::Client;
use tracing::debug;

use crate::{Error, Result};

/// Label linking a module namespace to the Argo CD instance managing it
pub const MANAGED_BY_LABEL: &str = "argocd.argoproj.io/managed-by";

#[cfg(test)]
use mockall::automock;

/// The Argo CD Application resource type
///
/// Atelier consumes this resource but does not own it; the external GitOps
/// controller reconciles it.
pub fn application_resource() -> ApiResource {
    ApiResource {
        group: "argoproj.io".to_string(),
        version: "v1alpha1".to_string(),
        api_version: "argoproj.io/v1alpha1".to_string(),
        kind: "Application".to_string(),
        plural: "applications".to_string(),
    }
}

/// Cluster operations used by the lifecycle coordinator
///
/// Every call is one atomic operation against the cluster API; no call spans
/// another. Implementations must be safe to share across concurrent requests.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Get a namespace, `None` if it does not exist
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>>;

    /// Create a namespace labeled with the Argo CD instance that manages it
    async fn create_namespace(&self, name: &str, managed_by: &str) -> Result<()>;

    /// Delete a namespace (idempotent at the API level)
    async fn delete_namespace(&self, name: &str) -> Result<()>;

    /// Get a role binding, `None` if it does not exist
    async fn get_role_binding(&self, namespace: &str, name: &str) -> Result<Option<RoleBinding>>;

    /// Create a role binding
    async fn create_role_binding(&self, binding: RoleBinding) -> Result<()>;

    /// Get an Application resource, `None` if it does not exist
    async fn get_application(&self, namespace: &str, name: &str)
        -> Result<Option<DynamicObject>>;

    /// Create an Application resource from rendered manifest text
    async fn create_application(&self, namespace: &str, manifest: &str) -> Result<DynamicObject>;

    /// Delete an Application resource (finalized asynchronously by the
    /// GitOps controller)
    async fn delete_application(&self, namespace: &str, name: &str) -> Result<()>;

    /// List the Application resources in a namespace
    async fn list_applications(&self, namespace: &str) -> Result<Vec<DynamicObject>>;
}

/// Real [`ResourceClient`] backed by a `kube` client
#[derive(Clone)]
pub struct KubeResourceClient {
    client: Client,
}

impl KubeResourceClient {
    /// Wrap a connected `kube` client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn applications(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &application_resource())
    }
}

/// Map a get result to `Ok(None)` on 404
fn absent_on_404<T>(result: kube::Result<T>) -> Result<Option<T>> {
    match result {
        Ok(obj) => Ok(Some(obj)),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ResourceClient for KubeResourceClient {
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        absent_on_404(api.get(name).await)
    }

    async fn create_namespace(&self, name: &str, managed_by: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(BTreeMap::from([(
                    MANAGED_BY_LABEL.to_string(),
                    managed_by.to_string(),
                )])),
                ..Default::default()
            },
            ..Default::default()
        };
        api.create(&PostParams::default(), &namespace).await?;
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn get_role_binding(&self, namespace: &str, name: &str) -> Result<Option<RoleBinding>> {
        let api: Api<RoleBinding> = Api::namespaced(self.client.clone(), namespace);
        absent_on_404(api.get(name).await)
    }

    async fn create_role_binding(&self, binding: RoleBinding) -> Result<()> {
        let namespace = binding
            .metadata
            .namespace
            .clone()
            .ok_or_else(|| Error::validation("role binding has no namespace"))?;
        let api: Api<RoleBinding> = Api::namespaced(self.client.clone(), &namespace);
        api.create(&PostParams::default(), &binding).await?;
        Ok(())
    }

    async fn get_application(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        absent_on_404(self.applications(namespace).get(name).await)
    }

    async fn create_application(&self, namespace: &str, manifest: &str) -> Result<DynamicObject> {
        let obj: DynamicObject = serde_json::from_str(manifest)
            .map_err(|e| Error::serialization(format!("application manifest: {}", e)))?;
        let created = self
            .applications(namespace)
            .create(&PostParams::default(), &obj)
            .await?;
        debug!(namespace = %namespace, "Application created");
        Ok(created)
    }

    async fn delete_application(&self, namespace: &str, name: &str) -> Result<()> {
        self.applications(namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn list_applications(&self, namespace: &str) -> Result<Vec<DynamicObject>> {
        let list = self
            .applications(namespace)
            .list(&ListParams::default())
            .await?;
        Ok(list.items)
    }
}
