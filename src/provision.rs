//! Resource Provisioner
//!
//! Deploying a module for a user means making a small footprint of cluster
//! resources exist: the module's namespaces, two role bindings per
//! namespace, and the Argo CD Application in the user's GitOps namespace.
//! Every sub-step checks before it creates, so the whole operation can be
//! re-submitted after any failure and converges instead of erroring;
//! partially created resources are left in place for the retry to adopt.
//! There is deliberately no rollback.

use std::sync::Arc;

use k8s_openapi::api::rbac::v1::{RoleBinding, RoleRef, Subject};
use kube::api::ObjectMeta;
use tracing::{info, warn};

use crate::catalog::ModuleCatalog;
use crate::client::ResourceClient;
use crate::config::Settings;
use crate::status::{ApplicationState, ChangeSummary};
use crate::template::{substitute, UserIdentity};
use crate::Result;

/// Provisions the per-user resource footprint of a module
pub struct Provisioner {
    client: Arc<dyn ResourceClient>,
    catalog: Arc<ModuleCatalog>,
    settings: Arc<Settings>,
}

impl Provisioner {
    /// Create a provisioner over the given client, catalog and settings
    pub fn new(
        client: Arc<dyn ResourceClient>,
        catalog: Arc<ModuleCatalog>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            client,
            catalog,
            settings,
        }
    }

    /// Idempotently deploy a module for a user
    ///
    /// Unknown modules and already-deployed modules answer `notchanged`;
    /// only a successful first-time create answers `ok`. Any cluster error
    /// aborts the call - the caller retries by re-submitting the deploy.
    pub async fn provision(
        &self,
        application_name: &str,
        user: &UserIdentity,
    ) -> Result<ChangeSummary> {
        let Some(module) = self.catalog.by_application(application_name) else {
            warn!(application = %application_name, "Module for application not found");
            return Ok(ChangeSummary::not_changed());
        };

        // Namespaces and their bindings first: the Application's manifests
        // have nowhere to go until these exist.
        for template in &module.namespace_templates {
            let namespace = substitute(template, user);
            self.ensure_namespace(&namespace, user).await?;
            self.ensure_user_admin_binding(&namespace, user).await?;
            self.ensure_controller_admin_binding(&namespace, user).await?;
        }

        let gitops_namespace = self.settings.gitops_namespace(user);
        if self
            .client
            .get_application(&gitops_namespace, application_name)
            .await?
            .is_some()
        {
            warn!(
                application = %application_name,
                user = %user,
                "Application already deployed"
            );
            return Ok(ChangeSummary::not_changed());
        }

        info!(application = %application_name, user = %user, "Deploying application");
        let manifest = substitute(&module.manifest_template, user);
        let created = self
            .client
            .create_application(&gitops_namespace, &manifest)
            .await?;

        Ok(ChangeSummary::ok(ApplicationState::from_resource(&created)))
    }

    async fn ensure_namespace(&self, namespace: &str, user: &UserIdentity) -> Result<()> {
        if self.client.get_namespace(namespace).await?.is_some() {
            warn!(namespace = %namespace, "Namespace already exists");
            return Ok(());
        }
        self.client
            .create_namespace(namespace, &self.settings.managed_by(user))
            .await?;
        info!(namespace = %namespace, "Namespace created");
        Ok(())
    }

    /// Grant the requesting user admin rights inside the module namespace
    async fn ensure_user_admin_binding(
        &self,
        namespace: &str,
        user: &UserIdentity,
    ) -> Result<()> {
        let name = format!("{}-admin-{}", user, namespace);
        let subject = Subject {
            kind: "User".to_string(),
            name: user.to_string(),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        };
        self.ensure_role_binding(namespace, &name, vec![subject])
            .await
    }

    /// Grant the user's Argo CD service accounts admin rights inside the
    /// module namespace, so the GitOps controller can reconcile into it
    async fn ensure_controller_admin_binding(
        &self,
        namespace: &str,
        user: &UserIdentity,
    ) -> Result<()> {
        let name = format!("argo-admin-{}", namespace);
        let gitops_namespace = self.settings.gitops_namespace(user);
        let subjects = vec![
            Subject {
                kind: "ServiceAccount".to_string(),
                name: self.settings.controller_service_account(user),
                namespace: Some(gitops_namespace.clone()),
                ..Default::default()
            },
            Subject {
                kind: "ServiceAccount".to_string(),
                name: self.settings.dex_service_account(user),
                namespace: Some(gitops_namespace),
                ..Default::default()
            },
        ];
        self.ensure_role_binding(namespace, &name, subjects).await
    }

    async fn ensure_role_binding(
        &self,
        namespace: &str,
        name: &str,
        subjects: Vec<Subject>,
    ) -> Result<()> {
        if self
            .client
            .get_role_binding(namespace, name)
            .await?
            .is_some()
        {
            warn!(namespace = %namespace, name = %name, "RoleBinding already exists");
            return Ok(());
        }
        let binding = RoleBinding {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            subjects: Some(subjects),
            role_ref: RoleRef {
                api_group: "rbac.authorization.k8s.io".to_string(),
                kind: "ClusterRole".to_string(),
                name: crate::ADMIN_CLUSTER_ROLE.to_string(),
            },
        };
        self.client.create_role_binding(binding).await?;
        info!(namespace = %namespace, name = %name, "RoleBinding created");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{application_resource, MockResourceClient};
    use crate::test_fixtures::{catalog_with, module, settings, user};
    use k8s_openapi::api::core::v1::Namespace;
    use kube::api::DynamicObject;

    fn provisioner(mock: MockResourceClient) -> Provisioner {
        Provisioner::new(
            Arc::new(mock),
            Arc::new(catalog_with(vec![module(
                "Retail store",
                "app-retail",
                &["retail-{{ __user }}"],
            )])),
            Arc::new(settings()),
        )
    }

    fn created_app(name: &str) -> DynamicObject {
        let mut app = DynamicObject::new(name, &application_resource());
        app.data = serde_json::json!({
            "status": {"sync": {"status": "OutOfSync"}, "health": {"status": "Missing"}}
        });
        app
    }

    fn api_error(code: u16) -> crate::Error {
        crate::Error::Kube(kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: "InternalError".to_string(),
            code,
        }))
    }

    /// Story: first deploy for a user creates the full footprint - one
    /// namespace, two role bindings, one Application - with the identity
    /// substituted everywhere.
    #[tokio::test]
    async fn first_deploy_creates_full_footprint() {
        let mut mock = MockResourceClient::new();

        mock.expect_get_namespace()
            .withf(|name| name == "retail-alice")
            .times(1)
            .returning(|_| Ok(None));
        mock.expect_create_namespace()
            .withf(|name, managed_by| name == "retail-alice" && managed_by == "globex-gitops-alice")
            .times(1)
            .returning(|_, _| Ok(()));

        mock.expect_get_role_binding()
            .times(2)
            .returning(|_, _| Ok(None));
        mock.expect_create_role_binding()
            .withf(|binding| {
                binding.metadata.name.as_deref() == Some("alice-admin-retail-alice")
                    && binding.subjects.as_ref().is_some_and(|s| {
                        s.len() == 1 && s[0].kind == "User" && s[0].name == "alice"
                    })
            })
            .times(1)
            .returning(|_| Ok(()));
        mock.expect_create_role_binding()
            .withf(|binding| {
                binding.metadata.name.as_deref() == Some("argo-admin-retail-alice")
                    && binding.subjects.as_ref().is_some_and(|s| {
                        s.len() == 2
                            && s[0].name == "globex-gitops-alice-argocd-application-controller"
                            && s[1].name == "globex-gitops-alice-argocd-dex-server"
                            && s.iter().all(|subject| {
                                subject.namespace.as_deref() == Some("globex-gitops-alice")
                            })
                    })
            })
            .times(1)
            .returning(|_| Ok(()));

        mock.expect_get_application()
            .withf(|ns, name| ns == "globex-gitops-alice" && name == "app-retail")
            .times(1)
            .returning(|_, _| Ok(None));
        mock.expect_create_application()
            .withf(|ns, manifest| {
                ns == "globex-gitops-alice"
                    && manifest.contains(r#""project":"alice""#)
                    && !manifest.contains("{{ __user }}")
            })
            .times(1)
            .returning(|_, _| Ok(created_app("app-retail")));

        let outcome = provisioner(mock)
            .provision("app-retail", &user("alice"))
            .await
            .expect("provision should succeed");

        assert_eq!(outcome.status, crate::status::ChangeStatus::Ok);
        let state = outcome.application.expect("snapshot expected");
        assert!(state.deployed);
        assert!(!state.deleting);
        assert_eq!(state.status, "OutOfSync");
        assert_eq!(state.health, "Missing");
    }

    /// Story: re-submitting the same deploy is a no-op. Everything already
    /// exists, so nothing is created and the caller learns `notchanged`.
    #[tokio::test]
    async fn repeated_deploy_is_not_changed() {
        let mut mock = MockResourceClient::new();

        mock.expect_get_namespace()
            .returning(|name| Ok(Some(Namespace {
                metadata: ObjectMeta {
                    name: Some(name.to_string()),
                    ..Default::default()
                },
                ..Default::default()
            })));
        mock.expect_get_role_binding().returning(|namespace, name| {
            Ok(Some(RoleBinding {
                metadata: ObjectMeta {
                    name: Some(name.to_string()),
                    namespace: Some(namespace.to_string()),
                    ..Default::default()
                },
                ..Default::default()
            }))
        });
        mock.expect_get_application()
            .returning(|_, name| Ok(Some(DynamicObject::new(name, &application_resource()))));
        // no create expectations: any create call fails the test

        let outcome = provisioner(mock)
            .provision("app-retail", &user("alice"))
            .await
            .expect("provision should succeed");

        assert_eq!(outcome.status, crate::status::ChangeStatus::NotChanged);
        assert!(outcome.application.is_none());
    }

    /// Story: a module with N namespace templates ends up with N namespaces
    /// and 2N role bindings.
    #[tokio::test]
    async fn every_namespace_gets_two_bindings() {
        let mut mock = MockResourceClient::new();

        mock.expect_get_namespace().times(3).returning(|_| Ok(None));
        mock.expect_create_namespace()
            .times(3)
            .returning(|_, _| Ok(()));
        mock.expect_get_role_binding()
            .times(6)
            .returning(|_, _| Ok(None));
        mock.expect_create_role_binding()
            .times(6)
            .returning(|_| Ok(()));
        mock.expect_get_application().times(1).returning(|_, _| Ok(None));
        mock.expect_create_application()
            .times(1)
            .returning(|_, _| Ok(created_app("app-wide")));

        let provisioner = Provisioner::new(
            Arc::new(mock),
            Arc::new(catalog_with(vec![module(
                "Wide module",
                "app-wide",
                &[
                    "front-{{ __user }}",
                    "back-{{ __user }}",
                    "data-{{ __user }}",
                ],
            )])),
            Arc::new(settings()),
        );

        let outcome = provisioner
            .provision("app-wide", &user("bob"))
            .await
            .expect("provision should succeed");
        assert_eq!(outcome.status, crate::status::ChangeStatus::Ok);
    }

    /// Story: deploying an application the catalog does not know mutates
    /// nothing and answers `notchanged`.
    #[tokio::test]
    async fn unknown_module_is_not_changed() {
        // no expectations at all: the catalog miss short-circuits
        let mock = MockResourceClient::new();

        let outcome = provisioner(mock)
            .provision("app-unknown", &user("alice"))
            .await
            .expect("provision should succeed");

        assert_eq!(outcome.status, crate::status::ChangeStatus::NotChanged);
    }

    /// Story: a cluster failure mid-footprint aborts the call. The
    /// namespace already created stays behind for the retry to adopt; the
    /// Application is never created.
    #[tokio::test]
    async fn client_error_aborts_without_creating_application() {
        let mut mock = MockResourceClient::new();

        mock.expect_get_namespace().times(1).returning(|_| Ok(None));
        mock.expect_create_namespace()
            .times(1)
            .returning(|_, _| Ok(()));
        mock.expect_get_role_binding()
            .times(1)
            .returning(|_, _| Ok(None));
        mock.expect_create_role_binding()
            .times(1)
            .returning(|_| Err(api_error(500)));
        // get_application / create_application must never be reached

        let result = provisioner(mock)
            .provision("app-retail", &user("alice"))
            .await;

        assert!(result.is_err());
    }
}
