//! Environment-sourced settings
//!
//! All settings come from the environment (or flags, which is convenient in
//! tests). Required settings without a default abort startup with a usage
//! error; nothing in here is re-read after the process is up.

use std::time::Duration;

use clap::Parser;

use crate::template::UserIdentity;

/// Workshop deployer settings
#[derive(Parser, Debug, Clone)]
#[command(name = "atelier", version, about, long_about = None)]
pub struct Settings {
    /// Namespace the deployer runs in; the catalog ConfigMaps live here
    #[arg(long, env = "NAMESPACE")]
    pub namespace: String,

    /// Number of modules a participant may have deployed at once
    /// (informational, enforced by the UI)
    #[arg(long, env = "ALLOWED_MODULES_COUNT", default_value_t = 2)]
    pub allowed_modules_count: u32,

    /// Host prefix of the per-user showroom route
    #[arg(long, env = "SHOWROOM_HOST_PREFIX")]
    pub showroom_host_prefix: String,

    /// Path component of the per-user showroom URL
    #[arg(long, env = "SHOWROOM_PATH")]
    pub showroom_path: String,

    /// Cluster apps domain used to assemble participant-facing URLs
    #[arg(long, env = "CLUSTER_DOMAIN")]
    pub cluster_domain: String,

    /// Shared workshop password handed to the UI
    #[arg(long, env = "WORKSHOP_PASSWORD", hide_env_values = true)]
    pub workshop_password: String,

    /// Prefix of per-user GitOps namespaces ("<prefix>-<user>")
    #[arg(long, env = "GITOPS_NAMESPACE_PREFIX")]
    pub gitops_namespace_prefix: String,

    /// Prefix of per-user Argo CD instance names ("<prefix>-<user>")
    #[arg(long, env = "GITOPS_NAME_PREFIX", default_value = "globex-gitops")]
    pub gitops_name_prefix: String,

    /// How long to wait for an Application to disappear before giving up
    #[arg(long, env = "DELETE_MAX_WAIT_MS", default_value_t = 300_000)]
    pub delete_max_wait_ms: u64,

    /// Interval between deletion checks
    #[arg(long, env = "POLL_INTERVAL_MS", default_value_t = 3_000)]
    pub poll_interval_ms: u64,

    /// ConfigMap holding the module catalog document
    #[arg(long, env = "MODULES_CONFIGMAP", default_value = "workshop-modules")]
    pub modules_configmap: String,

    /// Key of the catalog document inside the catalog ConfigMap
    #[arg(long, env = "MODULES_CONFIGMAP_KEY", default_value = "modules.json")]
    pub modules_configmap_key: String,

    /// Identity to use when no X-Forwarded-User header is present.
    /// Only set this for local development without the auth proxy.
    #[arg(long, env = "FALLBACK_USER")]
    pub fallback_user: Option<String>,

    /// Address the HTTP API binds to
    #[arg(long, env = "BIND_ADDR", default_value = crate::DEFAULT_BIND_ADDR)]
    pub bind_addr: String,
}

impl Settings {
    /// Interval between deletion-watch ticks
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Wall-clock budget for confirming an Application deletion
    pub fn delete_max_wait(&self) -> Duration {
        Duration::from_millis(self.delete_max_wait_ms)
    }

    /// The user's GitOps namespace, where their Application resources live
    pub fn gitops_namespace(&self, user: &UserIdentity) -> String {
        format!("{}-{}", self.gitops_namespace_prefix, user)
    }

    /// Value of the managed-by label stamped on module namespaces
    pub fn managed_by(&self, user: &UserIdentity) -> String {
        self.gitops_namespace(user)
    }

    /// The user's Argo CD application-controller service account name
    pub fn controller_service_account(&self, user: &UserIdentity) -> String {
        format!("{}-{}-argocd-application-controller", self.gitops_name_prefix, user)
    }

    /// The user's Argo CD dex-server service account name
    pub fn dex_service_account(&self, user: &UserIdentity) -> String {
        format!("{}-{}-argocd-dex-server", self.gitops_name_prefix, user)
    }

    /// Participant-facing showroom URL
    pub fn showroom_url(&self, user: &UserIdentity) -> String {
        format!(
            "https://{}-{}.{}{}",
            self.showroom_host_prefix, user, self.cluster_domain, self.showroom_path
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::settings as test_settings;

    #[test]
    fn required_settings_fail_fast() {
        // NAMESPACE missing: startup must not proceed
        let result = Settings::try_parse_from(["atelier"]);
        assert!(result.is_err());
    }

    #[test]
    fn defaults_apply() {
        let settings = test_settings();
        assert_eq!(settings.allowed_modules_count, 2);
        assert_eq!(settings.gitops_name_prefix, "globex-gitops");
        assert_eq!(settings.poll_interval(), Duration::from_secs(3));
        assert_eq!(settings.delete_max_wait(), Duration::from_secs(300));
        assert_eq!(settings.modules_configmap, "workshop-modules");
        assert_eq!(settings.modules_configmap_key, "modules.json");
        assert!(settings.fallback_user.is_none());
    }

    #[test]
    fn per_user_names_are_assembled() {
        let settings = test_settings();
        let user = UserIdentity::new("alice").unwrap();

        assert_eq!(settings.gitops_namespace(&user), "globex-gitops-alice");
        assert_eq!(
            settings.controller_service_account(&user),
            "globex-gitops-alice-argocd-application-controller"
        );
        assert_eq!(
            settings.dex_service_account(&user),
            "globex-gitops-alice-argocd-dex-server"
        );
        assert_eq!(
            settings.showroom_url(&user),
            "https://showroom-alice.apps.example.com/index.html"
        );
    }
}
