//! Shared test fixtures

use crate::catalog::{ModuleCatalog, ModuleDescriptor};
use crate::config::Settings;
use crate::template::UserIdentity;
use clap::Parser;

/// A resolved module descriptor with the given namespaces
pub(crate) fn module(name: &str, application_name: &str, namespaces: &[&str]) -> ModuleDescriptor {
    ModuleDescriptor {
        name: name.to_string(),
        description: format!("{name} workshop module"),
        primary_tags: vec!["demo".to_string()],
        secondary_tags: Vec::new(),
        is_default: false,
        namespace_templates: namespaces.iter().map(|s| s.to_string()).collect(),
        manifest_template: format!(
            r#"{{"apiVersion":"argoproj.io/v1alpha1","kind":"Application","metadata":{{"name":"{application_name}"}},"spec":{{"project":"{{{{ __user }}}}"}}}}"#
        ),
        application_name: application_name.to_string(),
    }
}

/// A catalog built from the given modules
pub(crate) fn catalog_with(modules: Vec<ModuleDescriptor>) -> ModuleCatalog {
    ModuleCatalog::from_modules(modules).expect("fixture catalog should be valid")
}

/// A validated user identity
pub(crate) fn user(name: &str) -> UserIdentity {
    UserIdentity::new(name).expect("fixture identity should be valid")
}

/// Settings with required values filled in and all defaults kept
pub(crate) fn settings() -> Settings {
    Settings::try_parse_from([
        "atelier",
        "--namespace",
        "workshop",
        "--showroom-host-prefix",
        "showroom",
        "--showroom-path",
        "/index.html",
        "--cluster-domain",
        "apps.example.com",
        "--workshop-password",
        "secret",
        "--gitops-namespace-prefix",
        "globex-gitops",
    ])
    .expect("fixture settings should parse")
}
