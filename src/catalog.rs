//! Module catalog
//!
//! The catalog is assembled from ConfigMaps at startup and never changes
//! afterwards: one catalog document (`modules.json`) listing the workshop
//! modules, plus one ConfigMap per module holding the raw Application
//! manifest template. Every required piece is checked while loading - a
//! catalog that cannot be fully resolved refuses to start the process
//! rather than surfacing as permanent per-request failures later.

use k8s_openapi::api::core::v1::ConfigMap;
use kube::{Api, Client};
use serde::Deserialize;
use tracing::info;

use crate::config::Settings;
use crate::{Error, Result};

/// The catalog document as stored in the catalog ConfigMap
#[derive(Debug, Deserialize)]
struct CatalogDocument {
    modules: Vec<CatalogEntry>,
}

/// One raw catalog entry, before its manifest template is attached
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogEntry {
    name: String,
    description: String,
    #[serde(default)]
    tags: Tags,
    #[serde(default)]
    is_default: bool,
    #[serde(default)]
    namespaces: Vec<String>,
    config_map: String,
}

#[derive(Debug, Default, Deserialize)]
struct Tags {
    #[serde(default)]
    primary: Vec<String>,
    #[serde(default)]
    secondary: Vec<String>,
}

/// A fully resolved workshop module
///
/// Immutable after catalog load. `application_name` is the identity key used
/// by deploy/undeploy requests; `name` is the display key shown in the UI.
#[derive(Clone, Debug)]
pub struct ModuleDescriptor {
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
    /// Namespace name templates, each containing the user placeholder
    pub namespace_templates: Vec<String>,
    /// Raw Application manifest template (JSON text)
    pub manifest_template: String,
    /// Name of the Application resource the manifest creates
    pub application_name: String,
}

impl ModuleDescriptor {
    /// Resolve a catalog entry against its manifest template
    ///
    /// The Application name is taken from the manifest's `metadata.name`,
    /// which is what the deployed resource will actually be called.
    fn resolve(entry: CatalogEntry, manifest_template: String) -> Result<Self> {
        let manifest: serde_json::Value = serde_json::from_str(&manifest_template)
            .map_err(|e| Error::catalog(format!("manifest for module '{}': {}", entry.name, e)))?;
        let application_name = manifest
            .pointer("/metadata/name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                Error::catalog(format!(
                    "manifest for module '{}' has no metadata.name",
                    entry.name
                ))
            })?
            .to_string();

        Ok(Self {
            name: entry.name,
            description: entry.description,
            primary_tags: entry.tags.primary,
            secondary_tags: entry.tags.secondary,
            is_default: entry.is_default,
            namespace_templates: entry.namespaces,
            manifest_template,
            application_name,
        })
    }
}

/// The read-only module catalog
///
/// Built once during startup and shared by reference; requests only ever
/// read it.
#[derive(Clone, Debug, Default)]
pub struct ModuleCatalog {
    modules: Vec<ModuleDescriptor>,
}

impl ModuleCatalog {
    /// Build a catalog from already-resolved descriptors
    ///
    /// Rejects duplicate application names - the application name is the
    /// identity key for deploy and undeploy requests.
    pub fn from_modules(modules: Vec<ModuleDescriptor>) -> Result<Self> {
        for (i, module) in modules.iter().enumerate() {
            if modules[..i]
                .iter()
                .any(|m| m.application_name == module.application_name)
            {
                return Err(Error::catalog(format!(
                    "duplicate application name '{}' in catalog",
                    module.application_name
                )));
            }
        }
        Ok(Self { modules })
    }

    /// Load the catalog from the cluster
    ///
    /// Reads the catalog document and every per-module manifest ConfigMap.
    /// Any missing ConfigMap, key or malformed document is fatal.
    pub async fn load(client: &Client, settings: &Settings) -> Result<Self> {
        let configmaps: Api<ConfigMap> = Api::namespaced(client.clone(), &settings.namespace);

        let document = read_key(
            &configmaps,
            &settings.modules_configmap,
            &settings.modules_configmap_key,
        )
        .await?;
        let document: CatalogDocument = serde_json::from_str(&document)
            .map_err(|e| Error::catalog(format!("catalog document: {}", e)))?;

        let mut modules = Vec::with_capacity(document.modules.len());
        for entry in document.modules {
            let manifest_key = format!("{}.json", entry.config_map);
            let manifest = read_key(&configmaps, &entry.config_map, &manifest_key).await?;
            let module = ModuleDescriptor::resolve(entry, manifest)?;
            info!(
                module = %module.name,
                application = %module.application_name,
                namespaces = module.namespace_templates.len(),
                "Loaded module"
            );
            modules.push(module);
        }

        Self::from_modules(modules)
    }

    /// Look up a module by its Application resource name
    pub fn by_application(&self, application_name: &str) -> Option<&ModuleDescriptor> {
        self.modules
            .iter()
            .find(|m| m.application_name == application_name)
    }

    /// All modules, in catalog order
    pub fn modules(&self) -> &[ModuleDescriptor] {
        &self.modules
    }
}

/// Fetch one key of one ConfigMap, failing with a startup-grade error
async fn read_key(configmaps: &Api<ConfigMap>, name: &str, key: &str) -> Result<String> {
    let cm = match configmaps.get(name).await {
        Ok(cm) => cm,
        Err(kube::Error::Api(e)) if e.code == 404 => {
            return Err(Error::configuration(format!(
                "ConfigMap '{}' not found",
                name
            )))
        }
        Err(e) => return Err(e.into()),
    };
    cm.data
        .as_ref()
        .and_then(|data| data.get(key))
        .cloned()
        .ok_or_else(|| {
            Error::configuration(format!("entry '{}' not found in ConfigMap '{}'", key, name))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_DOCUMENT: &str = r#"{
        "modules": [
            {
                "name": "Retail store",
                "description": "Event-driven retail demo",
                "tags": {"primary": ["kafka"], "secondary": ["quarkus"]},
                "isDefault": true,
                "namespaces": ["retail-{{ __user }}"],
                "configMap": "module-retail"
            },
            {
                "name": "Edge gateway",
                "description": "API gateway demo",
                "configMap": "module-edge"
            }
        ]
    }"#;

    fn manifest(name: &str) -> String {
        format!(
            r#"{{"apiVersion":"argoproj.io/v1alpha1","kind":"Application","metadata":{{"name":"{name}"}},"spec":{{}}}}"#
        )
    }

    fn parse_entries(doc: &str) -> Vec<CatalogEntry> {
        serde_json::from_str::<CatalogDocument>(doc).unwrap().modules
    }

    #[test]
    fn document_parses_with_and_without_optional_fields() {
        let entries = parse_entries(SAMPLE_DOCUMENT);
        assert_eq!(entries.len(), 2);

        assert_eq!(entries[0].name, "Retail store");
        assert!(entries[0].is_default);
        assert_eq!(entries[0].namespaces, vec!["retail-{{ __user }}"]);
        assert_eq!(entries[0].tags.primary, vec!["kafka"]);

        // second entry leaves tags, isDefault and namespaces out
        assert!(!entries[1].is_default);
        assert!(entries[1].namespaces.is_empty());
        assert!(entries[1].tags.primary.is_empty());
    }

    #[test]
    fn malformed_document_is_an_error() {
        let result = serde_json::from_str::<CatalogDocument>(r#"{"modules": "nope"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn application_name_comes_from_manifest_metadata() {
        let entries = parse_entries(SAMPLE_DOCUMENT);
        let module = ModuleDescriptor::resolve(
            entries.into_iter().next().unwrap(),
            manifest("app-retail"),
        )
        .unwrap();

        assert_eq!(module.application_name, "app-retail");
        assert_eq!(module.namespace_templates, vec!["retail-{{ __user }}"]);
    }

    #[test]
    fn manifest_without_name_is_rejected() {
        let entries = parse_entries(SAMPLE_DOCUMENT);
        let result = ModuleDescriptor::resolve(
            entries.into_iter().next().unwrap(),
            r#"{"metadata":{}}"#.to_string(),
        );

        let err = result.unwrap_err();
        assert!(err.to_string().contains("metadata.name"));
    }

    #[test]
    fn duplicate_application_names_are_rejected() {
        let entries = parse_entries(SAMPLE_DOCUMENT);
        let modules: Vec<ModuleDescriptor> = entries
            .into_iter()
            .map(|e| ModuleDescriptor::resolve(e, manifest("app-same")).unwrap())
            .collect();

        let err = ModuleCatalog::from_modules(modules).unwrap_err();
        assert!(err.to_string().contains("duplicate application name"));
    }

    #[test]
    fn lookup_is_by_application_name() {
        let entries = parse_entries(SAMPLE_DOCUMENT);
        let modules: Vec<ModuleDescriptor> = entries
            .into_iter()
            .zip(["app-retail", "app-edge"])
            .map(|(e, name)| ModuleDescriptor::resolve(e, manifest(name)).unwrap())
            .collect();
        let catalog = ModuleCatalog::from_modules(modules).unwrap();

        assert_eq!(
            catalog.by_application("app-edge").unwrap().name,
            "Edge gateway"
        );
        assert!(catalog.by_application("app-unknown").is_none());
        assert_eq!(catalog.modules().len(), 2);
    }
}
