//! Rewrites the SAM template produced by `chalice package` so that every
//! `AWS::Serverless::Function` points at the uploaded archive.
//!
//! The rewrite is surgical: only `CodeUri` (and the optional `Role` and
//! `Environment.Variables` overrides) of function resources change. Key order is
//! preserved on re-serialisation (`serde_json` is built with `preserve_order`), so
//! every other resource serialises byte-identically.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde_json::{json, Map, Value};
use tracing::{debug, error, info};

use crate::contract::ArtifactReference;
use crate::error::PackagingError;

/// Type tag of the resources whose code location is rewritten.
pub const FUNCTION_RESOURCE_TYPE: &str = "AWS::Serverless::Function";

/// Optional per-function overrides applied during the rewrite.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateOverrides {
    /// Replaces `Properties.Role`.
    pub role: Option<String>,
    /// Replaces `Properties.Environment.Variables` wholesale.
    pub environment_variables: Option<BTreeMap<String, String>>,
}

/// A SAM template document.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedTemplate {
    document: Value,
}

impl GeneratedTemplate {
    /// Wrap a document, checking it is an object whose `Resources` (if present) is a mapping.
    pub fn new(document: Value) -> Result<Self, PackagingError> {
        let root = document
            .as_object()
            .ok_or_else(|| invalid("top-level value is not a JSON object"))?;
        match root.get("Resources") {
            None | Some(Value::Object(_)) => Ok(Self { document }),
            Some(_) => Err(invalid("'Resources' is not a JSON object")),
        }
    }

    pub fn parse(text: &str) -> Result<Self, PackagingError> {
        let document: Value = serde_json::from_str(text)
            .map_err(|e| invalid(format!("not valid JSON: {e}")))?;
        Self::new(document)
    }

    pub fn from_file(path: &Path) -> Result<Self, PackagingError> {
        let text = fs::read_to_string(path).map_err(|e| {
            PackagingError::io(format!("Failed to read template {}", path.display()), e)
        })?;
        Self::parse(&text).map_err(|e| match e {
            PackagingError::InvalidTemplate { reason } => PackagingError::InvalidTemplate {
                reason: format!("{}: {reason}", path.display()),
            },
            other => other,
        })
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn into_document(self) -> Value {
        self.document
    }

    pub fn resource(&self, logical_name: &str) -> Option<&Value> {
        self.resources()?.get(logical_name)
    }

    /// Logical names of all `AWS::Serverless::Function` resources, in document order.
    pub fn function_names(&self) -> Vec<String> {
        self.resources()
            .map(|resources| {
                resources
                    .iter()
                    .filter(|(_, resource)| is_function(resource))
                    .map(|(name, _)| name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn to_pretty_string(&self) -> Result<String, PackagingError> {
        serde_json::to_string_pretty(&self.document)
            .map_err(|e| invalid(format!("could not serialise template: {e}")))
    }

    pub fn write_to(&self, path: &Path) -> Result<(), PackagingError> {
        let text = self.to_pretty_string()?;
        fs::write(path, text).map_err(|e| {
            PackagingError::io(format!("Failed to write template {}", path.display()), e)
        })?;
        info!(path = %path.display(), "[TEMPLATE] Wrote rewritten template");
        Ok(())
    }

    fn resources(&self) -> Option<&Map<String, Value>> {
        self.document.get("Resources")?.as_object()
    }

    fn resources_mut(&mut self) -> Option<&mut Map<String, Value>> {
        self.document.get_mut("Resources")?.as_object_mut()
    }
}

/// Point every function resource at `artifact` and apply `overrides`.
///
/// Fails with `TemplateMissingResource` when no function resource exists; the
/// template is not modified in that case.
pub fn rewrite(
    mut template: GeneratedTemplate,
    artifact: &ArtifactReference,
    overrides: &TemplateOverrides,
) -> Result<GeneratedTemplate, PackagingError> {
    let functions = template.function_names();
    if functions.is_empty() {
        error!(
            resource_type = FUNCTION_RESOURCE_TYPE,
            "[TEMPLATE][ERROR] No function resource in generated template"
        );
        return Err(PackagingError::TemplateMissingResource {
            resource_type: FUNCTION_RESOURCE_TYPE.to_string(),
        });
    }

    let resources = template
        .resources_mut()
        .ok_or_else(|| invalid("'Resources' is not a JSON object"))?;
    for name in &functions {
        let properties = resources
            .get_mut(name)
            .and_then(Value::as_object_mut)
            .map(|resource| {
                resource
                    .entry("Properties")
                    .or_insert_with(|| Value::Object(Map::new()))
            })
            .and_then(Value::as_object_mut)
            .ok_or_else(|| invalid(format!("'{name}.Properties' is not a JSON object")))?;
        apply(properties, artifact, overrides)?;
        debug!(resource = %name, "[TEMPLATE] Rewrote function resource");
    }

    info!(
        functions = functions.len(),
        bucket = %artifact.location,
        key = %artifact.key,
        "[TEMPLATE] Template rewritten"
    );
    Ok(template)
}

/// Read the template at `path` and [`rewrite`] it.
pub fn rewrite_file(
    path: &Path,
    artifact: &ArtifactReference,
    overrides: &TemplateOverrides,
) -> Result<GeneratedTemplate, PackagingError> {
    rewrite(GeneratedTemplate::from_file(path)?, artifact, overrides)
}

fn apply(
    properties: &mut Map<String, Value>,
    artifact: &ArtifactReference,
    overrides: &TemplateOverrides,
) -> Result<(), PackagingError> {
    properties.insert(
        "CodeUri".to_string(),
        json!({ "Bucket": artifact.location, "Key": artifact.key }),
    );

    if let Some(role) = &overrides.role {
        properties.insert("Role".to_string(), Value::String(role.clone()));
    }

    if let Some(variables) = &overrides.environment_variables {
        let environment = properties
            .entry("Environment")
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()
            .ok_or_else(|| invalid("'Properties.Environment' is not a JSON object"))?;
        let variables: Map<String, Value> = variables
            .iter()
            .map(|(key, value)| (key.clone(), Value::String(value.clone())))
            .collect();
        environment.insert("Variables".to_string(), Value::Object(variables));
    }
    Ok(())
}

fn is_function(resource: &Value) -> bool {
    resource.get("Type").and_then(Value::as_str) == Some(FUNCTION_RESOURCE_TYPE)
}

fn invalid(reason: impl Into<String>) -> PackagingError {
    PackagingError::InvalidTemplate {
        reason: reason.into(),
    }
}
