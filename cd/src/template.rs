//! Template, resource, parameter and output document types

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::TEMPLATE_FORMAT_VERSION;

/// Errors raised while assembling or serializing a template document
#[derive(Debug, Error)]
pub enum CfnError {
    #[error("Duplicate logical id: {id}")]
    DuplicateLogicalId { id: String },

    #[error("Logical id '{id}' is not alphanumeric")]
    InvalidLogicalId { id: String },

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML serialization failed: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// One resource entry in a template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    /// Resource type, e.g. "AWS::ECS::TaskDefinition"
    #[serde(rename = "Type")]
    pub resource_type: String,

    /// Resource properties as a free-form JSON object
    #[serde(rename = "Properties", skip_serializing_if = "Value::is_null", default)]
    pub properties: Value,

    /// Logical ids this resource depends on (sorted, deduplicated)
    #[serde(rename = "DependsOn", skip_serializing_if = "Vec::is_empty", default)]
    pub depends_on: Vec<String>,

    /// Optional condition name gating the resource
    #[serde(rename = "Condition", skip_serializing_if = "Option::is_none", default)]
    pub condition: Option<String>,
}

impl Resource {
    /// Create a resource of the given type with no properties
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            properties: Value::Null,
            depends_on: Vec::new(),
            condition: None,
        }
    }

    /// Attach a properties object
    pub fn with_properties(mut self, properties: Value) -> Self {
        self.properties = properties;
        self
    }

    /// Add one dependency, keeping the list sorted and free of duplicates
    pub fn add_depends_on(&mut self, logical_id: impl Into<String>) {
        let id = logical_id.into();
        if let Err(pos) = self.depends_on.binary_search(&id) {
            self.depends_on.insert(pos, id);
        }
    }

    /// Add several dependencies at once
    pub fn with_depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for id in ids {
            self.add_depends_on(id);
        }
        self
    }
}

/// A template parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    #[serde(rename = "Type")]
    pub parameter_type: String,

    #[serde(rename = "Description", skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,

    #[serde(rename = "Default", skip_serializing_if = "Option::is_none", default)]
    pub default: Option<Value>,
}

impl Parameter {
    /// Create a parameter of the given CloudFormation type
    pub fn new(parameter_type: impl Into<String>) -> Self {
        Self {
            parameter_type: parameter_type.into(),
            description: None,
            default: None,
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the default value
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// A template output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Output {
    #[serde(rename = "Value")]
    pub value: Value,

    #[serde(rename = "Description", skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,

    #[serde(rename = "Export", skip_serializing_if = "Option::is_none", default)]
    pub export: Option<Value>,
}

impl Output {
    /// Create an output with the given value
    pub fn new(value: Value) -> Self {
        Self {
            value,
            description: None,
            export: None,
        }
    }

    /// Export the output under the given name
    pub fn exported_as(mut self, name: Value) -> Self {
        self.export = Some(serde_json::json!({ "Name": name }));
        self
    }
}

/// A CloudFormation template document
///
/// Resources, parameters and outputs are keyed by logical id in `BTreeMap`s
/// so serialization order is stable across runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,

    #[serde(rename = "Description", skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,

    #[serde(rename = "Metadata", skip_serializing_if = "BTreeMap::is_empty", default)]
    pub metadata: BTreeMap<String, Value>,

    #[serde(rename = "Parameters", skip_serializing_if = "BTreeMap::is_empty", default)]
    pub parameters: BTreeMap<String, Parameter>,

    #[serde(rename = "Resources", default)]
    pub resources: BTreeMap<String, Resource>,

    #[serde(rename = "Outputs", skip_serializing_if = "BTreeMap::is_empty", default)]
    pub outputs: BTreeMap<String, Output>,
}

impl Template {
    /// Create an empty template with a description
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            format_version: TEMPLATE_FORMAT_VERSION.to_string(),
            description: Some(description.into()),
            metadata: BTreeMap::new(),
            parameters: BTreeMap::new(),
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// Add a resource under a logical id
    ///
    /// The id must be non-empty alphanumeric and not already present.
    pub fn add_resource(&mut self, logical_id: impl Into<String>, resource: Resource) -> Result<(), CfnError> {
        let id = logical_id.into();
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(CfnError::InvalidLogicalId { id });
        }
        if self.resources.contains_key(&id) {
            return Err(CfnError::DuplicateLogicalId { id });
        }
        self.resources.insert(id, resource);
        Ok(())
    }

    /// Add a parameter under a logical id
    pub fn add_parameter(&mut self, logical_id: impl Into<String>, parameter: Parameter) -> Result<(), CfnError> {
        let id = logical_id.into();
        if self.parameters.contains_key(&id) {
            return Err(CfnError::DuplicateLogicalId { id });
        }
        self.parameters.insert(id, parameter);
        Ok(())
    }

    /// Add an output under a logical id
    pub fn add_output(&mut self, logical_id: impl Into<String>, output: Output) -> Result<(), CfnError> {
        let id = logical_id.into();
        if self.outputs.contains_key(&id) {
            return Err(CfnError::DuplicateLogicalId { id });
        }
        self.outputs.insert(id, output);
        Ok(())
    }

    /// Set a metadata entry
    pub fn set_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }

    /// Look up a resource by logical id
    pub fn resource(&self, logical_id: &str) -> Option<&Resource> {
        self.resources.get(logical_id)
    }

    /// Mutable lookup, used when the render layer wires dependencies late
    pub fn resource_mut(&mut self, logical_id: &str) -> Option<&mut Resource> {
        self.resources.get_mut(logical_id)
    }

    /// Logical ids of resources of a given type, in sorted order
    pub fn resources_of_type(&self, resource_type: &str) -> Vec<&str> {
        self.resources
            .iter()
            .filter(|(_, r)| r.resource_type == resource_type)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Number of resources in the template
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether the template has no resources
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Serialize to pretty-printed JSON
    pub fn to_json(&self) -> Result<String, CfnError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Serialize to YAML
    pub fn to_yaml(&self) -> Result<String, CfnError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_template() -> Template {
        let mut template = Template::new("test stack");
        template
            .add_resource(
                "AppTaskDef",
                Resource::new("AWS::ECS::TaskDefinition").with_properties(json!({"Cpu": "256", "Memory": "512"})),
            )
            .unwrap();
        template
            .add_resource(
                "AppService",
                Resource::new("AWS::ECS::Service").with_depends_on(["AppTaskDef"]),
            )
            .unwrap();
        template
    }

    #[test]
    fn test_add_resource_rejects_duplicate() {
        let mut template = sample_template();
        let result = template.add_resource("AppService", Resource::new("AWS::ECS::Service"));
        assert!(matches!(result, Err(CfnError::DuplicateLogicalId { .. })));
    }

    #[test]
    fn test_add_resource_rejects_non_alphanumeric_id() {
        let mut template = Template::new("test");
        let result = template.add_resource("bad-id", Resource::new("AWS::ECS::Service"));
        assert!(matches!(result, Err(CfnError::InvalidLogicalId { .. })));

        let result = template.add_resource("", Resource::new("AWS::ECS::Service"));
        assert!(matches!(result, Err(CfnError::InvalidLogicalId { .. })));
    }

    #[test]
    fn test_depends_on_sorted_and_deduplicated() {
        let mut resource = Resource::new("AWS::ECS::Service");
        resource.add_depends_on("Zeta");
        resource.add_depends_on("Alpha");
        resource.add_depends_on("Zeta");

        assert_eq!(resource.depends_on, vec!["Alpha", "Zeta"]);
    }

    #[test]
    fn test_serialization_is_deterministic() {
        let a = sample_template().to_json().unwrap();
        let b = sample_template().to_json().unwrap();
        assert_eq!(a, b);

        // Resources appear in sorted key order regardless of insertion order
        let mut reversed = Template::new("test stack");
        reversed
            .add_resource("AppService", Resource::new("AWS::ECS::Service").with_depends_on(["AppTaskDef"]))
            .unwrap();
        reversed
            .add_resource(
                "AppTaskDef",
                Resource::new("AWS::ECS::TaskDefinition").with_properties(json!({"Cpu": "256", "Memory": "512"})),
            )
            .unwrap();
        assert_eq!(a, reversed.to_json().unwrap());
    }

    #[test]
    fn test_yaml_round_trip() {
        let template = sample_template();
        let yaml = template.to_yaml().unwrap();
        let parsed: Template = serde_yaml::from_str(&yaml).unwrap();

        assert_eq!(parsed.resources.len(), 2);
        assert_eq!(parsed.resource("AppService").unwrap().depends_on, vec!["AppTaskDef"]);
        assert_eq!(parsed.format_version, TEMPLATE_FORMAT_VERSION);
    }

    #[test]
    fn test_resources_of_type() {
        let template = sample_template();
        assert_eq!(template.resources_of_type("AWS::ECS::Service"), vec!["AppService"]);
        assert!(template.resources_of_type("AWS::IAM::Role").is_empty());
    }

    #[test]
    fn test_empty_maps_skipped_in_output() {
        let template = Template::new("minimal");
        let json = template.to_json().unwrap();
        assert!(!json.contains("Parameters"));
        assert!(!json.contains("Outputs"));
        assert!(!json.contains("Metadata"));
    }
}
