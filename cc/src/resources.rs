//! Collaborator contracts consumed by the family engine
//!
//! The engine never builds IAM role documents or calls AWS APIs itself.
//! Roles come from a [`RoleProvider`] (lazily referenceable identifiers,
//! here CloudFormation intrinsics) and cross-resource references resolve
//! against read-only [`AttributesOutputs`] maps supplied by the resource
//! modules (Kinesis streams, Firehose deliveries, looked-up secrets).

use std::collections::BTreeMap;

use serde_json::Value;

/// A referenceable IAM role
///
/// `arn()` and `name()` return values that resolve lazily - in template
/// output they are intrinsics evaluated at deploy time.
pub trait RoleProvider {
    fn arn(&self) -> Value;
    fn name(&self) -> Value;
}

/// A role backed by a template resource in the same stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleRef {
    /// Logical id of the AWS::IAM::Role resource
    pub logical_id: String,
}

impl RoleRef {
    pub fn new(logical_id: impl Into<String>) -> Self {
        Self {
            logical_id: logical_id.into(),
        }
    }
}

impl RoleProvider for RoleRef {
    fn arn(&self) -> Value {
        cfndoc::intrinsics::get_att(&self.logical_id, "Arn")
    }

    fn name(&self) -> Value {
        cfndoc::intrinsics::r#ref(&self.logical_id)
    }
}

/// Where an attribute value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Produced by a resource defined in this render
    Stack,
    /// Fetched from an existing AWS resource by lookup
    Lookup,
}

/// One resolved attribute of an external resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeOutput {
    pub value: String,
    pub origin: Origin,
}

impl AttributeOutput {
    pub fn stack(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            origin: Origin::Stack,
        }
    }

    pub fn lookup(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            origin: Origin::Lookup,
        }
    }
}

/// Attribute map one resource module exposes (e.g. {"Arn": ..., "Name": ...})
pub type AttributesOutputs = BTreeMap<String, AttributeOutput>;

/// All lookup-able resources by name; the engine reads, never writes
pub type LookupRegistry = BTreeMap<String, AttributesOutputs>;

/// Fetch a resource's ARN (preferred) or name from the registry
pub fn resolve_reference<'a>(registry: &'a LookupRegistry, resource: &str) -> Option<&'a AttributeOutput> {
    let outputs = registry.get(resource)?;
    outputs.get("Arn").or_else(|| outputs.get("Name")).or_else(|| outputs.values().next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_role_ref_intrinsics() {
        let role = RoleRef::new("AppTaskRole");
        assert_eq!(role.arn(), json!({"Fn::GetAtt": ["AppTaskRole", "Arn"]}));
        assert_eq!(role.name(), json!({"Ref": "AppTaskRole"}));
    }

    #[test]
    fn test_resolve_reference_prefers_arn() {
        let mut registry = LookupRegistry::new();
        let mut outputs = AttributesOutputs::new();
        outputs.insert("Name".to_string(), AttributeOutput::lookup("orders"));
        outputs.insert(
            "Arn".to_string(),
            AttributeOutput::lookup("arn:aws:kinesis:eu-west-1:123456789012:stream/orders"),
        );
        registry.insert("orders-stream".to_string(), outputs);

        let resolved = resolve_reference(&registry, "orders-stream").unwrap();
        assert!(resolved.value.starts_with("arn:"));
        assert_eq!(resolved.origin, Origin::Lookup);
    }

    #[test]
    fn test_resolve_reference_missing() {
        let registry = LookupRegistry::new();
        assert!(resolve_reference(&registry, "ghost").is_none());
    }
}
