//! CloudFormation intrinsic function helpers
//!
//! Builders for the intrinsic-function JSON shapes the render layer embeds
//! in resource properties. These are plain values; CloudFormation resolves
//! them at deploy time, which is what makes role ARNs and names lazily
//! referenceable.

use serde_json::{Value, json};

/// `{"Ref": id}` - reference a resource or parameter by logical id
pub fn r#ref(logical_id: &str) -> Value {
    json!({ "Ref": logical_id })
}

/// `{"Fn::GetAtt": [id, attr]}` - fetch a resource attribute
pub fn get_att(logical_id: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [logical_id, attribute] })
}

/// `{"Fn::Sub": template}` - string substitution
pub fn sub(template: &str) -> Value {
    json!({ "Fn::Sub": template })
}

/// `{"Fn::Join": [separator, parts]}` - join a list of values
pub fn join(separator: &str, parts: Vec<Value>) -> Value {
    json!({ "Fn::Join": [separator, parts] })
}

/// `{"Fn::ImportValue": name}` - import a cross-stack export
pub fn import_value(name: &str) -> Value {
    json!({ "Fn::ImportValue": name })
}
