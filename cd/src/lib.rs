//! CfnDoc - CloudFormation template document model
//!
//! Provides the in-memory representation of a CloudFormation template that
//! the composecfn render layer writes into: resources, parameters and
//! outputs keyed by logical id, plus the intrinsic-function helpers needed
//! to reference them.
//!
//! # Determinism
//!
//! All collections are `BTreeMap`s, so serializing the same document twice
//! yields byte-identical JSON/YAML. Rendering is a batch operation that runs
//! once per invocation; stable output is what makes the emitted templates
//! diffable.
//!
//! # Example
//!
//! ```ignore
//! use cfndoc::{Template, Resource, intrinsics};
//!
//! let mut template = Template::new("my service stack");
//! template.add_resource("AppTaskRole", Resource::new("AWS::IAM::Role"))?;
//! let arn = intrinsics::get_att("AppTaskRole", "Arn");
//! println!("{}", template.to_yaml()?);
//! ```

pub mod intrinsics;
mod template;

pub use template::{CfnError, Output, Parameter, Resource, Template};

/// CloudFormation template format version emitted on every document
pub const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";

/// Derive a CloudFormation logical id from a free-form name
///
/// Logical ids must be alphanumeric. Each run of non-alphanumeric characters
/// acts as a word boundary; the following character is uppercased
/// ("front-end_api" becomes "FrontEndApi"). Distinct inputs can collapse to
/// the same id, so callers that mint ids from user input must check for
/// collisions themselves.
pub fn logical_id(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = true;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            if upper_next {
                out.extend(ch.to_uppercase());
                upper_next = false;
            } else {
                out.push(ch);
            }
        } else {
            upper_next = true;
        }
    }
    out
}
