//! Compose-level secret normalization
//!
//! Top-level `secrets:` entries map to Secrets Manager references. The
//! container definition exposes them via `ValueFrom`, and the execution
//! role is granted read access to each referenced secret during IAM
//! aggregation.

use serde::Deserialize;

/// Raw top-level secret entry
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawSecret {
    pub external: bool,

    /// Secrets Manager name or full ARN; defaults to the compose name
    pub name: Option<String>,

    /// Compose `file:` secrets have no cloud equivalent and are rejected
    pub file: Option<String>,
}

/// One normalized compose-level secret
#[derive(Debug, Clone)]
pub struct ComposeSecret {
    /// Secret name as declared in the compose file
    pub name: String,

    /// Alphanumeric identifier for template resources
    pub logical_name: String,

    /// Externally managed secret (always true for Secrets Manager refs)
    pub external: bool,

    /// Secrets Manager name or ARN the reference resolves to
    pub aws_name: String,
}

impl ComposeSecret {
    /// Normalize one top-level secret entry
    pub fn from_raw(name: &str, raw: RawSecret) -> Result<Self, String> {
        if raw.file.is_some() {
            return Err(format!("secret '{name}' uses 'file:', which has no Secrets Manager equivalent"));
        }
        Ok(Self {
            name: name.to_string(),
            logical_name: cfndoc::logical_id(name),
            external: raw.external,
            aws_name: raw.name.unwrap_or_else(|| name.to_string()),
        })
    }

    /// The `ValueFrom` string for container secret entries
    pub fn value_from(&self) -> &str {
        &self.aws_name
    }

    /// Whether the reference is already a full ARN
    pub fn is_arn(&self) -> bool {
        self.aws_name.starts_with("arn:")
    }
}
