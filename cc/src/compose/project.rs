//! ComposeProject - one parsed and cross-validated compose file
//!
//! Loads the full document, normalizes every section and resolves the
//! by-name links between them (depends_on, secrets, volumes) before any
//! family is built. All reference failures are fatal here; families can
//! assume a closed, consistent world.
//!
//! Services keep their declaration order: it breaks priority ties in the
//! family ordering pass and decides last-write-wins in the port merge.

use std::collections::{BTreeMap, BTreeSet};

use serde_yaml::Value;
use tracing::info;

use crate::compose::secret::{ComposeSecret, RawSecret};
use crate::compose::service::{ComposeService, RawService};
use crate::compose::volume::{ComposeVolume, RawVolume};
use crate::error::{ComposeError, Result};

/// One parsed compose project
#[derive(Debug, Clone)]
pub struct ComposeProject {
    /// Services in declaration order
    pub services: Vec<ComposeService>,

    /// Compose-level volumes by name
    pub volumes: BTreeMap<String, ComposeVolume>,

    /// Compose-level secrets by name
    pub secrets: BTreeMap<String, ComposeSecret>,
}

impl ComposeProject {
    /// Parse and validate a compose document
    pub fn from_str(content: &str) -> Result<Self> {
        let document: Value = serde_yaml::from_str(content)?;
        Self::from_value(document)
    }

    /// Parse and validate a base document plus override documents
    ///
    /// Overrides apply in order, later files winning, with the usual
    /// compose deep-merge semantics: mappings merge per key, everything
    /// else is replaced wholesale.
    pub fn from_documents(documents: Vec<Value>) -> Result<Self> {
        let mut iter = documents.into_iter();
        let Some(first) = iter.next() else {
            return Err(ComposeError::malformed("<project>", "no compose documents given"));
        };
        let merged = iter.fold(first, merge_documents);
        Self::from_value(merged)
    }

    /// Parse and validate an already-loaded YAML document
    pub fn from_value(document: Value) -> Result<Self> {
        let Value::Mapping(root) = document else {
            return Err(ComposeError::malformed("<project>", "compose document is not a mapping"));
        };

        let mut services = Vec::new();
        if let Some(Value::Mapping(entries)) = root.get("services") {
            for (key, value) in entries {
                let name = key
                    .as_str()
                    .ok_or_else(|| ComposeError::malformed("<project>", "service name is not a string"))?;
                let raw: RawService = serde_yaml::from_value(value.clone())?;
                services.push(ComposeService::from_raw(name, raw)?);
            }
        }
        if services.is_empty() {
            return Err(ComposeError::malformed("<project>", "compose file declares no services"));
        }

        let mut volumes = BTreeMap::new();
        if let Some(Value::Mapping(entries)) = root.get("volumes") {
            for (key, value) in entries {
                let name = key
                    .as_str()
                    .ok_or_else(|| ComposeError::malformed("<project>", "volume name is not a string"))?;
                let raw: Option<RawVolume> = serde_yaml::from_value(value.clone())?;
                volumes.insert(name.to_string(), ComposeVolume::from_raw(name, raw));
            }
        }

        let mut secrets = BTreeMap::new();
        if let Some(Value::Mapping(entries)) = root.get("secrets") {
            for (key, value) in entries {
                let name = key
                    .as_str()
                    .ok_or_else(|| ComposeError::malformed("<project>", "secret name is not a string"))?;
                let raw: RawSecret = match value {
                    Value::Null => RawSecret::default(),
                    other => serde_yaml::from_value(other.clone())?,
                };
                let secret =
                    ComposeSecret::from_raw(name, raw).map_err(|reason| ComposeError::malformed(name, reason))?;
                secrets.insert(name.to_string(), secret);
            }
        }

        let project = Self {
            services,
            volumes,
            secrets,
        };
        project.validate()?;

        info!(
            services = project.services.len(),
            volumes = project.volumes.len(),
            secrets = project.secrets.len(),
            "Parsed compose project"
        );
        Ok(project)
    }

    /// Cross-reference validation over the whole project
    fn validate(&self) -> Result<()> {
        let known_names: BTreeSet<&str> = self.services.iter().map(|s| s.name.as_str()).collect();

        // Sanitized logical names can collide ("front-end" vs "front_end");
        // a collision would mint duplicate CloudFormation logical ids
        let mut logical_names: BTreeMap<&str, &str> = BTreeMap::new();
        for service in &self.services {
            if let Some(previous) = logical_names.insert(service.logical_name.as_str(), service.name.as_str()) {
                return Err(ComposeError::inconsistent(
                    "<project>",
                    format!(
                        "services '{previous}' and '{}' both sanitize to logical name '{}'",
                        service.name, service.logical_name
                    ),
                ));
            }
        }

        for service in &self.services {
            for dependency in service.depends_on.keys() {
                if !known_names.contains(dependency.as_str()) {
                    return Err(ComposeError::Reference {
                        kind: "service",
                        name: dependency.clone(),
                        referrer: service.name.clone(),
                    });
                }
            }

            for secret in &service.secrets {
                if !self.secrets.contains_key(&secret.source) {
                    return Err(ComposeError::Reference {
                        kind: "secret",
                        name: secret.source.clone(),
                        referrer: service.name.clone(),
                    });
                }
            }

            for mount in &service.volumes {
                if mount.source.starts_with('/') || mount.source.starts_with('.') {
                    return Err(ComposeError::malformed(
                        &service.name,
                        format!("host-path bind mount '{}' is not supported on Fargate", mount.source),
                    ));
                }
                if !self.volumes.contains_key(&mount.source) {
                    return Err(ComposeError::Reference {
                        kind: "volume",
                        name: mount.source.clone(),
                        referrer: service.name.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Family name a service belongs to: the grouping label, else its own name
    pub fn family_name(service: &ComposeService) -> &str {
        service.deploy.task_family().unwrap_or(&service.name)
    }

    /// Group services into families, preserving first-appearance order
    ///
    /// Returns (family name, member services) pairs. Members keep their
    /// declaration order within each family.
    pub fn family_groupings(&self) -> Vec<(String, Vec<ComposeService>)> {
        let mut order: Vec<String> = Vec::new();
        let mut groups: BTreeMap<String, Vec<ComposeService>> = BTreeMap::new();

        for service in &self.services {
            let family = Self::family_name(service).to_string();
            if !groups.contains_key(&family) {
                order.push(family.clone());
            }
            groups.entry(family).or_default().push(service.clone());
        }

        order
            .into_iter()
            .map(|name| {
                let members = groups.remove(&name).expect("grouping exists");
                (name, members)
            })
            .collect()
    }

    /// Map from service name to its family name, for cross-family deps
    pub fn service_families(&self) -> BTreeMap<String, String> {
        self.services
            .iter()
            .map(|s| (s.name.clone(), Self::family_name(s).to_string()))
            .collect()
    }

    /// Look up a service by name
    pub fn service(&self, name: &str) -> Option<&ComposeService> {
        self.services.iter().find(|s| s.name == name)
    }
}

/// Deep-merge one override document into a base document
pub fn merge_documents(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Mapping(mut base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(existing) => merge_documents(existing, value),
                    None => value,
                };
                base_map.insert(key, merged);
            }
            Value::Mapping(base_map)
        }
        (_, overlay) => overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASIC: &str = r#"
services:
  web:
    image: nginx
    ports:
      - "80:80"
  api:
    image: api:v1
    depends_on:
      - db
    deploy:
      labels:
        ecs.task.family: backend
  db:
    image: postgres
    deploy:
      labels:
        ecs.task.family: backend
"#;

    #[test]
    fn test_parse_preserves_declaration_order() {
        let project = ComposeProject::from_str(BASIC).unwrap();
        let names: Vec<&str> = project.services.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["web", "api", "db"]);
    }

    #[test]
    fn test_family_grouping_by_label() {
        let project = ComposeProject::from_str(BASIC).unwrap();
        let groupings = project.family_groupings();

        assert_eq!(groupings.len(), 2);
        assert_eq!(groupings[0].0, "web");
        assert_eq!(groupings[1].0, "backend");
        let backend: Vec<&str> = groupings[1].1.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(backend, vec!["api", "db"]);
    }

    #[test]
    fn test_unknown_depends_on_rejected() {
        let err = ComposeProject::from_str(
            r#"
services:
  api:
    image: api
    depends_on:
      - ghost
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ComposeError::Reference { kind: "service", .. }));
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_unknown_secret_rejected() {
        let err = ComposeProject::from_str(
            r#"
services:
  api:
    image: api
    secrets:
      - db-password
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ComposeError::Reference { kind: "secret", .. }));
    }

    #[test]
    fn test_unknown_volume_rejected() {
        let err = ComposeProject::from_str(
            r#"
services:
  api:
    image: api
    volumes:
      - data:/var/lib/data
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ComposeError::Reference { kind: "volume", .. }));
    }

    #[test]
    fn test_bind_mount_rejected() {
        let err = ComposeProject::from_str(
            r#"
services:
  api:
    image: api
    volumes:
      - ./config:/etc/app
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("bind mount"));
    }

    #[test]
    fn test_logical_name_collision_rejected() {
        let err = ComposeProject::from_str(
            r#"
services:
  front-end:
    image: a
  front_end:
    image: b
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ComposeError::Consistency { .. }));
        assert!(err.to_string().contains("FrontEnd"));
    }

    #[test]
    fn test_empty_project_rejected() {
        assert!(ComposeProject::from_str("services: {}").is_err());
        assert!(ComposeProject::from_str("version: '3.8'").is_err());
    }

    #[test]
    fn test_override_document_merging() {
        let base: Value = serde_yaml::from_str(
            r#"
services:
  web:
    image: nginx:1.0
    environment:
      LOG_LEVEL: info
"#,
        )
        .unwrap();
        let overlay: Value = serde_yaml::from_str(
            r#"
services:
  web:
    image: nginx:2.0
    environment:
      EXTRA: "1"
"#,
        )
        .unwrap();

        let project = ComposeProject::from_documents(vec![base, overlay]).unwrap();
        let web = project.service("web").unwrap();

        assert_eq!(web.image, "nginx:2.0");
        assert_eq!(web.environment.get("LOG_LEVEL").unwrap(), "info");
        assert_eq!(web.environment.get("EXTRA").unwrap(), "1");
    }

    #[test]
    fn test_from_documents_requires_at_least_one() {
        assert!(ComposeProject::from_documents(Vec::new()).is_err());
    }

    #[test]
    fn test_secrets_and_volumes_parsed() {
        let project = ComposeProject::from_str(
            r#"
services:
  api:
    image: api
    secrets:
      - db-password
    volumes:
      - data:/var/lib/data
volumes:
  data:
secrets:
  db-password:
    external: true
"#,
        )
        .unwrap();
        assert!(project.volumes.contains_key("data"));
        assert!(project.secrets.get("db-password").unwrap().external);
    }
}
