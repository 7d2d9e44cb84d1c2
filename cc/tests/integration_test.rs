//! Integration tests for composecfn
//!
//! These tests drive the whole pipeline: compose document -> project ->
//! family composition -> template, plus process-level CLI contracts.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

use composecfn::compose::ComposeProject;
use composecfn::config::Config;
use composecfn::family::{BuiltFamily, ComposeFamily};
use composecfn::render::render_project;
use composecfn::{ComposeError, PolicyWarning};

fn build_project(yaml: &str) -> Result<Vec<BuiltFamily>, ComposeError> {
    let config = Config::default();
    let project = ComposeProject::from_str(yaml)?;
    let service_families = project.service_families();
    let lookups = config.lookup_registry();

    let mut built = Vec::new();
    for (name, services) in project.family_groupings() {
        let family = ComposeFamily::new(
            &name,
            services,
            project.secrets.clone(),
            project.volumes.clone(),
            config.family_build_config(),
        )?;
        built.push(family.build_all(&service_families, &lookups)?);
    }
    Ok(built)
}

// =============================================================================
// End-to-end composition
// =============================================================================

#[test]
fn test_full_project_render() {
    let built = build_project(
        r#"
services:
  web:
    image: nginx:latest
    ports:
      - "443:8443"
    depends_on:
      - api
    deploy:
      labels:
        ecs.task.family: frontend
  api:
    image: api:v3
    deploy:
      replicas: 2
      resources:
        limits:
          cpus: "0.5"
          memory: 1G
      labels:
        ecs.task.family: frontend
  db:
    image: postgres:16
    healthcheck:
      test: pg_isready
"#,
    )
    .unwrap();

    assert_eq!(built.len(), 2);

    let frontend = &built[0].descriptor;
    assert_eq!(frontend.family_name, "frontend");
    // api has no deps, web depends on api
    let order: Vec<&str> = frontend.containers.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(order, vec!["api", "web"]);
    assert!(frontend.containers[0].essential);
    assert!(!frontend.containers[1].essential);
    assert_eq!(frontend.replicas, 2);

    let descriptors: Vec<_> = built.iter().map(|b| b.descriptor.clone()).collect();
    let template = render_project("integration", &descriptors).unwrap();
    assert!(template.resource("FrontendService").is_some());
    assert!(template.resource("DbService").is_some());
    assert!(template.resource("FrontendTaskDef").is_some());
}

#[test]
fn test_dependency_chain_order_and_sole_root_essential() {
    let built = build_project(
        r#"
services:
  a:
    image: a
    deploy:
      labels:
        ecs.task.family: chain
  b:
    image: b
    depends_on:
      - a
    deploy:
      labels:
        ecs.task.family: chain
  c:
    image: c
    depends_on:
      - b
    deploy:
      labels:
        ecs.task.family: chain
"#,
    )
    .unwrap();

    let chain = &built[0].descriptor;
    let order: Vec<&str> = chain.containers.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(order, vec!["a", "b", "c"]);

    let essential: Vec<&str> = chain
        .containers
        .iter()
        .filter(|c| c.essential)
        .map(|c| c.name.as_str())
        .collect();
    assert_eq!(essential, vec!["a"]);
}

#[test]
fn test_port_override_last_write_wins_across_family() {
    let built = build_project(
        r#"
services:
  x:
    image: x
    ports:
      - "8080:80"
    deploy:
      labels:
        ecs.task.family: shared
  y:
    image: y
    ports:
      - "9090:80"
    deploy:
      labels:
        ecs.task.family: shared
"#,
    )
    .unwrap();

    let ports = &built[0].descriptor.ports;
    assert_eq!(ports.len(), 1);
    assert_eq!(ports[0].published, 9090);
}

#[test]
fn test_boundary_conflict_warns_and_keeps_first() {
    let built = build_project(
        r#"
services:
  a:
    image: a
    x-iam:
      boundary: arn:aws:iam::aws:policy/Foo
    deploy:
      labels:
        ecs.task.family: app
  b:
    image: b
    x-iam:
      boundary: arn:aws:iam::aws:policy/Bar
    deploy:
      labels:
        ecs.task.family: app
"#,
    )
    .unwrap();

    let app = &built[0];
    assert_eq!(
        app.descriptor.iam.permissions_boundary.as_deref(),
        Some("arn:aws:iam::aws:policy/Foo")
    );
    assert!(
        app.warnings
            .iter()
            .any(|w| matches!(w, PolicyWarning::BoundaryConflict { .. }))
    );
}

#[test]
fn test_cpu_arch_conflict_aborts_without_descriptor() {
    let err = build_project(
        r#"
services:
  a:
    image: a
    x-cpu-arch: ARM64
    deploy:
      labels:
        ecs.task.family: app
  b:
    image: b
    x-cpu-arch: X86_64
    deploy:
      labels:
        ecs.task.family: app
"#,
    )
    .unwrap_err();

    assert!(matches!(err, ComposeError::Consistency { .. }));
}

#[test]
fn test_minimum_compute_floor() {
    let built = build_project(
        r#"
services:
  tiny:
    image: tiny
"#,
    )
    .unwrap();

    let descriptor = &built[0].descriptor;
    assert!(descriptor.task_cpu >= 128);
    assert!(descriptor.task_ram_mb >= 128);
}

#[test]
fn test_sidecar_injection_end_to_end() {
    let built = build_project(
        r#"
services:
  web:
    image: web
    x-xray: true
    deploy:
      resources:
        limits:
          memory: 512M
"#,
    )
    .unwrap();

    let descriptor = &built[0].descriptor;
    let sidecars: Vec<&str> = descriptor
        .containers
        .iter()
        .filter(|c| c.name == "xray-daemon")
        .map(|c| c.name.as_str())
        .collect();
    assert_eq!(sidecars, vec!["xray-daemon"]);

    // Sidecar IAM hint reached the task role
    assert!(
        descriptor
            .iam
            .task
            .managed_policy_arns
            .iter()
            .any(|a| a.contains("XRay"))
    );
}

#[test]
fn test_unresolved_reference_aborts() {
    let err = build_project(
        r#"
services:
  api:
    image: api
    depends_on:
      - missing
"#,
    )
    .unwrap_err();
    assert!(matches!(err, ComposeError::Reference { .. }));
}

// =============================================================================
// Template output
// =============================================================================

#[test]
fn test_template_round_trips_between_formats() {
    let built = build_project("services:\n  web:\n    image: web\n").unwrap();
    let descriptors: Vec<_> = built.iter().map(|b| b.descriptor.clone()).collect();
    let template = render_project("round trip", &descriptors).unwrap();

    let json: serde_json::Value = serde_json::from_str(&template.to_json().unwrap()).unwrap();
    let yaml: serde_json::Value = serde_yaml::from_str(&template.to_yaml().unwrap()).unwrap();
    assert_eq!(json, yaml);
    assert_eq!(json["AWSTemplateFormatVersion"], "2010-09-09");
}

// =============================================================================
// CLI process contracts
// =============================================================================

const CLI_COMPOSE: &str = r#"
services:
  web:
    image: nginx
    ports:
      - "80:80"
"#;

#[test]
fn test_cli_render_writes_template() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let compose_path = dir.path().join("compose.yml");
    std::fs::write(&compose_path, CLI_COMPOSE).unwrap();
    let output_path = dir.path().join("out/template.yaml");

    Command::cargo_bin("ccfn")
        .unwrap()
        .args(["render", "-f"])
        .arg(&compose_path)
        .arg("-o")
        .arg(&output_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("rendered 1 families"));

    let rendered = std::fs::read_to_string(&output_path).unwrap();
    assert!(rendered.contains("AWS::ECS::Service"));
    assert!(rendered.contains("WebTaskDef"));
}

#[test]
fn test_cli_validate_reports_ok() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let compose_path = dir.path().join("compose.yml");
    std::fs::write(&compose_path, CLI_COMPOSE).unwrap();

    Command::cargo_bin("ccfn")
        .unwrap()
        .args(["validate", "-f"])
        .arg(&compose_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("1 services in 1 families"));
}

#[test]
fn test_cli_fails_on_invalid_project_without_output() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let compose_path = dir.path().join("compose.yml");
    std::fs::write(
        &compose_path,
        "services:\n  api:\n    image: api\n    depends_on:\n      - ghost\n",
    )
    .unwrap();
    let output_path = dir.path().join("template.yaml");

    Command::cargo_bin("ccfn")
        .unwrap()
        .args(["render", "-f"])
        .arg(&compose_path)
        .arg("-o")
        .arg(&output_path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("ghost"));

    // All-or-nothing: no partial artifact
    assert!(!output_path.exists());
}

#[test]
fn test_cli_override_file_merging() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let base = dir.path().join("compose.yml");
    let overlay = dir.path().join("override.yml");
    std::fs::write(&base, CLI_COMPOSE).unwrap();
    std::fs::write(&overlay, "services:\n  web:\n    image: nginx:pinned\n").unwrap();
    let output_path = dir.path().join("template.yaml");

    Command::cargo_bin("ccfn")
        .unwrap()
        .args(["render", "-f"])
        .arg(&base)
        .arg("-f")
        .arg(&overlay)
        .arg("-o")
        .arg(&output_path)
        .assert()
        .success();

    let rendered = std::fs::read_to_string(&output_path).unwrap();
    assert!(rendered.contains("nginx:pinned"));
}

// =============================================================================
// Determinism
// =============================================================================

#[test]
fn test_same_input_same_families() {
    let yaml = r#"
services:
  a:
    image: a
    x-network:
      ingress:
        external:
          - cidr: 10.0.0.0/8
  b:
    image: b
    deploy:
      labels:
        ecs.task.family: a
"#;
    let first = build_project(yaml).unwrap();
    let second = build_project(yaml).unwrap();

    let names = |built: &[BuiltFamily]| -> Vec<String> {
        built
            .iter()
            .flat_map(|b| b.descriptor.containers.iter().map(|c| c.name.clone()))
            .collect()
    };
    assert_eq!(names(&first), names(&second));
    assert_eq!(
        first.iter().map(|b| b.warnings.len()).collect::<Vec<_>>(),
        second.iter().map(|b| b.warnings.len()).collect::<Vec<_>>()
    );
}

#[test]
fn test_managed_policy_union_is_order_independent() {
    let built = build_project(
        r#"
services:
  a:
    image: a
    x-iam:
      managed-policies:
        - arn:aws:iam::aws:policy/PolicyA
    deploy:
      labels:
        ecs.task.family: app
  b:
    image: b
    x-iam:
      managed-policies:
        - arn:aws:iam::aws:policy/PolicyA
        - arn:aws:iam::aws:policy/PolicyB
    deploy:
      labels:
        ecs.task.family: app
"#,
    )
    .unwrap();

    let expected: std::collections::BTreeSet<String> = [
        "arn:aws:iam::aws:policy/PolicyA".to_string(),
        "arn:aws:iam::aws:policy/PolicyB".to_string(),
    ]
    .into_iter()
    .collect();
    assert_eq!(built[0].descriptor.iam.task.managed_policy_arns, expected);
}

#[test]
fn test_cross_family_dependency_recorded() {
    let built = build_project(
        r#"
services:
  web:
    image: web
    depends_on:
      - db
  db:
    image: postgres
"#,
    )
    .unwrap();

    let web = built.iter().find(|b| b.descriptor.family_name == "web").unwrap();
    let expected: std::collections::BTreeSet<String> = ["db".to_string()].into_iter().collect();
    assert_eq!(web.descriptor.cross_family_depends, expected);
}
