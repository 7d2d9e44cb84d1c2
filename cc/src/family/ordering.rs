//! Container ordering and essential-container resolution
//!
//! Priority counting, not a topological sort: each container's priority is
//! the number of its direct in-family dependencies, and the stable
//! ascending sort keeps declaration order among ties. A container two
//! levels deep in a diamond gets the same priority as one with two
//! same-depth dependencies. ECS DependsOn is condition-based at startup
//! and tolerates same-priority siblings, so flattening to true depth
//! would change nothing observable; the priority-ordering tests pin this
//! choice down.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::compose::{ComposeService, StartCondition};
use crate::error::{ComposeError, PolicyWarning, Result};

/// Reject cyclic in-family dependency chains
///
/// A cycle in container DependsOn can never start, so it is a fatal
/// consistency error. The error message carries the cycle path.
pub fn validate_dependency_graph(family: &str, containers: &[ComposeService]) -> Result<()> {
    let by_name: BTreeMap<&str, &ComposeService> = containers.iter().map(|c| (c.name.as_str(), c)).collect();

    let mut visited: BTreeSet<&str> = BTreeSet::new();
    for container in containers {
        let mut rec_stack: BTreeSet<&str> = BTreeSet::new();
        let mut cycle_path: Vec<String> = Vec::new();
        if has_cycle_dfs(&container.name, &by_name, &mut visited, &mut rec_stack, &mut cycle_path) {
            return Err(ComposeError::inconsistent(
                family,
                format!("dependency cycle: {}", cycle_path.join(" -> ")),
            ));
        }
    }
    Ok(())
}

fn has_cycle_dfs<'a>(
    node: &'a str,
    graph: &BTreeMap<&'a str, &'a ComposeService>,
    visited: &mut BTreeSet<&'a str>,
    rec_stack: &mut BTreeSet<&'a str>,
    cycle_path: &mut Vec<String>,
) -> bool {
    visited.insert(node);
    rec_stack.insert(node);
    cycle_path.push(node.to_string());

    if let Some(container) = graph.get(node) {
        for dep_name in container.depends_on.keys() {
            let Some((&dep_key, _)) = graph.get_key_value(dep_name.as_str()) else {
                // Cross-family dependency, not part of this graph
                continue;
            };
            if !visited.contains(dep_key) {
                if has_cycle_dfs(dep_key, graph, visited, rec_stack, cycle_path) {
                    return true;
                }
            } else if rec_stack.contains(dep_key) {
                cycle_path.push(dep_name.clone());
                return true;
            }
        }
    }

    rec_stack.remove(node);
    cycle_path.pop();
    false
}

/// Sort containers by dependency priority and resolve start dependencies
///
/// Re-runnable: clears and rebuilds every container's start-dependency
/// list, which is what makes sidecar injection followed by a re-sort safe.
pub fn resolve_order(family: &str, containers: &mut Vec<ComposeService>) -> Result<()> {
    validate_dependency_graph(family, containers)?;

    let conditions: BTreeMap<String, StartCondition> = containers
        .iter()
        .map(|c| (c.name.clone(), c.container_start_condition))
        .collect();

    let mut priorities: BTreeMap<String, usize> = BTreeMap::new();
    for container in containers.iter_mut() {
        container.start_dependencies.clear();

        let mut priority = 0;
        // depends_on is a BTreeMap, so edges land in name order
        let declared: Vec<(String, Option<StartCondition>)> = container
            .depends_on
            .iter()
            .map(|(name, condition)| (name.clone(), *condition))
            .collect();
        for (dep_name, declared_condition) in declared {
            let Some(dep_condition) = conditions.get(&dep_name) else {
                continue;
            };
            priority += 1;
            let condition = declared_condition.unwrap_or(*dep_condition);
            container.add_start_dependency(dep_name, condition);
        }
        priorities.insert(container.name.clone(), priority);
    }

    // Stable sort: ties keep declaration order
    containers.sort_by_key(|c| priorities[&c.name]);

    debug!(
        family,
        order = ?containers.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
        "Resolved container start order"
    );
    Ok(())
}

/// Resolve which containers are essential
///
/// A sole container is unconditionally essential. With several, the first
/// in dependency order is forced essential; descendants are optional
/// unless a label raises them or a healthcheck forces them (the
/// healthcheck wins over a lowering label, with a recorded warning).
pub fn resolve_essential(containers: &mut [ComposeService], warnings: &mut Vec<PolicyWarning>) {
    if let [only] = containers {
        only.is_essential = true;
        return;
    }

    for (index, container) in containers.iter_mut().enumerate() {
        if index == 0 {
            container.is_essential = true;
            continue;
        }

        if container.healthcheck.is_some() {
            if container.deploy.essential_lowered() {
                warn!(
                    service = %container.name,
                    "Healthcheck forces essential=true, ignoring essential=no label"
                );
                warnings.push(PolicyWarning::EssentialForcedByHealthcheck {
                    service: container.name.clone(),
                });
            }
            container.is_essential = true;
        } else if container.deploy.essential_raised() {
            container.is_essential = true;
        } else {
            container.is_essential = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::service::RawService;

    fn service(name: &str, yaml: &str) -> ComposeService {
        let raw: RawService = serde_yaml::from_str(yaml).unwrap();
        ComposeService::from_raw(name, raw).unwrap()
    }

    fn names(containers: &[ComposeService]) -> Vec<&str> {
        containers.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn test_chain_ordering_and_essential() {
        let mut containers = vec![
            service("c", "image: c\ndepends_on:\n  - b"),
            service("a", "image: a"),
            service("b", "image: b\ndepends_on:\n  - a"),
        ];

        resolve_order("app", &mut containers).unwrap();
        assert_eq!(names(&containers), vec!["a", "b", "c"]);

        let mut warnings = Vec::new();
        resolve_essential(&mut containers, &mut warnings);
        assert!(containers[0].is_essential);
        assert!(!containers[1].is_essential);
        assert!(!containers[2].is_essential);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_diamond_dependencies_share_priority() {
        // a <- b, a <- c, d depends on both b and c.
        // Direct in-degree counting: b and c get priority 1 each, d gets 2.
        // Depth is NOT flattened: d's priority equals what it would be with
        // two same-depth dependencies.
        let mut containers = vec![
            service("a", "image: a"),
            service("b", "image: b\ndepends_on:\n  - a"),
            service("c", "image: c\ndepends_on:\n  - a"),
            service("d", "image: d\ndepends_on:\n  - b\n  - c"),
        ];

        resolve_order("app", &mut containers).unwrap();
        // b and c tie at priority 1, declaration order preserved
        assert_eq!(names(&containers), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_ties_keep_declaration_order() {
        let mut containers = vec![
            service("z", "image: z"),
            service("m", "image: m"),
            service("a", "image: a"),
        ];
        resolve_order("app", &mut containers).unwrap();
        assert_eq!(names(&containers), vec!["z", "m", "a"]);
    }

    #[test]
    fn test_start_conditions_resolved() {
        let mut containers = vec![
            service(
                "db",
                r#"
image: postgres
healthcheck:
  test: pg_isready
"#,
            ),
            service(
                "migrate",
                r#"
image: migrate
deploy:
  labels:
    ecs.depends.condition: SUCCESS
"#,
            ),
            service(
                "api",
                r#"
image: api
depends_on:
  db: {}
  migrate: {}
  cache:
    condition: service_started
"#,
            ),
        ];

        resolve_order("app", &mut containers).unwrap();
        let api = containers.iter().find(|c| c.name == "api").unwrap();

        // db has a healthcheck -> HEALTHY; migrate's label -> SUCCESS;
        // cache is cross-family and ignored here
        let deps: BTreeMap<&str, StartCondition> = api
            .start_dependencies
            .iter()
            .map(|d| (d.container_name.as_str(), d.condition))
            .collect();
        assert_eq!(deps.get("db"), Some(&StartCondition::Healthy));
        assert_eq!(deps.get("migrate"), Some(&StartCondition::Success));
        assert!(!deps.contains_key("cache"));
    }

    #[test]
    fn test_explicit_condition_beats_dependency_default() {
        let mut containers = vec![
            service("db", "image: postgres\nhealthcheck:\n  test: pg_isready"),
            service(
                "api",
                r#"
image: api
depends_on:
  db:
    condition: service_started
"#,
            ),
        ];

        resolve_order("app", &mut containers).unwrap();
        let api = containers.iter().find(|c| c.name == "api").unwrap();
        assert_eq!(api.start_dependencies[0].condition, StartCondition::Start);
    }

    #[test]
    fn test_cycle_rejected_with_path() {
        let containers = vec![
            service("a", "image: a\ndepends_on:\n  - c"),
            service("b", "image: b\ndepends_on:\n  - a"),
            service("c", "image: c\ndepends_on:\n  - b"),
        ];

        let err = validate_dependency_graph("app", &containers).unwrap_err();
        assert!(matches!(err, ComposeError::Consistency { .. }));
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_self_cycle_rejected() {
        let containers = vec![service("a", "image: a\ndepends_on:\n  - a")];
        assert!(validate_dependency_graph("app", &containers).is_err());
    }

    #[test]
    fn test_sole_container_always_essential() {
        let mut containers = vec![service(
            "solo",
            r#"
image: solo
deploy:
  labels:
    ecs.essential: "no"
"#,
        )];
        let mut warnings = Vec::new();
        resolve_essential(&mut containers, &mut warnings);
        assert!(containers[0].is_essential);
    }

    #[test]
    fn test_healthcheck_forces_essential_over_label() {
        let mut containers = vec![
            service("root", "image: root"),
            service(
                "worker",
                r#"
image: worker
healthcheck:
  test: ./alive.sh
deploy:
  labels:
    ecs.essential: "no"
"#,
            ),
        ];
        resolve_order("app", &mut containers).unwrap();

        let mut warnings = Vec::new();
        resolve_essential(&mut containers, &mut warnings);

        let worker = containers.iter().find(|c| c.name == "worker").unwrap();
        assert!(worker.is_essential);
        assert_eq!(
            warnings,
            vec![PolicyWarning::EssentialForcedByHealthcheck {
                service: "worker".to_string()
            }]
        );
    }

    #[test]
    fn test_label_can_raise_descendant() {
        let mut containers = vec![
            service("root", "image: root"),
            service(
                "sidekick",
                r#"
image: sidekick
deploy:
  labels:
    ecs.essential: "yes"
"#,
            ),
        ];
        resolve_order("app", &mut containers).unwrap();

        let mut warnings = Vec::new();
        resolve_essential(&mut containers, &mut warnings);
        assert!(containers.iter().find(|c| c.name == "sidekick").unwrap().is_essential);
    }

    #[test]
    fn test_resolve_order_is_idempotent() {
        let mut containers = vec![
            service("b", "image: b\ndepends_on:\n  - a"),
            service("a", "image: a"),
        ];

        resolve_order("app", &mut containers).unwrap();
        let first_pass = names(&containers).join(",");
        resolve_order("app", &mut containers).unwrap();
        assert_eq!(first_pass, names(&containers).join(","));

        // Dependencies are rebuilt, not accumulated
        let b = containers.iter().find(|c| c.name == "b").unwrap();
        assert_eq!(b.start_dependencies.len(), 1);
    }
}
