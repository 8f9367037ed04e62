//! Dependency graph and topological wave computation

use crate::config::Service;
use crate::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};

/// The project's dependency DAG.
///
/// An edge a → b means "a depends on b": b must be ready before a
/// launches. Levels come out of Kahn's algorithm; names inside a level
/// are sorted so the partition is a pure function of the edge set.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: BTreeSet<String>,
    /// service → the services it depends on
    edges: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Build the graph from declared services, rejecting unknown references
    pub fn build(services: &[Service]) -> Result<Self> {
        let nodes: BTreeSet<String> = services.iter().map(|s| s.name.clone()).collect();
        let mut edges: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        for service in services {
            let deps = edges.entry(service.name.clone()).or_default();
            for dep in &service.depends_on {
                if !nodes.contains(dep) {
                    return Err(Error::UnknownDep {
                        service: service.name.clone(),
                        dependency: dep.clone(),
                    });
                }
                deps.insert(dep.clone());
            }
        }

        Ok(Self { nodes, edges })
    }

    /// All node names, sorted
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(String::as_str)
    }

    /// The services `name` depends on
    pub fn dependencies_of(&self, name: &str) -> impl Iterator<Item = &str> {
        self.edges
            .get(name)
            .into_iter()
            .flat_map(|deps| deps.iter().map(String::as_str))
    }

    /// Startup waves: level 0 holds nodes with no dependencies, level
    /// i+1 the nodes released by completing level i. A cycle leaves
    /// residual nodes and fails with [`Error::Cycle`].
    pub fn topological_levels(&self) -> Result<Vec<Vec<String>>> {
        let mut indegree: BTreeMap<&str, usize> = self
            .nodes
            .iter()
            .map(|n| (n.as_str(), self.edges.get(n).map_or(0, BTreeSet::len)))
            .collect();

        // dependency → its dependents, for releasing after each wave
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (name, deps) in &self.edges {
            for dep in deps {
                dependents.entry(dep.as_str()).or_default().push(name.as_str());
            }
        }

        let mut levels = Vec::new();
        let mut current: Vec<&str> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| *n)
            .collect();
        let mut placed = 0usize;

        while !current.is_empty() {
            // BTreeMap iteration already yields names in order; keep the
            // invariant explicit for the next wave too.
            current.sort_unstable();
            placed += current.len();

            let mut next = Vec::new();
            for name in &current {
                for dependent in dependents.get(name).into_iter().flatten() {
                    let d = indegree.get_mut(dependent).expect("known node");
                    *d -= 1;
                    if *d == 0 {
                        next.push(*dependent);
                    }
                }
            }

            levels.push(current.iter().map(|s| s.to_string()).collect());
            current = next;
        }

        if placed != self.nodes.len() {
            let mut residual: Vec<String> = indegree
                .into_iter()
                .filter(|(_, d)| *d > 0)
                .map(|(n, _)| n.to_string())
                .collect();
            residual.sort_unstable();
            return Err(Error::Cycle(residual));
        }

        Ok(levels)
    }

    /// Stop order: the levels reversed (dependents before dependencies)
    pub fn reverse_levels(&self) -> Result<Vec<Vec<String>>> {
        let mut levels = self.topological_levels()?;
        levels.reverse();
        Ok(levels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Service;
    use appdash_registry::Mode;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn service(name: &str, deps: &[&str]) -> Service {
        Service {
            name: name.to_string(),
            language: String::new(),
            framework: None,
            command: None,
            project_path: PathBuf::from("."),
            image: None,
            ports: vec![],
            env: HashMap::new(),
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
            health_check: None,
            mode: Mode::Daemon,
        }
    }

    #[test]
    fn independent_services_share_level_zero() {
        let graph =
            DependencyGraph::build(&[service("c", &[]), service("a", &[]), service("b", &[])])
                .unwrap();
        let levels = graph.topological_levels().unwrap();
        assert_eq!(levels, vec![vec!["a", "b", "c"]]);
    }

    #[test]
    fn waves_follow_dependencies() {
        let graph = DependencyGraph::build(&[
            service("db", &[]),
            service("cache", &[]),
            service("api", &["db", "cache"]),
            service("web", &["api"]),
        ])
        .unwrap();
        let levels = graph.topological_levels().unwrap();
        assert_eq!(
            levels,
            vec![vec!["cache", "db"], vec!["api"], vec!["web"]]
        );
    }

    #[test]
    fn levels_are_deterministic() {
        let services = [
            service("zeta", &[]),
            service("alpha", &[]),
            service("mid", &["zeta", "alpha"]),
        ];
        let first = DependencyGraph::build(&services)
            .unwrap()
            .topological_levels()
            .unwrap();
        for _ in 0..10 {
            let again = DependencyGraph::build(&services)
                .unwrap()
                .topological_levels()
                .unwrap();
            assert_eq!(first, again);
        }
        assert_eq!(first[0], vec!["alpha", "zeta"]);
    }

    #[test]
    fn cycle_is_detected_and_named() {
        let graph = DependencyGraph::build(&[
            service("solo", &[]),
            service("a", &["b"]),
            service("b", &["a"]),
        ])
        .unwrap();
        match graph.topological_levels() {
            Err(Error::Cycle(members)) => assert_eq!(members, vec!["a", "b"]),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unknown_dependency_fails_the_build() {
        let err = DependencyGraph::build(&[service("a", &["ghost"])]).unwrap_err();
        assert!(matches!(err, Error::UnknownDep { .. }));
    }

    #[test]
    fn reverse_levels_invert_the_order() {
        let graph =
            DependencyGraph::build(&[service("db", &[]), service("api", &["db"])]).unwrap();
        let reversed = graph.reverse_levels().unwrap();
        assert_eq!(reversed, vec![vec!["api"], vec!["db"]]);
    }
}
