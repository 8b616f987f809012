//! Dependency resolution for stack sets
//!
//! Every stack becomes a vertex below a synthetic root. An edge `A -> B`
//! means A has to be provisioned before B. Stacks without real dependencies
//! hang off the root; the graph is then checked for cycles, reduced and
//! flattened into an execution order.

use std::collections::HashSet;

use thiserror::Error;
use tracing::debug;

use super::graph::Graph;
use super::stack::Dependent;

/// Name of the synthetic root vertex; NUL never appears in a YAML key
pub const ROOT_VERTEX: &str = "\u{0}ROOT";

/// Errors from resolving dependencies
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Cyclic dependency between stacks: {}", labels.join(", "))]
    CyclicDependency { labels: Vec<String> },
}

/// Dependency graph plus the order derived from it
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    graph: Graph,
    order: Vec<String>,
}

impl ExecutionPlan {
    /// Labels in creation/update order
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Labels in deletion order
    pub fn reverse_order(&self) -> Vec<String> {
        self.order.iter().rev().cloned().collect()
    }

    /// Direct dependencies left after reduction
    pub fn dependencies_of(&self, label: &str) -> Vec<String> {
        self.graph
            .edges()
            .filter(|(_, e)| self.graph.name(e.child) == label)
            .map(|(_, e)| self.graph.name(e.parent))
            .filter(|name| *name != ROOT_VERTEX)
            .map(String::from)
            .collect()
    }

    /// Edges of the reduced graph with the root rendered as `ROOT`
    pub fn edges(&self) -> Vec<(String, String)> {
        self.graph
            .edge_names()
            .into_iter()
            .map(|(p, c)| {
                let p = if p == ROOT_VERTEX { "ROOT" } else { p };
                (p.to_string(), c.to_string())
            })
            .collect()
    }
}

/// Builds the dependency graph for `items` and orders it
///
/// A dependency on the item itself, or on a label that is not part of
/// `items`, attaches the item to the root instead.
pub fn resolve<T: Dependent>(items: &[T]) -> Result<ExecutionPlan, ResolveError> {
    let known: HashSet<&str> = items.iter().map(|i| i.label()).collect();

    let mut graph = Graph::new();
    graph.add_root(ROOT_VERTEX);

    for item in items {
        let label = item.label();
        graph.add_vertex(label);

        if item.depends_on().is_empty() {
            graph.add_edge_between(ROOT_VERTEX, label);
            continue;
        }

        for dep in item.depends_on() {
            if dep == label {
                debug!("{} depends on itself, attaching to root", label);
                graph.add_edge_between(ROOT_VERTEX, label);
            } else if !known.contains(dep.as_str()) {
                debug!("{} depends on {} outside the selection, attaching to root", label, dep);
                graph.add_edge_between(ROOT_VERTEX, label);
            } else {
                graph.add_edge_between(dep, label);
            }
        }
    }

    if graph.has_cycles() {
        let labels: Vec<String> = graph.cycle_members().into_iter().flatten().collect();
        return Err(ResolveError::CyclicDependency { labels });
    }

    graph.transitive_reduction();
    debug!("reduced dependency graph:\n{graph}");

    let order: Vec<String> = graph
        .root()
        .map(|root| graph.topological_order(root))
        .unwrap_or_default()
        .into_iter()
        .map(|id| graph.name(id))
        .filter(|name| *name != ROOT_VERTEX)
        .map(String::from)
        .collect();
    debug!("execution order: {:?}", order);

    Ok(ExecutionPlan { graph, order })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StackDefinition;
    use proptest::prelude::*;

    fn stack(label: &str, deps: &[&str]) -> StackDefinition {
        StackDefinition::new(label).with_depends_on(deps.iter().copied())
    }

    fn position(order: &[String], label: &str) -> usize {
        order.iter().position(|l| l == label).unwrap()
    }

    #[test]
    fn simple_chain() {
        let plan = resolve(&[
            stack("nagios-elb", &[]),
            stack("nagios-server", &["nagios-elb"]),
        ])
        .unwrap();

        assert_eq!(plan.order(), ["nagios-elb", "nagios-server"]);
    }

    #[test]
    fn chain_declared_backwards() {
        let plan = resolve(&[
            stack("nagios-server", &["nagios-elb"]),
            stack("nagios-elb", &[]),
        ])
        .unwrap();

        assert_eq!(plan.order(), ["nagios-elb", "nagios-server"]);
    }

    #[test]
    fn independent_chains() {
        let plan = resolve(&[
            stack("nagios-internal-dns", &[]),
            stack("nagios-r53", &["nagios-internal-dns"]),
            stack("nagios-elb", &[]),
            stack("nagios-server", &["nagios-elb"]),
        ])
        .unwrap();
        let order = plan.order();

        assert_eq!(order.len(), 4);
        assert!(position(order, "nagios-internal-dns") < position(order, "nagios-r53"));
        assert!(position(order, "nagios-elb") < position(order, "nagios-server"));
    }

    #[test]
    fn uneven_branches_still_respect_dependencies() {
        // root->x->z, root->y->w->z: a plain traversal would emit z before w
        let plan = resolve(&[
            stack("x", &[]),
            stack("y", &[]),
            stack("z", &["x", "w"]),
            stack("w", &["y"]),
        ])
        .unwrap();

        assert_eq!(plan.order(), ["x", "y", "w", "z"]);
    }

    #[test]
    fn self_dependency_is_neutral() {
        let plan = resolve(&[stack("a", &["a"])]).unwrap();

        assert_eq!(plan.order(), ["a"]);
        assert_eq!(plan.edges(), vec![("ROOT".to_string(), "a".to_string())]);
    }

    #[test]
    fn unselected_dependency_anchors_to_root() {
        let plan = resolve(&[stack("server", &["elb"])]).unwrap();

        assert_eq!(plan.order(), ["server"]);
        assert!(plan.dependencies_of("server").is_empty());
    }

    #[test]
    fn redundant_dependency_is_reduced() {
        let plan = resolve(&[
            stack("a", &[]),
            stack("b", &["a"]),
            stack("c", &["a", "b"]),
        ])
        .unwrap();

        assert_eq!(plan.dependencies_of("c"), vec!["b"]);
        assert_eq!(plan.reverse_order(), vec!["c", "b", "a"]);
    }

    #[test]
    fn cycle_is_rejected() {
        let err = resolve(&[
            stack("a", &["c"]),
            stack("b", &["a"]),
            stack("c", &["b"]),
            stack("d", &[]),
        ])
        .unwrap_err();

        assert_eq!(
            err,
            ResolveError::CyclicDependency {
                labels: vec!["a".into(), "b".into(), "c".into()]
            }
        );
        assert!(err.to_string().contains("a, b, c"));
    }

    #[test]
    fn empty_input() {
        let plan = resolve::<StackDefinition>(&[]).unwrap();
        assert!(plan.order().is_empty());
    }

    /// Acyclic stack sets: stack i may only depend on stacks with a lower index
    fn stack_sets() -> impl Strategy<Value = Vec<StackDefinition>> {
        prop::collection::vec(prop::collection::vec(0usize..10, 0..4), 1..10).prop_map(|deps| {
            deps.into_iter()
                .enumerate()
                .map(|(i, ds)| {
                    let ds: Vec<String> = ds
                        .into_iter()
                        .filter(|d| *d <= i)
                        .map(|d| format!("s{d}"))
                        .collect();
                    StackDefinition::new(format!("s{i}")).with_depends_on(ds)
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn order_respects_dependencies(stacks in stack_sets()) {
            let plan = resolve(&stacks).unwrap();
            let order = plan.order();
            prop_assert_eq!(order.len(), stacks.len());
            for s in &stacks {
                for d in s.depends_on.iter().filter(|d| **d != s.label) {
                    prop_assert!(position(order, d) < position(order, &s.label));
                }
            }
        }

        #[test]
        fn deletion_is_reverse_of_creation(stacks in stack_sets()) {
            let plan = resolve(&stacks).unwrap();
            let mut reversed = plan.reverse_order();
            reversed.reverse();
            prop_assert_eq!(reversed, plan.order().to_vec());
        }

        #[test]
        fn self_dependency_matches_no_dependency(n in 1usize..6) {
            let with_self: Vec<_> = (0..n)
                .map(|i| {
                    let label = format!("s{i}");
                    stack(&label, &[label.as_str()])
                })
                .collect();
            let without: Vec<_> = (0..n).map(|i| stack(&format!("s{i}"), &[])).collect();

            let a = resolve(&with_self).unwrap();
            let b = resolve(&without).unwrap();
            prop_assert_eq!(a.order(), b.order());
            prop_assert_eq!(a.edges(), b.edges());
        }
    }
}
