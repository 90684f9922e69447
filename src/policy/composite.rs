//! Composite dataset analysis
//!
//! Composite dataset types assemble their value from other dataset types
//! named in their component slots. This module extracts those references,
//! builds the reference graph, detects undefined targets and circular
//! chains, and computes a deterministic assembly order (referenced
//! composites before the composites that use them).
//!
//! Analysis never fails: a policy with cycles or dangling references
//! still produces a full report, and the verifier decides what to make
//! of it.

use crate::policy::document::Policy;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// One component slot reference: composite `deepCoadd_calexp` slot
/// `calexp` uses dataset type `deepCoadd`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentReference {
    pub composite: String,
    pub component: String,
    pub dataset_type: String,
    pub input_only: bool,
    pub subset: bool,
}

/// Full analysis of the composite structure of one policy.
#[derive(Debug, Clone, Serialize)]
pub struct CompositeAnalysis {
    /// Every component reference, in composite/slot order.
    pub references: Vec<ComponentReference>,
    /// Composite name to the dataset types its slots use.
    pub reference_graph: BTreeMap<String, Vec<String>>,
    /// Dataset type to the composites whose slots use it.
    pub reverse_references: BTreeMap<String, Vec<String>>,
    /// References whose target is defined in no section.
    pub undefined_references: Vec<ComponentReference>,
    /// Circular chains among composites, each ending where it starts.
    pub circular_references: Vec<Vec<String>>,
    /// Composites ordered so references come before their users.
    /// Members of circular chains are absent.
    pub assembly_order: Vec<String>,
}

impl CompositeAnalysis {
    pub fn has_cycles(&self) -> bool {
        !self.circular_references.is_empty()
    }

    pub fn composite_count(&self) -> usize {
        self.reference_graph.len()
    }
}

/// Walks a policy's composite entries and reports on their references.
pub struct CompositeAnalyzer;

impl CompositeAnalyzer {
    pub fn new() -> Self {
        CompositeAnalyzer
    }

    pub fn analyze(&self, policy: &Policy) -> CompositeAnalysis {
        let mut references = Vec::new();
        let mut reference_graph: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut reverse_references: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for (_, entries) in policy.sections() {
            for (name, mapping) in entries {
                let components = match &mapping.composite {
                    Some(components) => components,
                    None => continue,
                };

                let targets = reference_graph.entry(name.clone()).or_default();
                for (slot, component) in components {
                    references.push(ComponentReference {
                        composite: name.clone(),
                        component: slot.clone(),
                        dataset_type: component.dataset_type.clone(),
                        input_only: component.input_only.unwrap_or(false),
                        subset: component.subset.unwrap_or(false),
                    });
                    targets.push(component.dataset_type.clone());
                    reverse_references
                        .entry(component.dataset_type.clone())
                        .or_default()
                        .push(name.clone());
                }
            }
        }

        let undefined_references = references
            .iter()
            .filter(|reference| policy.find(&reference.dataset_type).is_none())
            .cloned()
            .collect();

        let circular_references = Self::find_circular_references(&reference_graph);
        let assembly_order = Self::assembly_order(&reference_graph);

        CompositeAnalysis {
            references,
            reference_graph,
            reverse_references,
            undefined_references,
            circular_references,
            assembly_order,
        }
    }

    fn find_circular_references(graph: &BTreeMap<String, Vec<String>>) -> Vec<Vec<String>> {
        let mut cycles = Vec::new();
        let mut visited = BTreeSet::new();
        let mut on_path = BTreeSet::new();

        for node in graph.keys() {
            if !visited.contains(node.as_str()) {
                let mut path = Vec::new();
                Self::dfs_find_cycle(node, graph, &mut visited, &mut on_path, &mut path, &mut cycles);
            }
        }

        cycles
    }

    fn dfs_find_cycle(
        node: &str,
        graph: &BTreeMap<String, Vec<String>>,
        visited: &mut BTreeSet<String>,
        on_path: &mut BTreeSet<String>,
        path: &mut Vec<String>,
        cycles: &mut Vec<Vec<String>>,
    ) {
        visited.insert(node.to_string());
        on_path.insert(node.to_string());
        path.push(node.to_string());

        if let Some(targets) = graph.get(node) {
            for target in targets {
                if !visited.contains(target.as_str()) {
                    Self::dfs_find_cycle(target, graph, visited, on_path, path, cycles);
                } else if on_path.contains(target.as_str()) {
                    if let Some(pos) = path.iter().position(|name| name == target) {
                        let mut cycle = path[pos..].to_vec();
                        cycle.push(target.clone());
                        cycles.push(cycle);
                    }
                }
            }
        }

        path.pop();
        on_path.remove(node);
    }

    /// Kahn's algorithm over the composite-to-composite subgraph.
    /// References to plain dataset types never constrain the order.
    fn assembly_order(graph: &BTreeMap<String, Vec<String>>) -> Vec<String> {
        let mut in_degree: BTreeMap<String, usize> =
            graph.keys().map(|name| (name.clone(), 0)).collect();
        let mut dependents: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for (composite, targets) in graph {
            for target in targets {
                if graph.contains_key(target) {
                    *in_degree.get_mut(composite).unwrap() += 1;
                    dependents
                        .entry(target.clone())
                        .or_default()
                        .push(composite.clone());
                }
            }
        }

        let mut queue: Vec<String> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(name, _)| name.clone())
            .collect();
        // Descending sort so pop() yields names in ascending order.
        queue.sort_by(|a, b| b.cmp(a));

        let mut order = Vec::new();
        while let Some(name) = queue.pop() {
            order.push(name.clone());
            if let Some(users) = dependents.get(&name) {
                for user in users {
                    let degree = in_degree.get_mut(user).unwrap();
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push(user.clone());
                        queue.sort_by(|a, b| b.cmp(a));
                    }
                }
            }
        }

        order
    }

    /// Format an analysis as a readable report.
    pub fn format_analysis(&self, analysis: &CompositeAnalysis) -> String {
        let mut output = String::new();

        output.push_str("═══════════════════════════════════════════════════════════════\n");
        output.push_str("                 COMPOSITE DATASET ANALYSIS\n");
        output.push_str("═══════════════════════════════════════════════════════════════\n\n");

        output.push_str("COMPONENT REFERENCES:\n");
        output.push_str("───────────────────────────────────────────────────────────────\n");
        if analysis.references.is_empty() {
            output.push_str("  (none)\n");
        }
        for reference in &analysis.references {
            let mut line = format!(
                "  {}.{} uses {}",
                reference.composite, reference.component, reference.dataset_type
            );
            if reference.input_only {
                line.push_str(" (input only)");
            }
            if reference.subset {
                line.push_str(" (subset)");
            }
            line.push('\n');
            output.push_str(&line);
        }

        if !analysis.assembly_order.is_empty() {
            output.push_str("\nASSEMBLY ORDER:\n");
            output.push_str("───────────────────────────────────────────────────────────────\n");
            for (i, name) in analysis.assembly_order.iter().enumerate() {
                output.push_str(&format!("  {}. {}\n", i + 1, name));
            }
        }

        if !analysis.undefined_references.is_empty() {
            output.push_str("\nUNDEFINED REFERENCES:\n");
            output.push_str("───────────────────────────────────────────────────────────────\n");
            for reference in &analysis.undefined_references {
                output.push_str(&format!(
                    "  {}.{} refers to undefined dataset type '{}'\n",
                    reference.composite, reference.component, reference.dataset_type
                ));
            }
        }

        if !analysis.circular_references.is_empty() {
            output.push_str("\nCIRCULAR REFERENCES DETECTED:\n");
            output.push_str("───────────────────────────────────────────────────────────────\n");
            for cycle in &analysis.circular_references {
                output.push_str(&format!("  {}\n", cycle.join(" -> ")));
            }
        }

        output.push_str("\n═══════════════════════════════════════════════════════════════\n");

        output
    }
}

impl Default for CompositeAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}
