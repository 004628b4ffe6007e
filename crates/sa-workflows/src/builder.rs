//! Workflow Graph Builder
//!
//! Turns tool bindings into a validated WorkflowGraph:
//! - Uses the first-ranked tool of each binding
//! - Omits unresolved operations, and dependents that reference them
//! - Fills inputs without an explicit source from upstream outputs or
//!   compatible datasets
//! - Orders nodes topologically and validates every edge

use sa_core::{
    dependency_order, DataContext, DataKind, Error, OperationId, Result, UnresolvedOperation,
};
use sa_tools::{InputSource, ToolBinding};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::graph::{DatasetRef, WorkflowGraph};
use crate::node::{GraphNode, InputBinding, NodeInput, NodeOutput};

/// Graph plus the operations left out of it
#[derive(Debug, Clone)]
pub struct GraphBuild {
    pub graph: WorkflowGraph,
    pub omitted: Vec<UnresolvedOperation>,
}

/// Builds workflow graphs against one data context
pub struct GraphBuilder<'a> {
    data: &'a DataContext,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(data: &'a DataContext) -> Self {
        Self { data }
    }

    /// Build and validate the graph for `bindings`
    pub fn build(&self, task_name: &str, bindings: &[ToolBinding]) -> Result<GraphBuild> {
        let order = topological_order(bindings)?;

        let mut nodes: Vec<GraphNode> = Vec::new();
        let mut node_of: HashMap<OperationId, usize> = HashMap::new();
        let mut omitted: Vec<UnresolvedOperation> = Vec::new();
        let mut omitted_ids: HashSet<OperationId> = HashSet::new();

        for idx in order {
            let binding = &bindings[idx];
            let op = &binding.operation;

            let Some(bound) = binding.primary() else {
                debug!(operation = op.id, "Omitting unresolved operation");
                omitted_ids.insert(op.id);
                omitted.push(UnresolvedOperation {
                    operation_id: op.id,
                    label: op.label.clone(),
                    reason: binding.reason().to_string(),
                });
                continue;
            };

            let explicit_upstream = bound.inputs.values().filter_map(|s| match s {
                InputSource::Upstream { operation, .. } => Some(*operation),
                InputSource::Dataset { .. } => None,
            });
            let blocked = op
                .depends_on
                .iter()
                .copied()
                .chain(explicit_upstream)
                .find(|dep| omitted_ids.contains(dep));
            if let Some(dep) = blocked {
                warn!(operation = op.id, dependency = dep, "Omitting dependent of omitted operation");
                omitted_ids.insert(op.id);
                omitted.push(UnresolvedOperation {
                    operation_id: op.id,
                    label: op.label.clone(),
                    reason: format!("depends on omitted operation {}", dep),
                });
                continue;
            }

            let id = GraphNode::make_id(op.id, &bound.tool.slug());
            let mut used_upstream: HashSet<OperationId> = HashSet::new();
            let mut used_datasets: HashSet<String> = HashSet::new();
            let mut inputs = Vec::with_capacity(bound.tool.inputs.len());

            for port in &bound.tool.inputs {
                let source = match bound.inputs.get(&port.name) {
                    Some(InputSource::Dataset { name }) => NodeInput::Dataset {
                        name: name.clone(),
                    },
                    Some(InputSource::Upstream { operation, output }) => {
                        let upstream = node_of.get(operation).map(|i| &nodes[*i]).ok_or_else(|| {
                            Error::InvalidGraph(format!(
                                "operation {} reads operation {} which is not part of the graph before it",
                                op.id, operation
                            ))
                        })?;
                        NodeInput::Node {
                            node: upstream.id.clone(),
                            output: output.clone(),
                        }
                    }
                    None => self
                        .default_source(
                            port.kind,
                            &op.depends_on,
                            &nodes,
                            &node_of,
                            &used_upstream,
                            &used_datasets,
                        )
                        .ok_or_else(|| {
                            Error::InvalidGraph(format!(
                                "input {} of operation {} has no source",
                                port.name, op.id
                            ))
                        })?,
                };

                match &source {
                    NodeInput::Dataset { name } => {
                        used_datasets.insert(name.clone());
                    }
                    NodeInput::Node { node, .. } => {
                        let owner = node_of.iter().find(|(_, i)| nodes[**i].id == *node);
                        if let Some((op_id, _)) = owner {
                            used_upstream.insert(*op_id);
                        }
                    }
                }
                inputs.push((
                    port.name.clone(),
                    InputBinding {
                        source,
                        expected: port.kind,
                    },
                ));
            }

            let outputs = bound
                .tool
                .outputs
                .iter()
                .map(|port| NodeOutput {
                    port: port.name.clone(),
                    kind: port.kind,
                    variable: GraphNode::output_variable(&id, &port.name),
                })
                .collect();

            node_of.insert(op.id, nodes.len());
            nodes.push(GraphNode {
                id,
                operation_id: op.id,
                label: op.label.clone(),
                category: op.category,
                tool: bound.tool.name.clone(),
                parameters: bound.parameters.clone(),
                inputs,
                outputs,
            });
        }

        let datasets = self
            .data
            .datasets
            .iter()
            .map(|d| DatasetRef {
                name: d.name.clone(),
                kind: d.kind,
            })
            .collect();

        let graph = WorkflowGraph::new(task_name, nodes, datasets);
        graph.validate()?;
        debug!(nodes = graph.len(), edges = graph.edges.len(), omitted = omitted.len(), "Built workflow graph");
        Ok(GraphBuild { graph, omitted })
    }

    /// Next unused dependency's first output, else the first compatible dataset
    fn default_source(
        &self,
        expected: DataKind,
        depends_on: &[OperationId],
        nodes: &[GraphNode],
        node_of: &HashMap<OperationId, usize>,
        used_upstream: &HashSet<OperationId>,
        used_datasets: &HashSet<String>,
    ) -> Option<NodeInput> {
        let upstream = depends_on
            .iter()
            .filter(|dep| !used_upstream.contains(dep))
            .filter_map(|dep| node_of.get(dep).map(|i| &nodes[*i]))
            .find_map(|node| {
                node.outputs.first().map(|o| NodeInput::Node {
                    node: node.id.clone(),
                    output: o.port.clone(),
                })
            });
        if upstream.is_some() {
            return upstream;
        }

        let compatible = |d: &&sa_core::DatasetSummary| expected.accepts(d.kind);
        self.data
            .datasets
            .iter()
            .filter(compatible)
            .find(|d| !used_datasets.contains(&d.name))
            .or_else(|| self.data.datasets.iter().find(compatible))
            .map(|d| NodeInput::Dataset {
                name: d.name.clone(),
            })
    }
}

/// Binding positions in dependency order, ties broken by position
fn topological_order(bindings: &[ToolBinding]) -> Result<Vec<usize>> {
    dependency_order(
        bindings
            .iter()
            .map(|b| (b.operation.id, b.operation.depends_on.as_slice())),
    )
    .map_err(|e| Error::InvalidGraph(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_core::{DatasetSummary, Operation, OperationCategory};
    use sa_tools::{BoundTool, ParameterSpec, ToolSpec};

    fn buffer() -> ToolSpec {
        ToolSpec::new("native:buffer", "Buffer", OperationCategory::Transform)
            .with_input("INPUT", DataKind::Vector)
            .with_parameter(ParameterSpec::required("DISTANCE", "number"))
            .with_output("OUTPUT", DataKind::Vector)
    }

    fn field_calc() -> ToolSpec {
        ToolSpec::new("native:fieldcalculator", "Field calculator", OperationCategory::Compute)
            .with_input("INPUT", DataKind::Table)
            .with_output("OUTPUT", DataKind::Vector)
    }

    fn slope() -> ToolSpec {
        ToolSpec::new("gdal:slope", "Slope", OperationCategory::Compute)
            .with_input("INPUT", DataKind::Raster)
            .with_output("OUTPUT", DataKind::Raster)
    }

    fn data() -> DataContext {
        DataContext::new(vec![
            DatasetSummary::new("dem", DataKind::Raster),
            DatasetSummary::new("points", DataKind::Vector),
        ])
    }

    fn op(id: OperationId, label: &str, deps: &[OperationId]) -> Operation {
        Operation::new(id, label, OperationCategory::Compute).depends_on(deps)
    }

    #[test]
    fn test_single_node_defaults_to_compatible_dataset() {
        let data = data();
        let bindings = vec![ToolBinding::resolved(
            op(1, "buffer points", &[]),
            vec![BoundTool::new(buffer()).with_parameter("DISTANCE", serde_json::json!(100))],
        )];
        let build = GraphBuilder::new(&data).build("buffer_points", &bindings).unwrap();
        assert_eq!(build.graph.node_ids(), vec!["n1_native_buffer"]);
        let node = &build.graph.nodes[0];
        assert_eq!(
            node.input("INPUT").unwrap().source,
            NodeInput::Dataset { name: "points".into() }
        );
        assert_eq!(node.parameters["DISTANCE"], serde_json::json!(100));
        assert!(build.omitted.is_empty());
    }

    #[test]
    fn test_dependency_defaults_to_upstream_output() {
        let data = data();
        let bindings = vec![
            ToolBinding::resolved(op(1, "buffer", &[]), vec![BoundTool::new(buffer())]),
            ToolBinding::resolved(op(2, "compute area", &[1]), vec![BoundTool::new(field_calc())]),
        ];
        let build = GraphBuilder::new(&data).build("t", &bindings).unwrap();
        let second = &build.graph.nodes[1];
        assert_eq!(second.upstream_ids(), vec!["n1_native_buffer"]);
        assert_eq!(build.graph.terminal_outputs()[0].node_id, "n2_native_fieldcalculator");
    }

    #[test]
    fn test_unresolved_cascade() {
        let data = data();
        let bindings = vec![
            ToolBinding::resolved(op(1, "buffer", &[]), vec![BoundTool::new(buffer())]),
            ToolBinding::unresolved(op(2, "interpolate", &[1]), "no candidate tools"),
            ToolBinding::resolved(op(3, "calc", &[2]), vec![BoundTool::new(field_calc())]),
            ToolBinding::resolved(op(4, "calc other", &[1]), vec![BoundTool::new(field_calc())]),
        ];
        let build = GraphBuilder::new(&data).build("t", &bindings).unwrap();
        assert_eq!(build.graph.node_ids(), vec!["n1_native_buffer", "n4_native_fieldcalculator"]);
        assert_eq!(build.omitted.len(), 2);
        assert_eq!(build.omitted[0].reason, "no candidate tools");
        assert_eq!(build.omitted[1].operation_id, 3);
        assert!(build.omitted[1].reason.contains("omitted operation 2"));
    }

    #[test]
    fn test_kind_mismatch_is_validation_error() {
        let data = data();
        let bindings = vec![
            ToolBinding::resolved(op(1, "buffer", &[]), vec![BoundTool::new(buffer())]),
            ToolBinding::resolved(op(2, "slope", &[1]), vec![BoundTool::new(slope())]),
        ];
        let err = GraphBuilder::new(&data).build("t", &bindings).unwrap_err();
        match err {
            Error::GraphValidation(v) => {
                assert_eq!(v.from, "n1_native_buffer");
                assert_eq!(v.to, "n2_gdal_slope");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_explicit_source_respected() {
        let data = DataContext::new(vec![
            DatasetSummary::new("roads", DataKind::Vector),
            DatasetSummary::new("points", DataKind::Vector),
        ]);
        let bindings = vec![ToolBinding::resolved(
            op(1, "buffer", &[]),
            vec![BoundTool::new(buffer()).with_input("INPUT", InputSource::dataset("points"))],
        )];
        let build = GraphBuilder::new(&data).build("t", &bindings).unwrap();
        assert_eq!(
            build.graph.nodes[0].input("INPUT").unwrap().source,
            NodeInput::Dataset { name: "points".into() }
        );
    }

    #[test]
    fn test_bindings_reordered_by_dependency() {
        let data = data();
        let bindings = vec![
            ToolBinding::resolved(op(2, "area", &[1]), vec![BoundTool::new(field_calc())]),
            ToolBinding::resolved(op(1, "buffer", &[]), vec![BoundTool::new(buffer())]),
        ];
        let graph = GraphBuilder::new(&data).build("t", &bindings).unwrap().graph;
        let ids: Vec<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["n1_native_buffer", "n2_native_fieldcalculator"]);

        let cyclic = vec![
            ToolBinding::resolved(op(1, "a", &[2]), vec![BoundTool::new(buffer())]),
            ToolBinding::resolved(op(2, "b", &[1]), vec![BoundTool::new(field_calc())]),
        ];
        let err = GraphBuilder::new(&data).build("t", &cyclic).unwrap_err();
        assert!(matches!(err, Error::InvalidGraph(ref m) if m.contains("cycle")));
    }

    #[test]
    fn test_all_unresolved_gives_empty_graph() {
        let data = data();
        let bindings = vec![ToolBinding::unresolved(op(1, "x", &[]), "none")];
        let build = GraphBuilder::new(&data).build("t", &bindings).unwrap();
        assert!(build.graph.is_empty());
        assert_eq!(build.omitted.len(), 1);
    }

    #[test]
    fn test_every_input_defined_earlier() {
        let data = data();
        let bindings = vec![
            ToolBinding::resolved(op(1, "a", &[]), vec![BoundTool::new(buffer())]),
            ToolBinding::resolved(op(2, "b", &[1]), vec![BoundTool::new(field_calc())]),
            ToolBinding::resolved(op(3, "c", &[1, 2]), vec![BoundTool::new(field_calc())]),
        ];
        let graph = GraphBuilder::new(&data).build("t", &bindings).unwrap().graph;
        let mut defined: HashSet<String> = data
            .datasets
            .iter()
            .map(|d| format!("dataset:{}", d.name))
            .collect();
        for node in &graph.nodes {
            for (_, binding) in &node.inputs {
                assert!(defined.contains(&binding.source.source_id()));
            }
            defined.insert(node.id.clone());
        }
    }
}
