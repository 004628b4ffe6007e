//! Code Synthesizer
//!
//! Renders a WorkflowGraph as a Python script against the host runtime
//! module:
//! - scaffold: runtime import, output directory from `SA_OUTPUT_DIR`,
//!   one loading handle per dataset
//! - one block per node in graph order, opened by a `# @node <id>` marker
//! - `save_output` for every terminal output
//!
//! Rendering is pure. Nothing is added that the graph does not contain.

use sa_core::task::slugify;
use sa_workflows::{NodeInput, WorkflowGraph};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Write as _;

use crate::data::DatasetHandle;

/// Environment variable holding the attempt's output directory
pub const OUTPUT_DIR_ENV: &str = "SA_OUTPUT_DIR";

/// Marker opening each node block
pub const NODE_MARKER: &str = "# @node ";

/// Python literal for a JSON value
pub fn python_literal(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => python_string(s),
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(python_literal).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Object(map) => {
            let entries: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", python_string(k), python_literal(v)))
                .collect();
            format!("{{{}}}", entries.join(", "))
        }
    }
}

/// JSON string escapes are valid Python string escapes
fn python_string(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

pub struct CodeSynthesizer {
    runtime_module: String,
    handles: BTreeMap<String, DatasetHandle>,
}

impl CodeSynthesizer {
    pub fn new(runtime_module: impl Into<String>) -> Self {
        Self {
            runtime_module: runtime_module.into(),
            handles: BTreeMap::new(),
        }
    }

    /// Dataset locations; datasets without a handle load by logical name
    pub fn with_handles(mut self, handles: impl IntoIterator<Item = DatasetHandle>) -> Self {
        self.handles = handles.into_iter().map(|h| (h.name.clone(), h)).collect();
        self
    }

    /// Script variable of each dataset, unique and identifier-safe
    fn dataset_variables(graph: &WorkflowGraph) -> HashMap<String, String> {
        let mut used: HashSet<String> = HashSet::new();
        let mut vars = HashMap::new();
        for dataset in &graph.datasets {
            let base = format!("ds_{}", slugify(&dataset.name, 40));
            let mut var = base.clone();
            let mut n = 2;
            while !used.insert(var.clone()) {
                var = format!("{}_{}", base, n);
                n += 1;
            }
            vars.insert(dataset.name.clone(), var);
        }
        vars
    }

    /// Output variables every successful run must save
    pub fn expected_outputs(graph: &WorkflowGraph) -> Vec<String> {
        graph
            .terminal_outputs()
            .into_iter()
            .map(|t| t.output.variable)
            .collect()
    }

    pub fn synthesize(&self, graph: &WorkflowGraph) -> String {
        let mut out = String::new();
        let dataset_vars = Self::dataset_variables(graph);

        let _ = writeln!(out, "# Workflow: {}", graph.task_name);
        let _ = writeln!(out, "import os");
        let _ = writeln!(out, "import {} as runtime", self.runtime_module);
        out.push('\n');
        let _ = writeln!(out, "OUTPUT_DIR = os.environ[\"{}\"]", OUTPUT_DIR_ENV);
        out.push('\n');

        // Only datasets some node reads are loaded
        let read: HashSet<&str> = graph
            .nodes
            .iter()
            .flat_map(|n| n.inputs.iter())
            .filter_map(|(_, b)| match &b.source {
                NodeInput::Dataset { name } => Some(name.as_str()),
                NodeInput::Node { .. } => None,
            })
            .collect();

        for dataset in graph.datasets.iter().filter(|d| read.contains(d.name.as_str())) {
            let var = &dataset_vars[&dataset.name];
            match self.handles.get(&dataset.name) {
                Some(handle) => {
                    let _ = writeln!(
                        out,
                        "{} = runtime.load_dataset({}, {})",
                        var,
                        python_string(&dataset.name),
                        python_string(&handle.location)
                    );
                }
                None => {
                    let _ = writeln!(
                        out,
                        "{} = runtime.load_dataset({})",
                        var,
                        python_string(&dataset.name)
                    );
                }
            }
        }

        for node in &graph.nodes {
            out.push('\n');
            let _ = writeln!(out, "{}{}", NODE_MARKER, node.id);
            let _ = writeln!(out, "# {}", node.label.replace('\n', " "));

            let inputs: Vec<String> = node
                .inputs
                .iter()
                .map(|(port, binding)| {
                    let value = match &binding.source {
                        NodeInput::Dataset { name } => {
                            dataset_vars.get(name).cloned().unwrap_or_else(|| {
                                format!("runtime.load_dataset({})", python_string(name))
                            })
                        }
                        NodeInput::Node { node: upstream, output } => graph
                            .node(upstream)
                            .and_then(|n| n.output(output))
                            .map(|o| o.variable.clone())
                            .unwrap_or_else(|| format!("{}[{}]", upstream, python_string(output))),
                    };
                    format!("{}: {}", python_string(port), value)
                })
                .collect();
            let parameters: Vec<String> = node
                .parameters
                .iter()
                .map(|(k, v)| format!("{}: {}", python_string(k), python_literal(v)))
                .collect();

            let _ = writeln!(out, "{} = runtime.run_tool(", node.id);
            let _ = writeln!(out, "    {},", python_string(&node.tool));
            let _ = writeln!(out, "    inputs={{{}}},", inputs.join(", "));
            let _ = writeln!(out, "    parameters={{{}}},", parameters.join(", "));
            let _ = writeln!(out, ")");
            for output in &node.outputs {
                let _ = writeln!(
                    out,
                    "{} = {}[{}]",
                    output.variable,
                    node.id,
                    python_string(&output.port)
                );
            }
        }

        let terminal = graph.terminal_outputs();
        if !terminal.is_empty() {
            out.push('\n');
            let _ = writeln!(out, "# Outputs");
            for t in terminal {
                let _ = writeln!(
                    out,
                    "runtime.save_output({}, OUTPUT_DIR, {})",
                    t.output.variable,
                    python_string(&t.output.variable)
                );
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_core::{DataKind, OperationCategory};
    use sa_workflows::{DatasetRef, GraphNode, InputBinding, NodeOutput};
    use serde_json::json;

    fn node(id: &str, op: u32, tool: &str, source: NodeInput, params: Vec<(&str, Value)>) -> GraphNode {
        GraphNode {
            id: id.to_string(),
            operation_id: op,
            label: format!("step {}", op),
            category: OperationCategory::Transform,
            tool: tool.to_string(),
            parameters: params.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            inputs: vec![(
                "INPUT".to_string(),
                InputBinding {
                    source,
                    expected: DataKind::Vector,
                },
            )],
            outputs: vec![NodeOutput {
                port: "OUTPUT".to_string(),
                kind: DataKind::Vector,
                variable: GraphNode::output_variable(id, "OUTPUT"),
            }],
        }
    }

    fn graph() -> WorkflowGraph {
        WorkflowGraph::new(
            "buffer_centroids",
            vec![
                node(
                    "n1_native_buffer",
                    1,
                    "native:buffer",
                    NodeInput::Dataset { name: "points".into() },
                    vec![("DISTANCE", json!(100)), ("DISSOLVE", json!(false))],
                ),
                node(
                    "n2_native_centroids",
                    2,
                    "native:centroids",
                    NodeInput::Node {
                        node: "n1_native_buffer".into(),
                        output: "OUTPUT".into(),
                    },
                    vec![],
                ),
            ],
            vec![
                DatasetRef { name: "points".into(), kind: DataKind::Vector },
                DatasetRef { name: "dem".into(), kind: DataKind::Raster },
            ],
        )
    }

    #[test]
    fn test_python_literals() {
        assert_eq!(python_literal(&json!(null)), "None");
        assert_eq!(python_literal(&json!(true)), "True");
        assert_eq!(python_literal(&json!(2.5)), "2.5");
        assert_eq!(python_literal(&json!("a\"b")), "\"a\\\"b\"");
        assert_eq!(python_literal(&json!([1, "x"])), "[1, \"x\"]");
        assert_eq!(python_literal(&json!({"k": false})), "{\"k\": False}");
    }

    #[test]
    fn test_script_layout() {
        let handle = DatasetHandle {
            name: "points".into(),
            location: "/data/points.shp".into(),
            format: None,
        };
        let script = CodeSynthesizer::new("spatial_runtime")
            .with_handles(vec![handle])
            .synthesize(&graph());

        assert!(script.contains("import spatial_runtime as runtime"));
        assert!(script.contains("OUTPUT_DIR = os.environ[\"SA_OUTPUT_DIR\"]"));
        assert!(script.contains("ds_points = runtime.load_dataset(\"points\", \"/data/points.shp\")"));
        assert!(!script.contains("ds_dem"));
        assert!(script.contains("parameters={\"DISSOLVE\": False, \"DISTANCE\": 100},"));
        assert!(script.contains("inputs={\"INPUT\": n1_native_buffer_output},"));
        assert!(script.contains(
            "runtime.save_output(n2_native_centroids_output, OUTPUT_DIR, \"n2_native_centroids_output\")"
        ));
        assert!(!script.contains("save_output(n1_native_buffer_output"));

        let first = script.find("# @node n1_native_buffer").unwrap();
        let second = script.find("# @node n2_native_centroids").unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_every_input_defined_before_use() {
        let g = graph();
        let script = CodeSynthesizer::new("rt").synthesize(&g);
        for node in &g.nodes {
            let block = script.find(&format!("{}{}", NODE_MARKER, node.id)).unwrap();
            for id in node.upstream_ids() {
                let producer = g.node(id).unwrap();
                let defined = script
                    .find(&format!("{} = ", producer.outputs[0].variable))
                    .unwrap();
                assert!(defined < block);
            }
        }
        assert_eq!(
            CodeSynthesizer::expected_outputs(&g),
            vec!["n2_native_centroids_output"]
        );
    }

    #[test]
    fn test_dataset_variable_collisions() {
        let g = WorkflowGraph::new(
            "t",
            vec![],
            vec![
                DatasetRef { name: "a-b".into(), kind: DataKind::Vector },
                DatasetRef { name: "a_b".into(), kind: DataKind::Vector },
            ],
        );
        let vars = CodeSynthesizer::dataset_variables(&g);
        assert_eq!(vars["a-b"], "ds_a_b");
        assert_eq!(vars["a_b"], "ds_a_b_2");
    }
}
