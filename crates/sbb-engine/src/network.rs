//! Network descriptions (JSON).
//!
//! A description lists nodes by string id with their kind, parameters and children, plus the
//! outputs of interest. Nodes may be listed in any order; assembly builds children before
//! parents and rejects cycles.
//!
//! ```json
//! {
//!   "nodes": [
//!     {"id": "total", "kind": "convolution", "children": ["a", "b"]},
//!     {"id": "a", "kind": {"atomic": "gamma"}, "params": [2.0, 1.5]},
//!     {"id": "b", "kind": {"atomic": "gamma"}, "params": [3.0, 1.5]}
//!   ],
//!   "outputs": ["total"]
//! }
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::Read;
use std::path::Path;
use std::time::Instant;

use log::debug;
use sbb_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::graph::{Graph, NodeKind};
use crate::var::{Param, Port, Var};

/// Reference to a node output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChildRef {
    /// Default output of the node.
    Id(String),
    /// A named port of the node.
    Port {
        /// Node id.
        node: String,
        /// Selected port.
        port: Port,
    },
}

impl ChildRef {
    /// Referenced node id.
    pub fn node(&self) -> &str {
        match self {
            ChildRef::Id(id) => id,
            ChildRef::Port { node, .. } => node,
        }
    }
}

/// A parameter: a number, or a reference to another node (compounds only).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamSpec {
    /// Fixed value.
    Value(f64),
    /// Random parameter.
    Node(ChildRef),
}

/// One node of a description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Unique id.
    pub id: String,
    /// Constructor.
    pub kind: NodeKind,
    /// Parameters in constructor order.
    #[serde(default)]
    pub params: Vec<ParamSpec>,
    /// Children in constructor order.
    #[serde(default)]
    pub children: Vec<ChildRef>,
    /// Display label (defaults to the id).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl NodeSpec {
    /// Ids this node depends on, in order of first mention.
    fn dependencies(&self) -> Vec<&str> {
        let params = self.params.iter().filter_map(|p| match p {
            ParamSpec::Node(r) => Some(r.node()),
            ParamSpec::Value(_) => None,
        });
        let mut seen = HashSet::new();
        self.children.iter().map(ChildRef::node).chain(params).filter(|id| seen.insert(*id)).collect()
    }
}

/// A complete description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkSpec {
    /// Nodes in any order.
    pub nodes: Vec<NodeSpec>,
    /// Requested outputs.
    #[serde(default)]
    pub outputs: Vec<ChildRef>,
}

/// Assembled network.
#[derive(Debug, Clone)]
pub struct Network {
    /// Every node by id.
    pub nodes: HashMap<String, Var>,
    /// The requested outputs, in description order.
    pub outputs: Vec<Var>,
}

impl Network {
    /// Node by id.
    pub fn get(&self, id: &str) -> Option<&Var> {
        self.nodes.get(id)
    }
}

impl NetworkSpec {
    /// Parse a JSON description.
    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// Parse a JSON description from a reader.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    /// Parse a JSON description from a file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    /// Serialise as pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check ids are unique and every reference resolves.
    pub fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        for n in &self.nodes {
            if n.id.is_empty() {
                return Err(Error::InvalidParameter("node id must not be empty".into()));
            }
            if !ids.insert(n.id.as_str()) {
                return Err(Error::InvalidParameter(format!("duplicate node id '{}'", n.id)));
            }
        }
        for n in &self.nodes {
            for dep in n.dependencies() {
                if !ids.contains(dep) {
                    return Err(Error::InvalidParameter(format!(
                        "node '{}' references unknown node '{}'",
                        n.id, dep
                    )));
                }
            }
        }
        for out in &self.outputs {
            if !ids.contains(out.node()) {
                return Err(Error::InvalidParameter(format!(
                    "output references unknown node '{}'",
                    out.node()
                )));
            }
        }
        Ok(())
    }

    /// Node indices with children before parents (Kahn's algorithm).
    fn build_order(&self) -> Result<Vec<usize>> {
        let index: HashMap<&str, usize> =
            self.nodes.iter().enumerate().map(|(i, n)| (n.id.as_str(), i)).collect();
        let mut pending: Vec<usize> = vec![0; self.nodes.len()];
        let mut dependants: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for (i, n) in self.nodes.iter().enumerate() {
            for dep in n.dependencies() {
                let j = index[dep];
                pending[i] += 1;
                dependants[j].push(i);
            }
        }
        let mut ready: VecDeque<usize> = (0..self.nodes.len()).filter(|i| pending[*i] == 0).collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(j) = ready.pop_front() {
            order.push(j);
            for &i in &dependants[j] {
                pending[i] -= 1;
                if pending[i] == 0 {
                    ready.push_back(i);
                }
            }
        }
        if order.len() < self.nodes.len() {
            let stuck = (0..self.nodes.len()).find(|i| pending[*i] > 0).unwrap_or(0);
            return Err(Error::CyclicGraph { node: format!("'{}'", self.nodes[stuck].id) });
        }
        Ok(order)
    }

    /// Invoke the graph constructors in dependency order.
    pub fn assemble(&self, graph: &Graph) -> Result<Network> {
        let started = Instant::now();
        self.validate()?;
        let order = self.build_order()?;
        let mut nodes: HashMap<String, Var> = HashMap::with_capacity(self.nodes.len());
        let lookup = |nodes: &HashMap<String, Var>, r: &ChildRef| -> Result<Var> {
            let var = nodes.get(r.node()).ok_or_else(|| {
                Error::InvalidParameter(format!("node '{}' is not built yet", r.node()))
            })?;
            match r {
                ChildRef::Id(_) => Ok(var.clone()),
                ChildRef::Port { port, .. } => var.port(*port),
            }
        };
        for i in order {
            let spec = &self.nodes[i];
            let params = spec
                .params
                .iter()
                .map(|p| match p {
                    ParamSpec::Value(v) => Ok(Param::Fixed(*v)),
                    ParamSpec::Node(r) => lookup(&nodes, r).map(Param::Random),
                })
                .collect::<Result<Vec<_>>>()?;
            let children =
                spec.children.iter().map(|r| lookup(&nodes, r)).collect::<Result<Vec<_>>>()?;
            let var = graph.build(spec.kind, &params, &children)?;
            var.set_label(spec.label.clone().unwrap_or_else(|| spec.id.clone()));
            nodes.insert(spec.id.clone(), var);
        }
        let outputs = self.outputs.iter().map(|r| lookup(&nodes, r)).collect::<Result<Vec<_>>>()?;
        debug!("assembled {} node(s) in {:?}", nodes.len(), started.elapsed());
        Ok(Network { nodes, outputs })
    }
}
