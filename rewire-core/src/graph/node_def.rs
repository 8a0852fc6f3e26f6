//! Node Records
//!
//! The storage the views are built over. A [`GraphDef`] is a dense list of
//! [`NodeDef`] records; a node's index is its position in that list.
//!
//! Records round-trip losslessly through JSON and MessagePack. Attribute
//! entries keep their insertion order.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A typed attribute value. Opaque to the graph engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttrValue {
    S(String),
    I(i64),
    F(f64),
    B(bool),
    Type(String),
    Shape(Vec<i64>),
    List(Vec<AttrValue>),
}

/// One operation node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
    /// Unique within a graph.
    pub name: String,
    /// Operation type, e.g. `Const` or `MatMul`.
    pub op: String,
    /// Device placement. Empty means unplaced.
    #[serde(default)]
    pub device: String,
    /// Ordered inputs: regular `name[:port]` entries first, then `^name`
    /// control dependencies.
    #[serde(default)]
    pub input: Vec<String>,
    #[serde(default)]
    pub attr: IndexMap<String, AttrValue>,
}

impl NodeDef {
    pub fn new(name: impl Into<String>, op: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op: op.into(),
            device: String::new(),
            input: Vec::new(),
            attr: IndexMap::new(),
        }
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = device.into();
        self
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input.push(input.into());
        self
    }

    pub fn with_inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input.extend(inputs.into_iter().map(Into::into));
        self
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: AttrValue) -> Self {
        self.attr.insert(name.into(), value);
        self
    }
}

/// The graph storage: an index-addressable list of node records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDef {
    #[serde(default)]
    pub node: Vec<NodeDef>,
}

impl GraphDef {
    pub fn new(node: Vec<NodeDef>) -> Self {
        Self { node }
    }

    pub fn len(&self) -> usize {
        self.node.len()
    }

    pub fn is_empty(&self) -> bool {
        self.node.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeDef> {
        self.node.iter()
    }

    /// Parse a graph from its JSON description.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a graph from a MessagePack snapshot.
    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec_named(self)
    }
}

impl FromIterator<NodeDef> for GraphDef {
    fn from_iter<I: IntoIterator<Item = NodeDef>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_graph_json_with_defaults() {
        let json = r#"{
            "node": [
                {"name": "a", "op": "Const", "attr": {"value": {"f": 1.5}, "dtype": {"type": "float"}}},
                {"name": "b", "op": "Identity", "device": "/device:CPU:0", "input": ["a", "^a"]}
            ]
        }"#;

        let graph = GraphDef::from_json(json).unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.node[0].device, "");
        assert!(graph.node[0].input.is_empty());
        assert_eq!(graph.node[1].input, vec!["a", "^a"]);

        let keys: Vec<_> = graph.node[0].attr.keys().cloned().collect();
        assert_eq!(keys, vec!["value", "dtype"]);
        assert_eq!(graph.node[0].attr["value"], AttrValue::F(1.5));
    }

    #[test]
    fn msgpack_snapshot_preserves_attribute_order() {
        let graph: GraphDef = [
            NodeDef::new("x", "Placeholder")
                .with_attr("shape", AttrValue::Shape(vec![-1, 3]))
                .with_attr("dtype", AttrValue::Type("float".into()))
                .with_attr("_class", AttrValue::List(vec![AttrValue::S("loc:@y".into())])),
            NodeDef::new("y", "Relu").with_input("x:0").with_device("/device:GPU:0"),
        ]
        .into_iter()
        .collect();

        let bytes = graph.to_msgpack().unwrap();
        let decoded = GraphDef::from_msgpack(&bytes).unwrap();
        assert_eq!(decoded, graph);
        let keys: Vec<_> = decoded.node[0].attr.keys().map(String::as_str).collect();
        assert_eq!(keys, ["shape", "dtype", "_class"]);
    }
}
