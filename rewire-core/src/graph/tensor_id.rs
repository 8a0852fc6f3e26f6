//! Tensor Identifiers
//!
//! A tensor is one output of one node, named `node:port`. Input lists refer
//! to tensors by that name, or to a whole node with `^node` when the edge is
//! a control dependency that carries no data.

use std::fmt;

use thiserror::Error;

/// Port value of a control edge.
pub const CONTROL_SLOT: i32 = -1;

const CONTROL_PREFIX: char = '^';

/// Render `name` as a control-dependency input (`^name`).
pub fn as_control_dependency(name: &str) -> String {
    format!("{CONTROL_PREFIX}{name}")
}

/// An input-list entry that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid tensor name '{input}': {reason}")]
pub struct InvalidTensorName {
    pub input: String,
    pub reason: &'static str,
}

/// Identifier of one output of one node. Borrows the node name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorId<'a> {
    node: &'a str,
    index: i32,
}

impl<'a> TensorId<'a> {
    /// A regular (data) output.
    pub fn new(node: &'a str, index: i32) -> Self {
        Self { node, index }
    }

    /// A control output.
    pub fn control(node: &'a str) -> Self {
        Self {
            node,
            index: CONTROL_SLOT,
        }
    }

    /// Parse an input-list entry (`name`, `name:port` or `^name`).
    pub fn parse(input: &'a str) -> Result<Self, InvalidTensorName> {
        parse_tensor_name(input)
    }

    pub fn node(&self) -> &'a str {
        self.node
    }

    pub fn index(&self) -> i32 {
        self.index
    }

    pub fn is_control(&self) -> bool {
        self.index == CONTROL_SLOT
    }

    /// Copy the name into an owning [`SafeTensorId`].
    pub fn to_safe(&self) -> SafeTensorId {
        SafeTensorId::new(self.node, self.index)
    }

    /// Render as an input-list entry. Port 0 is written as the bare node name.
    pub fn to_input_string(&self) -> String {
        match self.index {
            CONTROL_SLOT => as_control_dependency(self.node),
            0 => self.node.to_string(),
            port => format!("{}:{}", self.node, port),
        }
    }
}

impl fmt::Display for TensorId<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_control() {
            write!(f, "{CONTROL_PREFIX}{}", self.node)
        } else {
            write!(f, "{}:{}", self.node, self.index)
        }
    }
}

/// Same as [`TensorId`] but owns the node name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SafeTensorId {
    node: String,
    index: i32,
}

impl SafeTensorId {
    pub fn new(node: impl Into<String>, index: i32) -> Self {
        Self {
            node: node.into(),
            index,
        }
    }

    pub fn control(node: impl Into<String>) -> Self {
        Self::new(node, CONTROL_SLOT)
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn index(&self) -> i32 {
        self.index
    }

    pub fn is_control(&self) -> bool {
        self.index == CONTROL_SLOT
    }

    pub fn as_tensor_id(&self) -> TensorId<'_> {
        TensorId::new(&self.node, self.index)
    }
}

impl From<TensorId<'_>> for SafeTensorId {
    fn from(id: TensorId<'_>) -> Self {
        id.to_safe()
    }
}

impl<'a> From<&'a SafeTensorId> for TensorId<'a> {
    fn from(id: &'a SafeTensorId) -> Self {
        id.as_tensor_id()
    }
}

impl fmt::Display for SafeTensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_tensor_id().fmt(f)
    }
}

/// Check that `name` can be written back into an input list unambiguously.
pub(crate) fn check_node_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        Err("empty node name")
    } else if name.starts_with(CONTROL_PREFIX) {
        Err("node name cannot start with '^'")
    } else if name.contains(':') {
        Err("node name cannot contain ':'")
    } else {
        Ok(())
    }
}

/// Parse an input-list entry.
///
/// `^name` is a control dependency, `name:N` selects output `N`, and a bare
/// `name` selects output 0.
pub fn parse_tensor_name(input: &str) -> Result<TensorId<'_>, InvalidTensorName> {
    let invalid = |reason| InvalidTensorName {
        input: input.to_string(),
        reason,
    };

    if let Some(node) = input.strip_prefix(CONTROL_PREFIX) {
        if node.is_empty() {
            return Err(invalid("empty node name"));
        }
        if node.contains(':') {
            return Err(invalid("control dependency cannot select a port"));
        }
        return Ok(TensorId::control(node));
    }

    match input.rsplit_once(':') {
        None if input.is_empty() => Err(invalid("empty node name")),
        None => Ok(TensorId::new(input, 0)),
        Some(("", _)) => Err(invalid("empty node name")),
        Some((node, port)) => {
            if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid("port is not a non-negative integer"));
            }
            let index = port
                .parse::<i32>()
                .map_err(|_| invalid("port is out of range"))?;
            Ok(TensorId::new(node, index))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_name_as_port_zero() {
        let id = parse_tensor_name("conv").unwrap();
        assert_eq!(id.node(), "conv");
        assert_eq!(id.index(), 0);
        assert!(!id.is_control());
    }

    #[test]
    fn parses_explicit_port() {
        let id = parse_tensor_name("split:2").unwrap();
        assert_eq!(id, TensorId::new("split", 2));
    }

    #[test]
    fn parses_control_dependency() {
        let id = parse_tensor_name("^init").unwrap();
        assert!(id.is_control());
        assert_eq!(id.node(), "init");
        assert_eq!(id.index(), CONTROL_SLOT);
    }

    #[test]
    fn rejects_malformed_entries() {
        for input in ["", "^", ":1", "a:", "a:x", "a:-1", "^a:0", "a:99999999999"] {
            assert!(parse_tensor_name(input).is_err(), "accepted {input:?}");
        }
    }

    #[test]
    fn node_names_must_render_unambiguously() {
        assert!(check_node_name("conv_1/relu").is_ok());
        assert!(check_node_name("a^b").is_ok());
        assert_eq!(check_node_name(""), Err("empty node name"));
        assert!(check_node_name("a:1").is_err());
        assert!(check_node_name("^a").is_err());
    }

    #[test]
    fn renders_input_strings() {
        assert_eq!(TensorId::new("a", 0).to_input_string(), "a");
        assert_eq!(TensorId::new("a", 3).to_input_string(), "a:3");
        assert_eq!(TensorId::control("a").to_input_string(), "^a");
        assert_eq!(TensorId::new("a", 0).to_string(), "a:0");
        assert_eq!(SafeTensorId::control("b").to_string(), "^b");
        assert_eq!(as_control_dependency("c"), "^c");
    }

    #[test]
    fn safe_and_borrowed_forms_convert() {
        let safe: SafeTensorId = TensorId::new("x", 1).into();
        assert_eq!(safe.node(), "x");
        let back: TensorId<'_> = (&safe).into();
        assert_eq!(back, TensorId::new("x", 1));
    }
}
