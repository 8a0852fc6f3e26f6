//! Kernel Validation
//!
//! Apply hands every new or edited node to a [`KernelValidator`] before it
//! commits. Whatever error the validator returns is surfaced unchanged and
//! aborts the batch.

use std::collections::{HashMap, HashSet};

use crate::error::{GraphError, Result};
use crate::graph::NodeDef;

/// Checks that a node can be executed, e.g. that a kernel exists for its op
/// on its device.
pub trait KernelValidator: Send + Sync {
    fn validate(&self, node: &NodeDef) -> Result<()>;
}

impl<F> KernelValidator for F
where
    F: Fn(&NodeDef) -> Result<()> + Send + Sync,
{
    fn validate(&self, node: &NodeDef) -> Result<()> {
        self(node)
    }
}

/// Accepts every node.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl KernelValidator for AcceptAll {
    fn validate(&self, _node: &NodeDef) -> Result<()> {
        Ok(())
    }
}

/// Device type of a device string: `/device:GPU:0` and `/job:w/device:GPU:0`
/// give `GPU`, `CPU:0` gives `CPU`. Empty for an unplaced node.
pub fn device_type(device: &str) -> &str {
    let last = device.rsplit('/').next().unwrap_or(device);
    let last = last.strip_prefix("device:").unwrap_or(last);
    last.split(':').next().unwrap_or("")
}

/// Validator backed by a table of registered (op, device type) kernels.
///
/// An unplaced node passes if its op is registered for any device type.
#[derive(Debug, Clone, Default)]
pub struct KernelRegistry {
    kernels: HashMap<String, HashSet<String>>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, op: impl Into<String>, device_type: impl Into<String>) -> &mut Self {
        self.kernels
            .entry(op.into())
            .or_default()
            .insert(device_type.into());
        self
    }

    pub fn is_registered(&self, op: &str, device: &str) -> bool {
        let Some(device_types) = self.kernels.get(op) else {
            return false;
        };
        let wanted = device_type(device);
        wanted.is_empty() || device_types.contains(wanted)
    }
}

impl KernelValidator for KernelRegistry {
    fn validate(&self, node: &NodeDef) -> Result<()> {
        if self.is_registered(&node.op, &node.device) {
            return Ok(());
        }
        Err(GraphError::KernelNotRegistered {
            node: node.name.clone(),
            op: node.op.clone(),
            message: format!("no kernel for device '{}'", node.device),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn parses_device_types() {
        assert_eq!(device_type("/device:GPU:0"), "GPU");
        assert_eq!(device_type("/job:worker/replica:0/task:1/device:DML:1"), "DML");
        assert_eq!(device_type("CPU:0"), "CPU");
        assert_eq!(device_type(""), "");
    }

    #[test]
    fn registry_checks_op_and_device() {
        let mut registry = KernelRegistry::new();
        registry.register("MatMul", "GPU").register("MatMul", "CPU");
        registry.register("Const", "CPU");

        let placed = NodeDef::new("m", "MatMul").with_device("/device:GPU:0");
        assert!(registry.validate(&placed).is_ok());

        let unplaced = NodeDef::new("c", "Const");
        assert!(registry.validate(&unplaced).is_ok());

        let wrong_device = NodeDef::new("c", "Const").with_device("/device:GPU:0");
        let err = registry.validate(&wrong_device).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KernelNotRegistered);

        let unknown = NodeDef::new("s", "Svd");
        assert!(registry.validate(&unknown).is_err());
    }

    #[test]
    fn closures_are_validators() {
        let only_const = |node: &NodeDef| -> Result<()> {
            if node.op == "Const" {
                Ok(())
            } else {
                Err(GraphError::KernelNotRegistered {
                    node: node.name.clone(),
                    op: node.op.clone(),
                    message: "only Const".into(),
                })
            }
        };
        assert!(only_const.validate(&NodeDef::new("a", "Const")).is_ok());
        assert!(only_const.validate(&NodeDef::new("b", "Relu")).is_err());
        assert!(AcceptAll.validate(&NodeDef::new("b", "Relu")).is_ok());
    }
}
