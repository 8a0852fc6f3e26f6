//! View Options
//!
//! Knobs for [`MutableGraphView`](crate::graph::MutableGraphView). The
//! defaults reproduce the historical rewrite semantics.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphViewOptions {
    /// When a renamed or newly added node takes a name that an existing node
    /// still holds, remove the existing node and hand its consumers to the
    /// incoming one. When `false` the collision fails Apply with
    /// `DuplicateNodeName`.
    pub overwrite_on_name_collision: bool,

    /// Drop repeated `^name` inputs while building a mutable view. When
    /// `false` they fail construction with `DuplicateControlDependency`.
    pub dedup_control_dependencies: bool,
}

impl Default for GraphViewOptions {
    fn default() -> Self {
        Self {
            overwrite_on_name_collision: true,
            dedup_control_dependencies: true,
        }
    }
}

impl GraphViewOptions {
    /// Strict options: no implicit overwrite, no silent deduplication.
    pub fn strict() -> Self {
        Self {
            overwrite_on_name_collision: false,
            dedup_control_dependencies: false,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
