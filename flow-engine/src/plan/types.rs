// Data Set Types
// Declared element types of operator slots

use serde::{Deserialize, Serialize};
use std::fmt;

const ANY: &str = "*";

/// Type of the data quanta flowing through a slot
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataSetType {
    /// Name of the element type, `*` accepts anything
    pub element: String,
    /// Whether the quanta are groups of elements (e.g. after a group-by)
    #[serde(default)]
    pub grouped: bool,
}

impl DataSetType {
    pub fn new(element: impl Into<String>) -> Self {
        Self {
            element: element.into(),
            grouped: false,
        }
    }

    pub fn grouped(element: impl Into<String>) -> Self {
        Self {
            element: element.into(),
            grouped: true,
        }
    }

    /// Wildcard type, compatible with every other type
    pub fn any() -> Self {
        Self::new(ANY)
    }

    pub fn is_any(&self) -> bool {
        self.element == ANY
    }

    /// Whether data of type `self` may flow into a slot declared as `target`
    pub fn is_compatible_with(&self, target: &DataSetType) -> bool {
        if self.is_any() || target.is_any() {
            return true;
        }
        self.element == target.element && self.grouped == target.grouped
    }
}

impl Default for DataSetType {
    fn default() -> Self {
        Self::any()
    }
}

impl fmt::Display for DataSetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.grouped {
            write!(f, "Group<{}>", self.element)
        } else {
            write!(f, "{}", self.element)
        }
    }
}
