//! Directory mutation operations.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::entry::AttrValue;

/// How a modification changes an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModifyOp {
    /// Add the given values to the attribute.
    AddValues,
    /// Remove the given values from the attribute.
    DeleteValues,
    /// Replace all values of the attribute with the given ones; replacing
    /// with no values removes the attribute.
    Replace,
}

impl ModifyOp {
    /// Get the string representation used in logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ModifyOp::AddValues => "add",
            ModifyOp::DeleteValues => "delete",
            ModifyOp::Replace => "replace",
        }
    }
}

impl fmt::Display for ModifyOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single attribute modification within a modify operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modification {
    /// The attribute to change.
    pub attribute: String,
    /// How to change it.
    pub op: ModifyOp,
    /// The values involved.
    pub values: Vec<String>,
}

impl Modification {
    /// Create a replace modification with a single value.
    pub fn replace(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            op: ModifyOp::Replace,
            values: vec![value.into()],
        }
    }

    /// Create an add-values modification.
    pub fn add_values(attribute: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            attribute: attribute.into(),
            op: ModifyOp::AddValues,
            values,
        }
    }

    /// Create a delete-values modification.
    pub fn delete_values(attribute: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            attribute: attribute.into(),
            op: ModifyOp::DeleteValues,
            values,
        }
    }

    /// Create a replace modification that clears the attribute.
    pub fn clear(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            op: ModifyOp::Replace,
            values: Vec::new(),
        }
    }
}

/// One compiled directory mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DirectoryOp {
    /// Create a new entry.
    Add {
        dn: String,
        object_classes: Vec<String>,
        attributes: BTreeMap<String, AttrValue>,
    },
    /// Modify an existing entry.
    Modify {
        dn: String,
        changes: Vec<Modification>,
    },
    /// Remove an entry.
    Delete { dn: String },
}

impl DirectoryOp {
    /// The DN this operation targets.
    #[must_use]
    pub fn dn(&self) -> &str {
        match self {
            DirectoryOp::Add { dn, .. }
            | DirectoryOp::Modify { dn, .. }
            | DirectoryOp::Delete { dn } => dn,
        }
    }

    /// Short operation name for logs.
    #[must_use]
    pub fn kind_str(&self) -> &'static str {
        match self {
            DirectoryOp::Add { .. } => "add",
            DirectoryOp::Modify { .. } => "modify",
            DirectoryOp::Delete { .. } => "delete",
        }
    }
}
