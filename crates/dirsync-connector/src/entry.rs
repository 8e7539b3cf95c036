//! Directory entry model.
//!
//! Directories disagree on whether an attribute is single- or multi-valued:
//! OpenLDAP returns lists, AD returns scalars unless the attribute is empty,
//! in which case it returns an empty list. [`AttrValue`] makes the
//! representation explicit, and [`AttrValue::canonicalize`] collapses the
//! equivalent forms once at ingestion so downstream comparison code never
//! branches on representation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// The kind of identity object an entry represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    /// A user account.
    User,
    /// A group.
    Group,
}

impl ObjectKind {
    /// Get the string representation used in logs and manifest records.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::User => "user",
            ObjectKind::Group => "group",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ObjectKind {
    type Err = ParseObjectKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(ObjectKind::User),
            "group" => Ok(ObjectKind::Group),
            _ => Err(ParseObjectKindError(s.to_string())),
        }
    }
}

/// Error parsing object kind from string.
#[derive(Debug, Clone)]
pub struct ParseObjectKindError(String);

impl fmt::Display for ParseObjectKindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid object kind '{}', expected: user, group", self.0)
    }
}

impl std::error::Error for ParseObjectKindError {}

/// Which directory an entry was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceSystem {
    /// The authoritative source of identity truth (AD).
    Primary,
    /// The directory kept in sync with the primary (OpenLDAP).
    Dependent,
}

impl SourceSystem {
    /// Get the string representation used in logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceSystem::Primary => "primary",
            SourceSystem::Dependent => "dependent",
        }
    }
}

impl fmt::Display for SourceSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A directory attribute value: a single scalar, an ordered sequence of
/// scalars, or absent. Absent attributes are represented explicitly, never
/// as null.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    /// No value.
    Absent,
    /// A single value.
    Scalar(String),
    /// Multiple ordered values.
    List(Vec<String>),
}

impl AttrValue {
    /// Build a value from a raw list of strings as returned by a directory.
    #[must_use]
    pub fn from_values(values: Vec<String>) -> Self {
        match values.len() {
            0 => AttrValue::Absent,
            1 => {
                let mut values = values;
                AttrValue::Scalar(values.remove(0))
            }
            _ => AttrValue::List(values),
        }
    }

    /// Collapse equivalent representations: a single-element list becomes a
    /// scalar, and an empty list or empty string becomes [`AttrValue::Absent`].
    #[must_use]
    pub fn canonicalize(self) -> Self {
        match self {
            AttrValue::Scalar(s) if s.is_empty() => AttrValue::Absent,
            AttrValue::List(mut v) => match v.len() {
                0 => AttrValue::Absent,
                1 => AttrValue::Scalar(v.remove(0)).canonicalize(),
                _ => AttrValue::List(v),
            },
            other => other,
        }
    }

    /// Check if the value is absent.
    #[must_use]
    pub fn is_absent(&self) -> bool {
        matches!(self, AttrValue::Absent)
    }

    /// Get as a single string if this is a scalar value.
    #[must_use]
    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            AttrValue::Scalar(s) => Some(s),
            _ => None,
        }
    }

    /// Get all values as a slice (scalar yields a one-element slice).
    #[must_use]
    pub fn values(&self) -> &[String] {
        match self {
            AttrValue::Absent => &[],
            AttrValue::Scalar(s) => std::slice::from_ref(s),
            AttrValue::List(v) => v,
        }
    }

    /// Get as an integer if this is a numeric scalar.
    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        self.as_scalar().and_then(|s| s.parse().ok())
    }

    /// Check whether any of the values equals `value`.
    #[must_use]
    pub fn contains(&self, value: &str) -> bool {
        self.values().iter().any(|v| v == value)
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::Scalar(s)
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Scalar(s.to_string())
    }
}

impl From<i64> for AttrValue {
    fn from(i: i64) -> Self {
        AttrValue::Scalar(i.to_string())
    }
}

impl From<Vec<String>> for AttrValue {
    fn from(v: Vec<String>) -> Self {
        AttrValue::List(v)
    }
}

impl From<Vec<&str>> for AttrValue {
    fn from(v: Vec<&str>) -> Self {
        AttrValue::List(v.into_iter().map(str::to_string).collect())
    }
}

/// One identity object as seen in one directory.
///
/// `identifier` is unique within a (`source`, `kind`) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    /// Distinguished name.
    pub dn: String,
    /// Directory-assigned logical name (login name for users, common name
    /// for groups).
    pub identifier: String,
    /// What kind of object this is.
    pub kind: ObjectKind,
    /// Which directory it was read from.
    pub source: SourceSystem,
    /// Attribute name to value mapping.
    pub attributes: BTreeMap<String, AttrValue>,
}

static ABSENT: AttrValue = AttrValue::Absent;

impl DirectoryEntry {
    /// Create a new entry with no attributes.
    pub fn new(
        dn: impl Into<String>,
        identifier: impl Into<String>,
        kind: ObjectKind,
        source: SourceSystem,
    ) -> Self {
        Self {
            dn: dn.into(),
            identifier: identifier.into(),
            kind,
            source,
            attributes: BTreeMap::new(),
        }
    }

    /// Set an attribute using the builder pattern.
    #[must_use]
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.set_attr(name, value);
        self
    }

    /// Set an attribute value.
    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<AttrValue>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// Get an attribute value; missing attributes read as absent.
    #[must_use]
    pub fn attr(&self, name: &str) -> &AttrValue {
        self.attributes.get(name).unwrap_or(&ABSENT)
    }

    /// Get a scalar attribute as a string slice.
    #[must_use]
    pub fn attr_str(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(AttrValue::as_scalar)
    }

    /// Check whether the entry carries the given object class.
    #[must_use]
    pub fn has_object_class(&self, class: &str) -> bool {
        self.attr("objectClass")
            .values()
            .iter()
            .any(|c| c.eq_ignore_ascii_case(class))
    }

    /// Canonicalize every attribute value in place.
    pub fn canonicalize(&mut self) {
        let attrs = std::mem::take(&mut self.attributes);
        self.attributes = attrs
            .into_iter()
            .map(|(k, v)| (k, v.canonicalize()))
            .collect();
    }
}
