//! Structured search filters.
//!
//! The engine never builds raw filter strings; it constructs a
//! [`SearchFilter`] tree which a transport renders (RFC 4515) or evaluates
//! directly, as the in-memory directory does.

use serde::{Deserialize, Serialize};

use crate::entry::DirectoryEntry;

/// Scope of a search operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchScope {
    /// The base entry only.
    Base,
    /// Direct children of the base.
    OneLevel,
    /// The base and its whole subtree.
    Subtree,
}

/// Filter for search operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SearchFilter {
    /// Match entries where any value of `attribute` equals `value`
    /// (case-insensitive, as LDAP string matching is).
    Equals { attribute: String, value: String },

    /// Match entries where `attribute` has at least one value.
    Present { attribute: String },

    /// Logical AND of multiple filters.
    And { filters: Vec<SearchFilter> },

    /// Logical OR of multiple filters.
    Or { filters: Vec<SearchFilter> },

    /// Logical NOT of a filter.
    Not { filter: Box<SearchFilter> },
}

impl SearchFilter {
    /// Create an equals filter.
    pub fn eq(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        SearchFilter::Equals {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// Create a present (attribute exists) filter.
    pub fn present(attribute: impl Into<String>) -> Self {
        SearchFilter::Present {
            attribute: attribute.into(),
        }
    }

    /// Create an AND filter.
    #[must_use]
    pub fn and(filters: Vec<SearchFilter>) -> Self {
        SearchFilter::And { filters }
    }

    /// Create a NOT filter.
    #[must_use]
    pub fn negate(filter: SearchFilter) -> Self {
        SearchFilter::Not {
            filter: Box::new(filter),
        }
    }

    /// Evaluate the filter against an entry.
    #[must_use]
    pub fn matches(&self, entry: &DirectoryEntry) -> bool {
        match self {
            SearchFilter::Equals { attribute, value } => {
                if attribute.eq_ignore_ascii_case("dn") {
                    return entry.dn.eq_ignore_ascii_case(value);
                }
                entry
                    .attr(attribute)
                    .values()
                    .iter()
                    .any(|v| v.eq_ignore_ascii_case(value))
            }
            SearchFilter::Present { attribute } => !entry.attr(attribute).is_absent(),
            SearchFilter::And { filters } => filters.iter().all(|f| f.matches(entry)),
            SearchFilter::Or { filters } => filters.iter().any(|f| f.matches(entry)),
            SearchFilter::Not { filter } => !filter.matches(entry),
        }
    }

    /// Render as an RFC 4515 filter string for wire transports.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            SearchFilter::Equals { attribute, value } => {
                format!("({}={})", attribute, escape_filter_value(value))
            }
            SearchFilter::Present { attribute } => format!("({attribute}=*)"),
            SearchFilter::And { filters } => {
                let inner: String = filters.iter().map(SearchFilter::render).collect();
                format!("(&{inner})")
            }
            SearchFilter::Or { filters } => {
                let inner: String = filters.iter().map(SearchFilter::render).collect();
                format!("(|{inner})")
            }
            SearchFilter::Not { filter } => format!("(!{})", filter.render()),
        }
    }
}

/// Escape special characters in a filter value per RFC 4515.
fn escape_filter_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '*' => out.push_str("\\2a"),
            '(' => out.push_str("\\28"),
            ')' => out.push_str("\\29"),
            '\\' => out.push_str("\\5c"),
            '\0' => out.push_str("\\00"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{ObjectKind, SourceSystem};

    fn sample_entry() -> DirectoryEntry {
        DirectoryEntry::new(
            "uid=johnd,ou=People,dc=example,dc=com",
            "johnd",
            ObjectKind::User,
            SourceSystem::Dependent,
        )
        .with_attr("objectClass", vec!["top", "posixAccount"])
        .with_attr("uid", "johnd")
        .with_attr("uidNumber", "1042")
    }

    #[test]
    fn test_equals_matches_case_insensitive() {
        let entry = sample_entry();
        assert!(SearchFilter::eq("objectClass", "posixaccount").matches(&entry));
        assert!(!SearchFilter::eq("objectClass", "sambaSamAccount").matches(&entry));
    }

    #[test]
    fn test_present_and_not() {
        let entry = sample_entry();
        assert!(SearchFilter::present("uidNumber").matches(&entry));
        assert!(!SearchFilter::present("gidNumber").matches(&entry));
        assert!(SearchFilter::negate(SearchFilter::present("gidNumber")).matches(&entry));
    }

    #[test]
    fn test_and_combination() {
        let entry = sample_entry();
        let filter = SearchFilter::and(vec![
            SearchFilter::eq("objectClass", "posixAccount"),
            SearchFilter::eq("uid", "johnd"),
        ]);
        assert!(filter.matches(&entry));
    }

    #[test]
    fn test_render() {
        let filter = SearchFilter::and(vec![
            SearchFilter::eq("objectClass", "user"),
            SearchFilter::present("sAMAccountName"),
        ]);
        assert_eq!(filter.render(), "(&(objectClass=user)(sAMAccountName=*))");
    }

    #[test]
    fn test_render_escapes_special_characters() {
        let filter = SearchFilter::eq("cn", "a*(b)\\c");
        assert_eq!(filter.render(), "(cn=a\\2a\\28b\\29\\5cc)");
    }
}
