//! Pure contact-list membership resolution.
//!
//! A list holds conjunctive filters plus manual inclusions and exclusions;
//! membership is recomputed on demand from the organization's contacts and
//! never stored.  Campaign audiences, workflow enrollment and the members
//! and preview endpoints all resolve through the same functions, so every
//! reader agrees on who is in a list.

use std::collections::HashSet;

use crate::models::{Comparison, Contact, ContactList, SegmentFilter};
use crate::types::ContactId;

// ---------------------------------------------------------------------------
// Field references
// ---------------------------------------------------------------------------

/// A resolved contact field accessor.  Built once per filter, then applied
/// to every contact, so the built-in-vs-custom decision is not re-made in
/// the inner loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldRef {
    Name,
    Email,
    Phone,
    Company,
    Stage,
    Custom(String),
}

impl FieldRef {
    pub fn resolve(field: &str) -> Self {
        match field {
            "name" => Self::Name,
            "email" => Self::Email,
            "phone" => Self::Phone,
            "company" => Self::Company,
            "stage" => Self::Stage,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Value of this field on `contact`, if present.
    pub fn get<'a>(&self, contact: &'a Contact) -> Option<&'a str> {
        match self {
            Self::Name => Some(contact.name.as_str()),
            Self::Email => contact.email.as_deref(),
            Self::Phone => contact.phone.as_deref(),
            Self::Company => contact.company.as_deref(),
            Self::Stage => contact.stage.as_deref(),
            Self::Custom(key) => contact.custom.get(key).map(String::as_str),
        }
    }
}

// ---------------------------------------------------------------------------
// Compiled filters
// ---------------------------------------------------------------------------

/// A filter prepared for repeated evaluation: field resolved, comparison
/// value lowercased once.
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    field: FieldRef,
    comparison: Comparison,
    value: String,
}

/// Compiles a filter set, dropping no-op entries.  A filter with an empty
/// field or empty value is a half-edited row and must not hide anyone.
pub fn compile_filters(filters: &[SegmentFilter]) -> Vec<CompiledFilter> {
    filters
        .iter()
        .filter(|f| !f.field.is_empty() && !f.value.is_empty())
        .map(|f| CompiledFilter {
            field: FieldRef::resolve(&f.field),
            comparison: f.comparison,
            value: f.value.to_lowercase(),
        })
        .collect()
}

impl CompiledFilter {
    /// Whether `contact` satisfies this predicate.  A contact without the
    /// field never matches.
    pub fn matches(&self, contact: &Contact) -> bool {
        let Some(raw) = self.field.get(contact) else {
            return false;
        };
        let value = raw.to_lowercase();
        match self.comparison {
            Comparison::Equals => value == self.value,
            Comparison::Contains => value.contains(&self.value),
            Comparison::StartsWith => value.starts_with(&self.value),
            Comparison::EndsWith => value.ends_with(&self.value),
            Comparison::GreaterThan => compare_ordered(&value, &self.value).is_gt(),
            Comparison::LessThan => compare_ordered(&value, &self.value).is_lt(),
        }
    }
}

/// Ordered comparison used by greater_than / less_than.  When both sides
/// parse as numbers they are compared numerically, otherwise
/// lexicographically, so "seats > 9" matches "10" but "tier > bronze"
/// still works on plain text.
fn compare_ordered(lhs: &str, rhs: &str) -> std::cmp::Ordering {
    match (lhs.trim().parse::<f64>(), rhs.trim().parse::<f64>()) {
        (Ok(a), Ok(b)) => a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal),
        _ => lhs.cmp(rhs),
    }
}

// ---------------------------------------------------------------------------
// Free-text search
// ---------------------------------------------------------------------------

/// Case-insensitive substring match over name, email, company and phone.
/// An empty term matches everyone.
pub fn search_matches(contact: &Contact, term: &str) -> bool {
    if term.is_empty() {
        return true;
    }
    let needle = term.to_lowercase();
    let hit = |field: Option<&str>| {
        field
            .map(|v| v.to_lowercase().contains(&needle))
            .unwrap_or(false)
    };
    hit(Some(&contact.name))
        || hit(contact.email.as_deref())
        || hit(contact.company.as_deref())
        || hit(contact.phone.as_deref())
}

// ---------------------------------------------------------------------------
// Membership
// ---------------------------------------------------------------------------

/// Whether `contact` satisfies every compiled filter.  An empty set
/// matches everyone.
pub fn matches_all(filters: &[CompiledFilter], contact: &Contact) -> bool {
    filters.iter().all(|f| f.matches(contact))
}

/// Live contact-table filtering: free-text term AND all predicates, in
/// input order.
pub fn filter_contacts<'a>(
    contacts: &'a [Contact],
    search: &str,
    filters: &[CompiledFilter],
) -> Vec<&'a Contact> {
    contacts
        .iter()
        .filter(|c| search_matches(c, search) && matches_all(filters, c))
        .collect()
}

/// Resolves the members of `list` among `contacts`, in input order.
///
/// Membership is (filter matches ∪ manual inclusions) minus the list's
/// exclusion set; exclusion wins over any inclusion.  Contacts belonging
/// to another organization are never members.
pub fn resolve_members(list: &ContactList, contacts: &[Contact]) -> Vec<ContactId> {
    let compiled = compile_filters(&list.filters);
    let included: HashSet<ContactId> = list.included.iter().copied().collect();
    let excluded: HashSet<ContactId> = list.excluded.iter().copied().collect();
    contacts
        .iter()
        .filter(|c| c.org_id == list.org_id && !excluded.contains(&c.id))
        .filter(|c| included.contains(&c.id) || matches_all(&compiled, c))
        .map(|c| c.id)
        .collect()
}
