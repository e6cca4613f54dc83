//! `$select`/`$expand` masking of evaluation results
//!
//! A [`SelectExpandMask`] is a tree built from the select and expand
//! paths of a URI. [`SelectExpandMasker`] applies it to a result graph:
//! - properties that were not selected are hidden
//! - navigations that were not expanded are hidden as typed nulls
//! - complex properties are masked by their sub-paths
//!
//! Hidden members are still readable (as typed nulls) but are not reported
//! among the member names. An entity reached twice under the same mask
//! node is masked once, so identity is preserved in the output.

use indexmap::IndexMap;
use log::trace;
use odata_linq_model::QueryDataSet;
use odata_linq_types::{QueryCollectionValue, QueryStructuralValue, QueryValue};
use std::collections::HashMap;
use std::sync::LazyLock;

/// Mask that shows every property and expands nothing
static SELECT_ALL: LazyLock<SelectExpandMask> = LazyLock::new(SelectExpandMask::default);

/// Visibility of the members of one structural level
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectExpandMask {
    /// `*` or a path ending at this level
    select_all: bool,
    members: IndexMap<String, MemberMask>,
}

/// Visibility of one member and the mask of its value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberMask {
    pub selected: bool,
    pub expanded: bool,
    pub nested: SelectExpandMask,
}

impl SelectExpandMask {
    /// Build a mask from `$select` and `$expand` paths (`/`-separated)
    ///
    /// ```
    /// # use odata_linq_eval::SelectExpandMask;
    /// let mask = SelectExpandMask::new(&["Name".into(), "Orders/Amount".into()], &["Orders".into()]);
    /// assert!(mask.is_selected("Name"));
    /// assert!(!mask.is_selected("Id"));
    /// assert!(mask.is_expanded("Orders"));
    /// ```
    pub fn new(select: &[String], expand: &[String]) -> Self {
        let mut mask = Self::default();
        for path in select {
            mask.add_select(path.split('/').map(str::trim).filter(|s| !s.is_empty()));
        }
        for path in expand {
            mask.add_expand(path.split('/').map(str::trim).filter(|s| !s.is_empty()));
        }
        mask
    }

    fn add_select<'p>(&mut self, mut segments: impl Iterator<Item = &'p str>) {
        match segments.next() {
            None | Some("*") => self.select_all = true,
            Some(name) => {
                let member = self.members.entry(name.to_string()).or_default();
                member.selected = true;
                member.nested.add_select(segments);
            }
        }
    }

    fn add_expand<'p>(&mut self, mut segments: impl Iterator<Item = &'p str>) {
        if let Some(name) = segments.next() {
            let member = self.members.entry(name.to_string()).or_default();
            member.expanded = true;
            member.nested.add_expand(segments);
        }
    }

    /// Whether every property of this level is visible
    pub fn selects_all(&self) -> bool {
        self.select_all || !self.members.values().any(|m| m.selected)
    }

    pub fn member(&self, name: &str) -> Option<&MemberMask> {
        self.members.get(name)
    }

    pub fn is_selected(&self, name: &str) -> bool {
        self.selects_all() || self.member(name).is_some_and(|m| m.selected)
    }

    pub fn is_expanded(&self, name: &str) -> bool {
        self.member(name).is_some_and(|m| m.expanded)
    }
}

/// Applies a [`SelectExpandMask`] to evaluation results, resolving
/// expanded navigations against the data set
#[derive(Debug, Clone, Copy)]
pub struct SelectExpandMasker<'a> {
    data: &'a QueryDataSet,
}

impl<'a> SelectExpandMasker<'a> {
    pub fn new(data: &'a QueryDataSet) -> Self {
        Self { data }
    }

    /// Mask a value; collections are masked element by element
    pub fn mask(&self, value: &QueryValue, mask: &SelectExpandMask) -> QueryValue {
        let mut identity_map = HashMap::new();
        self.mask_value(value, mask, &mut identity_map)
    }

    fn mask_value(
        &self,
        value: &QueryValue,
        mask: &SelectExpandMask,
        identity_map: &mut HashMap<(usize, usize), QueryStructuralValue>,
    ) -> QueryValue {
        match value {
            QueryValue::Structural(s) => QueryValue::Structural(self.mask_structural(s, mask, identity_map)),
            QueryValue::Collection(c) if !c.is_null() => {
                let elements = c
                    .elements()
                    .iter()
                    .map(|element| self.mask_value(element, mask, identity_map))
                    .collect();
                QueryValue::Collection(QueryCollectionValue::from_type(c.value_type().clone(), elements))
            }
            other => other.clone(),
        }
    }

    fn mask_structural(
        &self,
        value: &QueryStructuralValue,
        mask: &SelectExpandMask,
        identity_map: &mut HashMap<(usize, usize), QueryStructuralValue>,
    ) -> QueryStructuralValue {
        let Some(identity) = value.identity() else {
            return value.clone();
        };
        let key = (identity, std::ptr::from_ref(mask) as usize);
        if let Some(masked) = identity_map.get(&key) {
            trace!("Reusing masked copy of {}", value.value_type());
            return masked.clone();
        }

        let all = mask.selects_all();
        let mut members = IndexMap::new();
        let mut hidden = IndexMap::new();
        for (name, member) in value.members() {
            let member_mask = mask.member(name);
            let selected = all || member_mask.is_some_and(|m| m.selected);
            match member {
                QueryValue::Link(link) => {
                    let expanded = member_mask.filter(|m| m.expanded && selected);
                    match expanded {
                        Some(m) => {
                            let target = self.data.resolve_link(link);
                            members.insert(name.to_string(), self.mask_value(&target, &m.nested, identity_map));
                        }
                        None => {
                            trace!("Hiding navigation {name}");
                            hidden.insert(name.to_string(), QueryValue::null_of(&link.value_type));
                        }
                    }
                }
                other if !selected => {
                    hidden.insert(name.to_string(), QueryValue::null_of(other.value_type()));
                }
                QueryValue::Structural(complex) => {
                    let nested = member_mask.map_or(&*SELECT_ALL, |m| &m.nested);
                    let masked = self.mask_structural(complex, nested, identity_map);
                    members.insert(name.to_string(), QueryValue::Structural(masked));
                }
                other => {
                    members.insert(name.to_string(), other.clone());
                }
            }
        }

        let masked = QueryStructuralValue::masked(value.value_type().clone(), members, hidden);
        identity_map.insert(key, masked.clone());
        masked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn paths(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_empty_mask_selects_all() {
        let mask = SelectExpandMask::new(&[], &[]);
        assert!(mask.selects_all());
        assert!(mask.is_selected("Anything"));
        assert!(!mask.is_expanded("Orders"));
    }

    #[test]
    fn test_nested_select_paths() {
        let mask = SelectExpandMask::new(&paths(&["Orders/Amount", "Address"]), &paths(&["Orders"]));
        assert!(!mask.selects_all());
        let orders = mask.member("Orders").unwrap();
        assert!(orders.selected && orders.expanded);
        assert!(orders.nested.is_selected("Amount"));
        assert!(!orders.nested.is_selected("Id"));
        // A path ending at a complex property selects all of its members
        let address = mask.member("Address").unwrap();
        assert!(address.nested.selects_all());
    }

    #[test]
    fn test_star_selects_all() {
        let mask = SelectExpandMask::new(&paths(&["Name", "*"]), &[]);
        assert!(mask.selects_all());
    }

    #[test]
    fn test_expand_only_keeps_all_properties() {
        let mask = SelectExpandMask::new(&[], &paths(&["Orders/Items"]));
        assert!(mask.selects_all());
        let orders = mask.member("Orders").unwrap();
        assert!(!orders.selected);
        assert!(orders.nested.is_expanded("Items"));
        assert_eq!(orders.nested.members.len(), 1);
    }
}
