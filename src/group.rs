use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::items::GenomeItem;

/// A named region of a genome instance. Subsets point at their parent group;
/// at most one subset of a parent is active at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: Option<String>,
    pub parent: Option<String>,
    pub active_subset: Option<String>,
    pub members: BTreeSet<String>,
}

impl Group {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
            parent: None,
            active_subset: None,
            members: BTreeSet::new(),
        }
    }

    pub fn subset_of(id: impl Into<String>, name: impl Into<String>, parent: &str) -> Self {
        Self {
            parent: Some(parent.to_string()),
            ..Self::new(id, name)
        }
    }

    pub fn is_subset(&self) -> bool {
        self.parent.is_some()
    }

    /// Id of a group inherited `generation` levels below the root instance.
    pub fn inherited_id(base_id: &str, generation: u32) -> String {
        if generation == 0 {
            base_id.to_string()
        } else {
            format!("{base_id}:{generation}")
        }
    }

    pub fn base_id(id: &str) -> &str {
        match id.rsplit_once(':') {
            Some((base, generation)) if generation.chars().all(|ch| ch.is_ascii_digit()) => base,
            _ => id,
        }
    }

    pub fn generation(id: &str) -> u32 {
        id.rsplit_once(':')
            .and_then(|(_, generation)| generation.parse().ok())
            .unwrap_or(0)
    }

    /// Empty copy of this group for a model `generation` levels down, with
    /// parent and active-subset pointers renamed into the same generation.
    pub fn inherit(&self, generation: u32) -> Group {
        let requalify = |id: &String| Group::inherited_id(Group::base_id(id), generation);
        Group {
            id: requalify(&self.id),
            name: self.name.clone(),
            parent: self.parent.as_ref().map(requalify),
            active_subset: self.active_subset.as_ref().map(requalify),
            members: BTreeSet::new(),
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

impl GenomeItem for Group {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Source and target groups of a link instance. Ordering follows the
/// internal group ids, not display names, which keeps persisted ordering
/// stable across files.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupTuple {
    pub source: Option<String>,
    pub target: Option<String>,
}

impl GroupTuple {
    pub fn new(source: Option<String>, target: Option<String>) -> Self {
        Self { source, target }
    }

    pub fn is_cross_region(&self) -> bool {
        self.source != self.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inherited_ids_carry_generation() {
        assert_eq!(Group::inherited_id("g3", 0), "g3");
        assert_eq!(Group::inherited_id("g3", 2), "g3:2");
        assert_eq!(Group::base_id("g3:2"), "g3");
        assert_eq!(Group::generation("g3:2"), 2);
        assert_eq!(Group::generation("g3"), 0);
    }

    #[test]
    fn tuples_order_by_internal_id() {
        let a = GroupTuple::new(Some("g10".to_string()), None);
        let b = GroupTuple::new(Some("g9".to_string()), None);
        assert!(a < b);
    }
}
