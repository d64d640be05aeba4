use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::change::{GenomeChangeKind, GenomeProperties, InstanceChange, TimeBounds};
use crate::domain::{GroupMode, InstanceId};
use crate::error::GenomeError;
use crate::group::{Group, GroupTuple};
use crate::items::{Activity, LinkageInstance, NodeInstance};
use crate::overlay::OverlayOwner;
use crate::store::ItemStore;

pub type InstanceStore = ItemStore<NodeInstance, NodeInstance, LinkageInstance>;

/// A named model below the root genome.
///
/// Names, sizes, evidence and link signs are never stored here; they are read
/// from the root genome by base id. Everything in this struct is local to the
/// model: which root items occur, their pads and activity, and the groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenomeInstance {
    pub id: String,
    vfg_parent: Option<String>,
    generation: u32,
    props: GenomeProperties,
    store: InstanceStore,
    groups: BTreeMap<String, Group>,
}

impl GenomeInstance {
    /// A root instance: no parent, generation 0.
    pub fn new_root(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::with_parent(id, name, None, 0)
    }

    pub fn new_child(
        id: impl Into<String>,
        name: impl Into<String>,
        parent: &GenomeInstance,
    ) -> Self {
        Self::with_parent(id, name, Some(parent.id.clone()), parent.generation + 1)
    }

    pub(crate) fn with_parent(
        id: impl Into<String>,
        name: impl Into<String>,
        vfg_parent: Option<String>,
        generation: u32,
    ) -> Self {
        let id = id.into();
        Self {
            store: ItemStore::new(id.clone(), OverlayOwner::Instance(id.clone())),
            props: GenomeProperties::named(name),
            vfg_parent,
            generation,
            groups: BTreeMap::new(),
            id,
        }
    }

    pub fn vfg_parent(&self) -> Option<&str> {
        self.vfg_parent.as_deref()
    }

    pub fn is_root_instance(&self) -> bool {
        self.vfg_parent.is_none()
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn properties(&self) -> &GenomeProperties {
        &self.props
    }

    pub fn name(&self) -> &str {
        &self.props.name
    }

    pub fn time_bounds(&self) -> Option<TimeBounds> {
        self.props.time_bounds
    }

    pub fn store(&self) -> &InstanceStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut InstanceStore {
        &mut self.store
    }

    pub fn is_gene(&self, id: &str) -> bool {
        self.store.gene(id).is_some()
    }

    /// Gene or node instance with this id.
    pub fn node(&self, id: &str) -> Option<&NodeInstance> {
        self.store.gene(id).or_else(|| self.store.node(id))
    }

    pub fn all_nodes(&self) -> impl Iterator<Item = &NodeInstance> {
        self.store.genes().chain(self.store.nodes())
    }

    pub fn link(&self, id: &str) -> Option<&LinkageInstance> {
        self.store.link(id)
    }

    /// Instances of root item `base_id` in this model.
    pub fn instances_of<'a>(&'a self, base_id: &'a str) -> impl Iterator<Item = &'a NodeInstance> {
        self.all_nodes()
            .filter(move |node| InstanceId::base_of(&node.id) == base_id)
    }

    pub fn link_instances_of<'a>(
        &'a self,
        base_id: &'a str,
    ) -> impl Iterator<Item = &'a LinkageInstance> {
        self.store
            .links()
            .filter(move |link| InstanceId::base_of(&link.id) == base_id)
    }

    /// Links with `node_id` at either end.
    pub fn incident_links(&self, node_id: &str) -> Vec<String> {
        self.store
            .links()
            .filter(|link| link.source == node_id || link.target == node_id)
            .map(|link| link.id.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    fn change(&self, kind: GenomeChangeKind<NodeInstance, NodeInstance, LinkageInstance>) -> InstanceChange {
        InstanceChange {
            genome_id: self.id.clone(),
            kind,
        }
    }

    pub(crate) fn replace_items(&mut self, store: InstanceStore) {
        self.store = store;
    }

    pub(crate) fn replace_groups(&mut self, groups: BTreeMap<String, Group>) {
        self.groups = groups;
    }

    pub fn change_properties(&mut self, new: GenomeProperties) -> Result<InstanceChange, GenomeError> {
        if let Some(bounds) = new.time_bounds {
            if bounds.min_time > bounds.max_time {
                return Err(GenomeError::Precondition(format!(
                    "time bounds {}..{} of {} run backwards",
                    bounds.min_time, bounds.max_time, self.id
                )));
            }
        }
        let orig = std::mem::replace(&mut self.props, new.clone());
        Ok(self.change(GenomeChangeKind::Properties { orig, new }))
    }

    pub fn set_time_bounds(&mut self, bounds: Option<TimeBounds>) -> Result<InstanceChange, GenomeError> {
        let new = GenomeProperties {
            time_bounds: bounds,
            ..self.props.clone()
        };
        self.change_properties(new)
    }

    pub fn add_node_instance(&mut self, node: NodeInstance, is_gene: bool) -> Result<InstanceChange, GenomeError> {
        node.id.parse::<InstanceId>()?;
        if is_gene {
            self.store.add_gene(node)
        } else {
            self.store.add_node(node)
        }
    }

    /// Adds a link whose ends are already present here.
    pub fn add_link_instance(&mut self, link: LinkageInstance) -> Result<InstanceChange, GenomeError> {
        link.id.parse::<InstanceId>()?;
        for end in [&link.source, &link.target] {
            if self.node(end).is_none() {
                return Err(GenomeError::missing(&self.id, "node", end));
            }
        }
        self.store.add_link(link)
    }

    pub fn change_link_pads(
        &mut self,
        link_id: &str,
        launch_pad: i32,
        landing_pad: i32,
    ) -> Result<InstanceChange, GenomeError> {
        self.store.modify_link(link_id, |link| {
            link.launch_pad = launch_pad;
            link.landing_pad = landing_pad;
            Ok(())
        })
    }

    pub fn change_link_activity(&mut self, link_id: &str, activity: Activity) -> Result<InstanceChange, GenomeError> {
        self.store.modify_link(link_id, |link| {
            link.activity = activity;
            Ok(())
        })
    }

    pub fn change_link_description(
        &mut self,
        link_id: &str,
        description: Option<String>,
    ) -> Result<InstanceChange, GenomeError> {
        self.store.modify_link(link_id, |link| {
            link.description = description;
            Ok(())
        })
    }

    fn modify_any_node<F>(&mut self, node_id: &str, edit: F) -> Result<InstanceChange, GenomeError>
    where
        F: FnOnce(&mut NodeInstance) -> Result<(), GenomeError>,
    {
        if self.store.gene(node_id).is_some() {
            self.store.modify_gene(node_id, edit)
        } else {
            self.store.modify_node(node_id, edit)
        }
    }

    pub fn change_node_activity(&mut self, node_id: &str, activity: Activity) -> Result<InstanceChange, GenomeError> {
        if let Activity::Variable(level) = activity {
            if !(0.0..=1.0).contains(&level) {
                return Err(GenomeError::Precondition(format!(
                    "activity level {level} outside 0..1"
                )));
            }
        }
        self.modify_any_node(node_id, |node| {
            node.activity = activity;
            Ok(())
        })
    }

    pub fn change_node_description(
        &mut self,
        node_id: &str,
        description: Option<String>,
    ) -> Result<InstanceChange, GenomeError> {
        self.modify_any_node(node_id, |node| {
            node.description = description;
            Ok(())
        })
    }

    pub fn change_override_name(
        &mut self,
        node_id: &str,
        name: Option<String>,
    ) -> Result<InstanceChange, GenomeError> {
        self.modify_any_node(node_id, |node| {
            node.override_name = name;
            Ok(())
        })
    }

    /// Removes the node, its incident links and its group memberships.
    pub fn remove_node_instance(&mut self, node_id: &str) -> Result<Vec<InstanceChange>, GenomeError> {
        if self.node(node_id).is_none() {
            return Err(GenomeError::missing(&self.id, "node", node_id));
        }
        let mut changes = Vec::new();
        for link_id in self.incident_links(node_id) {
            changes.push(self.store.remove_link(&link_id)?);
        }
        let holding: Vec<String> = self
            .groups
            .values()
            .filter(|group| group.members.contains(node_id))
            .map(|group| group.id.clone())
            .collect();
        for group_id in holding {
            changes.push(self.remove_group_member(&group_id, node_id)?);
        }
        changes.push(self.store.remove_gene_or_node(node_id)?);
        Ok(changes)
    }

    pub fn remove_link_instance(&mut self, link_id: &str) -> Result<InstanceChange, GenomeError> {
        self.store.remove_link(link_id)
    }

    pub fn group(&self, id: &str) -> Option<&Group> {
        self.groups.get(id)
    }

    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    pub fn group_map(&self) -> &BTreeMap<String, Group> {
        &self.groups
    }

    pub fn add_group(&mut self, group: Group) -> Result<InstanceChange, GenomeError> {
        if self.groups.contains_key(&group.id) {
            return Err(GenomeError::duplicate(&self.id, &group.id));
        }
        if let Some(parent) = &group.parent {
            if !self.groups.contains_key(parent) {
                return Err(GenomeError::missing(&self.id, "group", parent));
            }
        }
        for member in &group.members {
            if self.node(member).is_none() {
                return Err(GenomeError::missing(&self.id, "node", member));
            }
        }
        self.groups.insert(group.id.clone(), group.clone());
        Ok(self.change(GenomeChangeKind::Group {
            orig: None,
            new: Some(group),
        }))
    }

    fn modify_group<F>(&mut self, group_id: &str, edit: F) -> Result<InstanceChange, GenomeError>
    where
        F: FnOnce(&mut Group) -> Result<(), GenomeError>,
    {
        let stored = self
            .groups
            .get(group_id)
            .ok_or_else(|| GenomeError::missing(&self.id, "group", group_id))?;
        let orig = stored.clone();
        let mut updated = orig.clone();
        edit(&mut updated)?;
        self.groups.insert(group_id.to_string(), updated.clone());
        Ok(self.change(GenomeChangeKind::Group {
            orig: Some(orig),
            new: Some(updated),
        }))
    }

    /// Removes a group together with its subsets. A removed active subset
    /// also clears its parent's pointer.
    pub fn remove_group(&mut self, group_id: &str) -> Result<Vec<InstanceChange>, GenomeError> {
        let group = self
            .groups
            .get(group_id)
            .cloned()
            .ok_or_else(|| GenomeError::missing(&self.id, "group", group_id))?;
        let mut changes = Vec::new();
        let subsets: Vec<String> = self
            .groups
            .values()
            .filter(|candidate| candidate.parent.as_deref() == Some(group_id))
            .map(|candidate| candidate.id.clone())
            .collect();
        for subset in subsets {
            let removed = self
                .groups
                .remove(&subset)
                .ok_or_else(|| GenomeError::missing(&self.id, "group", &subset))?;
            changes.push(self.change(GenomeChangeKind::Group {
                orig: Some(removed),
                new: None,
            }));
        }
        if let Some(parent) = &group.parent {
            let parent_points_here = self
                .groups
                .get(parent)
                .is_some_and(|parent| parent.active_subset.as_deref() == Some(group_id));
            if parent_points_here {
                changes.push(self.modify_group(parent, |parent| {
                    parent.active_subset = None;
                    Ok(())
                })?);
            }
        }
        self.groups.remove(group_id);
        changes.push(self.change(GenomeChangeKind::Group {
            orig: Some(group),
            new: None,
        }));
        Ok(changes)
    }

    pub fn rename_group(&mut self, group_id: &str, name: &str) -> Result<InstanceChange, GenomeError> {
        self.modify_group(group_id, |group| {
            group.name = Some(name.to_string());
            Ok(())
        })
    }

    pub fn add_group_member(&mut self, group_id: &str, node_id: &str) -> Result<InstanceChange, GenomeError> {
        if self.node(node_id).is_none() {
            return Err(GenomeError::missing(&self.id, "node", node_id));
        }
        self.modify_group(group_id, |group| {
            if !group.members.insert(node_id.to_string()) {
                return Err(GenomeError::duplicate(&group.id, node_id));
            }
            Ok(())
        })
    }

    pub fn remove_group_member(&mut self, group_id: &str, node_id: &str) -> Result<InstanceChange, GenomeError> {
        self.modify_group(group_id, |group| {
            if !group.members.remove(node_id) {
                return Err(GenomeError::missing(&group.id, "group member", node_id));
            }
            Ok(())
        })
    }

    pub fn set_active_subset(
        &mut self,
        parent_id: &str,
        subset_id: Option<&str>,
    ) -> Result<InstanceChange, GenomeError> {
        if let Some(subset_id) = subset_id {
            let subset = self
                .groups
                .get(subset_id)
                .ok_or_else(|| GenomeError::missing(&self.id, "group", subset_id))?;
            if subset.parent.as_deref() != Some(parent_id) {
                return Err(GenomeError::Precondition(format!(
                    "{subset_id} is not a subset of {parent_id}"
                )));
            }
        }
        self.modify_group(parent_id, |parent| {
            parent.active_subset = subset_id.map(str::to_string);
            Ok(())
        })
    }

    /// Adds the generation-qualified copy of `subset_base` under `parent_id`
    /// and makes it the parent's active subset. The two records belong
    /// together; callers apply or undo both.
    pub fn activate_subgroup(
        &mut self,
        parent_id: &str,
        subset_base: &str,
        name: &str,
    ) -> Result<Vec<InstanceChange>, GenomeError> {
        if !self.groups.contains_key(parent_id) {
            return Err(GenomeError::missing(&self.id, "group", parent_id));
        }
        let subset_id = Group::inherited_id(Group::base_id(subset_base), self.generation);
        if let Some(existing) = self.groups.get(&subset_id) {
            if existing.parent.as_deref() != Some(parent_id) {
                return Err(GenomeError::Precondition(format!(
                    "{subset_id} already belongs to another group"
                )));
            }
        }
        let mut changes = Vec::with_capacity(2);
        if !self.groups.contains_key(&subset_id) {
            changes.push(self.add_group(Group::subset_of(&subset_id, name, parent_id))?);
        }
        changes.push(self.set_active_subset(parent_id, Some(&subset_id))?);
        Ok(changes)
    }

    /// The single group reported as owning `node_id` under `mode`.
    pub fn group_for_node(&self, node_id: &str, mode: GroupMode) -> Option<&Group> {
        match mode {
            GroupMode::Legacy => self.legacy_group_for_node(node_id),
            GroupMode::AlwaysMainGroup => self.main_group_for_node(node_id),
            GroupMode::MainGroupAsFallback => self
                .legacy_group_for_node(node_id)
                .or_else(|| self.main_group_for_node(node_id)),
        }
    }

    fn legacy_group_for_node(&self, node_id: &str) -> Option<&Group> {
        self.groups
            .values()
            .filter(|group| group.members.contains(node_id))
            .find(|group| match &group.parent {
                Some(parent) => self
                    .groups
                    .get(parent)
                    .is_some_and(|parent| parent.active_subset.as_deref() == Some(group.id.as_str())),
                None => !group
                    .active_subset
                    .as_ref()
                    .and_then(|subset| self.groups.get(subset))
                    .is_some_and(|subset| subset.members.contains(node_id)),
            })
    }

    fn main_group_for_node(&self, node_id: &str) -> Option<&Group> {
        self.groups
            .values()
            .filter(|group| group.members.contains(node_id))
            .find_map(|group| match &group.parent {
                None => Some(group),
                Some(parent) => self.groups.get(parent),
            })
    }

    pub fn group_tuple_for_link(&self, link_id: &str, mode: GroupMode) -> Option<GroupTuple> {
        let link = self.store.link(link_id)?;
        let source = self.group_for_node(&link.source, mode).map(|group| group.id.clone());
        let target = self.group_for_node(&link.target, mode).map(|group| group.id.clone());
        Some(GroupTuple::new(source, target))
    }

    /// Region name used to look up expression data: a subset without its
    /// own name reports its parent's name.
    pub fn region_name(&self, group_id: &str) -> Option<&str> {
        let group = self.groups.get(group_id)?;
        match (&group.name, &group.parent) {
            (Some(name), _) => Some(name),
            (None, Some(parent)) => self.region_name(parent),
            (None, None) => None,
        }
    }

    pub fn change_undo(&mut self, change: &InstanceChange) -> Result<(), GenomeError> {
        self.replay(change, true)
    }

    pub fn change_redo(&mut self, change: &InstanceChange) -> Result<(), GenomeError> {
        self.replay(change, false)
    }

    fn replay(&mut self, change: &InstanceChange, undo: bool) -> Result<(), GenomeError> {
        match &change.kind {
            GenomeChangeKind::Group { orig, new } => {
                let (gone, back) = if undo { (new, orig) } else { (orig, new) };
                if let Some(gone) = gone {
                    self.groups.remove(&gone.id);
                }
                if let Some(back) = back {
                    self.groups.insert(back.id.clone(), back.clone());
                }
                Ok(())
            }
            GenomeChangeKind::Properties { orig, new } => {
                self.props = if undo { orig.clone() } else { new.clone() };
                Ok(())
            }
            _ if undo => self.store.change_undo(change),
            _ => self.store.change_redo(change),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model_with_groups() -> GenomeInstance {
        let mut model = GenomeInstance::new_root("gi1", "Embryo");
        model
            .add_node_instance(NodeInstance::new("g1:0"), true)
            .unwrap();
        model
            .add_node_instance(NodeInstance::new("g2:0"), true)
            .unwrap();
        let mut main = Group::new("grp0", "Endoderm");
        main.members.extend(["g1:0".to_string(), "g2:0".to_string()]);
        model.add_group(main).unwrap();
        let mut veg = Group::subset_of("grp1", "Veg1", "grp0");
        veg.members.insert("g1:0".to_string());
        model.add_group(veg).unwrap();
        model
    }

    #[test]
    fn legacy_mode_respects_active_subset() {
        let mut model = model_with_groups();
        assert_eq!(
            model.group_for_node("g1:0", GroupMode::Legacy).map(|g| g.id.as_str()),
            Some("grp0")
        );
        model.set_active_subset("grp0", Some("grp1")).unwrap();
        assert_eq!(
            model.group_for_node("g1:0", GroupMode::Legacy).map(|g| g.id.as_str()),
            Some("grp1")
        );
        assert_eq!(
            model
                .group_for_node("g1:0", GroupMode::AlwaysMainGroup)
                .map(|g| g.id.as_str()),
            Some("grp0")
        );
        assert_eq!(
            model.group_for_node("g2:0", GroupMode::Legacy).map(|g| g.id.as_str()),
            Some("grp0")
        );
    }

    #[test]
    fn removing_node_takes_links_and_memberships() {
        let mut model = model_with_groups();
        model
            .add_link_instance(LinkageInstance::new("L1:0", "g1:0", "g2:0"))
            .unwrap();
        let before = model.clone();
        let changes = model.remove_node_instance("g1:0").unwrap();
        assert!(model.link("L1:0").is_none());
        assert!(!model.group("grp0").unwrap().members.contains("g1:0"));
        for change in changes.iter().rev() {
            model.change_undo(change).unwrap();
        }
        assert_eq!(model, before);
    }
}
