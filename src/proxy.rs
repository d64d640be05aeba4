use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{DynamicKey, TimeSelector};
use crate::dynamic::DynamicGenomeInstance;
use crate::error::GenomeError;
use crate::group::Group;
use crate::instance::GenomeInstance;
use crate::items::Note;
use crate::overlay::{OverlayOwner, OverlaySupport};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyProperties {
    pub name: String,
    pub is_single: bool,
    pub min_time: i32,
    pub max_time: i32,
}

impl ProxyProperties {
    /// Time selectors of every model this family produces.
    pub fn proxied_times(&self) -> Vec<TimeSelector> {
        if self.is_single {
            vec![TimeSelector::All]
        } else {
            (self.min_time..=self.max_time).map(TimeSelector::Hour).collect()
        }
    }

    fn check(&self) -> Result<(), GenomeError> {
        if self.min_time > self.max_time {
            return Err(GenomeError::Precondition(format!(
                "proxy hours {}..{} run backwards",
                self.min_time, self.max_time
            )));
        }
        Ok(())
    }
}

/// A parent node that is not in any region but is placed in one of the
/// proxy's groups for expression lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddedNode {
    pub node_id: String,
    pub group_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProxyChangeKind {
    Properties {
        orig: ProxyProperties,
        new: ProxyProperties,
    },
    Group {
        orig: Option<Group>,
        new: Option<Group>,
    },
    Note {
        orig: Option<Note>,
        new: Option<Note>,
    },
    AddedNode {
        orig: Option<AddedNode>,
        new: Option<AddedNode>,
    },
    Image {
        time: TimeSelector,
        orig: Option<String>,
        new: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyChange {
    pub proxy_id: String,
    pub kind: ProxyChangeKind,
}

/// Shared structural state of a family of time-sliced dynamic models.
///
/// Groups, notes, added nodes, images and overlays live here once and are
/// read by every materialized [`DynamicGenomeInstance`]. Every mutator clears
/// the materialization cache.
#[derive(Debug)]
pub struct DynamicInstanceProxy {
    pub id: String,
    vfg_parent: String,
    generation: u32,
    props: ProxyProperties,
    groups: BTreeMap<String, Group>,
    notes: BTreeMap<String, Note>,
    added_nodes: BTreeMap<String, AddedNode>,
    images: BTreeMap<TimeSelector, String>,
    overlays: OverlaySupport,
    cache: RefCell<BTreeMap<TimeSelector, Rc<DynamicGenomeInstance>>>,
}

impl Clone for DynamicInstanceProxy {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            vfg_parent: self.vfg_parent.clone(),
            generation: self.generation,
            props: self.props.clone(),
            groups: self.groups.clone(),
            notes: self.notes.clone(),
            added_nodes: self.added_nodes.clone(),
            images: self.images.clone(),
            overlays: self.overlays.clone(),
            cache: RefCell::new(BTreeMap::new()),
        }
    }
}

impl PartialEq for DynamicInstanceProxy {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.vfg_parent == other.vfg_parent
            && self.generation == other.generation
            && self.props == other.props
            && self.groups == other.groups
            && self.notes == other.notes
            && self.added_nodes == other.added_nodes
            && self.images == other.images
            && self.overlays == other.overlays
    }
}

impl DynamicInstanceProxy {
    /// A proxy below `parent`, inheriting the parent's groups one generation down.
    pub fn new(
        id: impl Into<String>,
        parent: &GenomeInstance,
        props: ProxyProperties,
    ) -> Result<Self, GenomeError> {
        props.check()?;
        let generation = parent.generation() + 1;
        let groups = parent
            .groups()
            .map(|group| group.inherit(generation))
            .map(|group| (group.id.clone(), group))
            .collect();
        Ok(Self::from_parts(id, parent.id.clone(), generation, props, groups))
    }

    pub(crate) fn from_parts(
        id: impl Into<String>,
        vfg_parent: String,
        generation: u32,
        props: ProxyProperties,
        groups: BTreeMap<String, Group>,
    ) -> Self {
        let id = id.into();
        Self {
            overlays: OverlaySupport::new(OverlayOwner::Proxy(id.clone())),
            id,
            vfg_parent,
            generation,
            props,
            groups,
            notes: BTreeMap::new(),
            added_nodes: BTreeMap::new(),
            images: BTreeMap::new(),
            cache: RefCell::new(BTreeMap::new()),
        }
    }

    pub fn vfg_parent(&self) -> &str {
        &self.vfg_parent
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn properties(&self) -> &ProxyProperties {
        &self.props
    }

    pub fn name(&self) -> &str {
        &self.props.name
    }

    pub fn is_single(&self) -> bool {
        self.props.is_single
    }

    pub fn min_time(&self) -> i32 {
        self.props.min_time
    }

    pub fn max_time(&self) -> i32 {
        self.props.max_time
    }

    pub fn proxied_keys(&self) -> Vec<DynamicKey> {
        self.props
            .proxied_times()
            .into_iter()
            .map(|time| DynamicKey::new(&self.id, time))
            .collect()
    }

    pub fn has_key(&self, key: &DynamicKey) -> bool {
        key.proxy_id == self.id && self.props.proxied_times().contains(&key.time)
    }

    /// Hours a model with selector `time` aggregates.
    pub fn times_for(&self, time: TimeSelector) -> Vec<i32> {
        match time {
            TimeSelector::All => (self.props.min_time..=self.props.max_time).collect(),
            TimeSelector::Hour(hour) => vec![hour],
        }
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

    /// Expression lookup name for a group, falling back to its parent's name.
    pub fn region_name(&self, group_id: &str) -> Option<&str> {
        let group = self.groups.get(group_id)?;
        match (&group.name, &group.parent) {
            (Some(name), _) => Some(name),
            (None, Some(parent)) => self.region_name(parent),
            (None, None) => None,
        }
    }

    pub fn note(&self, id: &str) -> Option<&Note> {
        self.notes.get(id)
    }

    pub fn notes(&self) -> impl Iterator<Item = &Note> {
        self.notes.values()
    }

    pub fn added_node(&self, node_id: &str) -> Option<&AddedNode> {
        self.added_nodes.get(node_id)
    }

    pub fn added_nodes(&self) -> impl Iterator<Item = &AddedNode> {
        self.added_nodes.values()
    }

    pub fn image(&self, time: TimeSelector) -> Option<&str> {
        self.images.get(&time).map(String::as_str)
    }

    pub fn images(&self) -> impl Iterator<Item = (&TimeSelector, &String)> {
        self.images.iter()
    }

    pub fn overlays(&self) -> &OverlaySupport {
        &self.overlays
    }

    pub fn overlays_mut(&mut self) -> &mut OverlaySupport {
        self.clear_cache();
        &mut self.overlays
    }

    pub fn clear_cache(&self) {
        let mut cache = self.cache.borrow_mut();
        if !cache.is_empty() {
            debug!(proxy = %self.id, dropped = cache.len(), "dynamic model cache cleared");
            cache.clear();
        }
    }

    pub fn cached_count(&self) -> usize {
        self.cache.borrow().len()
    }

    /// Cached model for `key`, created uninitialized on first request.
    pub fn instance_for(&self, key: &DynamicKey) -> Result<Rc<DynamicGenomeInstance>, GenomeError> {
        if !self.has_key(key) {
            return Err(GenomeError::InvalidKey(key.to_string()));
        }
        let mut cache = self.cache.borrow_mut();
        let instance = cache
            .entry(key.time)
            .or_insert_with(|| Rc::new(DynamicGenomeInstance::new(key.clone())));
        Ok(Rc::clone(instance))
    }

    fn change(&self, kind: ProxyChangeKind) -> ProxyChange {
        ProxyChange {
            proxy_id: self.id.clone(),
            kind,
        }
    }

    /// New name, mode or hour range. Callers remap image, tree path and
    /// startup references with [`DynamicInstanceProxy::time_key_remap`].
    pub fn change_properties(&mut self, new: ProxyProperties) -> Result<ProxyChange, GenomeError> {
        new.check()?;
        self.clear_cache();
        let orig = std::mem::replace(&mut self.props, new.clone());
        Ok(self.change(ProxyChangeKind::Properties { orig, new }))
    }

    /// Where each old time selector lands after a property change; `None`
    /// means the old model no longer exists.
    ///
    /// Hourly to hourly keeps the overlapping hours. Hourly to single keeps
    /// only the first hour, which becomes `ALL`. Single to hourly moves `ALL`
    /// to the new first hour.
    pub fn time_key_remap(
        old: &ProxyProperties,
        new: &ProxyProperties,
    ) -> BTreeMap<TimeSelector, Option<TimeSelector>> {
        old.proxied_times()
            .into_iter()
            .map(|time| {
                let target = match (old.is_single, new.is_single, time) {
                    (true, true, _) => Some(TimeSelector::All),
                    (true, false, _) => Some(TimeSelector::Hour(new.min_time)),
                    (false, true, TimeSelector::Hour(hour)) => {
                        (hour == old.min_time).then_some(TimeSelector::All)
                    }
                    (false, false, TimeSelector::Hour(hour)) => (new.min_time <= hour
                        && hour <= new.max_time)
                        .then_some(TimeSelector::Hour(hour)),
                    (false, _, TimeSelector::All) => None,
                };
                (time, target)
            })
            .collect()
    }

    pub fn add_group(&mut self, group: Group) -> Result<ProxyChange, GenomeError> {
        if self.groups.contains_key(&group.id) {
            return Err(GenomeError::duplicate(&self.id, &group.id));
        }
        if let Some(parent) = &group.parent {
            if !self.groups.contains_key(parent) {
                return Err(GenomeError::missing(&self.id, "group", parent));
            }
        }
        self.clear_cache();
        self.groups.insert(group.id.clone(), group.clone());
        Ok(self.change(ProxyChangeKind::Group {
            orig: None,
            new: Some(group),
        }))
    }

    fn modify_group<F>(&mut self, group_id: &str, edit: F) -> Result<ProxyChange, GenomeError>
    where
        F: FnOnce(&mut Group),
    {
        let orig = self
            .groups
            .get(group_id)
            .cloned()
            .ok_or_else(|| GenomeError::missing(&self.id, "group", group_id))?;
        let mut updated = orig.clone();
        edit(&mut updated);
        self.clear_cache();
        self.groups.insert(group_id.to_string(), updated.clone());
        Ok(self.change(ProxyChangeKind::Group {
            orig: Some(orig),
            new: Some(updated),
        }))
    }

    pub fn rename_group(&mut self, group_id: &str, name: &str) -> Result<ProxyChange, GenomeError> {
        self.modify_group(group_id, |group| group.name = Some(name.to_string()))
    }

    pub fn set_active_subset(
        &mut self,
        parent_id: &str,
        subset_id: Option<&str>,
    ) -> Result<ProxyChange, GenomeError> {
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
        self.modify_group(parent_id, |group| {
            group.active_subset = subset_id.map(str::to_string)
        })
    }

    /// Removes a group, its subsets and every added node placed in them.
    pub fn remove_group(&mut self, group_id: &str) -> Result<Vec<ProxyChange>, GenomeError> {
        if !self.groups.contains_key(group_id) {
            return Err(GenomeError::missing(&self.id, "group", group_id));
        }
        let doomed: Vec<String> = self
            .groups
            .values()
            .filter(|group| group.id == group_id || group.parent.as_deref() == Some(group_id))
            .map(|group| group.id.clone())
            .collect();
        let mut changes = Vec::new();
        let stranded: Vec<String> = self
            .added_nodes
            .values()
            .filter(|added| doomed.contains(&added.group_id))
            .map(|added| added.node_id.clone())
            .collect();
        for node_id in stranded {
            changes.push(self.remove_added_node(&node_id)?);
        }
        self.clear_cache();
        for id in doomed.iter().filter(|id| id.as_str() != group_id) {
            if let Some(removed) = self.groups.remove(id) {
                changes.push(self.change(ProxyChangeKind::Group {
                    orig: Some(removed),
                    new: None,
                }));
            }
        }
        if let Some(removed) = self.groups.remove(group_id) {
            changes.push(self.change(ProxyChangeKind::Group {
                orig: Some(removed),
                new: None,
            }));
        }
        Ok(changes)
    }

    pub fn add_note(&mut self, note: Note) -> Result<ProxyChange, GenomeError> {
        if self.notes.contains_key(&note.id) {
            return Err(GenomeError::duplicate(&self.id, &note.id));
        }
        self.clear_cache();
        self.notes.insert(note.id.clone(), note.clone());
        Ok(self.change(ProxyChangeKind::Note {
            orig: None,
            new: Some(note),
        }))
    }

    pub fn change_note(&mut self, note: Note) -> Result<ProxyChange, GenomeError> {
        let orig = self
            .notes
            .get(&note.id)
            .cloned()
            .ok_or_else(|| GenomeError::missing(&self.id, "note", &note.id))?;
        self.clear_cache();
        self.notes.insert(note.id.clone(), note.clone());
        Ok(self.change(ProxyChangeKind::Note {
            orig: Some(orig),
            new: Some(note),
        }))
    }

    pub fn remove_note(&mut self, id: &str) -> Result<ProxyChange, GenomeError> {
        let removed = self
            .notes
            .remove(id)
            .ok_or_else(|| GenomeError::missing(&self.id, "note", id))?;
        self.clear_cache();
        Ok(self.change(ProxyChangeKind::Note {
            orig: Some(removed),
            new: None,
        }))
    }

    pub fn add_added_node(&mut self, added: AddedNode) -> Result<ProxyChange, GenomeError> {
        if !self.groups.contains_key(&added.group_id) {
            return Err(GenomeError::missing(&self.id, "group", &added.group_id));
        }
        if self.added_nodes.contains_key(&added.node_id) {
            return Err(GenomeError::duplicate(&self.id, &added.node_id));
        }
        self.clear_cache();
        self.added_nodes.insert(added.node_id.clone(), added.clone());
        Ok(self.change(ProxyChangeKind::AddedNode {
            orig: None,
            new: Some(added),
        }))
    }

    pub fn remove_added_node(&mut self, node_id: &str) -> Result<ProxyChange, GenomeError> {
        let removed = self
            .added_nodes
            .remove(node_id)
            .ok_or_else(|| GenomeError::missing(&self.id, "added node", node_id))?;
        self.clear_cache();
        Ok(self.change(ProxyChangeKind::AddedNode {
            orig: Some(removed),
            new: None,
        }))
    }

    /// Sets or clears the image key for one time slice. Reference counts are
    /// the caller's business.
    pub fn set_image(&mut self, time: TimeSelector, image: Option<String>) -> Result<ProxyChange, GenomeError> {
        if !self.props.proxied_times().contains(&time) {
            return Err(GenomeError::InvalidKey(DynamicKey::new(&self.id, time).to_string()));
        }
        let orig = match &image {
            Some(key) => self.images.insert(time, key.clone()),
            None => self.images.remove(&time),
        };
        Ok(self.change(ProxyChangeKind::Image {
            time,
            orig,
            new: image,
        }))
    }

    pub fn change_undo(&mut self, change: &ProxyChange) -> Result<(), GenomeError> {
        self.replay(change, true)
    }

    pub fn change_redo(&mut self, change: &ProxyChange) -> Result<(), GenomeError> {
        self.replay(change, false)
    }

    fn replay(&mut self, change: &ProxyChange, undo: bool) -> Result<(), GenomeError> {
        if change.proxy_id != self.id {
            return Err(GenomeError::Precondition(format!(
                "record for proxy {} replayed on {}",
                change.proxy_id, self.id
            )));
        }
        self.clear_cache();
        match &change.kind {
            ProxyChangeKind::Properties { orig, new } => {
                self.props = if undo { orig.clone() } else { new.clone() };
            }
            ProxyChangeKind::Group { orig, new } => {
                let (gone, back) = if undo { (new, orig) } else { (orig, new) };
                if let Some(gone) = gone {
                    self.groups.remove(&gone.id);
                }
                if let Some(back) = back {
                    self.groups.insert(back.id.clone(), back.clone());
                }
            }
            ProxyChangeKind::Note { orig, new } => {
                let (gone, back) = if undo { (new, orig) } else { (orig, new) };
                if let Some(gone) = gone {
                    self.notes.remove(&gone.id);
                }
                if let Some(back) = back {
                    self.notes.insert(back.id.clone(), back.clone());
                }
            }
            ProxyChangeKind::AddedNode { orig, new } => {
                let (gone, back) = if undo { (new, orig) } else { (orig, new) };
                if let Some(gone) = gone {
                    self.added_nodes.remove(&gone.node_id);
                }
                if let Some(back) = back {
                    self.added_nodes.insert(back.node_id.clone(), back.clone());
                }
            }
            ProxyChangeKind::Image { time, orig, new } => {
                let restored = if undo { orig } else { new };
                match restored {
                    Some(key) => {
                        self.images.insert(*time, key.clone());
                    }
                    None => {
                        self.images.remove(time);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(is_single: bool, min_time: i32, max_time: i32) -> ProxyProperties {
        ProxyProperties {
            name: "Timecourse".to_string(),
            is_single,
            min_time,
            max_time,
        }
    }

    #[test]
    fn hourly_to_hourly_keeps_overlap() {
        let remap = DynamicInstanceProxy::time_key_remap(&props(false, 2, 5), &props(false, 4, 8));
        assert_eq!(remap[&TimeSelector::Hour(2)], None);
        assert_eq!(remap[&TimeSelector::Hour(4)], Some(TimeSelector::Hour(4)));
        assert_eq!(remap[&TimeSelector::Hour(5)], Some(TimeSelector::Hour(5)));
    }

    #[test]
    fn mode_switches_move_first_hour() {
        let to_single = DynamicInstanceProxy::time_key_remap(&props(false, 2, 5), &props(true, 2, 5));
        assert_eq!(to_single[&TimeSelector::Hour(2)], Some(TimeSelector::All));
        assert_eq!(to_single[&TimeSelector::Hour(3)], None);
        let to_hourly = DynamicInstanceProxy::time_key_remap(&props(true, 2, 5), &props(false, 7, 9));
        assert_eq!(to_hourly[&TimeSelector::All], Some(TimeSelector::Hour(7)));
    }

    #[test]
    fn image_undo_restores_previous_key() {
        let parent = GenomeInstance::new_root("gi1", "Embryo");
        let mut proxy = DynamicInstanceProxy::new("dp1", &parent, props(false, 2, 5)).unwrap();
        proxy.set_image(TimeSelector::Hour(3), Some("img1".to_string())).unwrap();
        let change = proxy.set_image(TimeSelector::Hour(3), Some("img2".to_string())).unwrap();
        proxy.change_undo(&change).unwrap();
        assert_eq!(proxy.image(TimeSelector::Hour(3)), Some("img1"));
        assert!(proxy.set_image(TimeSelector::All, None).is_err());
    }
}
