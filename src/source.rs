use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use crate::change::{ChangeRecord, GenomeProperties, ModelTreeChange, TimeBounds};
use crate::db_genome::DbGenome;
use crate::domain::{DynamicKey, GenomeKey, GroupMode, InstanceId, NodeType, Sign, TargetLevel, TimeSelector};
use crate::dynamic::{DerivationContext, DynamicView};
use crate::error::GenomeError;
use crate::expression::{TemporalInputRangeData, TimeCourseData};
use crate::group::Group;
use crate::images::ImageManager;
use crate::instance::GenomeInstance;
use crate::items::{Activity, DbGene, DbLinkage, DbNode, LinkageInstance, NodeInstance, Note};
use crate::labeller::UniqueLabeller;
use crate::navigation::{Navigation, PathStop, StartupView, UserTreePath};
use crate::oracle::{FullGenomeHierarchyOracle, LinkOwner};
use crate::overlay::{OverlayOwner, OverlaySupport};
use crate::proxy::{AddedNode, DynamicInstanceProxy, ProxyProperties};
use crate::region;

/// Session-wide choices that affect derivation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceSettings {
    pub group_mode: GroupMode,
    pub sim_key: Option<String>,
}

/// Per-root id allocators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Labels {
    pub(crate) items: UniqueLabeller,
    pub(crate) models: UniqueLabeller,
    pub(crate) proxies: UniqueLabeller,
    pub(crate) groups: UniqueLabeller,
    pub(crate) overlays: UniqueLabeller,
    pub(crate) paths: UniqueLabeller,
}

impl Default for Labels {
    fn default() -> Self {
        Self {
            items: UniqueLabeller::new("n"),
            models: UniqueLabeller::new("gi"),
            proxies: UniqueLabeller::new("dp"),
            groups: UniqueLabeller::new("grp"),
            overlays: UniqueLabeller::new("ov"),
            paths: UniqueLabeller::new("tp"),
        }
    }
}

fn records<T: Into<ChangeRecord>>(changes: impl IntoIterator<Item = T>) -> Vec<ChangeRecord> {
    changes.into_iter().map(Into::into).collect()
}

/// Owner of the whole hierarchy: root genome, instance models, dynamic
/// proxies and the data dynamic models are derived from.
///
/// Every mutator validates first and then applies, returning the change
/// records that undo it. A rejected call leaves everything untouched.
#[derive(Debug, Clone)]
pub struct GenomeSource {
    pub(crate) root: DbGenome,
    pub(crate) instances: BTreeMap<String, GenomeInstance>,
    /// Creation order; a parent always precedes its children.
    pub(crate) instance_order: Vec<String>,
    pub(crate) proxies: BTreeMap<String, DynamicInstanceProxy>,
    pub(crate) time_course: TimeCourseData,
    pub(crate) temporal: TemporalInputRangeData,
    pub(crate) images: ImageManager,
    pub(crate) navigation: Navigation,
    pub(crate) labels: Labels,
    pub(crate) settings: SourceSettings,
}

impl GenomeSource {
    pub fn new(root_id: &str, name: &str) -> Self {
        let mut labels = Labels::default();
        labels.models.add_existing_label(root_id);
        Self {
            root: DbGenome::new(root_id, name),
            instances: BTreeMap::new(),
            instance_order: Vec::new(),
            proxies: BTreeMap::new(),
            time_course: TimeCourseData::default(),
            temporal: TemporalInputRangeData::default(),
            images: ImageManager::new(),
            navigation: Navigation::default(),
            labels,
            settings: SourceSettings::default(),
        }
    }

    /// Reassembles a hierarchy read from storage. Instances may come in any
    /// order; every id in use is registered with its labeller.
    pub fn from_parts(
        root: DbGenome,
        instances: Vec<GenomeInstance>,
        proxies: Vec<DynamicInstanceProxy>,
        time_course: TimeCourseData,
        temporal: TemporalInputRangeData,
        images: ImageManager,
        navigation: Navigation,
    ) -> Result<Self, GenomeError> {
        let mut source = Self::new(&root.id.clone(), root.name());
        source.root = root;
        source.time_course = time_course;
        source.temporal = temporal;
        source.images = images;
        source.navigation = navigation;

        let mut pending: BTreeMap<String, GenomeInstance> = BTreeMap::new();
        for instance in instances {
            if pending.contains_key(&instance.id) {
                return Err(GenomeError::duplicate("hierarchy", &instance.id));
            }
            pending.insert(instance.id.clone(), instance);
        }
        while !pending.is_empty() {
            let ready: Vec<String> = pending
                .values()
                .filter(|instance| {
                    instance
                        .vfg_parent()
                        .is_none_or(|parent| source.instances.contains_key(parent))
                })
                .map(|instance| instance.id.clone())
                .collect();
            if ready.is_empty() {
                let orphan = pending.keys().next().cloned().unwrap_or_default();
                return Err(GenomeError::missing("hierarchy", "parent model of", &orphan));
            }
            for id in ready {
                if let Some(instance) = pending.remove(&id) {
                    source.labels.models.add_existing_legacy_label(&id);
                    source.instance_order.push(id.clone());
                    source.instances.insert(id, instance);
                }
            }
        }
        for proxy in proxies {
            if !source.instances.contains_key(proxy.vfg_parent()) {
                return Err(GenomeError::missing("hierarchy", "parent model of", &proxy.id));
            }
            if source.proxies.contains_key(&proxy.id) {
                return Err(GenomeError::duplicate("hierarchy", &proxy.id));
            }
            source.labels.proxies.add_existing_legacy_label(&proxy.id);
            source.proxies.insert(proxy.id.clone(), proxy);
        }
        source.register_existing_labels();
        Ok(source)
    }

    fn register_existing_labels(&mut self) {
        let labels = &mut self.labels;
        let store = self.root.store();
        for id in store
            .genes()
            .map(|gene| gene.id.as_str())
            .chain(store.nodes().map(|node| node.id.as_str()))
            .chain(store.links().map(|link| link.id.as_str()))
            .chain(store.notes().map(|note| note.id.as_str()))
        {
            labels.items.add_existing_legacy_label(id);
        }
        let mut overlay_sets: Vec<&OverlaySupport> = vec![store.overlays()];
        for instance in self.instances.values() {
            for note in instance.store().notes() {
                labels.items.add_existing_legacy_label(&note.id);
            }
            for group in instance.groups() {
                labels.groups.add_existing_legacy_label(Group::base_id(&group.id));
            }
            overlay_sets.push(instance.store().overlays());
        }
        for proxy in self.proxies.values() {
            for note in proxy.notes() {
                labels.items.add_existing_legacy_label(&note.id);
            }
            for group in proxy.groups() {
                labels.groups.add_existing_legacy_label(Group::base_id(&group.id));
            }
            overlay_sets.push(proxy.overlays());
        }
        for support in overlay_sets {
            for overlay in support.overlays() {
                labels.overlays.add_existing_legacy_label(&overlay.id);
                for module in overlay.modules.values() {
                    labels.overlays.add_existing_legacy_label(&module.id);
                }
                for link in overlay.module_links.values() {
                    labels.overlays.add_existing_legacy_label(&link.id);
                }
            }
        }
        for path in self.navigation.paths() {
            labels.paths.add_existing_legacy_label(&path.id);
        }
    }

    pub fn settings(&self) -> &SourceSettings {
        &self.settings
    }

    /// Changes derivation settings; every cached dynamic model is dropped.
    pub fn set_settings(&mut self, settings: SourceSettings) {
        self.settings = settings;
        self.invalidate_all();
    }

    pub fn root(&self) -> &DbGenome {
        &self.root
    }

    pub fn instance(&self, id: &str) -> Result<&GenomeInstance, GenomeError> {
        self.instances
            .get(id)
            .ok_or_else(|| GenomeError::missing(&self.root.id, "model", id))
    }

    fn instance_mut(&mut self, id: &str) -> Result<&mut GenomeInstance, GenomeError> {
        self.instances
            .get_mut(id)
            .ok_or_else(|| GenomeError::missing(&self.root.id, "model", id))
    }

    /// Instances in creation order.
    pub fn instances(&self) -> impl Iterator<Item = &GenomeInstance> {
        self.instance_order
            .iter()
            .filter_map(|id| self.instances.get(id))
    }

    pub fn proxy(&self, id: &str) -> Result<&DynamicInstanceProxy, GenomeError> {
        self.proxies
            .get(id)
            .ok_or_else(|| GenomeError::missing(&self.root.id, "dynamic proxy", id))
    }

    fn proxy_mut(&mut self, id: &str) -> Result<&mut DynamicInstanceProxy, GenomeError> {
        self.proxies
            .get_mut(id)
            .ok_or_else(|| GenomeError::missing(&self.root.id, "dynamic proxy", id))
    }

    pub fn proxies(&self) -> impl Iterator<Item = &DynamicInstanceProxy> {
        self.proxies.values()
    }

    pub fn proxies_of<'a>(&'a self, model_id: &'a str) -> impl Iterator<Item = &'a DynamicInstanceProxy> {
        self.proxies
            .values()
            .filter(move |proxy| proxy.vfg_parent() == model_id)
    }

    pub fn time_course(&self) -> &TimeCourseData {
        &self.time_course
    }

    pub fn temporal_ranges(&self) -> &TemporalInputRangeData {
        &self.temporal
    }

    pub fn images(&self) -> &ImageManager {
        &self.images
    }

    pub fn navigation(&self) -> &Navigation {
        &self.navigation
    }

    pub fn oracle(&self) -> FullGenomeHierarchyOracle<'_> {
        FullGenomeHierarchyOracle::new(self)
    }

    /// Models from `model_id` down, parents before children.
    pub fn subtree(&self, model_id: &str) -> Vec<String> {
        self.instance_order
            .iter()
            .filter(|id| self.is_descendant_or_self(id, model_id))
            .cloned()
            .collect()
    }

    fn is_descendant_or_self(&self, id: &str, ancestor: &str) -> bool {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.instances.get(current).and_then(GenomeInstance::vfg_parent);
        }
        false
    }

    /// Top of the instance tree holding `model_id`.
    pub fn root_instance_of(&self, model_id: &str) -> Result<&GenomeInstance, GenomeError> {
        let mut current = self.instance(model_id)?;
        while let Some(parent) = current.vfg_parent() {
            current = self.instance(parent)?;
        }
        Ok(current)
    }

    pub fn invalidate_all(&self) {
        for proxy in self.proxies.values() {
            proxy.clear_cache();
        }
    }

    fn invalidate_subtree(&self, model_id: &str) {
        for proxy in self.proxies.values() {
            if self.is_descendant_or_self(proxy.vfg_parent(), model_id) {
                proxy.clear_cache();
            }
        }
    }

    // Root items

    pub fn add_gene(&mut self, name: &str) -> Result<(String, Vec<ChangeRecord>), GenomeError> {
        self.check_new_name(name, None)?;
        let id = self.labels.items.next_label();
        let change = self.root.store_mut().add_gene(DbGene::new(&id, name))?;
        Ok((id, vec![change.into()]))
    }

    pub fn add_node(&mut self, node_type: NodeType, name: &str) -> Result<(String, Vec<ChangeRecord>), GenomeError> {
        if node_type.is_gene() {
            return self.add_gene(name);
        }
        if !name.trim().is_empty() {
            self.check_new_name(name, None)?;
        }
        let id = self.labels.items.next_label();
        let change = self.root.store_mut().add_node(DbNode::new(&id, node_type, name))?;
        Ok((id, vec![change.into()]))
    }

    pub fn add_root_link(
        &mut self,
        source: &str,
        target: &str,
        sign: Sign,
    ) -> Result<(String, Vec<ChangeRecord>), GenomeError> {
        for end in [source, target] {
            if !self.root.store().has_gene_or_node(end) {
                return Err(GenomeError::missing(&self.root.id, "node", end));
            }
        }
        let id = self.labels.items.next_label();
        let mut link = DbLinkage::new(&id, source, target, sign);
        if let Some(gene) = self.root.gene(target) {
            link.landing_pad = gene.last_pad();
        }
        let change = self.root.store_mut().add_link(link)?;
        Ok((id, vec![change.into()]))
    }

    pub fn add_root_note(&mut self, name: &str, text: &str) -> Result<(String, Vec<ChangeRecord>), GenomeError> {
        let id = self.labels.items.next_label();
        let change = self.root.store_mut().add_note(Note::new(&id, name, text))?;
        Ok((id, vec![change.into()]))
    }

    fn check_new_name(&self, name: &str, exception: Option<&str>) -> Result<(), GenomeError> {
        if self.oracle().matches_existing_gene_or_node_name(name, exception) {
            return Err(GenomeError::Infeasible(format!("name {name} is already in use")));
        }
        Ok(())
    }

    /// Renames a gene, given its root id or any instance id.
    pub fn change_gene_name(&mut self, id: &str, name: &str) -> Result<Vec<ChangeRecord>, GenomeError> {
        let base = InstanceId::base_of(id).to_string();
        self.check_new_name(name, Some(&base))?;
        Ok(vec![self.root.change_gene_name(&base, name)?.into()])
    }

    pub fn change_node_name(&mut self, id: &str, name: &str) -> Result<Vec<ChangeRecord>, GenomeError> {
        let base = InstanceId::base_of(id).to_string();
        if !name.trim().is_empty() || self.root.is_gene(&base) {
            self.check_new_name(name, Some(&base))?;
        }
        Ok(vec![self.root.change_node_name(&base, name)?.into()])
    }

    pub fn change_gene_evidence(&mut self, id: &str, evidence: u8) -> Result<Vec<ChangeRecord>, GenomeError> {
        let base = InstanceId::base_of(id);
        Ok(vec![self.root.change_gene_evidence(base, evidence)?.into()])
    }

    pub fn change_node_size(&mut self, id: &str, pad_count: Option<i32>) -> Result<Vec<ChangeRecord>, GenomeError> {
        let base = InstanceId::base_of(id);
        Ok(vec![self.root.change_node_size(base, pad_count)?.into()])
    }

    pub fn change_link_sign(&mut self, id: &str, sign: Sign) -> Result<Vec<ChangeRecord>, GenomeError> {
        let base = InstanceId::base_of(id);
        let change = self.root.change_link_sign(base, sign)?;
        self.invalidate_all();
        Ok(vec![change.into()])
    }

    pub fn change_link_target_level(&mut self, id: &str, level: TargetLevel) -> Result<Vec<ChangeRecord>, GenomeError> {
        let base = InstanceId::base_of(id);
        Ok(vec![self.root.change_link_target_level(base, level)?.into()])
    }

    pub fn change_root_properties(&mut self, props: GenomeProperties) -> Vec<ChangeRecord> {
        vec![self.root.change_properties(props).into()]
    }

    /// Retypes a node everywhere. Crossing the gene boundary moves the root
    /// item and every instance of it between the gene and node collections.
    pub fn change_node_type(&mut self, id: &str, node_type: NodeType) -> Result<Vec<ChangeRecord>, GenomeError> {
        let base = InstanceId::base_of(id).to_string();
        let current = self
            .root
            .node_type(&base)
            .ok_or_else(|| GenomeError::missing(&self.root.id, "node", &base))?;
        let crossing = current.is_gene() != node_type.is_gene();
        let mut out = vec![self.root.change_node_type(&base, node_type)?.into()];
        if crossing {
            for model_id in self.instance_order.clone() {
                let model = self.instance_mut(&model_id)?;
                let ids: Vec<String> = model.instances_of(&base).map(|node| node.id.clone()).collect();
                for inst in ids {
                    let change = if node_type.is_gene() {
                        model.store_mut().convert_node_to_gene(&inst, |node| node)?
                    } else {
                        model.store_mut().convert_gene_to_node(&inst, |gene| gene)?
                    };
                    out.push(change.into());
                }
            }
            self.invalidate_all();
        }
        Ok(out)
    }

    /// Deletes a root node, every instance of it and every link touching it.
    pub fn delete_root_node(&mut self, base_id: &str) -> Result<Vec<ChangeRecord>, GenomeError> {
        if !self.root.store().has_gene_or_node(base_id) {
            return Err(GenomeError::missing(&self.root.id, "node", base_id));
        }
        let mut out = Vec::new();
        for model_id in self.instance_order.clone().into_iter().rev() {
            let ids: Vec<String> = self
                .instance(&model_id)?
                .instances_of(base_id)
                .map(|node| node.id.clone())
                .collect();
            for node_id in ids {
                out.extend(self.strip_node(&model_id, &node_id)?);
            }
        }
        let incident: Vec<String> = self
            .root
            .store()
            .links()
            .filter(|link| link.source == base_id || link.target == base_id)
            .map(|link| link.id.clone())
            .collect();
        for link_id in incident {
            out.extend(self.delete_root_link(&link_id)?);
        }
        out.extend(records(self.root.store_mut().overlays_mut().purge_node(base_id)));
        out.push(self.root.store_mut().remove_gene_or_node(base_id)?.into());
        self.invalidate_all();
        info!(node = base_id, records = out.len(), "root node deleted");
        Ok(out)
    }

    /// Deletes a root link and its instances in every model.
    pub fn delete_root_link(&mut self, base_id: &str) -> Result<Vec<ChangeRecord>, GenomeError> {
        if self.root.link(base_id).is_none() {
            return Err(GenomeError::missing(&self.root.id, "link", base_id));
        }
        let mut out = Vec::new();
        for model_id in self.instance_order.clone().into_iter().rev() {
            let model = self.instance_mut(&model_id)?;
            let ids: Vec<String> = model.link_instances_of(base_id).map(|link| link.id.clone()).collect();
            for link_id in ids {
                out.push(model.remove_link_instance(&link_id)?.into());
            }
        }
        out.push(self.root.store_mut().remove_link(base_id)?.into());
        self.invalidate_all();
        Ok(out)
    }

    /// Removes one node instance from one model, with its links, group
    /// memberships, module memberships and proxy placements.
    fn strip_node(&mut self, model_id: &str, node_id: &str) -> Result<Vec<ChangeRecord>, GenomeError> {
        let model = self.instance_mut(model_id)?;
        let mut out = records(model.remove_node_instance(node_id)?);
        out.extend(records(model.store_mut().overlays_mut().purge_node(node_id)));
        let placed: Vec<String> = self
            .proxies_of(model_id)
            .filter(|proxy| proxy.added_node(node_id).is_some())
            .map(|proxy| proxy.id.clone())
            .collect();
        for proxy_id in placed {
            out.push(self.proxy_mut(&proxy_id)?.remove_added_node(node_id)?.into());
        }
        let children: Vec<String> = self.proxies_of(model_id).map(|proxy| proxy.id.clone()).collect();
        for proxy_id in children {
            out.extend(records(self.proxy_mut(&proxy_id)?.overlays_mut().purge_node(node_id)));
        }
        Ok(out)
    }

    // Instance models

    /// First free model id. Nothing is reserved until a model is created
    /// under it.
    pub fn next_genome_key(&self) -> String {
        self.labels.models.peek_label()
    }

    pub fn add_genome_instance(
        &mut self,
        name: &str,
        parent: Option<&str>,
    ) -> Result<(String, Vec<ChangeRecord>), GenomeError> {
        if let Some(parent) = parent {
            self.instance(parent)?;
        }
        let id = self.labels.models.next_label();
        let records = self.insert_instance(&id, name, parent)?;
        Ok((id, records))
    }

    /// Creates a model under a caller-chosen id, for importers.
    pub fn add_genome_instance_existing_label(
        &mut self,
        id: &str,
        name: &str,
        parent: Option<&str>,
    ) -> Result<Vec<ChangeRecord>, GenomeError> {
        if let Some(parent) = parent {
            self.instance(parent)?;
        }
        if !self.labels.models.add_existing_label(id) {
            return Err(GenomeError::duplicate(&self.root.id, id));
        }
        self.insert_instance(id, name, parent)
    }

    fn insert_instance(
        &mut self,
        id: &str,
        name: &str,
        parent: Option<&str>,
    ) -> Result<Vec<ChangeRecord>, GenomeError> {
        let instance = match parent {
            Some(parent_id) => {
                let parent = self.instance(parent_id)?;
                let mut child = GenomeInstance::new_child(id, name, parent);
                let generation = child.generation();
                let inherited: BTreeMap<String, Group> = parent
                    .groups()
                    .map(|group| group.inherit(generation))
                    .map(|group| (group.id.clone(), group))
                    .collect();
                child.replace_groups(inherited);
                child
            }
            None => GenomeInstance::new_root(id, name),
        };
        let position = self.instance_order.len();
        self.instance_order.push(id.to_string());
        self.instances.insert(id.to_string(), instance.clone());
        debug!(model = id, parent = ?parent, "model added");
        Ok(vec![
            ModelTreeChange::Instance {
                position,
                orig: None,
                new: Some(Box::new(instance)),
            }
            .into(),
        ])
    }

    /// Deletes a model, all models below it and their proxies.
    pub fn delete_genome_instance(&mut self, model_id: &str) -> Result<Vec<ChangeRecord>, GenomeError> {
        self.instance(model_id)?;
        let doomed = self.subtree(model_id);
        let mut out = Vec::new();
        for id in doomed.iter().rev() {
            let proxy_ids: Vec<String> = self.proxies_of(id).map(|proxy| proxy.id.clone()).collect();
            for proxy_id in proxy_ids {
                out.extend(self.delete_dynamic_proxy(&proxy_id)?);
            }
        }
        let gone: BTreeSet<String> = doomed.iter().cloned().collect();
        out.extend(records(self.navigation.remap_stops(|key| match key {
            GenomeKey::Instance(id) if gone.contains(id) => Some(None),
            _ => None,
        })));
        if let Some(change) = self.navigation.remap_startup(|key| match key {
            GenomeKey::Instance(id) if gone.contains(id) => Some(None),
            _ => None,
        }) {
            out.push(change.into());
        }
        for id in doomed.iter().rev() {
            let position = self
                .instance_order
                .iter()
                .position(|candidate| candidate == id)
                .ok_or_else(|| GenomeError::missing(&self.root.id, "model", id))?;
            self.instance_order.remove(position);
            let removed = self
                .instances
                .remove(id)
                .ok_or_else(|| GenomeError::missing(&self.root.id, "model", id))?;
            out.push(
                ModelTreeChange::Instance {
                    position,
                    orig: Some(Box::new(removed)),
                    new: None,
                }
                .into(),
            );
        }
        info!(model = model_id, removed = doomed.len(), "model subtree deleted");
        Ok(out)
    }

    pub fn change_instance_properties(
        &mut self,
        model_id: &str,
        props: GenomeProperties,
    ) -> Result<Vec<ChangeRecord>, GenomeError> {
        if let (Some(bounds), Some(parent)) = (props.time_bounds, self.instance(model_id)?.vfg_parent()) {
            if let Some(outer) = self.instance(parent)?.time_bounds() {
                if !outer.encloses(&bounds) {
                    return Err(GenomeError::Precondition(format!(
                        "hours {}..{} of {model_id} fall outside its parent's {}..{}",
                        bounds.min_time, bounds.max_time, outer.min_time, outer.max_time
                    )));
                }
            }
        }
        let change = self.instance_mut(model_id)?.change_properties(props)?;
        Ok(vec![change.into()])
    }

    pub fn set_time_bounds(
        &mut self,
        model_id: &str,
        bounds: Option<TimeBounds>,
    ) -> Result<Vec<ChangeRecord>, GenomeError> {
        let props = GenomeProperties {
            time_bounds: bounds,
            ..self.instance(model_id)?.properties().clone()
        };
        self.change_instance_properties(model_id, props)
    }

    /// Smallest instance number not yet used for `base_id` anywhere.
    pub fn next_instance_number(&self, base_id: &str) -> u32 {
        self.instances
            .values()
            .flat_map(|model| {
                model
                    .instances_of(base_id)
                    .map(|node| node.id.as_str())
                    .chain(model.link_instances_of(base_id).map(|link| link.id.as_str()))
                    .collect::<Vec<_>>()
            })
            .filter_map(|id| id.parse::<InstanceId>().ok())
            .map(|id| id.instance() + 1)
            .max()
            .unwrap_or(0)
    }

    /// Places a fresh instance of a root node into a root instance.
    pub fn add_node_to_root_instance(
        &mut self,
        model_id: &str,
        base_id: &str,
    ) -> Result<(String, Vec<ChangeRecord>), GenomeError> {
        let is_gene = self.root.is_gene(base_id);
        if !self.root.store().has_gene_or_node(base_id) {
            return Err(GenomeError::missing(&self.root.id, "node", base_id));
        }
        if !self.instance(model_id)?.is_root_instance() {
            return Err(GenomeError::Precondition(format!(
                "{model_id} is not a root instance; add the node to its parent first"
            )));
        }
        let id = InstanceId::new(base_id, self.next_instance_number(base_id)).to_string();
        let change = self
            .instance_mut(model_id)?
            .add_node_instance(NodeInstance::new(&id), is_gene)?;
        self.invalidate_subtree(model_id);
        Ok((id, vec![change.into()]))
    }

    /// Places an instance of a root link between two node instances of a root instance.
    pub fn add_link_to_root_instance(
        &mut self,
        model_id: &str,
        base_id: &str,
        source: &str,
        target: &str,
    ) -> Result<(String, Vec<ChangeRecord>), GenomeError> {
        let root_link = self
            .root
            .link(base_id)
            .ok_or_else(|| GenomeError::missing(&self.root.id, "link", base_id))?
            .clone();
        if InstanceId::base_of(source) != root_link.source || InstanceId::base_of(target) != root_link.target {
            return Err(GenomeError::Precondition(format!(
                "{source} -> {target} does not instantiate link {base_id}"
            )));
        }
        if !self.instance(model_id)?.is_root_instance() {
            return Err(GenomeError::Precondition(format!("{model_id} is not a root instance")));
        }
        let id = InstanceId::new(base_id, self.next_instance_number(base_id)).to_string();
        let mut link = LinkageInstance::new(&id, source, target);
        link.launch_pad = root_link.launch_pad;
        link.landing_pad = root_link.landing_pad;
        let change = self.instance_mut(model_id)?.add_link_instance(link)?;
        self.invalidate_subtree(model_id);
        Ok((id, vec![change.into()]))
    }

    /// Copies a node instance from the parent model into `model_id`.
    pub fn propagate_node(&mut self, model_id: &str, node_id: &str) -> Result<Vec<ChangeRecord>, GenomeError> {
        let model = self.instance(model_id)?;
        let parent_id = model
            .vfg_parent()
            .ok_or_else(|| GenomeError::Precondition(format!("{model_id} has no parent model")))?;
        let parent = self.instance(parent_id)?;
        let node = parent
            .node(node_id)
            .cloned()
            .ok_or_else(|| GenomeError::missing(parent_id, "node", node_id))?;
        let is_gene = parent.is_gene(node_id);
        let change = self.instance_mut(model_id)?.add_node_instance(node, is_gene)?;
        self.invalidate_subtree(model_id);
        Ok(vec![change.into()])
    }

    /// Copies a link instance from the parent model; both ends must already be here.
    pub fn propagate_link(&mut self, model_id: &str, link_id: &str) -> Result<Vec<ChangeRecord>, GenomeError> {
        let model = self.instance(model_id)?;
        let parent_id = model
            .vfg_parent()
            .ok_or_else(|| GenomeError::Precondition(format!("{model_id} has no parent model")))?;
        let link = self
            .instance(parent_id)?
            .link(link_id)
            .cloned()
            .ok_or_else(|| GenomeError::missing(parent_id, "link", link_id))?;
        let change = self.instance_mut(model_id)?.add_link_instance(link)?;
        self.invalidate_subtree(model_id);
        Ok(vec![change.into()])
    }

    /// Removes a node instance from a model and every model below it.
    pub fn delete_instance_node(&mut self, model_id: &str, node_id: &str) -> Result<Vec<ChangeRecord>, GenomeError> {
        if self.instance(model_id)?.node(node_id).is_none() {
            return Err(GenomeError::missing(model_id, "node", node_id));
        }
        let mut out = Vec::new();
        for id in self.subtree(model_id).into_iter().rev() {
            if self.instance(&id)?.node(node_id).is_some() {
                out.extend(self.strip_node(&id, node_id)?);
            }
        }
        self.invalidate_subtree(model_id);
        Ok(out)
    }

    pub fn delete_instance_link(&mut self, model_id: &str, link_id: &str) -> Result<Vec<ChangeRecord>, GenomeError> {
        if self.instance(model_id)?.link(link_id).is_none() {
            return Err(GenomeError::missing(model_id, "link", link_id));
        }
        let mut out = Vec::new();
        for id in self.subtree(model_id).into_iter().rev() {
            let model = self.instance_mut(&id)?;
            if model.link(link_id).is_some() {
                out.push(model.remove_link_instance(link_id)?.into());
            }
        }
        self.invalidate_subtree(model_id);
        Ok(out)
    }

    /// Moves a link end within one model. Landings on genes must stay on the gene.
    pub fn change_link_pads(
        &mut self,
        model_id: &str,
        link_id: &str,
        launch_pad: i32,
        landing_pad: i32,
    ) -> Result<Vec<ChangeRecord>, GenomeError> {
        let link = self
            .instance(model_id)?
            .link(link_id)
            .ok_or_else(|| GenomeError::missing(model_id, "link", link_id))?;
        if let Some(gene) = self.root.gene(InstanceId::base_of(&link.target)) {
            if landing_pad < gene.first_pad() || landing_pad > gene.last_pad() {
                return Err(GenomeError::Precondition(format!(
                    "pad {landing_pad} is not on gene {} ({}..{})",
                    gene.id,
                    gene.first_pad(),
                    gene.last_pad()
                )));
            }
        }
        let change = self
            .instance_mut(model_id)?
            .change_link_pads(link_id, launch_pad, landing_pad)?;
        Ok(vec![change.into()])
    }

    pub fn change_node_activity(
        &mut self,
        model_id: &str,
        node_id: &str,
        activity: Activity,
    ) -> Result<Vec<ChangeRecord>, GenomeError> {
        let change = self.instance_mut(model_id)?.change_node_activity(node_id, activity)?;
        self.invalidate_subtree(model_id);
        Ok(vec![change.into()])
    }

    pub fn change_link_activity(
        &mut self,
        model_id: &str,
        link_id: &str,
        activity: Activity,
    ) -> Result<Vec<ChangeRecord>, GenomeError> {
        let change = self.instance_mut(model_id)?.change_link_activity(link_id, activity)?;
        self.invalidate_subtree(model_id);
        Ok(vec![change.into()])
    }

    pub fn change_node_description(
        &mut self,
        model_id: &str,
        node_id: &str,
        description: Option<String>,
    ) -> Result<Vec<ChangeRecord>, GenomeError> {
        let change = self
            .instance_mut(model_id)?
            .change_node_description(node_id, description)?;
        Ok(vec![change.into()])
    }

    /// Local display name of one node instance; checked against every name
    /// in the hierarchy.
    pub fn change_override_name(
        &mut self,
        model_id: &str,
        node_id: &str,
        name: Option<String>,
    ) -> Result<Vec<ChangeRecord>, GenomeError> {
        if let Some(name) = &name {
            self.check_new_name(name, Some(InstanceId::base_of(node_id)))?;
        }
        let change = self.instance_mut(model_id)?.change_override_name(node_id, name)?;
        Ok(vec![change.into()])
    }

    pub fn add_instance_note(
        &mut self,
        model_id: &str,
        name: &str,
        text: &str,
    ) -> Result<(String, Vec<ChangeRecord>), GenomeError> {
        self.instance(model_id)?;
        let id = self.labels.items.next_label();
        let change = self
            .instance_mut(model_id)?
            .store_mut()
            .add_note(Note::new(&id, name, text))?;
        Ok((id, vec![change.into()]))
    }

    // Groups

    /// New top-level group in a root instance.
    pub fn add_group(&mut self, model_id: &str, name: &str) -> Result<(String, Vec<ChangeRecord>), GenomeError> {
        if !self.instance(model_id)?.is_root_instance() {
            return Err(GenomeError::Precondition(format!(
                "groups are created in root instances; {model_id} inherits them"
            )));
        }
        let id = self.labels.groups.next_label();
        let group = Group::new(&id, name);
        let mut out = vec![self.instance_mut(model_id)?.add_group(group.clone())?.into()];
        out.extend(self.inherit_into_proxies(model_id, &group)?);
        Ok((id, out))
    }

    /// Copies a group just added to `model_id` into the proxies below it.
    fn inherit_into_proxies(&mut self, model_id: &str, group: &Group) -> Result<Vec<ChangeRecord>, GenomeError> {
        let proxy_ids: Vec<String> = self.proxies_of(model_id).map(|proxy| proxy.id.clone()).collect();
        let mut out = Vec::new();
        for proxy_id in proxy_ids {
            let proxy = self.proxy_mut(&proxy_id)?;
            let copy = group.inherit(proxy.generation());
            if proxy.group(&copy.id).is_none() {
                out.push(proxy.add_group(copy)?.into());
            }
        }
        Ok(out)
    }

    pub fn add_subgroup(
        &mut self,
        model_id: &str,
        parent_group: &str,
        name: &str,
    ) -> Result<(String, Vec<ChangeRecord>), GenomeError> {
        if !self.instance(model_id)?.is_root_instance() {
            return Err(GenomeError::Precondition(format!(
                "subgroups are created in root instances; {model_id} inherits them"
            )));
        }
        let id = self.labels.groups.next_label();
        let group = Group::subset_of(&id, name, parent_group);
        let mut out = vec![self.instance_mut(model_id)?.add_group(group.clone())?.into()];
        out.extend(self.inherit_into_proxies(model_id, &group)?);
        Ok((id, out))
    }

    /// Brings a parent model's group into a child model.
    pub fn include_parent_group(&mut self, model_id: &str, parent_group: &str) -> Result<Vec<ChangeRecord>, GenomeError> {
        let model = self.instance(model_id)?;
        let parent_id = model
            .vfg_parent()
            .ok_or_else(|| GenomeError::Precondition(format!("{model_id} has no parent model")))?;
        let group = self
            .instance(parent_id)?
            .group(parent_group)
            .ok_or_else(|| GenomeError::missing(parent_id, "group", parent_group))?
            .inherit(model.generation());
        if group.parent.is_some() {
            return Err(GenomeError::Precondition(format!(
                "{parent_group} is a subgroup; activate it instead"
            )));
        }
        let mut out = vec![self.instance_mut(model_id)?.add_group(group.clone())?.into()];
        out.extend(self.inherit_into_proxies(model_id, &group)?);
        Ok(out)
    }

    pub fn add_group_member(
        &mut self,
        model_id: &str,
        group_id: &str,
        node_id: &str,
    ) -> Result<Vec<ChangeRecord>, GenomeError> {
        let change = self.instance_mut(model_id)?.add_group_member(group_id, node_id)?;
        self.invalidate_subtree(model_id);
        Ok(vec![change.into()])
    }

    pub fn remove_group_member(
        &mut self,
        model_id: &str,
        group_id: &str,
        node_id: &str,
    ) -> Result<Vec<ChangeRecord>, GenomeError> {
        let change = self.instance_mut(model_id)?.remove_group_member(group_id, node_id)?;
        self.invalidate_subtree(model_id);
        Ok(vec![change.into()])
    }

    /// Removes a group from a model and its inherited copies below it.
    pub fn remove_group(&mut self, model_id: &str, group_id: &str) -> Result<Vec<ChangeRecord>, GenomeError> {
        self.instance(model_id)?
            .group(group_id)
            .ok_or_else(|| GenomeError::missing(model_id, "group", group_id))?;
        let base = Group::base_id(group_id).to_string();
        let mut out = Vec::new();
        for id in self.subtree(model_id).into_iter().rev() {
            let proxy_ids: Vec<String> = self.proxies_of(&id).map(|proxy| proxy.id.clone()).collect();
            for proxy_id in proxy_ids {
                let proxy = self.proxy_mut(&proxy_id)?;
                let local = Group::inherited_id(&base, proxy.generation());
                if proxy.group(&local).is_some() {
                    out.extend(records(proxy.remove_group(&local)?));
                }
            }
            let model = self.instance_mut(&id)?;
            let local = Group::inherited_id(&base, model.generation());
            if model.group(&local).is_some() {
                out.extend(records(model.remove_group(&local)?));
            }
        }
        self.invalidate_subtree(model_id);
        Ok(out)
    }

    /// Renames a group along with its inherited copies in lower models and
    /// their proxies.
    pub fn rename_group(&mut self, model_id: &str, group_id: &str, name: &str) -> Result<Vec<ChangeRecord>, GenomeError> {
        self.instance(model_id)?
            .group(group_id)
            .ok_or_else(|| GenomeError::missing(model_id, "group", group_id))?;
        let base = Group::base_id(group_id).to_string();
        let mut out = Vec::new();
        for id in self.subtree(model_id) {
            let model = self.instance_mut(&id)?;
            let local = Group::inherited_id(&base, model.generation());
            if model.group(&local).is_some() {
                out.push(model.rename_group(&local, name)?.into());
            }
            let proxy_ids: Vec<String> = self.proxies_of(&id).map(|proxy| proxy.id.clone()).collect();
            for proxy_id in proxy_ids {
                let proxy = self.proxy_mut(&proxy_id)?;
                let local = Group::inherited_id(&base, proxy.generation());
                if proxy.group(&local).is_some() {
                    out.push(proxy.rename_group(&local, name)?.into());
                }
            }
        }
        self.invalidate_subtree(model_id);
        Ok(out)
    }

    pub fn activate_subgroup(
        &mut self,
        model_id: &str,
        parent_group: &str,
        subset_base: &str,
    ) -> Result<Vec<ChangeRecord>, GenomeError> {
        let model = self.instance(model_id)?;
        let parent_model = model
            .vfg_parent()
            .ok_or_else(|| GenomeError::Precondition(format!("{model_id} has no parent model")))?;
        let source_group = self
            .instance(parent_model)?
            .groups()
            .find(|group| Group::base_id(&group.id) == Group::base_id(subset_base))
            .ok_or_else(|| GenomeError::missing(parent_model, "group", subset_base))?;
        let name = source_group.display_name().to_string();
        let changes = self
            .instance_mut(model_id)?
            .activate_subgroup(parent_group, subset_base, &name)?;
        let added = changes.len() > 1;
        let mut out = records(changes);
        if added {
            let subset_id = Group::inherited_id(Group::base_id(subset_base), self.instance(model_id)?.generation());
            if let Some(subset) = self.instance(model_id)?.group(&subset_id).cloned() {
                out.extend(self.inherit_into_proxies(model_id, &subset)?);
            }
        }
        self.invalidate_subtree(model_id);
        Ok(out)
    }

    // Overlays

    pub fn overlay_support(&self, owner: &OverlayOwner) -> Result<&OverlaySupport, GenomeError> {
        match owner {
            OverlayOwner::Root(_) => Ok(self.root.store().overlays()),
            OverlayOwner::Instance(id) => Ok(self.instance(id)?.store().overlays()),
            OverlayOwner::Proxy(id) => Ok(self.proxy(id)?.overlays()),
        }
    }

    /// Runs an overlay edit against the owner's overlays.
    pub fn edit_overlays<F, T>(&mut self, owner: &OverlayOwner, edit: F) -> Result<Vec<ChangeRecord>, GenomeError>
    where
        F: FnOnce(&mut OverlaySupport) -> Result<T, GenomeError>,
        T: IntoOverlayRecords,
    {
        let support = match owner {
            OverlayOwner::Root(_) => self.root.store_mut().overlays_mut(),
            OverlayOwner::Instance(id) => self.instance_mut(id)?.store_mut().overlays_mut(),
            OverlayOwner::Proxy(id) => self.proxy_mut(id)?.overlays_mut(),
        };
        Ok(edit(support)?.into_records())
    }

    pub fn next_overlay_label(&mut self) -> String {
        self.labels.overlays.next_label()
    }

    // Dynamic proxies

    pub fn add_dynamic_proxy(
        &mut self,
        parent_model: &str,
        props: ProxyProperties,
    ) -> Result<(String, Vec<ChangeRecord>), GenomeError> {
        self.instance(parent_model)?;
        let id = self.labels.proxies.next_label();
        let proxy = DynamicInstanceProxy::new(&id, self.instance(parent_model)?, props)?;
        self.proxies.insert(id.clone(), proxy.clone());
        Ok((
            id,
            vec![
                ModelTreeChange::Proxy {
                    orig: None,
                    new: Some(Box::new(proxy)),
                }
                .into(),
            ],
        ))
    }

    /// Drops a proxy together with its image references and every tree path
    /// or startup reference to its models.
    pub fn delete_dynamic_proxy(&mut self, proxy_id: &str) -> Result<Vec<ChangeRecord>, GenomeError> {
        let times: Vec<TimeSelector> = self.proxy(proxy_id)?.images().map(|(time, _)| *time).collect();
        let mut out = Vec::new();
        for time in times {
            out.extend(self.set_proxy_image(proxy_id, time, None)?);
        }
        out.extend(records(self.navigation.remap_stops(|key| match key {
            GenomeKey::Dynamic(dynamic) if dynamic.proxy_id == proxy_id => Some(None),
            _ => None,
        })));
        if let Some(change) = self.navigation.remap_startup(|key| match key {
            GenomeKey::Dynamic(dynamic) if dynamic.proxy_id == proxy_id => Some(None),
            _ => None,
        }) {
            out.push(change.into());
        }
        let removed = self
            .proxies
            .remove(proxy_id)
            .ok_or_else(|| GenomeError::missing(&self.root.id, "dynamic proxy", proxy_id))?;
        removed.clear_cache();
        out.push(
            ModelTreeChange::Proxy {
                orig: Some(Box::new(removed)),
                new: None,
            }
            .into(),
        );
        Ok(out)
    }

    /// Sets the image for one slice, registering the new reference and
    /// dropping the old one.
    pub fn set_proxy_image(
        &mut self,
        proxy_id: &str,
        time: TimeSelector,
        image: Option<String>,
    ) -> Result<Vec<ChangeRecord>, GenomeError> {
        let previous = self.proxy(proxy_id)?.image(time).map(str::to_string);
        if previous == image {
            return Ok(Vec::new());
        }
        let change = self.proxy_mut(proxy_id)?.set_image(time, image.clone())?;
        let mut out = vec![change.into()];
        if let Some(previous) = previous {
            out.push(self.images.drop_image_usage(&previous)?.into());
        }
        if let Some(image) = image {
            out.push(self.images.register_image_usage(&image).into());
        }
        Ok(out)
    }

    /// Renames a proxy or changes its mode or hours. Images, tree path stops
    /// and the startup view follow the surviving time slices; references to
    /// slices that no longer exist are dropped.
    pub fn change_proxy_properties(
        &mut self,
        proxy_id: &str,
        new: ProxyProperties,
    ) -> Result<Vec<ChangeRecord>, GenomeError> {
        let old = self.proxy(proxy_id)?.properties().clone();
        if new.min_time > new.max_time {
            return Err(GenomeError::Precondition(format!(
                "proxy hours {}..{} run backwards",
                new.min_time, new.max_time
            )));
        }
        let remap = DynamicInstanceProxy::time_key_remap(&old, &new);
        let images: Vec<(TimeSelector, String)> = self
            .proxy(proxy_id)?
            .images()
            .map(|(time, key)| (*time, key.clone()))
            .collect();

        let mut out = Vec::new();
        let mut moved = Vec::new();
        for (time, key) in images {
            let change = self.proxy_mut(proxy_id)?.set_image(time, None)?;
            out.push(change.into());
            match remap.get(&time).copied().flatten() {
                Some(target) => moved.push((target, key)),
                None => out.push(self.images.drop_image_usage(&key)?.into()),
            }
        }
        out.push(self.proxy_mut(proxy_id)?.change_properties(new)?.into());
        for (time, key) in moved {
            out.push(self.proxy_mut(proxy_id)?.set_image(time, Some(key))?.into());
        }

        let rekey = |key: &GenomeKey| -> Option<Option<GenomeKey>> {
            let GenomeKey::Dynamic(dynamic) = key else {
                return None;
            };
            if dynamic.proxy_id != proxy_id {
                return None;
            }
            let target = remap.get(&dynamic.time).copied().flatten();
            if target == Some(dynamic.time) {
                return None;
            }
            Some(target.map(|time| GenomeKey::Dynamic(DynamicKey::new(proxy_id, time))))
        };
        out.extend(records(self.navigation.remap_stops(rekey)));
        if let Some(change) = self.navigation.remap_startup(rekey) {
            out.push(change.into());
        }
        Ok(out)
    }

    pub fn add_proxy_note(&mut self, proxy_id: &str, name: &str, text: &str) -> Result<(String, Vec<ChangeRecord>), GenomeError> {
        self.proxy(proxy_id)?;
        let id = self.labels.items.next_label();
        let change = self.proxy_mut(proxy_id)?.add_note(Note::new(&id, name, text))?;
        Ok((id, vec![change.into()]))
    }

    /// Places a parent node that belongs to no region into one of the proxy's groups.
    pub fn add_proxy_added_node(
        &mut self,
        proxy_id: &str,
        node_id: &str,
        group_id: &str,
    ) -> Result<Vec<ChangeRecord>, GenomeError> {
        let proxy = self.proxy(proxy_id)?;
        let parent = self.instance(proxy.vfg_parent())?;
        if parent.node(node_id).is_none() {
            return Err(GenomeError::missing(&parent.id, "node", node_id));
        }
        if parent.group_for_node(node_id, self.settings.group_mode).is_some() {
            return Err(GenomeError::Precondition(format!(
                "{node_id} already belongs to a region of {}",
                parent.id
            )));
        }
        let change = self.proxy_mut(proxy_id)?.add_added_node(AddedNode {
            node_id: node_id.to_string(),
            group_id: group_id.to_string(),
        })?;
        Ok(vec![change.into()])
    }

    pub fn remove_proxy_added_node(&mut self, proxy_id: &str, node_id: &str) -> Result<Vec<ChangeRecord>, GenomeError> {
        Ok(vec![self.proxy_mut(proxy_id)?.remove_added_node(node_id)?.into()])
    }

    pub fn proxy_activate_subset(
        &mut self,
        proxy_id: &str,
        parent_group: &str,
        subset: Option<&str>,
    ) -> Result<Vec<ChangeRecord>, GenomeError> {
        Ok(vec![self.proxy_mut(proxy_id)?.set_active_subset(parent_group, subset)?.into()])
    }

    /// Every key a dynamic model can be requested under.
    pub fn dynamic_keys(&self) -> Vec<DynamicKey> {
        self.proxies.values().flat_map(DynamicInstanceProxy::proxied_keys).collect()
    }

    /// The dynamic model for `key`, materialized on first access.
    pub fn dynamic_instance(&self, key: &DynamicKey) -> Result<DynamicView<'_>, GenomeError> {
        let proxy = self.proxy(&key.proxy_id)?;
        let parent = self.instance(proxy.vfg_parent())?;
        let instance = proxy.instance_for(key)?;
        Ok(DynamicView::new(
            instance,
            DerivationContext {
                root: &self.root,
                parent,
                proxy,
                time_course: &self.time_course,
                temporal: &self.temporal,
                group_mode: self.settings.group_mode,
                sim_key: self.settings.sim_key.as_deref(),
            },
        ))
    }

    // Upstream data

    pub fn set_time_course(&mut self, data: TimeCourseData) {
        self.time_course = data;
        self.invalidate_all();
    }

    pub fn edit_time_course<F: FnOnce(&mut TimeCourseData)>(&mut self, edit: F) {
        edit(&mut self.time_course);
        self.invalidate_all();
    }

    pub fn set_temporal_ranges(&mut self, data: TemporalInputRangeData) {
        self.temporal = data;
        self.invalidate_all();
    }

    pub fn edit_temporal_ranges<F: FnOnce(&mut TemporalInputRangeData)>(&mut self, edit: F) {
        edit(&mut self.temporal);
        self.invalidate_all();
    }

    // Navigation

    pub fn add_tree_path(&mut self, name: &str, stops: Vec<PathStop>) -> Result<(String, Vec<ChangeRecord>), GenomeError> {
        for stop in &stops {
            self.check_model_key(&stop.model)?;
        }
        let id = self.labels.paths.next_label();
        let change = self.navigation.add_path(UserTreePath {
            id: id.clone(),
            name: name.to_string(),
            stops,
        })?;
        Ok((id, vec![change.into()]))
    }

    pub fn remove_tree_path(&mut self, id: &str) -> Result<Vec<ChangeRecord>, GenomeError> {
        Ok(vec![self.navigation.remove_path(id)?.into()])
    }

    pub fn set_startup_view(&mut self, view: StartupView) -> Result<Vec<ChangeRecord>, GenomeError> {
        if let Some(model) = &view.model {
            self.check_model_key(model)?;
        }
        Ok(vec![self.navigation.set_startup_view(view).into()])
    }

    fn check_model_key(&self, key: &GenomeKey) -> Result<(), GenomeError> {
        match key {
            GenomeKey::Root(id) if *id == self.root.id => Ok(()),
            GenomeKey::Root(id) => Err(GenomeError::InvalidKey(id.clone())),
            GenomeKey::Instance(id) => self.instance(id).map(|_| ()),
            GenomeKey::Dynamic(dynamic) => {
                if self.proxy(&dynamic.proxy_id)?.has_key(dynamic) {
                    Ok(())
                } else {
                    Err(GenomeError::InvalidKey(dynamic.to_string()))
                }
            }
        }
    }

    // Gene resizing

    /// Resizes a gene. Growing adds holder space on the left. Shrinking
    /// compresses the region layout and moves every landing on the gene, in
    /// every model, to its new pad; a shrink that cannot fit is rejected
    /// without touching anything.
    pub fn change_gene_pad_count(&mut self, gene_id: &str, num_pads: i32) -> Result<Vec<ChangeRecord>, GenomeError> {
        let base = InstanceId::base_of(gene_id).to_string();
        let gene = self
            .root
            .gene(&base)
            .cloned()
            .ok_or_else(|| GenomeError::missing(&self.root.id, "gene", &base))?;
        if num_pads < 1 {
            return Err(GenomeError::Precondition(format!("gene {base} cannot have {num_pads} pads")));
        }
        if num_pads == gene.pad_count {
            return Ok(Vec::new());
        }
        let landings = self.oracle().gene_landings(&base);
        let (regions, pad_map) = if num_pads > gene.pad_count {
            (region::stretch_the_list(&gene.regions, num_pads)?, BTreeMap::new())
        } else {
            let occupied: BTreeSet<i32> = landings.iter().map(|landing| landing.pad).collect();
            let compressed = region::compress_the_list(&gene.regions, gene.pad_count, num_pads, &occupied)?;
            (compressed.regions, compressed.pad_map)
        };

        let mut out = vec![
            self.root
                .store_mut()
                .modify_gene(&base, |gene| {
                    gene.pad_count = num_pads;
                    gene.regions = regions;
                    Ok(())
                })?
                .into(),
        ];
        for landing in landings {
            let Some(&new_pad) = pad_map.get(&landing.pad) else {
                continue;
            };
            if new_pad == landing.pad {
                continue;
            }
            let change: ChangeRecord = match &landing.owner {
                LinkOwner::Root => self
                    .root
                    .store_mut()
                    .modify_link(&landing.link_id, |link| {
                        link.landing_pad = new_pad;
                        Ok(())
                    })?
                    .into(),
                LinkOwner::Instance(model_id) => self
                    .instance_mut(model_id)?
                    .store_mut()
                    .modify_link(&landing.link_id, |link| {
                        link.landing_pad = new_pad;
                        Ok(())
                    })?
                    .into(),
            };
            out.push(change);
        }
        self.invalidate_all();
        info!(gene = %base, from = gene.pad_count, to = num_pads, records = out.len(), "gene resized");
        Ok(out)
    }

    pub fn set_gene_regions(&mut self, gene_id: &str, regions: Vec<region::GeneRegion>) -> Result<Vec<ChangeRecord>, GenomeError> {
        let base = InstanceId::base_of(gene_id);
        Ok(vec![self.root.set_gene_regions(base, regions)?.into()])
    }

    pub fn add_gene_region(&mut self, gene_id: &str, new_region: region::GeneRegion) -> Result<Vec<ChangeRecord>, GenomeError> {
        let base = InstanceId::base_of(gene_id);
        Ok(vec![self.root.add_gene_region(base, new_region)?.into()])
    }

    pub fn remove_gene_region(&mut self, gene_id: &str, key: &region::RegionKey) -> Result<Vec<ChangeRecord>, GenomeError> {
        let base = InstanceId::base_of(gene_id);
        Ok(vec![self.root.remove_gene_region(base, key)?.into()])
    }

    // Undo / redo

    pub fn undo(&mut self, record: &ChangeRecord) -> Result<(), GenomeError> {
        self.replay(record, true)
    }

    pub fn redo(&mut self, record: &ChangeRecord) -> Result<(), GenomeError> {
        self.replay(record, false)
    }

    /// Undoes a batch in reverse order.
    pub fn undo_all(&mut self, batch: &[ChangeRecord]) -> Result<(), GenomeError> {
        batch.iter().rev().try_for_each(|record| self.undo(record))
    }

    pub fn redo_all(&mut self, batch: &[ChangeRecord]) -> Result<(), GenomeError> {
        batch.iter().try_for_each(|record| self.redo(record))
    }

    fn replay(&mut self, record: &ChangeRecord, undo: bool) -> Result<(), GenomeError> {
        match record {
            ChangeRecord::Root(change) => {
                if undo {
                    self.root.change_undo(change)?;
                } else {
                    self.root.change_redo(change)?;
                }
            }
            ChangeRecord::Instance(change) => {
                let model = self.instance_mut(&change.genome_id)?;
                if undo {
                    model.change_undo(change)?;
                } else {
                    model.change_redo(change)?;
                }
            }
            ChangeRecord::Proxy(change) => {
                let proxy = self.proxy_mut(&change.proxy_id)?;
                if undo {
                    proxy.change_undo(change)?;
                } else {
                    proxy.change_redo(change)?;
                }
            }
            ChangeRecord::Overlay(change) => {
                let support = match &change.owner {
                    OverlayOwner::Root(_) => self.root.store_mut().overlays_mut(),
                    OverlayOwner::Instance(id) => self.instance_mut(id)?.store_mut().overlays_mut(),
                    OverlayOwner::Proxy(id) => self.proxy_mut(id)?.overlays_mut(),
                };
                if undo {
                    support.undo(&change.kind)?;
                } else {
                    support.redo(&change.kind)?;
                }
            }
            ChangeRecord::Image(change) => {
                if undo {
                    self.images.change_undo(change);
                } else {
                    self.images.change_redo(change);
                }
            }
            ChangeRecord::TreePath(change) => {
                if undo {
                    self.navigation.tree_path_undo(change);
                } else {
                    self.navigation.tree_path_redo(change);
                }
            }
            ChangeRecord::StartupView(change) => {
                if undo {
                    self.navigation.startup_undo(change);
                } else {
                    self.navigation.startup_redo(change);
                }
            }
            ChangeRecord::ModelTree(change) => self.replay_model_tree(change, undo)?,
        }
        self.invalidate_all();
        Ok(())
    }

    fn replay_model_tree(&mut self, change: &ModelTreeChange, undo: bool) -> Result<(), GenomeError> {
        match change {
            ModelTreeChange::Instance { position, orig, new } => {
                let (gone, back) = if undo { (new, orig) } else { (orig, new) };
                if let Some(gone) = gone {
                    self.instances.remove(&gone.id);
                    self.instance_order.retain(|id| *id != gone.id);
                }
                if let Some(back) = back {
                    let slot = (*position).min(self.instance_order.len());
                    self.instance_order.insert(slot, back.id.clone());
                    self.instances.insert(back.id.clone(), back.as_ref().clone());
                }
            }
            ModelTreeChange::Proxy { orig, new } => {
                let (gone, back) = if undo { (new, orig) } else { (orig, new) };
                if let Some(gone) = gone {
                    self.proxies.remove(&gone.id);
                }
                if let Some(back) = back {
                    self.proxies.insert(back.id.clone(), back.as_ref().clone());
                }
            }
        }
        Ok(())
    }
}

/// Results of overlay edits, flattened into change records.
pub trait IntoOverlayRecords {
    fn into_records(self) -> Vec<ChangeRecord>;
}

impl IntoOverlayRecords for crate::overlay::OverlayChange {
    fn into_records(self) -> Vec<ChangeRecord> {
        vec![self.into()]
    }
}

impl IntoOverlayRecords for Vec<crate::overlay::OverlayChange> {
    fn into_records(self) -> Vec<ChangeRecord> {
        records(self)
    }
}
