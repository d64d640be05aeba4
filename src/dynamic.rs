//! Lazily derived, never persisted, time-sliced models.

use std::cell::OnceCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::change::TimeBounds;
use crate::db_genome::DbGenome;
use crate::domain::{DynamicKey, GroupMode, InstanceId};
use crate::error::GenomeError;
use crate::expression::{ExpressionLevel, TemporalRangeSource, TimeCourseSource};
use crate::group::{Group, GroupTuple};
use crate::instance::GenomeInstance;
use crate::items::{Activity, LinkageInstance, NodeInstance, Note};
use crate::proxy::DynamicInstanceProxy;

/// Everything a dynamic model is derived from.
#[derive(Clone, Copy)]
pub struct DerivationContext<'a> {
    pub root: &'a DbGenome,
    pub parent: &'a GenomeInstance,
    pub proxy: &'a DynamicInstanceProxy,
    pub time_course: &'a dyn TimeCourseSource,
    pub temporal: &'a dyn TemporalRangeSource,
    pub group_mode: GroupMode,
    pub sim_key: Option<&'a str>,
}

/// One time slice of a proxy family. Starts uninitialized; the first
/// accessor derives its contents exactly once.
#[derive(Debug)]
pub struct DynamicGenomeInstance {
    key: DynamicKey,
    state: OnceCell<GenomeInstance>,
}

impl DynamicGenomeInstance {
    pub fn new(key: DynamicKey) -> Self {
        Self {
            key,
            state: OnceCell::new(),
        }
    }

    pub fn key(&self) -> &DynamicKey {
        &self.key
    }

    pub fn is_initialized(&self) -> bool {
        self.state.get().is_some()
    }

    /// Derives the model on first call; later calls return the same snapshot.
    pub fn initialize(&self, ctx: &DerivationContext<'_>) -> Result<&GenomeInstance, GenomeError> {
        if let Some(done) = self.state.get() {
            return Ok(done);
        }
        if ctx.proxy.id != self.key.proxy_id || ctx.parent.id != ctx.proxy.vfg_parent() {
            return Err(GenomeError::Precondition(format!(
                "derivation context does not belong to {}",
                self.key
            )));
        }
        let built = derive(&self.key, ctx)?;
        debug!(key = %self.key, nodes = built.all_nodes().count(), links = built.store().link_count(), "dynamic model materialized");
        Ok(self.state.get_or_init(|| built))
    }

    pub fn add_gene(&self, _gene: NodeInstance) -> Result<(), GenomeError> {
        Err(self.unsupported("add gene"))
    }

    pub fn add_node(&self, _node: NodeInstance) -> Result<(), GenomeError> {
        Err(self.unsupported("add node"))
    }

    pub fn add_linkage(&self, _link: LinkageInstance) -> Result<(), GenomeError> {
        Err(self.unsupported("add linkage"))
    }

    pub fn remove_node(&self, _node_id: &str) -> Result<(), GenomeError> {
        Err(self.unsupported("remove node"))
    }

    pub fn remove_linkage(&self, _link_id: &str) -> Result<(), GenomeError> {
        Err(self.unsupported("remove linkage"))
    }

    fn unsupported(&self, operation: &'static str) -> GenomeError {
        GenomeError::UnsupportedOnVariant {
            operation,
            variant: format!("dynamic model {}", self.key),
        }
    }
}

/// A dynamic model bundled with the data it derives from. Every accessor
/// initializes the model first.
pub struct DynamicView<'a> {
    instance: Rc<DynamicGenomeInstance>,
    ctx: DerivationContext<'a>,
}

impl fmt::Debug for DynamicView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicView")
            .field("key", self.instance.key())
            .field("initialized", &self.instance.is_initialized())
            .finish_non_exhaustive()
    }
}

impl<'a> DynamicView<'a> {
    pub fn new(instance: Rc<DynamicGenomeInstance>, ctx: DerivationContext<'a>) -> Self {
        Self { instance, ctx }
    }

    pub fn key(&self) -> &DynamicKey {
        self.instance.key()
    }

    pub fn instance(&self) -> &Rc<DynamicGenomeInstance> {
        &self.instance
    }

    pub fn model(&self) -> Result<&GenomeInstance, GenomeError> {
        self.instance.initialize(&self.ctx)
    }

    pub fn genes(&self) -> Result<Vec<&NodeInstance>, GenomeError> {
        Ok(self.model()?.store().genes().collect())
    }

    pub fn nodes(&self) -> Result<Vec<&NodeInstance>, GenomeError> {
        Ok(self.model()?.store().nodes().collect())
    }

    pub fn node(&self, id: &str) -> Result<Option<&NodeInstance>, GenomeError> {
        Ok(self.model()?.node(id))
    }

    pub fn links(&self) -> Result<Vec<&LinkageInstance>, GenomeError> {
        Ok(self.model()?.store().links().collect())
    }

    pub fn link(&self, id: &str) -> Result<Option<&LinkageInstance>, GenomeError> {
        Ok(self.model()?.link(id))
    }

    pub fn notes(&self) -> Result<Vec<&Note>, GenomeError> {
        Ok(self.model()?.store().notes().collect())
    }

    pub fn groups(&self) -> Result<Vec<&Group>, GenomeError> {
        Ok(self.model()?.groups().collect())
    }

    pub fn is_empty(&self) -> Result<bool, GenomeError> {
        Ok(self.model()?.is_empty())
    }

    pub fn group_for_node(&self, node_id: &str) -> Result<Option<&Group>, GenomeError> {
        Ok(self.model()?.group_for_node(node_id, self.ctx.group_mode))
    }

    pub fn group_tuple_for_link(&self, link_id: &str) -> Result<Option<GroupTuple>, GenomeError> {
        Ok(self.model()?.group_tuple_for_link(link_id, self.ctx.group_mode))
    }
}

struct NodeVerdict {
    activity: Activity,
    sim_level: Option<f64>,
}

/// Proxy group a parent node is placed in: its own region, else the group
/// it was explicitly added to.
fn proxy_group_for(ctx: &DerivationContext<'_>, node_id: &str) -> Option<String> {
    ctx.parent
        .group_for_node(node_id, ctx.group_mode)
        .map(|group| Group::inherited_id(Group::base_id(&group.id), ctx.proxy.generation()))
        .filter(|id| ctx.proxy.group(id).is_some())
        .or_else(|| ctx.proxy.added_node(node_id).map(|added| added.group_id.clone()))
}

fn classify_node(
    ctx: &DerivationContext<'_>,
    parent_node: &NodeInstance,
    region: &str,
    times: &[i32],
) -> Option<NodeVerdict> {
    let base = InstanceId::base_of(&parent_node.id);
    let weak = ctx.time_course.weak_level();
    let mut full = false;
    let mut partial: Option<f64> = None;
    let mut max_diff: Option<f64> = None;
    for &time in times {
        let level = ctx.time_course.expression(base, region, time);
        match level {
            ExpressionLevel::Expressed => full = true,
            ExpressionLevel::WeakExpression => partial = Some(partial.map_or(weak, |p| p.max(weak))),
            ExpressionLevel::Variable(value) => {
                partial = Some(partial.map_or(value, |p| p.max(value)))
            }
            ExpressionLevel::NotExpressed | ExpressionLevel::NoData | ExpressionLevel::NoRegion => {}
        }
        match ctx.sim_key {
            Some(sim_key) => {
                let simulated = ctx.time_course.simulation_level(sim_key, base, region, time);
                if let (Some(simulated), Some(observed)) = (simulated, level.numeric(weak)) {
                    let diff = (simulated - observed).abs();
                    max_diff = Some(max_diff.map_or(diff, |d| d.max(diff)));
                }
            }
            None if full => break,
            None => {}
        }
    }
    if !full && partial.is_none() {
        return None;
    }
    let activity = match (full, partial, parent_node.activity) {
        (true, _, parent) => parent,
        (false, Some(level), Activity::Variable(bound)) => Activity::Variable(level.min(bound)),
        (false, Some(level), _) => Activity::Variable(level),
        (false, None, parent) => parent,
    };
    Some(NodeVerdict {
        activity,
        sim_level: max_diff,
    })
}

fn derive(key: &DynamicKey, ctx: &DerivationContext<'_>) -> Result<GenomeInstance, GenomeError> {
    let proxy = ctx.proxy;
    let parent = ctx.parent;
    let times = proxy.times_for(key.time);
    let mut model = GenomeInstance::with_parent(
        key.to_string(),
        proxy.name(),
        Some(parent.id.clone()),
        proxy.generation(),
    );
    if let (Some(&first), Some(&last)) = (times.first(), times.last()) {
        model.set_time_bounds(Some(TimeBounds::new(first, last)))?;
    }

    let mut groups: BTreeMap<String, Group> = proxy
        .group_map()
        .iter()
        .map(|(id, group)| {
            let mut copy = group.clone();
            copy.members.clear();
            (id.clone(), copy)
        })
        .collect();
    for note in proxy.notes() {
        model.store_mut().add_note(note.clone())?;
    }

    let mut node_groups: BTreeMap<String, String> = BTreeMap::new();
    for parent_node in parent.all_nodes() {
        let Some(group_id) = proxy_group_for(ctx, &parent_node.id) else {
            continue;
        };
        node_groups.insert(parent_node.id.clone(), group_id.clone());
        let Some(region) = proxy.region_name(&group_id) else {
            continue;
        };
        let Some(verdict) = classify_node(ctx, parent_node, region, &times) else {
            continue;
        };
        let mut clone = parent_node.clone();
        clone.activity = verdict.activity;
        clone.sim_level = verdict.sim_level;
        model.add_node_instance(clone, parent.is_gene(&parent_node.id))?;
        if let Some(group) = groups.get_mut(&group_id) {
            group.members.insert(parent_node.id.clone());
        }
    }

    let mut included: BTreeSet<String> = BTreeSet::new();
    for link in parent.store().links() {
        let base = InstanceId::base_of(&link.id);
        let root_link = ctx
            .root
            .link(base)
            .ok_or_else(|| GenomeError::missing(&ctx.root.id, "link", base))?;
        let source_base = InstanceId::base_of(&link.source);
        let target_base = InstanceId::base_of(&link.target);
        let region_of = |node_id: &str| {
            node_groups
                .get(node_id)
                .and_then(|group_id| proxy.region_name(group_id))
        };

        let forced_install = if ctx.temporal.has_data_for_target(target_base) {
            let target_region = region_of(&link.target);
            let source_region = region_of(&link.source);
            let active = ctx
                .temporal
                .ranges(target_base, source_base)
                .iter()
                .filter(|range| range.applies_to(target_region, source_region, root_link.sign))
                .any(|range| times.iter().any(|time| range.is_active(*time)));
            if !active {
                continue;
            }
            true
        } else {
            false
        };

        let mut installable = true;
        for end in [&link.source, &link.target] {
            if model.node(end).is_some() {
                continue;
            }
            let forced = forced_install && proxy.added_node(end).is_some();
            match parent.node(end) {
                Some(parent_node) if forced => {
                    let mut clone = parent_node.clone();
                    clone.activity = Activity::Inactive;
                    model.add_node_instance(clone, parent.is_gene(end))?;
                    if let Some(group) = node_groups.get(end.as_str()).and_then(|id| groups.get_mut(id)) {
                        group.members.insert(end.clone());
                    }
                }
                _ => installable = false,
            }
        }
        if !installable {
            continue;
        }

        let mut clone = link.clone();
        if let Some(Activity::Variable(source_level)) = model.node(&link.source).map(|node| node.activity) {
            let bound = match link.activity {
                Activity::Variable(level) => level,
                _ => source_level,
            };
            clone.activity = Activity::Variable(source_level.min(bound));
        }
        model.add_link_instance(clone)?;
        included.insert(link.id.clone());
    }

    if ctx.sim_key.is_some() {
        sim_link_init(&mut model, parent, &included)?;
    }

    model.replace_groups(groups);
    Ok(model)
}

/// Adds every parent link whose ends are both present and stamps each link
/// with its source's simulation delta.
fn sim_link_init(
    model: &mut GenomeInstance,
    parent: &GenomeInstance,
    included: &BTreeSet<String>,
) -> Result<(), GenomeError> {
    for link in parent.store().links() {
        if included.contains(&link.id) {
            continue;
        }
        if model.node(&link.source).is_some() && model.node(&link.target).is_some() {
            model.add_link_instance(link.clone())?;
        }
    }
    let stamps: Vec<(String, Option<f64>)> = model
        .store()
        .links()
        .map(|link| (link.id.clone(), model.node(&link.source).and_then(|node| node.sim_level)))
        .collect();
    for (link_id, sim_diff) in stamps {
        model.store_mut().modify_link(&link_id, |link| {
            link.sim_diff = sim_diff;
            Ok(())
        })?;
    }
    Ok(())
}
