//! Builds model hierarchies from line-oriented CSV descriptions.
//!
//! ```text
//! # comment
//! model,Embryo,,0,30
//! model,Late,Embryo
//! region,Embryo,Endoderm,endo
//! general,Embryo,box,Wnt8,gene,blimp1,+,,endo
//! standalone,Late,gene,otx
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use csv::{ReaderBuilder, StringRecord, Trim};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::change::{ChangeRecord, TimeBounds};
use crate::domain::{InstanceId, NodeType, Sign, names_match};
use crate::error::GenomeError;
use crate::source::GenomeSource;

/// Cooperative cancellation flag, polled between build steps.
#[derive(Debug, Clone, Default)]
pub struct ExitSignal {
    requested: Arc<AtomicBool>,
}

impl ExitSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDef {
    pub name: String,
    pub parent: Option<String>,
    pub time_bounds: Option<TimeBounds>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionDef {
    pub model: String,
    pub name: String,
    pub abbrev: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRef {
    pub node_type: NodeType,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildInstruction {
    General {
        model: String,
        source: NodeRef,
        target: NodeRef,
        sign: Sign,
        source_region: Option<String>,
        target_region: Option<String>,
    },
    Standalone {
        model: String,
        node: NodeRef,
        region: Option<String>,
    },
}

impl BuildInstruction {
    pub fn model(&self) -> &str {
        match self {
            BuildInstruction::General { model, .. } | BuildInstruction::Standalone { model, .. } => model,
        }
    }
}

/// Parsed build input. Models are held parents first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildPlan {
    models: Vec<ModelDef>,
    regions: Vec<RegionDef>,
    instructions: Vec<BuildInstruction>,
}

fn csv_error(line: u64, message: impl std::fmt::Display) -> GenomeError {
    GenomeError::Csv(format!("line {line}: {message}"))
}

fn field(record: &StringRecord, index: usize) -> Option<&str> {
    record.get(index).filter(|value| !value.is_empty())
}

fn required<'r>(record: &'r StringRecord, index: usize, line: u64, what: &str) -> Result<&'r str, GenomeError> {
    field(record, index).ok_or_else(|| csv_error(line, format!("missing {what}")))
}

fn node_ref(record: &StringRecord, index: usize, line: u64) -> Result<NodeRef, GenomeError> {
    let node_type = required(record, index, line, "node type")?;
    Ok(NodeRef {
        node_type: node_type.parse().map_err(|err| csv_error(line, err))?,
        name: required(record, index + 1, line, "node name")?.to_string(),
    })
}

impl BuildPlan {
    pub fn parse(text: &str) -> Result<Self, GenomeError> {
        Self::from_reader(text.as_bytes())
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, GenomeError> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .comment(Some(b'#'))
            .trim(Trim::All)
            .from_reader(reader);
        let mut models = Vec::new();
        let mut plan = BuildPlan::default();
        for record in rdr.records() {
            let record = record.map_err(|err| GenomeError::Csv(err.to_string()))?;
            let line = record.position().map(|pos| pos.line()).unwrap_or(0);
            let Some(tag) = field(&record, 0) else {
                continue;
            };
            match tag.to_ascii_lowercase().as_str() {
                "model" => {
                    let bounds = match (field(&record, 3), field(&record, 4)) {
                        (Some(min), Some(max)) => {
                            let min = min.parse().map_err(|_| csv_error(line, format!("bad min time {min:?}")))?;
                            let max = max.parse().map_err(|_| csv_error(line, format!("bad max time {max:?}")))?;
                            Some(TimeBounds::new(min, max))
                        }
                        (None, None) => None,
                        _ => return Err(csv_error(line, "model times need both min and max")),
                    };
                    models.push(ModelDef {
                        name: required(&record, 1, line, "model name")?.to_string(),
                        parent: field(&record, 2).map(str::to_string),
                        time_bounds: bounds,
                    });
                }
                "region" => plan.regions.push(RegionDef {
                    model: required(&record, 1, line, "model name")?.to_string(),
                    name: required(&record, 2, line, "region name")?.to_string(),
                    abbrev: field(&record, 3).map(str::to_string),
                }),
                "general" => {
                    let sign = required(&record, 6, line, "sign")?;
                    plan.instructions.push(BuildInstruction::General {
                        model: required(&record, 1, line, "model name")?.to_string(),
                        source: node_ref(&record, 2, line)?,
                        target: node_ref(&record, 4, line)?,
                        sign: sign.parse().map_err(|err| csv_error(line, err))?,
                        source_region: field(&record, 7).map(str::to_string),
                        target_region: field(&record, 8).map(str::to_string),
                    });
                }
                "standalone" => plan.instructions.push(BuildInstruction::Standalone {
                    model: required(&record, 1, line, "model name")?.to_string(),
                    node: node_ref(&record, 2, line)?,
                    region: field(&record, 4).map(str::to_string),
                }),
                other => return Err(csv_error(line, format!("unknown record kind {other:?}"))),
            }
        }
        plan.models = order_top_down(models)?;
        Ok(plan)
    }

    /// Model definitions, parents before children.
    pub fn top_down(&self) -> &[ModelDef] {
        &self.models
    }

    /// Model definitions, children before parents.
    pub fn bottom_up(&self) -> impl Iterator<Item = &ModelDef> {
        self.models.iter().rev()
    }

    pub fn regions(&self) -> &[RegionDef] {
        &self.regions
    }

    pub fn instructions(&self) -> &[BuildInstruction] {
        &self.instructions
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty() && self.regions.is_empty() && self.instructions.is_empty()
    }
}

/// Parents named in the plan come before their children. A parent not
/// defined here is expected to exist in the target hierarchy.
fn order_top_down(models: Vec<ModelDef>) -> Result<Vec<ModelDef>, GenomeError> {
    let mut seen = BTreeSet::new();
    for model in &models {
        if !seen.insert(model.name.to_lowercase()) {
            return Err(GenomeError::Csv(format!("model {} is defined twice", model.name)));
        }
    }
    let defined = seen;
    let mut placed: BTreeSet<String> = BTreeSet::new();
    let mut pending = models;
    let mut ordered = Vec::with_capacity(pending.len());
    while !pending.is_empty() {
        let (ready, waiting): (Vec<ModelDef>, Vec<ModelDef>) = pending.into_iter().partition(|model| {
            model.parent.as_ref().is_none_or(|parent| {
                let key = parent.to_lowercase();
                !defined.contains(&key) || placed.contains(&key)
            })
        });
        if ready.is_empty() {
            let names: Vec<&str> = waiting.iter().map(|model| model.name.as_str()).collect();
            return Err(GenomeError::Csv(format!("model parents form a cycle: {}", names.join(", "))));
        }
        for model in ready {
            placed.insert(model.name.to_lowercase());
            ordered.push(model);
        }
        pending = waiting;
    }
    Ok(ordered)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildReport {
    pub changes: Vec<ChangeRecord>,
    pub models_created: usize,
    pub regions_created: usize,
    pub instructions_applied: usize,
    pub cancelled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildSummary {
    pub changes: usize,
    pub models_created: usize,
    pub regions_created: usize,
    pub instructions_applied: usize,
    pub cancelled: bool,
}

impl BuildReport {
    pub fn summary(&self) -> BuildSummary {
        BuildSummary {
            changes: self.changes.len(),
            models_created: self.models_created,
            regions_created: self.regions_created,
            instructions_applied: self.instructions_applied,
            cancelled: self.cancelled,
        }
    }
}

/// Applies a [`BuildPlan`] to a hierarchy, reusing models, nodes and links
/// that already exist under the same names.
pub struct HierarchyBuilder<'a> {
    source: &'a mut GenomeSource,
    signal: ExitSignal,
    abbrevs: BTreeMap<(String, String), String>,
}

impl<'a> HierarchyBuilder<'a> {
    pub fn new(source: &'a mut GenomeSource, signal: ExitSignal) -> Self {
        Self {
            source,
            signal,
            abbrevs: BTreeMap::new(),
        }
    }

    /// Runs every step of the plan. A cancelled build keeps the steps that
    /// completed; their records are in the report for the caller to undo.
    pub fn apply(mut self, plan: &BuildPlan) -> Result<BuildReport, GenomeError> {
        let mut report = BuildReport::default();
        for model in plan.top_down() {
            if self.cancelled(&mut report) {
                return Ok(report);
            }
            if self.ensure_model(model, &mut report.changes)? {
                report.models_created += 1;
            }
        }
        for region in plan.regions() {
            if self.cancelled(&mut report) {
                return Ok(report);
            }
            let model_id = self.model_id(&region.model)?;
            if let Some(abbrev) = &region.abbrev {
                self.abbrevs
                    .insert((model_id.clone(), abbrev.to_lowercase()), region.name.clone());
            }
            if self.find_group(&model_id, &region.name)?.is_none() {
                self.ensure_group(&model_id, &region.name, &mut report.changes)?;
                report.regions_created += 1;
            }
        }
        for instruction in plan.instructions() {
            if self.cancelled(&mut report) {
                return Ok(report);
            }
            self.apply_instruction(instruction, &mut report.changes)?;
            report.instructions_applied += 1;
        }
        info!(
            models = report.models_created,
            regions = report.regions_created,
            instructions = report.instructions_applied,
            changes = report.changes.len(),
            "hierarchy build finished"
        );
        Ok(report)
    }

    fn cancelled(&self, report: &mut BuildReport) -> bool {
        if self.signal.is_requested() {
            warn!(changes = report.changes.len(), "hierarchy build cancelled");
            report.cancelled = true;
        }
        report.cancelled
    }

    fn model_id(&self, name: &str) -> Result<String, GenomeError> {
        self.source
            .instances()
            .find(|model| names_match(model.name(), name))
            .map(|model| model.id.clone())
            .ok_or_else(|| GenomeError::missing(&self.source.root().id, "model", name))
    }

    fn ensure_model(&mut self, def: &ModelDef, changes: &mut Vec<ChangeRecord>) -> Result<bool, GenomeError> {
        let parent = def.parent.as_deref().map(|name| self.model_id(name)).transpose()?;
        let existing = self.model_id(&def.name).ok();
        let (model_id, created) = match existing {
            Some(id) => {
                let current = self.source.instance(&id)?.vfg_parent().map(str::to_string);
                if current != parent {
                    return Err(GenomeError::Precondition(format!(
                        "model {} already exists under a different parent",
                        def.name
                    )));
                }
                (id, false)
            }
            None => {
                let id = self.source.next_genome_key();
                changes.extend(
                    self.source
                        .add_genome_instance_existing_label(&id, &def.name, parent.as_deref())?,
                );
                debug!(model = %id, name = %def.name, "model created");
                (id, true)
            }
        };
        if let Some(bounds) = def.time_bounds {
            if self.source.instance(&model_id)?.time_bounds() != Some(bounds) {
                changes.extend(self.source.set_time_bounds(&model_id, Some(bounds))?);
            }
        }
        Ok(created)
    }

    fn region_name(&self, model_id: &str, region: &str) -> String {
        let mut cursor = Some(model_id.to_string());
        while let Some(id) = cursor {
            if let Some(name) = self.abbrevs.get(&(id.clone(), region.to_lowercase())) {
                return name.clone();
            }
            cursor = self
                .source
                .instance(&id)
                .ok()
                .and_then(|model| model.vfg_parent().map(str::to_string));
        }
        region.to_string()
    }

    fn find_group(&self, model_id: &str, name: &str) -> Result<Option<String>, GenomeError> {
        Ok(self
            .source
            .instance(model_id)?
            .groups()
            .find(|group| !group.is_subset() && names_match(group.display_name(), name))
            .map(|group| group.id.clone()))
    }

    fn ensure_group(
        &mut self,
        model_id: &str,
        name: &str,
        changes: &mut Vec<ChangeRecord>,
    ) -> Result<String, GenomeError> {
        if let Some(group_id) = self.find_group(model_id, name)? {
            return Ok(group_id);
        }
        let parent = self.source.instance(model_id)?.vfg_parent().map(str::to_string);
        match parent {
            None => {
                let (group_id, records) = self.source.add_group(model_id, name)?;
                changes.extend(records);
                Ok(group_id)
            }
            Some(parent_id) => {
                let parent_group = self.ensure_group(&parent_id, name, changes)?;
                changes.extend(self.source.include_parent_group(model_id, &parent_group)?);
                self.find_group(model_id, name)?
                    .ok_or_else(|| GenomeError::missing(model_id, "group", name))
            }
        }
    }

    fn ensure_root_node(&mut self, node: &NodeRef, changes: &mut Vec<ChangeRecord>) -> Result<String, GenomeError> {
        let root = self.source.root();
        let found = if node.node_type.is_gene() {
            root.store()
                .genes()
                .find(|gene| names_match(&gene.name, &node.name))
                .map(|gene| gene.id.clone())
        } else {
            root.store()
                .nodes()
                .find(|existing| existing.node_type == node.node_type && names_match(&existing.name, &node.name))
                .map(|existing| existing.id.clone())
        };
        if let Some(id) = found {
            return Ok(id);
        }
        let (id, records) = self.source.add_node(node.node_type, &node.name)?;
        changes.extend(records);
        Ok(id)
    }

    fn ensure_root_link(
        &mut self,
        source: &str,
        target: &str,
        sign: Sign,
        changes: &mut Vec<ChangeRecord>,
    ) -> Result<String, GenomeError> {
        let found = self
            .source
            .root()
            .store()
            .links()
            .find(|link| link.source == source && link.target == target && link.sign == sign)
            .map(|link| link.id.clone());
        if let Some(id) = found {
            return Ok(id);
        }
        let (id, records) = self.source.add_root_link(source, target, sign)?;
        changes.extend(records);
        Ok(id)
    }

    /// Instance of `base_id` in `model_id`, placed in `region` when one is
    /// named. Missing instances are created in the root instance and
    /// propagated down.
    fn ensure_node(
        &mut self,
        model_id: &str,
        base_id: &str,
        region: Option<&str>,
        changes: &mut Vec<ChangeRecord>,
    ) -> Result<String, GenomeError> {
        let group_id = match region {
            Some(name) => Some(self.ensure_group(model_id, name, changes)?),
            None => None,
        };
        let model = self.source.instance(model_id)?;
        let existing = model
            .instances_of(base_id)
            .map(|node| node.id.clone())
            .find(|node_id| match &group_id {
                Some(group_id) => model.group(group_id).is_some_and(|group| group.members.contains(node_id)),
                None => true,
            });
        if let Some(node_id) = existing {
            return Ok(node_id);
        }
        let parent = model.vfg_parent().map(str::to_string);
        let node_id = match parent {
            None => {
                let (node_id, records) = self.source.add_node_to_root_instance(model_id, base_id)?;
                changes.extend(records);
                node_id
            }
            Some(parent_id) => {
                let node_id = self.ensure_node(&parent_id, base_id, region, changes)?;
                if self.source.instance(model_id)?.node(&node_id).is_none() {
                    changes.extend(self.source.propagate_node(model_id, &node_id)?);
                }
                node_id
            }
        };
        if let Some(group_id) = group_id {
            let member = self
                .source
                .instance(model_id)?
                .group(&group_id)
                .is_some_and(|group| group.members.contains(&node_id));
            if !member {
                changes.extend(self.source.add_group_member(model_id, &group_id, &node_id)?);
            }
        }
        Ok(node_id)
    }

    fn ensure_link(
        &mut self,
        model_id: &str,
        base_id: &str,
        source: &str,
        target: &str,
        changes: &mut Vec<ChangeRecord>,
    ) -> Result<String, GenomeError> {
        let model = self.source.instance(model_id)?;
        let existing = model
            .link_instances_of(base_id)
            .find(|link| link.source == source && link.target == target)
            .map(|link| link.id.clone());
        if let Some(link_id) = existing {
            return Ok(link_id);
        }
        match model.vfg_parent().map(str::to_string) {
            None => {
                let (link_id, records) = self.source.add_link_to_root_instance(model_id, base_id, source, target)?;
                changes.extend(records);
                Ok(link_id)
            }
            Some(parent_id) => {
                let link_id = self.ensure_link(&parent_id, base_id, source, target, changes)?;
                changes.extend(self.source.propagate_link(model_id, &link_id)?);
                Ok(link_id)
            }
        }
    }

    fn apply_instruction(
        &mut self,
        instruction: &BuildInstruction,
        changes: &mut Vec<ChangeRecord>,
    ) -> Result<(), GenomeError> {
        let model_id = self.model_id(instruction.model())?;
        match instruction {
            BuildInstruction::General {
                source,
                target,
                sign,
                source_region,
                target_region,
                ..
            } => {
                let source_base = self.ensure_root_node(source, changes)?;
                let target_base = self.ensure_root_node(target, changes)?;
                let link_base = self.ensure_root_link(&source_base, &target_base, *sign, changes)?;
                let source_region = source_region.as_deref().map(|name| self.region_name(&model_id, name));
                let target_region = target_region.as_deref().map(|name| self.region_name(&model_id, name));
                let source_id = self.ensure_node(&model_id, &source_base, source_region.as_deref(), changes)?;
                let target_id = self.ensure_node(&model_id, &target_base, target_region.as_deref(), changes)?;
                let link_id = self.ensure_link(&model_id, &link_base, &source_id, &target_id, changes)?;
                debug!(model = %model_id, link = %link_id, base = %InstanceId::base_of(&link_id), "link placed");
            }
            BuildInstruction::Standalone { node, region, .. } => {
                let base = self.ensure_root_node(node, changes)?;
                let region = region.as_deref().map(|name| self.region_name(&model_id, name));
                let node_id = self.ensure_node(&model_id, &base, region.as_deref(), changes)?;
                debug!(model = %model_id, node = %node_id, "node placed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn children_are_ordered_after_parents() {
        let plan = BuildPlan::parse("model,Late,Early\nmodel,Early,Top\nmodel,Top,\n").unwrap();
        let names: Vec<&str> = plan.top_down().iter().map(|model| model.name.as_str()).collect();
        assert_eq!(names, ["Top", "Early", "Late"]);
        let reversed: Vec<&str> = plan.bottom_up().map(|model| model.name.as_str()).collect();
        assert_eq!(reversed, ["Late", "Early", "Top"]);
    }

    #[test]
    fn parent_cycles_are_rejected() {
        let err = BuildPlan::parse("model,A,B\nmodel,B,A\n").unwrap_err();
        assert_matches!(err, GenomeError::Csv(message) if message.contains("cycle"));
    }

    #[test]
    fn bad_sign_names_the_line() {
        let err = BuildPlan::parse("model,A,\ngeneral,A,box,x,gene,y,sideways\n").unwrap_err();
        assert_matches!(err, GenomeError::Csv(message) if message.starts_with("line 2"));
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let plan = BuildPlan::parse("# header\n\nmodel,A,\n# trailing\n").unwrap();
        assert_eq!(plan.top_down().len(), 1);
        assert!(plan.instructions().is_empty());
    }
}
