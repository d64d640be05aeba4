//! Serializable summaries printed by the command-line tool.

use std::collections::BTreeMap;
use std::io::{self, Write};

use serde::Serialize;

use crate::domain::{DynamicKey, GenomeKey, InstanceId, TimeSelector};
use crate::error::GenomeError;
use crate::legacy::LegacyReport;
use crate::oracle::{ModuleAnalysis, NameCollision, PadRequirement};
use crate::source::GenomeSource;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Root,
    Instance,
    Dynamic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelEntry {
    pub key: String,
    pub kind: ModelKind,
    pub name: String,
    pub parent: Option<String>,
    pub generation: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelsReport {
    pub root: String,
    pub models: Vec<ModelEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DriftSummary {
    pub gene_id: String,
    pub drifted: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub checked_at: String,
    pub corrections: Vec<String>,
    pub name_collisions: Vec<NameCollision>,
    pub module_drift: Vec<DriftSummary>,
    pub written: Option<String>,
}

impl CheckReport {
    pub fn is_clean(&self) -> bool {
        self.corrections.is_empty() && self.name_collisions.is_empty() && self.module_drift.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PadsReport {
    pub node_id: String,
    pub overall: PadRequirement,
    pub per_model: BTreeMap<String, PadRequirement>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DynamicNodeEntry {
    pub id: String,
    pub name: String,
    pub activity: String,
    pub level: f64,
    pub group: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DynamicLinkEntry {
    pub id: String,
    pub source: String,
    pub target: String,
    pub activity: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DynamicReport {
    pub key: String,
    pub nodes: Vec<DynamicNodeEntry>,
    pub links: Vec<DynamicLinkEntry>,
}

pub fn models_report(source: &GenomeSource) -> Result<ModelsReport, GenomeError> {
    let mut models = Vec::new();
    for key in source.oracle().ordered_models() {
        let entry = match &key {
            GenomeKey::Root(id) => ModelEntry {
                key: id.clone(),
                kind: ModelKind::Root,
                name: source.root().name().to_string(),
                parent: None,
                generation: 0,
            },
            GenomeKey::Instance(id) => {
                let model = source.instance(id)?;
                ModelEntry {
                    key: id.clone(),
                    kind: ModelKind::Instance,
                    name: model.name().to_string(),
                    parent: Some(model.vfg_parent().unwrap_or(&source.root().id).to_string()),
                    generation: model.generation(),
                }
            }
            GenomeKey::Dynamic(dynamic) => {
                let proxy = source.proxy(&dynamic.proxy_id)?;
                let name = match dynamic.time {
                    TimeSelector::All => proxy.name().to_string(),
                    TimeSelector::Hour(hour) => format!("{} ({hour})", proxy.name()),
                };
                ModelEntry {
                    key: dynamic.to_string(),
                    kind: ModelKind::Dynamic,
                    name,
                    parent: Some(proxy.vfg_parent().to_string()),
                    generation: proxy.generation(),
                }
            }
        };
        models.push(entry);
    }
    Ok(ModelsReport {
        root: source.root().id.clone(),
        models,
    })
}

pub fn check_report(source: &GenomeSource, legacy: &LegacyReport) -> Result<CheckReport, GenomeError> {
    let oracle = source.oracle();
    let mut module_drift = Vec::new();
    for gene in source.root().store().genes() {
        if gene.num_regions() == 0 {
            continue;
        }
        let analysis = oracle.analyze_links_into_modules(&gene.id)?;
        let drifted = analysis.drifted().count();
        if drifted > 0 {
            module_drift.push(DriftSummary {
                gene_id: gene.id.clone(),
                drifted,
            });
        }
    }
    Ok(CheckReport {
        checked_at: chrono::Utc::now().to_rfc3339(),
        corrections: legacy.corrections.clone(),
        name_collisions: oracle.name_collisions(),
        module_drift,
        written: None,
    })
}

pub fn modules_report(source: &GenomeSource, gene_id: &str) -> Result<ModuleAnalysis, GenomeError> {
    source.oracle().analyze_links_into_modules(InstanceId::base_of(gene_id))
}

pub fn pads_report(source: &GenomeSource, node_id: &str) -> Result<PadsReport, GenomeError> {
    let base = InstanceId::base_of(node_id);
    let oracle = source.oracle();
    let mut per_model = BTreeMap::new();
    for key in oracle.ordered_models() {
        let needs = oracle.model_node_pad_requirements(&key, base)?;
        if needs != PadRequirement::default() {
            per_model.insert(key.to_string(), needs);
        }
    }
    Ok(PadsReport {
        node_id: base.to_string(),
        overall: oracle.node_pad_requirements(base)?,
        per_model,
    })
}

/// Materializes one dynamic model. Without an hour, a single-slice proxy
/// shows its summary model and a per-hour proxy shows its first hour.
pub fn dynamic_report(source: &GenomeSource, proxy_id: &str, hour: Option<i32>) -> Result<DynamicReport, GenomeError> {
    let proxy = source.proxy(proxy_id)?;
    let time = match hour {
        Some(hour) => TimeSelector::Hour(hour),
        None if proxy.is_single() => TimeSelector::All,
        None => TimeSelector::Hour(proxy.min_time()),
    };
    let key = DynamicKey::new(proxy_id, time);
    let view = source.dynamic_instance(&key)?;
    let mut nodes = Vec::new();
    for node in view.genes()?.into_iter().chain(view.nodes()?) {
        let base = InstanceId::base_of(&node.id);
        let name = node
            .override_name
            .clone()
            .or_else(|| source.root().item_name(base).map(str::to_string))
            .unwrap_or_default();
        nodes.push(DynamicNodeEntry {
            id: node.id.clone(),
            name,
            activity: node.activity.token().to_string(),
            level: node.activity.level(),
            group: view.group_for_node(&node.id)?.map(|group| group.display_name().to_string()),
        });
    }
    let links = view
        .links()?
        .into_iter()
        .map(|link| DynamicLinkEntry {
            id: link.id.clone(),
            source: link.source.clone(),
            target: link.target.clone(),
            activity: link.activity.token().to_string(),
        })
        .collect();
    Ok(DynamicReport {
        key: key.to_string(),
        nodes,
        links,
    })
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print<T: Serialize>(value: &T, pretty: bool) -> io::Result<()> {
        let json = if pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        }
        .map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
