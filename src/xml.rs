//! Whole-hierarchy XML files.
//!
//! Numeric and boolean attributes are carried as strings in the wire
//! structs and converted afterwards, so a bad value is reported with the
//! element and attribute it came from.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use std::str::FromStr;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::change::{GenomeProperties, TimeBounds};
use crate::db_genome::DbGenome;
use crate::domain::{DynamicKey, GenomeKey, NodeType, Sign, TargetLevel, TimeSelector};
use crate::error::GenomeError;
use crate::expression::{ExpressionLevel, RegionAndRange, TemporalInputRangeData, TimeCourseData};
use crate::group::Group;
use crate::images::ImageManager;
use crate::instance::GenomeInstance;
use crate::items::{Activity, DbGene, DbLinkage, DbNode, LinkageInstance, NodeInstance, Note};
use crate::legacy::LegacyReport;
use crate::navigation::{Navigation, PathStop, StartupView, UserTreePath};
use crate::overlay::{NetModule, NetModuleLinkage, NetworkOverlay, OverlaySupport};
use crate::proxy::{AddedNode, DynamicInstanceProxy, ProxyProperties};
use crate::region::{GeneRegion, RegionKind};
use crate::source::GenomeSource;

const FORMAT_VERSION: &str = "1";

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "hierarchy")]
struct HierarchyXml {
    #[serde(rename = "@version", default)]
    version: String,
    genome: GenomeXml,
    #[serde(rename = "genomeInstance", default)]
    instances: Vec<InstanceXml>,
    #[serde(rename = "dynamicProxy", default)]
    proxies: Vec<ProxyXml>,
    #[serde(rename = "timeCourseData", default, skip_serializing_if = "Option::is_none")]
    time_course: Option<TimeCourseXml>,
    #[serde(rename = "temporalInputRanges", default, skip_serializing_if = "Option::is_none")]
    temporal: Option<TemporalXml>,
    #[serde(rename = "userTreePaths", default, skip_serializing_if = "Option::is_none")]
    paths: Option<PathsXml>,
    #[serde(rename = "startupView", default, skip_serializing_if = "Option::is_none")]
    startup: Option<StartupXml>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GenomeXml {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "longName", default, skip_serializing_if = "Option::is_none")]
    long_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default)]
    genes: GenesXml,
    #[serde(default)]
    nodes: NodesXml,
    #[serde(default)]
    links: LinksXml,
    #[serde(default)]
    overlays: OverlaysXml,
    #[serde(default)]
    notes: NotesXml,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct GenesXml {
    #[serde(rename = "gene", default)]
    items: Vec<GeneXml>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeneXml {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@evidence", default, skip_serializing_if = "Option::is_none")]
    evidence: Option<String>,
    #[serde(rename = "@pads", default, skip_serializing_if = "Option::is_none")]
    pads: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(rename = "url", default)]
    urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    regions: Option<RegionsXml>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegionsXml {
    #[serde(rename = "region", default)]
    items: Vec<RegionXml>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RegionXml {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@startPad")]
    start_pad: String,
    #[serde(rename = "@endPad")]
    end_pad: String,
    #[serde(rename = "@evidence", default, skip_serializing_if = "Option::is_none")]
    evidence: Option<String>,
    #[serde(rename = "@holder", default, skip_serializing_if = "Option::is_none")]
    holder: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct NodesXml {
    #[serde(rename = "node", default)]
    items: Vec<NodeXml>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NodeXml {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@type")]
    node_type: String,
    #[serde(rename = "@name", default)]
    name: String,
    #[serde(rename = "@pads", default, skip_serializing_if = "Option::is_none")]
    pads: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(rename = "url", default)]
    urls: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LinksXml {
    #[serde(rename = "link", default)]
    items: Vec<LinkXml>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LinkXml {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@name", default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(rename = "@src")]
    source: String,
    #[serde(rename = "@trg")]
    target: String,
    #[serde(rename = "@sign")]
    sign: String,
    #[serde(rename = "@level", default, skip_serializing_if = "Option::is_none")]
    level: Option<String>,
    #[serde(rename = "@launch")]
    launch: String,
    #[serde(rename = "@landing")]
    landing: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(rename = "url", default)]
    urls: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct NotesXml {
    #[serde(rename = "note", default)]
    items: Vec<NoteXml>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NoteXml {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@name", default)]
    name: String,
    #[serde(rename = "@interactive", default, skip_serializing_if = "is_false")]
    interactive: bool,
    #[serde(rename = "$text", default)]
    text: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct OverlaysXml {
    #[serde(rename = "overlay", default)]
    items: Vec<OverlayXml>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OverlayXml {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@name")]
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(rename = "module", default)]
    modules: Vec<ModuleXml>,
    #[serde(rename = "moduleLink", default)]
    module_links: Vec<ModuleLinkXml>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ModuleXml {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@name")]
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(rename = "member", default)]
    members: Vec<MemberXml>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MemberXml {
    #[serde(rename = "@ref")]
    reference: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ModuleLinkXml {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@src")]
    source: String,
    #[serde(rename = "@trg")]
    target: String,
    #[serde(rename = "@sign")]
    sign: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct InstanceXml {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@vfgParent", default, skip_serializing_if = "Option::is_none")]
    vfg_parent: Option<String>,
    #[serde(rename = "@minTime", default, skip_serializing_if = "Option::is_none")]
    min_time: Option<String>,
    #[serde(rename = "@maxTime", default, skip_serializing_if = "Option::is_none")]
    max_time: Option<String>,
    #[serde(rename = "longName", default, skip_serializing_if = "Option::is_none")]
    long_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(rename = "nodeInstances", default)]
    nodes: NodeInstancesXml,
    #[serde(rename = "linkInstances", default)]
    links: LinkInstancesXml,
    #[serde(default)]
    groups: GroupsXml,
    #[serde(default)]
    overlays: OverlaysXml,
    #[serde(default)]
    notes: NotesXml,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct NodeInstancesXml {
    #[serde(rename = "node", default)]
    nodes: Vec<NodeInstanceXml>,
    #[serde(rename = "gene", default)]
    genes: Vec<NodeInstanceXml>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NodeInstanceXml {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@activity")]
    activity: String,
    #[serde(rename = "@level", default, skip_serializing_if = "Option::is_none")]
    level: Option<String>,
    #[serde(rename = "@name", default, skip_serializing_if = "Option::is_none")]
    override_name: Option<String>,
    #[serde(rename = "@simLevel", default, skip_serializing_if = "Option::is_none")]
    sim_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LinkInstancesXml {
    #[serde(rename = "linkInstance", default)]
    items: Vec<LinkInstanceXml>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LinkInstanceXml {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@src")]
    source: String,
    #[serde(rename = "@trg")]
    target: String,
    #[serde(rename = "@launch")]
    launch: String,
    #[serde(rename = "@landing")]
    landing: String,
    #[serde(rename = "@activity")]
    activity: String,
    #[serde(rename = "@level", default, skip_serializing_if = "Option::is_none")]
    level: Option<String>,
    #[serde(rename = "@simDiff", default, skip_serializing_if = "Option::is_none")]
    sim_diff: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct GroupsXml {
    #[serde(rename = "group", default)]
    items: Vec<GroupXml>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GroupXml {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@name", default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(rename = "@parent", default, skip_serializing_if = "Option::is_none")]
    parent: Option<String>,
    #[serde(rename = "@activeSubset", default, skip_serializing_if = "Option::is_none")]
    active_subset: Option<String>,
    #[serde(rename = "member", default)]
    members: Vec<MemberXml>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ProxyXml {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@vfgParent")]
    vfg_parent: String,
    #[serde(rename = "@isSingle")]
    is_single: String,
    #[serde(rename = "@minHour")]
    min_hour: String,
    #[serde(rename = "@maxHour")]
    max_hour: String,
    #[serde(default)]
    groups: GroupsXml,
    #[serde(default)]
    notes: NotesXml,
    #[serde(rename = "addedNodes", default)]
    added_nodes: AddedNodesXml,
    #[serde(default)]
    images: ImagesXml,
    #[serde(default)]
    overlays: OverlaysXml,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AddedNodesXml {
    #[serde(rename = "addedNode", default)]
    items: Vec<AddedNodeXml>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AddedNodeXml {
    #[serde(rename = "@ref")]
    node: String,
    #[serde(rename = "@group")]
    group: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ImagesXml {
    #[serde(rename = "image", default)]
    items: Vec<ImageXml>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ImageXml {
    #[serde(rename = "@time")]
    time: String,
    #[serde(rename = "@image")]
    key: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct TimeCourseXml {
    #[serde(rename = "@weakLevel")]
    weak_level: String,
    #[serde(rename = "gene", default)]
    genes: Vec<ExpressionGeneXml>,
    #[serde(rename = "simulation", default)]
    simulations: Vec<SimulationXml>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ExpressionGeneXml {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "data", default)]
    data: Vec<ExpressionXml>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ExpressionXml {
    #[serde(rename = "@region")]
    region: String,
    #[serde(rename = "@time")]
    time: String,
    #[serde(rename = "@expr")]
    expr: String,
    #[serde(rename = "@value", default, skip_serializing_if = "Option::is_none")]
    value: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SimulationXml {
    #[serde(rename = "@key")]
    key: String,
    #[serde(rename = "data", default)]
    data: Vec<SimulationDataXml>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SimulationDataXml {
    #[serde(rename = "@gene")]
    gene: String,
    #[serde(rename = "@region")]
    region: String,
    #[serde(rename = "@time")]
    time: String,
    #[serde(rename = "@value")]
    value: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TemporalXml {
    #[serde(rename = "target", default)]
    targets: Vec<TemporalTargetXml>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TemporalTargetXml {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "input", default)]
    inputs: Vec<TemporalInputXml>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TemporalInputXml {
    #[serde(rename = "@source")]
    source: String,
    #[serde(rename = "range", default)]
    ranges: Vec<RangeXml>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RangeXml {
    #[serde(rename = "@region", default, skip_serializing_if = "Option::is_none")]
    region: Option<String>,
    #[serde(rename = "@restrictedSource", default, skip_serializing_if = "Option::is_none")]
    restricted_source: Option<String>,
    #[serde(rename = "@min")]
    min: String,
    #[serde(rename = "@max")]
    max: String,
    #[serde(rename = "@sign", default, skip_serializing_if = "Option::is_none")]
    sign: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PathsXml {
    #[serde(rename = "path", default)]
    items: Vec<PathXml>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PathXml {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "stop", default)]
    stops: Vec<StopXml>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StopXml {
    #[serde(rename = "@model")]
    model: String,
    #[serde(rename = "@overlay", default, skip_serializing_if = "Option::is_none")]
    overlay: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StartupXml {
    #[serde(rename = "@model", default, skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    #[serde(rename = "@overlay", default, skip_serializing_if = "Option::is_none")]
    overlay: Option<String>,
}

fn parse_attr<T: FromStr>(context: &str, attribute: &str, value: &str) -> Result<T, GenomeError> {
    value.trim().parse().map_err(|_| GenomeError::Malformed {
        context: context.to_string(),
        attribute: attribute.to_string(),
        value: value.to_string(),
    })
}

fn parse_opt_attr<T: FromStr>(context: &str, attribute: &str, value: Option<&str>) -> Result<Option<T>, GenomeError> {
    value.map(|value| parse_attr(context, attribute, value)).transpose()
}

fn parse_flag(context: &str, attribute: &str, value: &str) -> Result<bool, GenomeError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(GenomeError::Malformed {
            context: context.to_string(),
            attribute: attribute.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_activity(context: &str, token: &str, level: Option<&str>) -> Result<Activity, GenomeError> {
    match token.trim() {
        "active" => Ok(Activity::Active),
        "inactive" => Ok(Activity::Inactive),
        "vestigial" => Ok(Activity::Vestigial),
        // A variable activity written without a level is repaired on load.
        "variable" => Ok(Activity::Variable(
            parse_opt_attr(context, "level", level)?.unwrap_or(f64::NAN),
        )),
        _ => Err(GenomeError::Malformed {
            context: context.to_string(),
            attribute: "activity".to_string(),
            value: token.to_string(),
        }),
    }
}

fn activity_attrs(activity: Activity) -> (String, Option<String>) {
    let level = match activity {
        Activity::Variable(level) => Some(level.to_string()),
        _ => None,
    };
    (activity.token().to_string(), level)
}

fn parse_expression(value: &ExpressionXml) -> Result<ExpressionLevel, GenomeError> {
    match value.expr.trim() {
        "noData" => Ok(ExpressionLevel::NoData),
        "noRegion" => Ok(ExpressionLevel::NoRegion),
        "no" => Ok(ExpressionLevel::NotExpressed),
        "weak" => Ok(ExpressionLevel::WeakExpression),
        "yes" => Ok(ExpressionLevel::Expressed),
        "variable" => Ok(ExpressionLevel::Variable(parse_attr(
            "data",
            "value",
            value.value.as_deref().unwrap_or_default(),
        )?)),
        other => Err(GenomeError::Malformed {
            context: "data".to_string(),
            attribute: "expr".to_string(),
            value: other.to_string(),
        }),
    }
}

fn parse_model_key(root_id: &str, value: &str) -> Result<GenomeKey, GenomeError> {
    if DynamicKey::is_dynamic_key(value) {
        return Ok(GenomeKey::Dynamic(value.parse()?));
    }
    if value == root_id {
        Ok(GenomeKey::Root(value.to_string()))
    } else {
        Ok(GenomeKey::Instance(value.to_string()))
    }
}

fn parse_time_selector(value: &str) -> Result<TimeSelector, GenomeError> {
    if value.trim() == "ALL" {
        Ok(TimeSelector::All)
    } else {
        Ok(TimeSelector::Hour(parse_attr("image", "time", value)?))
    }
}

// Reading

fn build_root(xml: GenomeXml) -> Result<DbGenome, GenomeError> {
    let mut root = DbGenome::new(&xml.id, &xml.name);
    root.change_properties(GenomeProperties {
        name: xml.name,
        long_name: xml.long_name,
        description: xml.description,
        time_bounds: None,
    });
    let store = root.store_mut();
    for gene in xml.genes.items {
        let mut built = DbGene::new(&gene.id, &gene.name);
        built.evidence = parse_opt_attr("gene", "evidence", gene.evidence.as_deref())?.unwrap_or(0);
        if let Some(pads) = parse_opt_attr("gene", "pads", gene.pads.as_deref())? {
            built.pad_count = pads;
        }
        built.description = gene.description;
        built.urls = gene.urls;
        for region in gene.regions.map(|regions| regions.items).unwrap_or_default() {
            let start: i32 = parse_attr("region", "startPad", &region.start_pad)?;
            let end: i32 = parse_attr("region", "endPad", &region.end_pad)?;
            let holder = match region.holder.as_deref() {
                Some(flag) => parse_flag("region", "holder", flag)?,
                None => false,
            };
            let mut built_region = if holder {
                GeneRegion::holder(region.name, start, end)
            } else {
                GeneRegion::named(region.name, start, end)
            };
            built_region.evidence = parse_opt_attr("region", "evidence", region.evidence.as_deref())?.unwrap_or(0);
            built.regions.push(built_region);
        }
        store.add_gene(built)?;
    }
    for node in xml.nodes.items {
        let node_type: NodeType = node.node_type.parse().map_err(|_| GenomeError::Malformed {
            context: "node".to_string(),
            attribute: "type".to_string(),
            value: node.node_type.clone(),
        })?;
        let mut built = DbNode::new(&node.id, node_type, &node.name);
        built.pad_count = parse_opt_attr("node", "pads", node.pads.as_deref())?;
        built.description = node.description;
        built.urls = node.urls;
        store.add_node(built)?;
    }
    for link in xml.links.items {
        let sign: Sign = parse_attr("link", "sign", &link.sign)?;
        let mut built = DbLinkage::new(&link.id, &link.source, &link.target, sign);
        built.name = link.name;
        built.target_level = match link.level.as_deref() {
            Some(level) => parse_attr::<TargetLevel>("link", "level", level)?,
            None => TargetLevel::Standard,
        };
        built.launch_pad = parse_attr("link", "launch", &link.launch)?;
        built.landing_pad = parse_attr("link", "landing", &link.landing)?;
        built.description = link.description;
        built.urls = link.urls;
        store.add_link(built)?;
    }
    load_overlays(store.overlays_mut(), xml.overlays)?;
    for note in xml.notes.items {
        store.add_note(read_note(note))?;
    }
    Ok(root)
}

fn read_note(note: NoteXml) -> Note {
    let mut built = Note::new(note.id, note.name, note.text);
    built.interactive = note.interactive;
    built
}

fn load_overlays(support: &mut OverlaySupport, xml: OverlaysXml) -> Result<(), GenomeError> {
    for overlay in xml.items {
        let mut built = NetworkOverlay::new(&overlay.id, &overlay.name);
        built.description = overlay.description;
        for module in overlay.modules {
            let mut net_module = NetModule::new(&module.id, &module.name);
            net_module.description = module.description;
            net_module.members = module.members.into_iter().map(|member| member.reference).collect();
            built.modules.insert(net_module.id.clone(), net_module);
        }
        for link in overlay.module_links {
            let sign = parse_attr("moduleLink", "sign", &link.sign)?;
            built.module_links.insert(
                link.id.clone(),
                NetModuleLinkage {
                    id: link.id,
                    source: link.source,
                    target: link.target,
                    sign,
                },
            );
        }
        support.add_overlay(built)?;
    }
    Ok(())
}

fn read_groups(xml: GroupsXml) -> BTreeMap<String, Group> {
    xml.items
        .into_iter()
        .map(|group| {
            let built = Group {
                id: group.id,
                name: group.name,
                parent: group.parent,
                active_subset: group.active_subset,
                members: group.members.into_iter().map(|member| member.reference).collect(),
            };
            (built.id.clone(), built)
        })
        .collect()
}

fn generation_of(id: &str, parents: &BTreeMap<String, Option<String>>) -> Result<u32, GenomeError> {
    let mut generation = 0;
    let mut cursor = parents.get(id).cloned().flatten();
    while let Some(parent) = cursor {
        generation += 1;
        if generation as usize > parents.len() {
            return Err(GenomeError::Precondition(format!("model {id} is its own ancestor")));
        }
        cursor = parents.get(&parent).cloned().flatten();
    }
    Ok(generation)
}

fn build_instance(xml: InstanceXml, generation: u32) -> Result<GenomeInstance, GenomeError> {
    let mut instance = GenomeInstance::with_parent(&xml.id, &xml.name, xml.vfg_parent.clone(), generation);
    let min_time = parse_opt_attr::<i32>("genomeInstance", "minTime", xml.min_time.as_deref())?;
    let max_time = parse_opt_attr::<i32>("genomeInstance", "maxTime", xml.max_time.as_deref())?;
    let time_bounds = match (min_time, max_time) {
        (Some(min), Some(max)) => Some(TimeBounds::new(min, max)),
        (None, None) => None,
        _ => {
            return Err(GenomeError::Malformed {
                context: "genomeInstance".to_string(),
                attribute: "minTime/maxTime".to_string(),
                value: xml.id.clone(),
            });
        }
    };
    instance.change_properties(GenomeProperties {
        name: xml.name,
        long_name: xml.long_name,
        description: xml.description,
        time_bounds,
    })?;
    let tagged = xml
        .nodes
        .nodes
        .into_iter()
        .map(|node| (node, false))
        .chain(xml.nodes.genes.into_iter().map(|node| (node, true)));
    for (node, is_gene) in tagged {
        let context = if is_gene { "gene" } else { "node" };
        let mut built = NodeInstance::new(&node.id);
        built.activity = parse_activity(context, &node.activity, node.level.as_deref())?;
        built.override_name = node.override_name;
        built.sim_level = parse_opt_attr(context, "simLevel", node.sim_level.as_deref())?;
        built.description = node.description;
        instance.add_node_instance(built, is_gene)?;
    }
    for link in xml.links.items {
        let mut built = LinkageInstance::new(&link.id, &link.source, &link.target);
        built.launch_pad = parse_attr("linkInstance", "launch", &link.launch)?;
        built.landing_pad = parse_attr("linkInstance", "landing", &link.landing)?;
        built.activity = parse_activity("linkInstance", &link.activity, link.level.as_deref())?;
        built.sim_diff = parse_opt_attr("linkInstance", "simDiff", link.sim_diff.as_deref())?;
        built.description = link.description;
        instance.add_link_instance(built)?;
    }
    instance.replace_groups(read_groups(xml.groups));
    load_overlays(instance.store_mut().overlays_mut(), xml.overlays)?;
    for note in xml.notes.items {
        instance.store_mut().add_note(read_note(note))?;
    }
    Ok(instance)
}

fn build_proxy(xml: ProxyXml, generation: u32) -> Result<DynamicInstanceProxy, GenomeError> {
    let props = ProxyProperties {
        name: xml.name,
        is_single: parse_flag("dynamicProxy", "isSingle", &xml.is_single)?,
        min_time: parse_attr("dynamicProxy", "minHour", &xml.min_hour)?,
        max_time: parse_attr("dynamicProxy", "maxHour", &xml.max_hour)?,
    };
    let mut proxy = DynamicInstanceProxy::from_parts(&xml.id, xml.vfg_parent, generation, props, read_groups(xml.groups));
    for note in xml.notes.items {
        proxy.add_note(read_note(note))?;
    }
    for added in xml.added_nodes.items {
        proxy.add_added_node(AddedNode {
            node_id: added.node,
            group_id: added.group,
        })?;
    }
    for image in xml.images.items {
        proxy.set_image(parse_time_selector(&image.time)?, Some(image.key))?;
    }
    load_overlays(proxy.overlays_mut(), xml.overlays)?;
    Ok(proxy)
}

fn build_time_course(xml: TimeCourseXml) -> Result<TimeCourseData, GenomeError> {
    let mut data = TimeCourseData {
        weak_level: parse_attr("timeCourseData", "weakLevel", &xml.weak_level)?,
        ..TimeCourseData::default()
    };
    for gene in xml.genes {
        for point in &gene.data {
            let time = parse_attr("data", "time", &point.time)?;
            data.set_expression(&gene.id, &point.region, time, parse_expression(point)?);
        }
    }
    for simulation in xml.simulations {
        for point in simulation.data {
            let time = parse_attr("data", "time", &point.time)?;
            let value = parse_attr("data", "value", &point.value)?;
            data.set_simulation_level(&simulation.key, &point.gene, &point.region, time, value);
        }
    }
    Ok(data)
}

fn build_temporal(xml: TemporalXml) -> Result<TemporalInputRangeData, GenomeError> {
    let mut data = TemporalInputRangeData::default();
    for target in xml.targets {
        for input in target.inputs {
            for range in input.ranges {
                data.add_range(
                    &target.id,
                    &input.source,
                    RegionAndRange {
                        region: range.region,
                        restricted_source: range.restricted_source,
                        min_time: parse_attr("range", "min", &range.min)?,
                        max_time: parse_attr("range", "max", &range.max)?,
                        sign: parse_opt_attr("range", "sign", range.sign.as_deref())?,
                    },
                );
            }
        }
    }
    Ok(data)
}

fn build_source(xml: HierarchyXml) -> Result<GenomeSource, GenomeError> {
    let root_id = xml.genome.id.clone();
    let root = build_root(xml.genome)?;

    let parents: BTreeMap<String, Option<String>> = xml
        .instances
        .iter()
        .map(|instance| (instance.id.clone(), instance.vfg_parent.clone()))
        .collect();
    let mut instances = Vec::with_capacity(xml.instances.len());
    for instance in xml.instances {
        let generation = generation_of(&instance.id, &parents)?;
        instances.push(build_instance(instance, generation)?);
    }

    let mut images = ImageManager::new();
    let mut proxies = Vec::with_capacity(xml.proxies.len());
    for proxy in xml.proxies {
        if !parents.contains_key(&proxy.vfg_parent) {
            return Err(GenomeError::missing(&root_id, "parent model of", &proxy.id));
        }
        let generation = generation_of(&proxy.vfg_parent, &parents)? + 1;
        let built = build_proxy(proxy, generation)?;
        for (_, key) in built.images() {
            images.register_image_usage(key);
        }
        proxies.push(built);
    }

    let time_course = xml.time_course.map(build_time_course).transpose()?.unwrap_or_default();
    let temporal = xml.temporal.map(build_temporal).transpose()?.unwrap_or_default();

    let mut navigation = Navigation::default();
    for path in xml.paths.map(|paths| paths.items).unwrap_or_default() {
        let stops = path
            .stops
            .into_iter()
            .map(|stop| {
                Ok(PathStop {
                    model: parse_model_key(&root_id, &stop.model)?,
                    overlay: stop.overlay,
                })
            })
            .collect::<Result<Vec<_>, GenomeError>>()?;
        navigation.add_path(UserTreePath {
            id: path.id,
            name: path.name,
            stops,
        })?;
    }
    if let Some(startup) = xml.startup {
        navigation.set_startup_view(StartupView {
            model: startup
                .model
                .as_deref()
                .map(|model| parse_model_key(&root_id, model))
                .transpose()?,
            overlay: startup.overlay,
        });
    }

    GenomeSource::from_parts(root, instances, proxies, time_course, temporal, images, navigation)
}

/// Parses a hierarchy document as written, without legacy repair.
pub fn parse_hierarchy(text: &str) -> Result<GenomeSource, GenomeError> {
    let xml: HierarchyXml = quick_xml::de::from_str(text).map_err(|err| GenomeError::Xml(err.to_string()))?;
    if !xml.version.is_empty() && xml.version != FORMAT_VERSION {
        debug!(version = %xml.version, "reading hierarchy written by another format version");
    }
    build_source(xml)
}

fn is_gzip(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("gz"))
}

fn io_error(path: &Path, err: impl ToString) -> GenomeError {
    GenomeError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

/// Reads a hierarchy file and repairs data left inconsistent by older
/// tools. The report lists every correction made.
pub fn read_hierarchy(path: &Path) -> Result<(GenomeSource, LegacyReport), GenomeError> {
    let mut source = read_hierarchy_as_written(path)?;
    let legacy = source.apply_legacy_fixups()?;
    Ok((source, legacy))
}

/// Reads a hierarchy file exactly as stored; `.gz` files are decompressed
/// on the fly.
pub fn read_hierarchy_as_written(path: &Path) -> Result<GenomeSource, GenomeError> {
    let bytes = fs::read(path).map_err(|err| io_error(path, err))?;
    let text = if is_gzip(path) {
        let mut out = String::new();
        GzDecoder::new(bytes.as_slice())
            .read_to_string(&mut out)
            .map_err(|err| io_error(path, err))?;
        out
    } else {
        String::from_utf8(bytes).map_err(|err| io_error(path, err))?
    };
    let source = parse_hierarchy(&text)?;
    info!(
        path = %path.display(),
        models = source.instances().count(),
        proxies = source.proxies().count(),
        "hierarchy loaded"
    );
    Ok(source)
}

// Writing

fn write_note(note: &Note) -> NoteXml {
    NoteXml {
        id: note.id.clone(),
        name: note.name.clone(),
        interactive: note.interactive,
        text: note.text.clone(),
    }
}

fn write_notes<'a>(notes: impl Iterator<Item = &'a Note>) -> NotesXml {
    NotesXml {
        items: notes.map(write_note).collect(),
    }
}

fn write_overlays(support: &OverlaySupport) -> OverlaysXml {
    OverlaysXml {
        items: support
            .overlays()
            .map(|overlay| OverlayXml {
                id: overlay.id.clone(),
                name: overlay.name.clone(),
                description: overlay.description.clone(),
                modules: overlay
                    .modules
                    .values()
                    .map(|module| ModuleXml {
                        id: module.id.clone(),
                        name: module.name.clone(),
                        description: module.description.clone(),
                        members: write_members(&module.members),
                    })
                    .collect(),
                module_links: overlay
                    .module_links
                    .values()
                    .map(|link| ModuleLinkXml {
                        id: link.id.clone(),
                        source: link.source.clone(),
                        target: link.target.clone(),
                        sign: link.sign.as_str().to_string(),
                    })
                    .collect(),
            })
            .collect(),
    }
}

fn write_members(members: &BTreeSet<String>) -> Vec<MemberXml> {
    members
        .iter()
        .map(|member| MemberXml {
            reference: member.clone(),
        })
        .collect()
}

fn write_groups<'a>(groups: impl Iterator<Item = &'a Group>) -> GroupsXml {
    GroupsXml {
        items: groups
            .map(|group| GroupXml {
                id: group.id.clone(),
                name: group.name.clone(),
                parent: group.parent.clone(),
                active_subset: group.active_subset.clone(),
                members: write_members(&group.members),
            })
            .collect(),
    }
}

fn write_region(gene_id: &str, region: &GeneRegion) -> Result<RegionXml, GenomeError> {
    let (name, holder) = match &region.kind {
        RegionKind::Named(name) => (name.clone(), None),
        RegionKind::Holder(internal) => (internal.clone(), Some("true".to_string())),
        RegionKind::LinkHolder(internal) => {
            return Err(GenomeError::TransientRegionPersisted(format!("{gene_id}/{internal}")));
        }
    };
    Ok(RegionXml {
        name,
        start_pad: region.start_pad.to_string(),
        end_pad: region.end_pad.to_string(),
        evidence: (region.evidence != 0).then(|| region.evidence.to_string()),
        holder,
    })
}

fn write_root(root: &DbGenome) -> Result<GenomeXml, GenomeError> {
    let store = root.store();
    let genes = store
        .genes()
        .map(|gene| {
            let regions = gene
                .regions
                .iter()
                .map(|region| write_region(&gene.id, region))
                .collect::<Result<Vec<_>, GenomeError>>()?;
            Ok(GeneXml {
                id: gene.id.clone(),
                name: gene.name.clone(),
                evidence: (gene.evidence != 0).then(|| gene.evidence.to_string()),
                pads: (gene.pad_count != crate::domain::DEFAULT_PAD_COUNT).then(|| gene.pad_count.to_string()),
                description: gene.description.clone(),
                urls: gene.urls.clone(),
                regions: (!regions.is_empty()).then_some(RegionsXml { items: regions }),
            })
        })
        .collect::<Result<Vec<_>, GenomeError>>()?;
    Ok(GenomeXml {
        id: root.id.clone(),
        name: root.name().to_string(),
        long_name: root.properties().long_name.clone(),
        description: root.properties().description.clone(),
        genes: GenesXml { items: genes },
        nodes: NodesXml {
            items: store
                .nodes()
                .map(|node| NodeXml {
                    id: node.id.clone(),
                    node_type: node.node_type.as_str().to_string(),
                    name: node.name.clone(),
                    pads: node.pad_count.map(|pads| pads.to_string()),
                    description: node.description.clone(),
                    urls: node.urls.clone(),
                })
                .collect(),
        },
        links: LinksXml {
            items: store
                .links()
                .map(|link| LinkXml {
                    id: link.id.clone(),
                    name: link.name.clone(),
                    source: link.source.clone(),
                    target: link.target.clone(),
                    sign: link.sign.as_str().to_string(),
                    level: (link.target_level == TargetLevel::Weak).then(|| "weak".to_string()),
                    launch: link.launch_pad.to_string(),
                    landing: link.landing_pad.to_string(),
                    description: link.description.clone(),
                    urls: link.urls.clone(),
                })
                .collect(),
        },
        overlays: write_overlays(store.overlays()),
        notes: write_notes(store.notes()),
    })
}

fn write_node_instance(node: &NodeInstance) -> NodeInstanceXml {
    let (activity, level) = activity_attrs(node.activity);
    NodeInstanceXml {
        id: node.id.clone(),
        activity,
        level,
        override_name: node.override_name.clone(),
        sim_level: node.sim_level.map(|level| level.to_string()),
        description: node.description.clone(),
    }
}

fn write_instance(instance: &GenomeInstance) -> InstanceXml {
    let props = instance.properties();
    let store = instance.store();
    InstanceXml {
        id: instance.id.clone(),
        name: props.name.clone(),
        vfg_parent: instance.vfg_parent().map(str::to_string),
        min_time: props.time_bounds.map(|bounds| bounds.min_time.to_string()),
        max_time: props.time_bounds.map(|bounds| bounds.max_time.to_string()),
        long_name: props.long_name.clone(),
        description: props.description.clone(),
        nodes: NodeInstancesXml {
            nodes: store.nodes().map(write_node_instance).collect(),
            genes: store.genes().map(write_node_instance).collect(),
        },
        links: LinkInstancesXml {
            items: store
                .links()
                .map(|link| {
                    let (activity, level) = activity_attrs(link.activity);
                    LinkInstanceXml {
                        id: link.id.clone(),
                        source: link.source.clone(),
                        target: link.target.clone(),
                        launch: link.launch_pad.to_string(),
                        landing: link.landing_pad.to_string(),
                        activity,
                        level,
                        sim_diff: link.sim_diff.map(|diff| diff.to_string()),
                        description: link.description.clone(),
                    }
                })
                .collect(),
        },
        groups: write_groups(instance.groups()),
        overlays: write_overlays(store.overlays()),
        notes: write_notes(store.notes()),
    }
}

fn write_proxy(proxy: &DynamicInstanceProxy) -> ProxyXml {
    let props = proxy.properties();
    ProxyXml {
        id: proxy.id.clone(),
        name: props.name.clone(),
        vfg_parent: proxy.vfg_parent().to_string(),
        is_single: props.is_single.to_string(),
        min_hour: props.min_time.to_string(),
        max_hour: props.max_time.to_string(),
        groups: write_groups(proxy.groups()),
        notes: write_notes(proxy.notes()),
        added_nodes: AddedNodesXml {
            items: proxy
                .added_nodes()
                .map(|added| AddedNodeXml {
                    node: added.node_id.clone(),
                    group: added.group_id.clone(),
                })
                .collect(),
        },
        images: ImagesXml {
            items: proxy
                .images()
                .map(|(time, key)| ImageXml {
                    time: time.to_string(),
                    key: key.clone(),
                })
                .collect(),
        },
        overlays: write_overlays(proxy.overlays()),
    }
}

fn write_time_course(data: &TimeCourseData) -> TimeCourseXml {
    TimeCourseXml {
        weak_level: data.weak_level.to_string(),
        genes: data
            .genes
            .iter()
            .map(|(gene, regions)| ExpressionGeneXml {
                id: gene.clone(),
                data: regions
                    .iter()
                    .flat_map(|(region, series)| {
                        series.iter().map(move |(time, level)| ExpressionXml {
                            region: region.clone(),
                            time: time.to_string(),
                            expr: level.token().to_string(),
                            value: match level {
                                ExpressionLevel::Variable(value) => Some(value.to_string()),
                                _ => None,
                            },
                        })
                    })
                    .collect(),
            })
            .collect(),
        simulations: data
            .simulations
            .iter()
            .map(|(key, genes)| SimulationXml {
                key: key.clone(),
                data: genes
                    .iter()
                    .flat_map(|(gene, regions)| {
                        regions.iter().flat_map(move |(region, series)| {
                            series.iter().map(move |(time, value)| SimulationDataXml {
                                gene: gene.clone(),
                                region: region.clone(),
                                time: time.to_string(),
                                value: value.to_string(),
                            })
                        })
                    })
                    .collect(),
            })
            .collect(),
    }
}

fn write_temporal(data: &TemporalInputRangeData) -> TemporalXml {
    TemporalXml {
        targets: data
            .targets
            .iter()
            .map(|(target, inputs)| TemporalTargetXml {
                id: target.clone(),
                inputs: inputs
                    .iter()
                    .map(|input| TemporalInputXml {
                        source: input.source.clone(),
                        ranges: input
                            .ranges
                            .iter()
                            .map(|range| RangeXml {
                                region: range.region.clone(),
                                restricted_source: range.restricted_source.clone(),
                                min: range.min_time.to_string(),
                                max: range.max_time.to_string(),
                                sign: range.sign.map(|sign| sign.as_str().to_string()),
                            })
                            .collect(),
                    })
                    .collect(),
            })
            .collect(),
    }
}

/// Serializes the whole hierarchy. Fails if a transient region is present.
pub fn to_xml_string(source: &GenomeSource) -> Result<String, GenomeError> {
    let navigation = source.navigation();
    let startup = navigation.startup_view();
    let xml = HierarchyXml {
        version: FORMAT_VERSION.to_string(),
        genome: write_root(source.root())?,
        instances: source.instances().map(write_instance).collect(),
        proxies: source.proxies().map(write_proxy).collect(),
        time_course: (!source.time_course().is_empty()).then(|| write_time_course(source.time_course())),
        temporal: (!source.temporal_ranges().is_empty()).then(|| write_temporal(source.temporal_ranges())),
        paths: navigation.paths().next().is_some().then(|| PathsXml {
            items: navigation
                .paths()
                .map(|path| PathXml {
                    id: path.id.clone(),
                    name: path.name.clone(),
                    stops: path
                        .stops
                        .iter()
                        .map(|stop| StopXml {
                            model: stop.model.to_string(),
                            overlay: stop.overlay.clone(),
                        })
                        .collect(),
                })
                .collect(),
        }),
        startup: (startup.model.is_some() || startup.overlay.is_some()).then(|| StartupXml {
            model: startup.model.as_ref().map(ToString::to_string),
            overlay: startup.overlay.clone(),
        }),
    };
    quick_xml::se::to_string(&xml).map_err(|err| GenomeError::Xml(err.to_string()))
}

/// Writes the hierarchy next to `path` and renames it into place.
pub fn write_hierarchy(source: &GenomeSource, path: &Path) -> Result<(), GenomeError> {
    let text = to_xml_string(source)?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut temp = NamedTempFile::new_in(dir).map_err(|err| io_error(path, err))?;
    if is_gzip(path) {
        let mut encoder = GzEncoder::new(temp.as_file_mut(), Compression::default());
        encoder.write_all(text.as_bytes()).map_err(|err| io_error(path, err))?;
        encoder.finish().map_err(|err| io_error(path, err))?;
    } else {
        temp.write_all(text.as_bytes()).map_err(|err| io_error(path, err))?;
    }
    temp.persist(path).map_err(|err| io_error(path, err.error))?;
    info!(path = %path.display(), bytes = text.len(), "hierarchy saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn bad_pad_attribute_names_its_element() {
        let text = r#"<hierarchy version="1"><genome id="r" name="Root"><genes><gene id="g" name="G"><regions><region name="a" startPad="x" endPad="15"/></regions></gene></genes></genome></hierarchy>"#;
        let err = parse_hierarchy(text).unwrap_err();
        assert_matches!(err, GenomeError::Malformed { ref context, ref attribute, .. } if context == "region" && attribute == "startPad");
    }

    #[test]
    fn link_holders_refuse_to_serialize() {
        let region = GeneRegion {
            kind: RegionKind::LinkHolder("#lh0".to_string()),
            start_pad: 0,
            end_pad: 15,
            evidence: 0,
        };
        assert_matches!(write_region("g", &region), Err(GenomeError::TransientRegionPersisted(_)));
    }

    #[test]
    fn model_keys_parse_into_their_spaces() {
        assert_eq!(parse_model_key("r", "r").unwrap(), GenomeKey::Root("r".to_string()));
        assert_eq!(parse_model_key("r", "gi1").unwrap(), GenomeKey::Instance("gi1".to_string()));
        assert_matches!(parse_model_key("r", "{DiP}@root-dp0:4"), Ok(GenomeKey::Dynamic(_)));
    }
}
