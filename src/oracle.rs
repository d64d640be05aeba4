//! Queries that need the whole hierarchy at once.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::debug;

use crate::domain::{DEFAULT_PAD_COUNT, GenomeKey, InstanceId, normalize_name};
use crate::error::GenomeError;
use crate::graph::GraphSearcher;
use crate::items::{LinkEnds, LinkLike};
use crate::region::{self, RegionKey};
use crate::source::GenomeSource;

/// Where a link landing stands relative to the gene's modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleLinkStatus {
    /// Lands in the same module as the root link.
    Consistent,
    /// Lands outside every module, as the root link does.
    NonModule,
    /// The root link lands in a module; this instance lands in a holder.
    Orphaned,
    /// Lands in a module the root link does not land in.
    Tresspass,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalLanding {
    pub pad: i32,
    pub region: Option<String>,
    pub status: ModuleLinkStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceLanding {
    pub model_id: String,
    pub link_id: String,
    pub pad: i32,
    pub region: Option<String>,
    pub status: ModuleLinkStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModuleAnalysis {
    pub gene_id: String,
    /// Root link id to its canonical landing.
    pub canonical: BTreeMap<String, CanonicalLanding>,
    pub instances: Vec<InstanceLanding>,
}

impl ModuleAnalysis {
    pub fn drifted(&self) -> impl Iterator<Item = &InstanceLanding> {
        self.instances.iter().filter(|landing| {
            matches!(
                landing.status,
                ModuleLinkStatus::Orphaned | ModuleLinkStatus::Tresspass
            )
        })
    }
}

/// Minimum pad counts a node needs to carry its links.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PadRequirement {
    pub launch: i32,
    pub landing: i32,
}

impl PadRequirement {
    pub fn max(self, other: PadRequirement) -> PadRequirement {
        PadRequirement {
            launch: self.launch.max(other.launch),
            landing: self.landing.max(other.landing),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOwner {
    Root,
    Instance(String),
}

/// One link end sitting on a gene, in the root or in a static model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneLanding {
    pub owner: LinkOwner,
    pub link_id: String,
    pub pad: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NameCollision {
    pub normalized: String,
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneLengthFix {
    pub gene_id: String,
    pub old_pad_count: i32,
    pub new_pad_count: i32,
}

/// Read-only view over a [`GenomeSource`].
#[derive(Clone, Copy)]
pub struct FullGenomeHierarchyOracle<'a> {
    source: &'a GenomeSource,
}

impl<'a> FullGenomeHierarchyOracle<'a> {
    pub fn new(source: &'a GenomeSource) -> Self {
        Self { source }
    }

    fn model_graph(&self) -> GraphSearcher {
        let mut graph = GraphSearcher::new();
        let root_id = &self.source.root.id;
        graph.add_node(root_id);
        for instance in self.source.instances() {
            let parent = instance.vfg_parent().unwrap_or(root_id);
            graph.add_edge(parent, &instance.id);
        }
        graph
    }

    /// Root first, then each instance subtree depth first. Every static
    /// model is followed by the dynamic models of its proxies.
    pub fn ordered_models(&self) -> Vec<GenomeKey> {
        let root_id = &self.source.root.id;
        let mut out = Vec::new();
        for id in self.model_graph().depth_first(root_id) {
            if id == *root_id {
                out.push(GenomeKey::Root(id));
                continue;
            }
            let dynamic: Vec<GenomeKey> = self
                .source
                .proxies_of(&id)
                .flat_map(|proxy| proxy.proxied_keys())
                .map(GenomeKey::Dynamic)
                .collect();
            out.push(GenomeKey::Instance(id));
            out.extend(dynamic);
        }
        out
    }

    /// Children before parents; the root comes last.
    pub fn ordered_models_bottom_up(&self) -> Vec<GenomeKey> {
        let mut out = self.ordered_models();
        out.reverse();
        out
    }

    fn gene_regions(&self, gene_id: &str) -> Result<&'a [region::GeneRegion], GenomeError> {
        let gene = self
            .source
            .root
            .gene(gene_id)
            .ok_or_else(|| GenomeError::missing(&self.source.root.id, "gene", gene_id))?;
        Ok(&gene.regions)
    }

    fn module_at(regions: &[region::GeneRegion], pad: i32) -> Option<RegionKey> {
        region::region_at(regions, pad)
            .filter(|region| !region.is_anonymous())
            .map(region::GeneRegion::key)
    }

    /// Module each root link into `gene_id` lands in. A gene without modules
    /// reports every landing as non-module.
    pub fn canonical_gene_regions(&self, gene_id: &str) -> Result<BTreeMap<String, CanonicalLanding>, GenomeError> {
        let regions = self.gene_regions(gene_id)?;
        let modular = self
            .source
            .root
            .gene(gene_id)
            .is_some_and(|gene| gene.num_regions() > 0);
        Ok(self
            .source
            .root
            .store()
            .links()
            .filter(|link| link.target == gene_id)
            .map(|link| {
                let module = modular.then(|| Self::module_at(regions, link.landing_pad)).flatten();
                let status = match module {
                    Some(_) => ModuleLinkStatus::Consistent,
                    None => ModuleLinkStatus::NonModule,
                };
                (
                    link.id.clone(),
                    CanonicalLanding {
                        pad: link.landing_pad,
                        region: module.map(|key| key.as_str().to_string()),
                        status,
                    },
                )
            })
            .collect())
    }

    /// Compares every instance landing on `gene_id` with its root link.
    pub fn analyze_links_into_modules(&self, gene_id: &str) -> Result<ModuleAnalysis, GenomeError> {
        let canonical = self.canonical_gene_regions(gene_id)?;
        let regions = self.gene_regions(gene_id)?;
        let modular = self
            .source
            .root
            .gene(gene_id)
            .is_some_and(|gene| gene.num_regions() > 0);

        let mut instances = Vec::new();
        for model in self.source.instances() {
            for link in model.store().links() {
                if InstanceId::base_of(&link.target) != gene_id {
                    continue;
                }
                let Some(root) = canonical.get(InstanceId::base_of(&link.id)) else {
                    continue;
                };
                let module = modular.then(|| Self::module_at(regions, link.landing_pad)).flatten();
                let status = if !modular {
                    ModuleLinkStatus::NonModule
                } else {
                    match (&root.region, &module) {
                        (Some(expected), Some(found)) if RegionKey::named(expected) == *found => {
                            ModuleLinkStatus::Consistent
                        }
                        (Some(_), None) => ModuleLinkStatus::Orphaned,
                        (None, None) => ModuleLinkStatus::NonModule,
                        _ => ModuleLinkStatus::Tresspass,
                    }
                };
                instances.push(InstanceLanding {
                    model_id: model.id.clone(),
                    link_id: link.id.clone(),
                    pad: link.landing_pad,
                    region: module.map(|key| key.as_str().to_string()),
                    status,
                });
            }
        }
        debug!(gene = gene_id, landings = instances.len(), "module analysis done");
        Ok(ModuleAnalysis {
            gene_id: gene_id.to_string(),
            canonical,
            instances,
        })
    }

    fn requirement_from<'l>(&self, base_id: &str, links: impl Iterator<Item = LinkEnds<'l>>) -> PadRequirement {
        let is_gene = self.source.root.is_gene(base_id);
        let mut need = PadRequirement::default();
        for ends in links {
            if InstanceId::base_of(ends.source) == base_id {
                need.launch = need.launch.max(ends.launch_pad + 1);
            }
            if InstanceId::base_of(ends.target) == base_id {
                let landing = if is_gene {
                    DEFAULT_PAD_COUNT - ends.landing_pad
                } else {
                    ends.landing_pad + 1
                };
                need.landing = need.landing.max(landing);
            }
        }
        need
    }

    /// Pads `base_id` needs for the links of one model.
    pub fn model_node_pad_requirements(&self, key: &GenomeKey, base_id: &str) -> Result<PadRequirement, GenomeError> {
        match key {
            GenomeKey::Root(_) => Ok(self.requirement_from(
                base_id,
                self.source.root.store().links().map(LinkLike::ends),
            )),
            GenomeKey::Instance(id) => {
                let model = self.source.instance(id)?;
                Ok(self.requirement_from(base_id, model.store().links().map(LinkLike::ends)))
            }
            GenomeKey::Dynamic(dynamic) => {
                let view = self.source.dynamic_instance(dynamic)?;
                let links = view.links()?;
                Ok(self.requirement_from(base_id, links.into_iter().map(LinkLike::ends)))
            }
        }
    }

    /// Worst case over every model holding the node.
    pub fn node_pad_requirements(&self, base_id: &str) -> Result<PadRequirement, GenomeError> {
        let mut need = PadRequirement::default();
        for key in self.ordered_models() {
            need = need.max(self.model_node_pad_requirements(&key, base_id)?);
        }
        Ok(need)
    }

    /// Pad needs of every node that belongs to a network module anywhere.
    pub fn global_net_module_link_pad_needs(&self) -> Result<BTreeMap<String, PadRequirement>, GenomeError> {
        let mut members = BTreeSet::new();
        let mut supports = vec![self.source.root.store().overlays()];
        supports.extend(self.source.instances().map(|model| model.store().overlays()));
        supports.extend(self.source.proxies().map(|proxy| proxy.overlays()));
        for support in supports {
            for overlay in support.overlays() {
                for module in overlay.modules.values() {
                    members.extend(
                        module
                            .members
                            .iter()
                            .map(|member| InstanceId::base_of(member).to_string()),
                    );
                }
            }
        }
        members
            .into_iter()
            .map(|base| {
                let need = self.node_pad_requirements(&base)?;
                Ok((base, need))
            })
            .collect()
    }

    fn override_matches(&self, key: &str, exception: Option<&str>) -> bool {
        self.source.instances().any(|model| {
            model.all_nodes().any(|node| {
                Some(InstanceId::base_of(&node.id)) != exception
                    && node
                        .override_name
                        .as_deref()
                        .is_some_and(|name| normalize_name(name) == key)
            })
        })
    }

    /// True if `name` collides with a gene name or any instance override,
    /// ignoring the item `exception`.
    pub fn matches_existing_gene_name(&self, name: &str, exception: Option<&str>) -> bool {
        let key = normalize_name(name);
        self.source
            .root
            .store()
            .genes()
            .filter(|gene| Some(gene.id.as_str()) != exception)
            .any(|gene| normalize_name(&gene.name) == key)
            || self.override_matches(&key, exception)
    }

    /// Same as [`Self::matches_existing_gene_name`] for non-gene nodes.
    /// Unnamed nodes never collide.
    pub fn matches_existing_node_name(&self, name: &str, exception: Option<&str>) -> bool {
        let key = normalize_name(name);
        if key.is_empty() {
            return false;
        }
        self.source
            .root
            .store()
            .nodes()
            .filter(|node| Some(node.id.as_str()) != exception)
            .any(|node| normalize_name(&node.name) == key)
            || self.override_matches(&key, exception)
    }

    pub fn matches_existing_gene_or_node_name(&self, name: &str, exception: Option<&str>) -> bool {
        self.matches_existing_gene_name(name, exception) || self.matches_existing_node_name(name, exception)
    }

    /// Groups of items sharing a normalized name anywhere in the hierarchy.
    pub fn name_collisions(&self) -> Vec<NameCollision> {
        let mut by_key: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let store = self.source.root.store();
        let named = store
            .genes()
            .map(|gene| (gene.id.as_str(), gene.name.as_str()))
            .chain(store.nodes().map(|node| (node.id.as_str(), node.name.as_str())));
        for (id, name) in named {
            let key = normalize_name(name);
            if !key.is_empty() {
                by_key.entry(key).or_default().insert(id.to_string());
            }
        }
        for model in self.source.instances() {
            for node in model.all_nodes() {
                if let Some(name) = &node.override_name {
                    by_key
                        .entry(normalize_name(name))
                        .or_default()
                        .insert(InstanceId::base_of(&node.id).to_string());
                }
            }
        }
        by_key
            .into_iter()
            .filter(|(_, ids)| ids.len() > 1)
            .map(|(normalized, ids)| NameCollision {
                normalized,
                ids: ids.into_iter().collect(),
            })
            .collect()
    }

    /// Every link end on `gene_id`, root and static models.
    pub fn gene_landings(&self, gene_id: &str) -> Vec<GeneLanding> {
        let mut out: Vec<GeneLanding> = self
            .source
            .root
            .store()
            .links()
            .filter(|link| link.target == gene_id)
            .map(|link| GeneLanding {
                owner: LinkOwner::Root,
                link_id: link.id.clone(),
                pad: link.landing_pad,
            })
            .collect();
        for model in self.source.instances() {
            out.extend(
                model
                    .store()
                    .links()
                    .filter(|link| InstanceId::base_of(&link.target) == gene_id)
                    .map(|link| GeneLanding {
                        owner: LinkOwner::Instance(model.id.clone()),
                        link_id: link.id.clone(),
                        pad: link.landing_pad,
                    }),
            );
        }
        out
    }

    /// Number of link ends on each pad of `gene_id`.
    pub fn landing_counts(&self, gene_id: &str) -> BTreeMap<i32, usize> {
        let mut counts = BTreeMap::new();
        for landing in self.gene_landings(gene_id) {
            *counts.entry(landing.pad).or_insert(0) += 1;
        }
        counts
    }

    /// Genes whose links land left of their first pad, with the pad count
    /// that would hold them.
    pub fn legacy_io_gene_length_fixup(&self) -> Vec<GeneLengthFix> {
        self.source
            .root
            .store()
            .genes()
            .filter_map(|gene| {
                let lowest = self.gene_landings(&gene.id).iter().map(|landing| landing.pad).min()?;
                (lowest < gene.first_pad()).then(|| GeneLengthFix {
                    gene_id: gene.id.clone(),
                    old_pad_count: gene.pad_count,
                    new_pad_count: DEFAULT_PAD_COUNT - lowest,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NodeType, Sign};

    fn tiny() -> GenomeSource {
        let mut source = GenomeSource::new("bioTapA", "Root");
        let (gene, _) = source.add_gene("Brachyury").unwrap();
        let (node, _) = source.add_node(NodeType::Box, "Signal").unwrap();
        source.add_root_link(&node, &gene, Sign::Positive).unwrap();
        source
    }

    #[test]
    fn root_comes_first_then_instances() {
        let mut source = tiny();
        let (top, _) = source.add_genome_instance("Embryo", None).unwrap();
        let (child, _) = source.add_genome_instance("Early", Some(&top)).unwrap();
        let ordered = source.oracle().ordered_models();
        assert_eq!(
            ordered,
            vec![
                GenomeKey::Root("bioTapA".to_string()),
                GenomeKey::Instance(top),
                GenomeKey::Instance(child),
            ]
        );
        assert_eq!(
            source.oracle().ordered_models_bottom_up().last(),
            Some(&GenomeKey::Root("bioTapA".to_string()))
        );
    }

    #[test]
    fn gene_name_check_honors_exception() {
        let source = tiny();
        let oracle = source.oracle();
        assert!(oracle.matches_existing_gene_name("brachy ury", None));
        assert!(!oracle.matches_existing_gene_name("Brachyury", Some("n0")));
        assert!(!oracle.matches_existing_node_name("", None));
    }
}
