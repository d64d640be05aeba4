//! Load-time repair of data written by older tools.

use serde::Serialize;
use tracing::{info, warn};

use crate::error::GenomeError;
use crate::items::Activity;
use crate::proxy::ProxyProperties;
use crate::region;
use crate::source::GenomeSource;

/// Corrections applied while loading, in the order they were made.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LegacyReport {
    pub corrections: Vec<String>,
}

impl LegacyReport {
    pub fn is_empty(&self) -> bool {
        self.corrections.is_empty()
    }

    fn push(&mut self, correction: String) {
        warn!(%correction, "legacy data repaired");
        self.corrections.push(correction);
    }
}

impl GenomeSource {
    /// Repairs gene lengths, region layouts, proxy hours and node activity.
    /// Produces no change records; the repaired state is the loaded state.
    pub fn apply_legacy_fixups(&mut self) -> Result<LegacyReport, GenomeError> {
        let mut report = LegacyReport::default();
        self.fix_gene_lengths(&mut report)?;
        self.fix_region_layouts(&mut report)?;
        self.fix_proxy_hours(&mut report)?;
        self.fix_node_activity(&mut report)?;
        self.invalidate_all();
        info!(corrections = report.corrections.len(), "legacy repair finished");
        Ok(report)
    }

    fn fix_gene_lengths(&mut self, report: &mut LegacyReport) -> Result<(), GenomeError> {
        for fix in self.oracle().legacy_io_gene_length_fixup() {
            self.root.store_mut().modify_gene(&fix.gene_id, |gene| {
                if !gene.regions.is_empty() {
                    gene.regions = region::stretch_the_list(&gene.regions, fix.new_pad_count)?;
                }
                gene.pad_count = fix.new_pad_count;
                Ok(())
            })?;
            report.push(format!(
                "gene {}: pad count raised from {} to {} to hold its links",
                fix.gene_id, fix.old_pad_count, fix.new_pad_count
            ));
        }
        Ok(())
    }

    fn fix_region_layouts(&mut self, report: &mut LegacyReport) -> Result<(), GenomeError> {
        let broken: Vec<(String, i32, i32)> = self
            .root
            .store()
            .genes()
            .filter(|gene| !region::valid_order(&gene.regions, gene.first_pad(), gene.last_pad()))
            .map(|gene| (gene.id.clone(), gene.first_pad(), gene.last_pad()))
            .collect();
        for (gene_id, min_pad, max_pad) in broken {
            let landings = self.oracle().landing_counts(&gene_id);
            let regions = self
                .root
                .gene(&gene_id)
                .map(|gene| gene.regions.clone())
                .unwrap_or_default();
            let fix = region::legacy_io_fixup(&gene_id, &regions, min_pad, max_pad, &landings);
            region::check_order(&gene_id, &fix.regions, min_pad, max_pad)?;
            self.root.store_mut().modify_gene(&gene_id, |gene| {
                gene.regions = fix.regions;
                Ok(())
            })?;
            for correction in fix.corrections {
                report.push(correction);
            }
        }
        Ok(())
    }

    fn fix_proxy_hours(&mut self, report: &mut LegacyReport) -> Result<(), GenomeError> {
        let mut clamps: Vec<(String, ProxyProperties)> = Vec::new();
        for proxy in self.proxies() {
            let Some(bounds) = self.root_instance_of(proxy.vfg_parent())?.time_bounds() else {
                continue;
            };
            let props = proxy.properties();
            let min_time = props.min_time.clamp(bounds.min_time, bounds.max_time);
            let max_time = props.max_time.clamp(min_time, bounds.max_time);
            if (min_time, max_time) != (props.min_time, props.max_time) {
                report.push(format!(
                    "dynamic proxy {}: hours {}..{} clamped to {}..{}",
                    proxy.id, props.min_time, props.max_time, min_time, max_time
                ));
                clamps.push((
                    proxy.id.clone(),
                    ProxyProperties {
                        min_time,
                        max_time,
                        ..props.clone()
                    },
                ));
            }
        }
        for (proxy_id, props) in clamps {
            if let Some(proxy) = self.proxies.get_mut(&proxy_id) {
                proxy.change_properties(props)?;
            }
        }
        Ok(())
    }

    fn fix_node_activity(&mut self, report: &mut LegacyReport) -> Result<(), GenomeError> {
        for model_id in self.instance_order.clone() {
            let model = self.instance(&model_id)?;
            let parent = model.vfg_parent().map(|id| self.instance(id)).transpose()?;
            let mut repairs = Vec::new();
            for node in model.all_nodes() {
                let parent_inactive = parent
                    .and_then(|parent| parent.node(&node.id))
                    .is_some_and(|above| above.activity == Activity::Inactive);
                let repaired = match node.activity {
                    Activity::Variable(level) if !level.is_finite() || !(0.0..=1.0).contains(&level) => {
                        Some(Activity::Active)
                    }
                    activity if parent_inactive && activity != Activity::Inactive => Some(Activity::Inactive),
                    _ => None,
                };
                if let Some(activity) = repaired {
                    repairs.push((node.id.clone(), node.activity, activity));
                }
            }
            for (node_id, was, now) in repairs {
                let model = self
                    .instances
                    .get_mut(&model_id)
                    .ok_or_else(|| GenomeError::missing(&self.root.id, "model", &model_id))?;
                model.change_node_activity(&node_id, now)?;
                report.push(format!(
                    "model {model_id}: node {node_id} activity {} repaired to {}",
                    was.token(),
                    now.token()
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::TimeBounds;
    use crate::domain::{NodeType, Sign, TimeSelector};

    #[test]
    fn proxy_hours_are_clamped_to_the_root_instance() {
        let mut source = GenomeSource::new("bioTapA", "Root");
        let (top, _) = source.add_genome_instance("Embryo", None).unwrap();
        let (proxy, _) = source
            .add_dynamic_proxy(
                &top,
                ProxyProperties {
                    name: "Hours".to_string(),
                    is_single: false,
                    min_time: 0,
                    max_time: 40,
                },
            )
            .unwrap();
        source.set_time_bounds(&top, Some(TimeBounds::new(6, 30))).unwrap();
        let report = source.apply_legacy_fixups().unwrap();
        assert_eq!(report.corrections.len(), 1);
        let props = source.proxy(&proxy).unwrap().properties();
        assert_eq!((props.min_time, props.max_time), (6, 30));
        assert!(source.proxy(&proxy).unwrap().has_key(&crate::domain::DynamicKey::new(&proxy, TimeSelector::Hour(6))));
    }

    #[test]
    fn short_gene_grows_to_reach_its_landings() {
        let mut source = GenomeSource::new("bioTapA", "Root");
        let (gene, _) = source.add_gene("otx").unwrap();
        let (node, _) = source.add_node(NodeType::Box, "Wnt").unwrap();
        let (link, _) = source.add_root_link(&node, &gene, Sign::Positive).unwrap();
        source
            .root
            .store_mut()
            .modify_gene(&gene, |gene| {
                gene.pad_count = 4;
                Ok(())
            })
            .unwrap();
        source
            .root
            .store_mut()
            .modify_link(&link, |link| {
                link.landing_pad = 2;
                Ok(())
            })
            .unwrap();
        let report = source.apply_legacy_fixups().unwrap();
        assert!(!report.is_empty());
        assert_eq!(source.root().gene(&gene).unwrap().pad_count, 14);
    }
}
