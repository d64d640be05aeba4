use serde::{Deserialize, Serialize};

use crate::change::{GenomeChangeKind, GenomeProperties, RootChange};
use crate::domain::{NodeType, Sign, TargetLevel};
use crate::error::GenomeError;
use crate::items::{DbGene, DbLinkage, DbNode};
use crate::overlay::OverlayOwner;
use crate::region::{self, GeneRegion, RegionKey};
use crate::store::ItemStore;

pub type RootStore = ItemStore<DbGene, DbNode, DbLinkage>;

/// The canonical definition every instance model refers back to by base id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbGenome {
    pub id: String,
    props: GenomeProperties,
    store: RootStore,
}

impl DbGenome {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            store: ItemStore::new(id.clone(), OverlayOwner::Root(id.clone())),
            props: GenomeProperties::named(name),
            id,
        }
    }

    pub fn properties(&self) -> &GenomeProperties {
        &self.props
    }

    pub fn name(&self) -> &str {
        &self.props.name
    }

    pub fn store(&self) -> &RootStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut RootStore {
        &mut self.store
    }

    pub fn gene(&self, id: &str) -> Option<&DbGene> {
        self.store.gene(id)
    }

    pub fn node(&self, id: &str) -> Option<&DbNode> {
        self.store.node(id)
    }

    pub fn link(&self, id: &str) -> Option<&DbLinkage> {
        self.store.link(id)
    }

    pub fn is_gene(&self, id: &str) -> bool {
        self.store.gene(id).is_some()
    }

    /// Display name of a gene or node.
    pub fn item_name(&self, id: &str) -> Option<&str> {
        self.store
            .gene(id)
            .map(|gene| gene.name.as_str())
            .or_else(|| self.store.node(id).map(|node| node.name.as_str()))
    }

    pub fn node_type(&self, id: &str) -> Option<NodeType> {
        if self.store.gene(id).is_some() {
            Some(NodeType::Gene)
        } else {
            self.store.node(id).map(|node| node.node_type)
        }
    }

    pub fn change_properties(&mut self, new: GenomeProperties) -> RootChange {
        let orig = std::mem::replace(&mut self.props, new.clone());
        RootChange {
            genome_id: self.id.clone(),
            kind: GenomeChangeKind::Properties { orig, new },
        }
    }

    pub fn change_gene_name(&mut self, gene_id: &str, name: &str) -> Result<RootChange, GenomeError> {
        self.store.modify_gene(gene_id, |gene| {
            gene.name = name.to_string();
            Ok(())
        })
    }

    pub fn change_gene_evidence(&mut self, gene_id: &str, evidence: u8) -> Result<RootChange, GenomeError> {
        self.store.modify_gene(gene_id, |gene| {
            gene.evidence = evidence;
            Ok(())
        })
    }

    pub fn change_node_name(&mut self, node_id: &str, name: &str) -> Result<RootChange, GenomeError> {
        if self.store.gene(node_id).is_some() {
            return self.change_gene_name(node_id, name);
        }
        self.store.modify_node(node_id, |node| {
            node.name = name.to_string();
            Ok(())
        })
    }

    /// Extra pads on a non-gene node; `None` restores the type's default.
    pub fn change_node_size(&mut self, node_id: &str, pad_count: Option<i32>) -> Result<RootChange, GenomeError> {
        if let Some(count) = pad_count {
            if count < 1 {
                return Err(GenomeError::Precondition(format!(
                    "node {node_id} cannot have {count} pads"
                )));
            }
        }
        self.store.modify_node(node_id, |node| {
            node.pad_count = pad_count;
            Ok(())
        })
    }

    pub fn change_link_sign(&mut self, link_id: &str, sign: Sign) -> Result<RootChange, GenomeError> {
        self.store.modify_link(link_id, |link| {
            link.sign = sign;
            Ok(())
        })
    }

    pub fn change_link_target_level(
        &mut self,
        link_id: &str,
        level: TargetLevel,
    ) -> Result<RootChange, GenomeError> {
        self.store.modify_link(link_id, |link| {
            link.target_level = level;
            Ok(())
        })
    }

    /// Switches a node between the gene collection and the node collection,
    /// or just retypes it when it stays a plain node.
    pub fn change_node_type(&mut self, id: &str, node_type: NodeType) -> Result<RootChange, GenomeError> {
        let current = self
            .node_type(id)
            .ok_or_else(|| GenomeError::missing(&self.id, "node", id))?;
        match (current.is_gene(), node_type.is_gene()) {
            (false, true) => self.store.convert_node_to_gene(id, DbNode::into_gene),
            (true, false) => self
                .store
                .convert_gene_to_node(id, |gene| gene.into_node(node_type)),
            (true, true) => Err(GenomeError::Precondition(format!("{id} is already a gene"))),
            (false, false) => self.store.modify_node(id, |node| {
                node.node_type = node_type;
                Ok(())
            }),
        }
    }

    /// Replaces a gene's region list after checking it tiles the gene.
    pub fn set_gene_regions(
        &mut self,
        gene_id: &str,
        regions: Vec<GeneRegion>,
    ) -> Result<RootChange, GenomeError> {
        let gene = self
            .store
            .gene(gene_id)
            .ok_or_else(|| GenomeError::missing(&self.id, "gene", gene_id))?;
        region::check_order(gene_id, &regions, gene.first_pad(), gene.last_pad())?;
        if let Some(transient) = regions.iter().find(|region| region.is_link_holder()) {
            return Err(GenomeError::TransientRegionPersisted(transient.key().to_string()));
        }
        self.store.modify_gene(gene_id, |gene| {
            gene.regions = regions;
            Ok(())
        })
    }

    pub fn add_gene_region(&mut self, gene_id: &str, new_region: GeneRegion) -> Result<RootChange, GenomeError> {
        let gene = self
            .store
            .gene(gene_id)
            .ok_or_else(|| GenomeError::missing(&self.id, "gene", gene_id))?;
        let regions = region::insert_in_holder(&gene.regions, new_region, gene.first_pad(), gene.last_pad())?;
        self.set_gene_regions(gene_id, regions)
    }

    pub fn remove_gene_region(&mut self, gene_id: &str, key: &RegionKey) -> Result<RootChange, GenomeError> {
        let gene = self
            .store
            .gene(gene_id)
            .ok_or_else(|| GenomeError::missing(&self.id, "gene", gene_id))?;
        let regions = region::remove_region(&gene.regions, key)?;
        self.set_gene_regions(gene_id, regions)
    }

    pub fn rename_gene_region(
        &mut self,
        gene_id: &str,
        key: &RegionKey,
        new_name: &str,
    ) -> Result<RootChange, GenomeError> {
        let gene = self
            .store
            .gene(gene_id)
            .ok_or_else(|| GenomeError::missing(&self.id, "gene", gene_id))?;
        let regions = region::rename_region(&gene.regions, key, new_name)?;
        self.set_gene_regions(gene_id, regions)
    }

    pub fn change_undo(&mut self, change: &RootChange) -> Result<(), GenomeError> {
        match &change.kind {
            GenomeChangeKind::Properties { orig, .. } => {
                self.props = orig.clone();
                Ok(())
            }
            GenomeChangeKind::Group { .. } => Err(GenomeError::UnsupportedOnVariant {
                operation: "group change",
                variant: "root genome".to_string(),
            }),
            _ => self.store.change_undo(change),
        }
    }

    pub fn change_redo(&mut self, change: &RootChange) -> Result<(), GenomeError> {
        match &change.kind {
            GenomeChangeKind::Properties { new, .. } => {
                self.props = new.clone();
                Ok(())
            }
            GenomeChangeKind::Group { .. } => Err(GenomeError::UnsupportedOnVariant {
                operation: "group change",
                variant: "root genome".to_string(),
            }),
            _ => self.store.change_redo(change),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_change_round_trips_through_undo() {
        let mut genome = DbGenome::new("bioTapA", "Full genome");
        genome
            .store_mut()
            .add_node(DbNode::new("n1", NodeType::Box, "Wnt8"))
            .unwrap();
        let before = genome.clone();
        let change = genome.change_node_type("n1", NodeType::Gene).unwrap();
        assert!(genome.is_gene("n1"));
        genome.change_undo(&change).unwrap();
        assert_eq!(genome, before);
        genome.change_redo(&change).unwrap();
        assert_eq!(genome.node_type("n1"), Some(NodeType::Gene));
    }

    #[test]
    fn link_holders_are_never_stored() {
        let mut genome = DbGenome::new("bioTapA", "Full genome");
        genome.store_mut().add_gene(DbGene::new("g1", "otx")).unwrap();
        let mut regions = vec![GeneRegion::named("a", 0, 15)];
        regions[0].kind = region::RegionKind::LinkHolder("#lh0".to_string());
        let err = genome.set_gene_regions("g1", regions).unwrap_err();
        assert!(matches!(err, GenomeError::TransientRegionPersisted(_)));
    }
}
