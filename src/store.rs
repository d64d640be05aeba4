use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::change::{GenomeChange, GenomeChangeKind};
use crate::error::GenomeError;
use crate::items::{GenomeItem, Note};
use crate::overlay::{OverlayOwner, OverlaySupport};

/// Genes, nodes, links, notes and overlays of one model, keyed by id.
///
/// Every mutator snapshots the entity before and after the edit and returns
/// them as a [`GenomeChange`], which `undo`/`redo` replay exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemStore<G, N, L> {
    owner: String,
    genes: BTreeMap<String, G>,
    nodes: BTreeMap<String, N>,
    links: BTreeMap<String, L>,
    notes: BTreeMap<String, Note>,
    overlays: OverlaySupport,
}

fn insert_new<T: GenomeItem>(
    owner: &str,
    map: &mut BTreeMap<String, T>,
    item: T,
) -> Result<(), GenomeError> {
    if map.contains_key(item.id()) {
        return Err(GenomeError::duplicate(owner, item.id()));
    }
    map.insert(item.id().to_string(), item);
    Ok(())
}

/// Replays one orig/new pair: undo removes `new` and restores `orig`.
fn restore<T: GenomeItem>(
    map: &mut BTreeMap<String, T>,
    orig: &Option<T>,
    new: &Option<T>,
    undo: bool,
) {
    let (gone, back) = if undo { (new, orig) } else { (orig, new) };
    if let Some(gone) = gone {
        map.remove(gone.id());
    }
    if let Some(back) = back {
        map.insert(back.id().to_string(), back.clone());
    }
}

impl<G: GenomeItem, N: GenomeItem, L: GenomeItem> ItemStore<G, N, L> {
    pub fn new(owner: impl Into<String>, overlay_owner: OverlayOwner) -> Self {
        Self {
            owner: owner.into(),
            genes: BTreeMap::new(),
            nodes: BTreeMap::new(),
            links: BTreeMap::new(),
            notes: BTreeMap::new(),
            overlays: OverlaySupport::new(overlay_owner),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub(crate) fn rename_owner(&mut self, owner: &str, overlay_owner: OverlayOwner) {
        self.owner = owner.to_string();
        self.overlays.set_owner(overlay_owner);
    }

    fn change(&self, kind: GenomeChangeKind<G, N, L>) -> GenomeChange<G, N, L> {
        GenomeChange {
            genome_id: self.owner.clone(),
            kind,
        }
    }

    pub fn gene(&self, id: &str) -> Option<&G> {
        self.genes.get(id)
    }

    pub fn genes(&self) -> impl Iterator<Item = &G> {
        self.genes.values()
    }

    pub fn node(&self, id: &str) -> Option<&N> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &N> {
        self.nodes.values()
    }

    pub fn link(&self, id: &str) -> Option<&L> {
        self.links.get(id)
    }

    pub fn links(&self) -> impl Iterator<Item = &L> {
        self.links.values()
    }

    pub fn note(&self, id: &str) -> Option<&Note> {
        self.notes.get(id)
    }

    pub fn notes(&self) -> impl Iterator<Item = &Note> {
        self.notes.values()
    }

    pub fn overlays(&self) -> &OverlaySupport {
        &self.overlays
    }

    pub fn overlays_mut(&mut self) -> &mut OverlaySupport {
        &mut self.overlays
    }

    pub fn has_gene_or_node(&self, id: &str) -> bool {
        self.genes.contains_key(id) || self.nodes.contains_key(id)
    }

    pub fn gene_count(&self) -> usize {
        self.genes.len()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty() && self.nodes.is_empty() && self.links.is_empty()
    }

    pub fn add_gene(&mut self, gene: G) -> Result<GenomeChange<G, N, L>, GenomeError> {
        if self.nodes.contains_key(gene.id()) {
            return Err(GenomeError::duplicate(&self.owner, gene.id()));
        }
        insert_new(&self.owner, &mut self.genes, gene.clone())?;
        Ok(self.change(GenomeChangeKind::Gene {
            orig: None,
            new: Some(gene),
        }))
    }

    pub fn add_node(&mut self, node: N) -> Result<GenomeChange<G, N, L>, GenomeError> {
        if self.genes.contains_key(node.id()) {
            return Err(GenomeError::duplicate(&self.owner, node.id()));
        }
        insert_new(&self.owner, &mut self.nodes, node.clone())?;
        Ok(self.change(GenomeChangeKind::Node {
            orig: None,
            new: Some(node),
        }))
    }

    pub fn add_link(&mut self, link: L) -> Result<GenomeChange<G, N, L>, GenomeError> {
        insert_new(&self.owner, &mut self.links, link.clone())?;
        Ok(self.change(GenomeChangeKind::Link {
            orig: None,
            new: Some(link),
        }))
    }

    pub fn add_note(&mut self, note: Note) -> Result<GenomeChange<G, N, L>, GenomeError> {
        insert_new(&self.owner, &mut self.notes, note.clone())?;
        Ok(self.change(GenomeChangeKind::Note {
            orig: None,
            new: Some(note),
        }))
    }

    pub fn remove_gene(&mut self, id: &str) -> Result<GenomeChange<G, N, L>, GenomeError> {
        let gene = self
            .genes
            .remove(id)
            .ok_or_else(|| GenomeError::missing(&self.owner, "gene", id))?;
        Ok(self.change(GenomeChangeKind::Gene {
            orig: Some(gene),
            new: None,
        }))
    }

    pub fn remove_node(&mut self, id: &str) -> Result<GenomeChange<G, N, L>, GenomeError> {
        let node = self
            .nodes
            .remove(id)
            .ok_or_else(|| GenomeError::missing(&self.owner, "node", id))?;
        Ok(self.change(GenomeChangeKind::Node {
            orig: Some(node),
            new: None,
        }))
    }

    pub fn remove_link(&mut self, id: &str) -> Result<GenomeChange<G, N, L>, GenomeError> {
        let link = self
            .links
            .remove(id)
            .ok_or_else(|| GenomeError::missing(&self.owner, "link", id))?;
        Ok(self.change(GenomeChangeKind::Link {
            orig: Some(link),
            new: None,
        }))
    }

    pub fn remove_note(&mut self, id: &str) -> Result<GenomeChange<G, N, L>, GenomeError> {
        let note = self
            .notes
            .remove(id)
            .ok_or_else(|| GenomeError::missing(&self.owner, "note", id))?;
        Ok(self.change(GenomeChangeKind::Note {
            orig: Some(note),
            new: None,
        }))
    }

    /// Gene or node removal, whichever collection holds `id`.
    pub fn remove_gene_or_node(&mut self, id: &str) -> Result<GenomeChange<G, N, L>, GenomeError> {
        if self.genes.contains_key(id) {
            self.remove_gene(id)
        } else {
            self.remove_node(id)
        }
    }

    pub fn modify_gene<F>(&mut self, id: &str, edit: F) -> Result<GenomeChange<G, N, L>, GenomeError>
    where
        F: FnOnce(&mut G) -> Result<(), GenomeError>,
    {
        let stored = self
            .genes
            .get(id)
            .ok_or_else(|| GenomeError::missing(&self.owner, "gene", id))?;
        let orig = stored.clone();
        let mut updated = orig.clone();
        edit(&mut updated)?;
        self.genes.insert(id.to_string(), updated.clone());
        Ok(self.change(GenomeChangeKind::Gene {
            orig: Some(orig),
            new: Some(updated),
        }))
    }

    pub fn modify_node<F>(&mut self, id: &str, edit: F) -> Result<GenomeChange<G, N, L>, GenomeError>
    where
        F: FnOnce(&mut N) -> Result<(), GenomeError>,
    {
        let stored = self
            .nodes
            .get(id)
            .ok_or_else(|| GenomeError::missing(&self.owner, "node", id))?;
        let orig = stored.clone();
        let mut updated = orig.clone();
        edit(&mut updated)?;
        self.nodes.insert(id.to_string(), updated.clone());
        Ok(self.change(GenomeChangeKind::Node {
            orig: Some(orig),
            new: Some(updated),
        }))
    }

    pub fn modify_link<F>(&mut self, id: &str, edit: F) -> Result<GenomeChange<G, N, L>, GenomeError>
    where
        F: FnOnce(&mut L) -> Result<(), GenomeError>,
    {
        let stored = self
            .links
            .get(id)
            .ok_or_else(|| GenomeError::missing(&self.owner, "link", id))?;
        let orig = stored.clone();
        let mut updated = orig.clone();
        edit(&mut updated)?;
        self.links.insert(id.to_string(), updated.clone());
        Ok(self.change(GenomeChangeKind::Link {
            orig: Some(orig),
            new: Some(updated),
        }))
    }

    pub fn modify_note<F>(&mut self, id: &str, edit: F) -> Result<GenomeChange<G, N, L>, GenomeError>
    where
        F: FnOnce(&mut Note) -> Result<(), GenomeError>,
    {
        let stored = self
            .notes
            .get(id)
            .ok_or_else(|| GenomeError::missing(&self.owner, "note", id))?;
        let orig = stored.clone();
        let mut updated = orig.clone();
        edit(&mut updated)?;
        self.notes.insert(id.to_string(), updated.clone());
        Ok(self.change(GenomeChangeKind::Note {
            orig: Some(orig),
            new: Some(updated),
        }))
    }

    /// Moves a node into the gene collection.
    pub fn convert_node_to_gene<F>(
        &mut self,
        id: &str,
        convert: F,
    ) -> Result<GenomeChange<G, N, L>, GenomeError>
    where
        F: FnOnce(N) -> G,
    {
        let node = self
            .nodes
            .get(id)
            .cloned()
            .ok_or_else(|| GenomeError::missing(&self.owner, "node", id))?;
        let gene = convert(node.clone());
        if gene.id() != id {
            return Err(GenomeError::Precondition(format!(
                "type change of {id} must keep its id"
            )));
        }
        self.nodes.remove(id);
        self.genes.insert(id.to_string(), gene.clone());
        Ok(self.change(GenomeChangeKind::NodeType {
            gene_orig: None,
            gene_new: Some(gene),
            node_orig: Some(node),
            node_new: None,
        }))
    }

    /// Moves a gene into the node collection.
    pub fn convert_gene_to_node<F>(
        &mut self,
        id: &str,
        convert: F,
    ) -> Result<GenomeChange<G, N, L>, GenomeError>
    where
        F: FnOnce(G) -> N,
    {
        let gene = self
            .genes
            .get(id)
            .cloned()
            .ok_or_else(|| GenomeError::missing(&self.owner, "gene", id))?;
        let node = convert(gene.clone());
        if node.id() != id {
            return Err(GenomeError::Precondition(format!(
                "type change of {id} must keep its id"
            )));
        }
        self.genes.remove(id);
        self.nodes.insert(id.to_string(), node.clone());
        Ok(self.change(GenomeChangeKind::NodeType {
            gene_orig: Some(gene),
            gene_new: None,
            node_orig: None,
            node_new: Some(node),
        }))
    }

    /// Applies the item part of a record. Group and property records belong
    /// to the owning model and are rejected here.
    pub fn change_undo(&mut self, change: &GenomeChange<G, N, L>) -> Result<(), GenomeError> {
        self.replay(change, true)
    }

    pub fn change_redo(&mut self, change: &GenomeChange<G, N, L>) -> Result<(), GenomeError> {
        self.replay(change, false)
    }

    fn replay(&mut self, change: &GenomeChange<G, N, L>, undo: bool) -> Result<(), GenomeError> {
        if change.genome_id != self.owner {
            return Err(GenomeError::Precondition(format!(
                "record for {} replayed on {}",
                change.genome_id, self.owner
            )));
        }
        match &change.kind {
            GenomeChangeKind::NodeType {
                gene_orig,
                gene_new,
                node_orig,
                node_new,
            } => {
                restore(&mut self.genes, gene_orig, gene_new, undo);
                restore(&mut self.nodes, node_orig, node_new, undo);
            }
            GenomeChangeKind::Gene { orig, new } => restore(&mut self.genes, orig, new, undo),
            GenomeChangeKind::Node { orig, new } => restore(&mut self.nodes, orig, new, undo),
            GenomeChangeKind::Link { orig, new } => restore(&mut self.links, orig, new, undo),
            GenomeChangeKind::Note { orig, new } => restore(&mut self.notes, orig, new, undo),
            GenomeChangeKind::Group { .. } | GenomeChangeKind::Properties { .. } => {
                return Err(GenomeError::Precondition(
                    "group and property records are replayed by the model".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::{LinkageInstance, NodeInstance};

    type Store = ItemStore<NodeInstance, NodeInstance, LinkageInstance>;

    fn store() -> Store {
        ItemStore::new("m1", OverlayOwner::Instance("m1".to_string()))
    }

    #[test]
    fn duplicate_ids_are_rejected_across_genes_and_nodes() {
        let mut store = store();
        store.add_gene(NodeInstance::new("G1:0")).unwrap();
        assert!(store.add_node(NodeInstance::new("G1:0")).is_err());
    }

    #[test]
    fn modify_undo_redo_round_trip() {
        let mut store = store();
        store.add_node(NodeInstance::new("N1:0")).unwrap();
        let before = store.clone();
        let change = store
            .modify_node("N1:0", |node| {
                node.description = Some("hub".to_string());
                Ok(())
            })
            .unwrap();
        let after = store.clone();
        store.change_undo(&change).unwrap();
        assert_eq!(store, before);
        store.change_redo(&change).unwrap();
        assert_eq!(store, after);
    }
}
