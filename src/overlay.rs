use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::domain::{InstanceId, Sign};
use crate::error::GenomeError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetModule {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    /// Node ids in the owning model's id space.
    pub members: BTreeSet<String>,
}

impl NetModule {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            members: BTreeSet::new(),
        }
    }

    pub fn contains_base(&self, base_id: &str) -> bool {
        self.members
            .iter()
            .any(|member| InstanceId::base_of(member) == base_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetModuleLinkage {
    pub id: String,
    pub source: String,
    pub target: String,
    pub sign: Sign,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkOverlay {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub modules: BTreeMap<String, NetModule>,
    pub module_links: BTreeMap<String, NetModuleLinkage>,
}

impl NetworkOverlay {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            modules: BTreeMap::new(),
            module_links: BTreeMap::new(),
        }
    }

    /// Modules holding an instance of `base_id`.
    pub fn modules_for_node<'a>(&'a self, base_id: &'a str) -> impl Iterator<Item = &'a NetModule> {
        self.modules
            .values()
            .filter(move |module| module.contains_base(base_id))
    }
}

/// Which model or proxy owns a set of overlays.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum OverlayOwner {
    Root(String),
    Instance(String),
    Proxy(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OverlayChangeKind {
    Overlay {
        orig: Option<NetworkOverlay>,
        new: Option<NetworkOverlay>,
    },
    Module {
        overlay_id: String,
        orig: Option<NetModule>,
        new: Option<NetModule>,
    },
    ModuleLink {
        overlay_id: String,
        orig: Option<NetModuleLinkage>,
        new: Option<NetModuleLinkage>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayChange {
    pub owner: OverlayOwner,
    pub kind: OverlayChangeKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlaySupport {
    owner: OverlayOwner,
    overlays: BTreeMap<String, NetworkOverlay>,
}

impl OverlaySupport {
    pub fn new(owner: OverlayOwner) -> Self {
        Self {
            owner,
            overlays: BTreeMap::new(),
        }
    }

    pub fn owner(&self) -> &OverlayOwner {
        &self.owner
    }

    pub(crate) fn set_owner(&mut self, owner: OverlayOwner) {
        self.owner = owner;
    }

    pub fn overlay(&self, id: &str) -> Option<&NetworkOverlay> {
        self.overlays.get(id)
    }

    pub fn overlays(&self) -> impl Iterator<Item = &NetworkOverlay> {
        self.overlays.values()
    }

    pub fn is_empty(&self) -> bool {
        self.overlays.is_empty()
    }

    fn owner_label(&self) -> String {
        match &self.owner {
            OverlayOwner::Root(id) | OverlayOwner::Instance(id) | OverlayOwner::Proxy(id) => {
                id.clone()
            }
        }
    }

    fn change(&self, kind: OverlayChangeKind) -> OverlayChange {
        OverlayChange {
            owner: self.owner.clone(),
            kind,
        }
    }

    fn overlay_mut(&mut self, id: &str) -> Result<&mut NetworkOverlay, GenomeError> {
        let owner = self.owner_label();
        self.overlays
            .get_mut(id)
            .ok_or_else(|| GenomeError::missing(&owner, "overlay", id))
    }

    pub fn add_overlay(&mut self, overlay: NetworkOverlay) -> Result<OverlayChange, GenomeError> {
        if self.overlays.contains_key(&overlay.id) {
            return Err(GenomeError::duplicate(&self.owner_label(), &overlay.id));
        }
        self.overlays.insert(overlay.id.clone(), overlay.clone());
        Ok(self.change(OverlayChangeKind::Overlay {
            orig: None,
            new: Some(overlay),
        }))
    }

    pub fn remove_overlay(&mut self, id: &str) -> Result<OverlayChange, GenomeError> {
        let removed = self
            .overlays
            .remove(id)
            .ok_or_else(|| GenomeError::missing(&self.owner_label(), "overlay", id))?;
        Ok(self.change(OverlayChangeKind::Overlay {
            orig: Some(removed),
            new: None,
        }))
    }

    pub fn add_module(
        &mut self,
        overlay_id: &str,
        module: NetModule,
    ) -> Result<OverlayChange, GenomeError> {
        let owner = self.owner_label();
        let overlay = self.overlay_mut(overlay_id)?;
        if overlay.modules.contains_key(&module.id) {
            return Err(GenomeError::duplicate(&owner, &module.id));
        }
        overlay.modules.insert(module.id.clone(), module.clone());
        Ok(self.change(OverlayChangeKind::Module {
            overlay_id: overlay_id.to_string(),
            orig: None,
            new: Some(module),
        }))
    }

    /// Removes a module and every module link touching it.
    pub fn remove_module(
        &mut self,
        overlay_id: &str,
        module_id: &str,
    ) -> Result<Vec<OverlayChange>, GenomeError> {
        let owner = self.owner_label();
        let overlay = self.overlay_mut(overlay_id)?;
        if !overlay.modules.contains_key(module_id) {
            return Err(GenomeError::missing(&owner, "module", module_id));
        }
        let doomed: Vec<String> = overlay
            .module_links
            .values()
            .filter(|link| link.source == module_id || link.target == module_id)
            .map(|link| link.id.clone())
            .collect();
        let mut kinds = Vec::with_capacity(doomed.len() + 1);
        for link_id in doomed {
            if let Some(link) = overlay.module_links.remove(&link_id) {
                kinds.push(OverlayChangeKind::ModuleLink {
                    overlay_id: overlay_id.to_string(),
                    orig: Some(link),
                    new: None,
                });
            }
        }
        if let Some(module) = overlay.modules.remove(module_id) {
            kinds.push(OverlayChangeKind::Module {
                overlay_id: overlay_id.to_string(),
                orig: Some(module),
                new: None,
            });
        }
        Ok(kinds.into_iter().map(|kind| self.change(kind)).collect())
    }

    fn edit_module<F>(
        &mut self,
        overlay_id: &str,
        module_id: &str,
        edit: F,
    ) -> Result<OverlayChange, GenomeError>
    where
        F: FnOnce(&mut NetModule) -> Result<(), GenomeError>,
    {
        let owner = self.owner_label();
        let overlay = self.overlay_mut(overlay_id)?;
        let module = overlay
            .modules
            .get_mut(module_id)
            .ok_or_else(|| GenomeError::missing(&owner, "module", module_id))?;
        let orig = module.clone();
        edit(module)?;
        let new = module.clone();
        Ok(self.change(OverlayChangeKind::Module {
            overlay_id: overlay_id.to_string(),
            orig: Some(orig),
            new: Some(new),
        }))
    }

    pub fn add_module_member(
        &mut self,
        overlay_id: &str,
        module_id: &str,
        node_id: &str,
    ) -> Result<OverlayChange, GenomeError> {
        self.edit_module(overlay_id, module_id, |module| {
            if !module.members.insert(node_id.to_string()) {
                return Err(GenomeError::duplicate(&module.id, node_id));
            }
            Ok(())
        })
    }

    pub fn remove_module_member(
        &mut self,
        overlay_id: &str,
        module_id: &str,
        node_id: &str,
    ) -> Result<OverlayChange, GenomeError> {
        self.edit_module(overlay_id, module_id, |module| {
            if !module.members.remove(node_id) {
                return Err(GenomeError::missing(&module.id, "module member", node_id));
            }
            Ok(())
        })
    }

    pub fn add_module_link(
        &mut self,
        overlay_id: &str,
        link: NetModuleLinkage,
    ) -> Result<OverlayChange, GenomeError> {
        let owner = self.owner_label();
        let overlay = self.overlay_mut(overlay_id)?;
        if overlay.module_links.contains_key(&link.id) {
            return Err(GenomeError::duplicate(&owner, &link.id));
        }
        for end in [&link.source, &link.target] {
            if !overlay.modules.contains_key(end.as_str()) {
                return Err(GenomeError::missing(&owner, "module", end));
            }
        }
        overlay.module_links.insert(link.id.clone(), link.clone());
        Ok(self.change(OverlayChangeKind::ModuleLink {
            overlay_id: overlay_id.to_string(),
            orig: None,
            new: Some(link),
        }))
    }

    pub fn remove_module_link(
        &mut self,
        overlay_id: &str,
        link_id: &str,
    ) -> Result<OverlayChange, GenomeError> {
        let owner = self.owner_label();
        let overlay = self.overlay_mut(overlay_id)?;
        let link = overlay
            .module_links
            .remove(link_id)
            .ok_or_else(|| GenomeError::missing(&owner, "module link", link_id))?;
        Ok(self.change(OverlayChangeKind::ModuleLink {
            overlay_id: overlay_id.to_string(),
            orig: Some(link),
            new: None,
        }))
    }

    /// Drops `node_id` from every module that lists it.
    pub fn purge_node(&mut self, node_id: &str) -> Vec<OverlayChange> {
        let mut kinds = Vec::new();
        for overlay in self.overlays.values_mut() {
            for module in overlay.modules.values_mut() {
                if module.members.contains(node_id) {
                    let orig = module.clone();
                    module.members.remove(node_id);
                    kinds.push(OverlayChangeKind::Module {
                        overlay_id: overlay.id.clone(),
                        orig: Some(orig),
                        new: Some(module.clone()),
                    });
                }
            }
        }
        kinds.into_iter().map(|kind| self.change(kind)).collect()
    }

    pub fn undo(&mut self, kind: &OverlayChangeKind) -> Result<(), GenomeError> {
        self.restore(kind, true)
    }

    pub fn redo(&mut self, kind: &OverlayChangeKind) -> Result<(), GenomeError> {
        self.restore(kind, false)
    }

    fn restore(&mut self, kind: &OverlayChangeKind, undo: bool) -> Result<(), GenomeError> {
        match kind {
            OverlayChangeKind::Overlay { orig, new } => {
                let (gone, back) = if undo { (new, orig) } else { (orig, new) };
                if let Some(gone) = gone {
                    self.overlays.remove(&gone.id);
                }
                if let Some(back) = back {
                    self.overlays.insert(back.id.clone(), back.clone());
                }
            }
            OverlayChangeKind::Module {
                overlay_id,
                orig,
                new,
            } => {
                let (gone, back) = if undo { (new, orig) } else { (orig, new) };
                let overlay = self.overlay_mut(overlay_id)?;
                if let Some(gone) = gone {
                    overlay.modules.remove(&gone.id);
                }
                if let Some(back) = back {
                    overlay.modules.insert(back.id.clone(), back.clone());
                }
            }
            OverlayChangeKind::ModuleLink {
                overlay_id,
                orig,
                new,
            } => {
                let (gone, back) = if undo { (new, orig) } else { (orig, new) };
                let overlay = self.overlay_mut(overlay_id)?;
                if let Some(gone) = gone {
                    overlay.module_links.remove(&gone.id);
                }
                if let Some(back) = back {
                    overlay.module_links.insert(back.id.clone(), back.clone());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removing_module_drops_its_links_and_undoes_in_reverse() {
        let mut support = OverlaySupport::new(OverlayOwner::Instance("m1".to_string()));
        support.add_overlay(NetworkOverlay::new("ov", "Overlay")).unwrap();
        support.add_module("ov", NetModule::new("a", "A")).unwrap();
        support.add_module("ov", NetModule::new("b", "B")).unwrap();
        support
            .add_module_link(
                "ov",
                NetModuleLinkage {
                    id: "ab".to_string(),
                    source: "a".to_string(),
                    target: "b".to_string(),
                    sign: Sign::Positive,
                },
            )
            .unwrap();
        let before = support.clone();
        let changes = support.remove_module("ov", "a").unwrap();
        assert_eq!(changes.len(), 2);
        assert!(support.overlay("ov").unwrap().module_links.is_empty());
        for change in changes.iter().rev() {
            support.undo(&change.kind).unwrap();
        }
        assert_eq!(support, before);
    }
}
