//! Undo/redo records. Each record carries owned before/after snapshots of
//! exactly one entity, so replaying it never depends on live state.

use serde::{Deserialize, Serialize};

use crate::group::Group;
use crate::images::ImageChange;
use crate::instance::GenomeInstance;
use crate::items::{DbGene, DbLinkage, DbNode, LinkageInstance, NodeInstance, Note};
use crate::navigation::{StartupViewChange, TreePathChange};
use crate::overlay::OverlayChange;
use crate::proxy::{DynamicInstanceProxy, ProxyChange};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBounds {
    pub min_time: i32,
    pub max_time: i32,
}

impl TimeBounds {
    pub fn new(min_time: i32, max_time: i32) -> Self {
        Self { min_time, max_time }
    }

    pub fn contains(&self, time: i32) -> bool {
        self.min_time <= time && time <= self.max_time
    }

    pub fn encloses(&self, other: &TimeBounds) -> bool {
        self.min_time <= other.min_time && other.max_time <= self.max_time
    }
}

/// Model-level attributes that are not stored items.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GenomeProperties {
    pub name: String,
    pub long_name: Option<String>,
    pub description: Option<String>,
    pub time_bounds: Option<TimeBounds>,
}

impl GenomeProperties {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GenomeChangeKind<G, N, L> {
    Gene {
        orig: Option<G>,
        new: Option<G>,
    },
    Node {
        orig: Option<N>,
        new: Option<N>,
    },
    Link {
        orig: Option<L>,
        new: Option<L>,
    },
    Note {
        orig: Option<Note>,
        new: Option<Note>,
    },
    /// A node became a gene or the reverse: one side lives in each collection.
    NodeType {
        gene_orig: Option<G>,
        gene_new: Option<G>,
        node_orig: Option<N>,
        node_new: Option<N>,
    },
    Group {
        orig: Option<Group>,
        new: Option<Group>,
    },
    Properties {
        orig: GenomeProperties,
        new: GenomeProperties,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenomeChange<G, N, L> {
    pub genome_id: String,
    pub kind: GenomeChangeKind<G, N, L>,
}

pub type RootChange = GenomeChange<DbGene, DbNode, DbLinkage>;
pub type InstanceChange = GenomeChange<NodeInstance, NodeInstance, LinkageInstance>;

/// A whole model or proxy entering or leaving the hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelTreeChange {
    Instance {
        /// Slot in the creation order, so undo puts it back where it was.
        position: usize,
        orig: Option<Box<GenomeInstance>>,
        new: Option<Box<GenomeInstance>>,
    },
    Proxy {
        orig: Option<Box<DynamicInstanceProxy>>,
        new: Option<Box<DynamicInstanceProxy>>,
    },
}

/// Any record the undo framework may hand back.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeRecord {
    Root(RootChange),
    Instance(InstanceChange),
    Proxy(ProxyChange),
    Overlay(OverlayChange),
    Image(ImageChange),
    TreePath(TreePathChange),
    StartupView(StartupViewChange),
    ModelTree(ModelTreeChange),
}

impl From<RootChange> for ChangeRecord {
    fn from(change: RootChange) -> Self {
        ChangeRecord::Root(change)
    }
}

impl From<InstanceChange> for ChangeRecord {
    fn from(change: InstanceChange) -> Self {
        ChangeRecord::Instance(change)
    }
}

impl From<ProxyChange> for ChangeRecord {
    fn from(change: ProxyChange) -> Self {
        ChangeRecord::Proxy(change)
    }
}

impl From<OverlayChange> for ChangeRecord {
    fn from(change: OverlayChange) -> Self {
        ChangeRecord::Overlay(change)
    }
}

impl From<ImageChange> for ChangeRecord {
    fn from(change: ImageChange) -> Self {
        ChangeRecord::Image(change)
    }
}

impl From<TreePathChange> for ChangeRecord {
    fn from(change: TreePathChange) -> Self {
        ChangeRecord::TreePath(change)
    }
}

impl From<StartupViewChange> for ChangeRecord {
    fn from(change: StartupViewChange) -> Self {
        ChangeRecord::StartupView(change)
    }
}

impl From<ModelTreeChange> for ChangeRecord {
    fn from(change: ModelTreeChange) -> Self {
        ChangeRecord::ModelTree(change)
    }
}
