use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::{DEFAULT_PAD_COUNT, NodeType, Sign, TargetLevel};
use crate::region::GeneRegion;

/// Anything stored by id in a genome item store.
pub trait GenomeItem: Clone + PartialEq + fmt::Debug {
    fn id(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "level", rename_all = "lowercase")]
pub enum Activity {
    Active,
    Inactive,
    Vestigial,
    Variable(f64),
}

impl Activity {
    pub fn level(self) -> f64 {
        match self {
            Activity::Active => 1.0,
            Activity::Inactive | Activity::Vestigial => 0.0,
            Activity::Variable(level) => level,
        }
    }

    pub fn is_active_at_all(self) -> bool {
        !matches!(self, Activity::Inactive | Activity::Vestigial)
    }

    pub fn token(self) -> &'static str {
        match self {
            Activity::Active => "active",
            Activity::Inactive => "inactive",
            Activity::Vestigial => "vestigial",
            Activity::Variable(_) => "variable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbGene {
    pub id: String,
    pub name: String,
    pub evidence: u8,
    pub pad_count: i32,
    pub regions: Vec<GeneRegion>,
    pub description: Option<String>,
    pub urls: Vec<String>,
}

impl DbGene {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            evidence: 0,
            pad_count: DEFAULT_PAD_COUNT,
            regions: Vec::new(),
            description: None,
            urls: Vec::new(),
        }
    }

    pub fn first_pad(&self) -> i32 {
        DEFAULT_PAD_COUNT - self.pad_count
    }

    pub fn last_pad(&self) -> i32 {
        DEFAULT_PAD_COUNT - 1
    }

    pub fn num_regions(&self) -> usize {
        self.regions.iter().filter(|region| !region.is_anonymous()).count()
    }
}

impl GenomeItem for DbGene {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbNode {
    pub id: String,
    pub node_type: NodeType,
    pub name: String,
    /// Extra pads beyond the type's default footprint.
    pub pad_count: Option<i32>,
    pub description: Option<String>,
    pub urls: Vec<String>,
}

impl DbNode {
    pub fn new(id: impl Into<String>, node_type: NodeType, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type,
            name: name.into(),
            pad_count: None,
            description: None,
            urls: Vec::new(),
        }
    }

    pub fn into_gene(self) -> DbGene {
        DbGene {
            id: self.id,
            name: self.name,
            evidence: 0,
            pad_count: DEFAULT_PAD_COUNT,
            regions: Vec::new(),
            description: self.description,
            urls: self.urls,
        }
    }
}

impl DbGene {
    pub fn into_node(self, node_type: NodeType) -> DbNode {
        DbNode {
            id: self.id,
            node_type,
            name: self.name,
            pad_count: (self.pad_count != DEFAULT_PAD_COUNT).then_some(self.pad_count),
            description: self.description,
            urls: self.urls,
        }
    }
}

impl GenomeItem for DbNode {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbLinkage {
    pub id: String,
    pub name: Option<String>,
    pub source: String,
    pub target: String,
    pub sign: Sign,
    pub target_level: TargetLevel,
    pub launch_pad: i32,
    pub landing_pad: i32,
    pub description: Option<String>,
    pub urls: Vec<String>,
}

impl DbLinkage {
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
        sign: Sign,
    ) -> Self {
        Self {
            id: id.into(),
            name: None,
            source: source.into(),
            target: target.into(),
            sign,
            target_level: TargetLevel::Standard,
            launch_pad: 0,
            landing_pad: 0,
            description: None,
            urls: Vec::new(),
        }
    }
}

impl GenomeItem for DbLinkage {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Per-model occurrence of a root gene or node. Names and sizes stay on the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInstance {
    pub id: String,
    pub activity: Activity,
    pub override_name: Option<String>,
    pub description: Option<String>,
    pub sim_level: Option<f64>,
}

impl NodeInstance {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            activity: Activity::Active,
            override_name: None,
            description: None,
            sim_level: None,
        }
    }
}

impl GenomeItem for NodeInstance {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkageInstance {
    pub id: String,
    pub source: String,
    pub target: String,
    pub launch_pad: i32,
    pub landing_pad: i32,
    pub activity: Activity,
    pub sim_diff: Option<f64>,
    pub description: Option<String>,
}

impl LinkageInstance {
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            launch_pad: 0,
            landing_pad: 0,
            activity: Activity::Active,
            sim_diff: None,
            description: None,
        }
    }
}

impl GenomeItem for LinkageInstance {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub name: String,
    pub text: String,
    pub interactive: bool,
}

impl Note {
    pub fn new(id: impl Into<String>, name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            text: text.into(),
            interactive: false,
        }
    }
}

impl GenomeItem for Note {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Endpoint view of any link, root or instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEnds<'a> {
    pub id: &'a str,
    pub source: &'a str,
    pub target: &'a str,
    pub launch_pad: i32,
    pub landing_pad: i32,
}

pub trait LinkLike {
    fn ends(&self) -> LinkEnds<'_>;
}

impl LinkLike for DbLinkage {
    fn ends(&self) -> LinkEnds<'_> {
        LinkEnds {
            id: &self.id,
            source: &self.source,
            target: &self.target,
            launch_pad: self.launch_pad,
            landing_pad: self.landing_pad,
        }
    }
}

impl LinkLike for LinkageInstance {
    fn ends(&self) -> LinkEnds<'_> {
        LinkEnds {
            id: &self.id,
            source: &self.source,
            target: &self.target,
            launch_pad: self.launch_pad,
            landing_pad: self.landing_pad,
        }
    }
}
