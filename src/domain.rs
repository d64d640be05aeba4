use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::GenomeError;

/// Rightmost gene pad is always `DEFAULT_PAD_COUNT - 1`; genes grow to the left.
pub const DEFAULT_PAD_COUNT: i32 = 16;

const DYNAMIC_PREFIX: &str = "{DiP}@root-";

static DYNAMIC_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\{DiP\}@root-(?P<proxy>.+):(?P<time>ALL|-?\d+)$").expect("dynamic key pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Bare,
    Box,
    Bubble,
    Diamond,
    Gene,
    Intercell,
    Slash,
}

impl NodeType {
    pub fn is_gene(self) -> bool {
        matches!(self, NodeType::Gene)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeType::Bare => "bare",
            NodeType::Box => "box",
            NodeType::Bubble => "bubble",
            NodeType::Diamond => "diamond",
            NodeType::Gene => "gene",
            NodeType::Intercell => "intercell",
            NodeType::Slash => "slash",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = GenomeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "bare" => Ok(NodeType::Bare),
            "box" => Ok(NodeType::Box),
            "bubble" => Ok(NodeType::Bubble),
            "diamond" => Ok(NodeType::Diamond),
            "gene" => Ok(NodeType::Gene),
            "intercell" | "intercellular" => Ok(NodeType::Intercell),
            "slash" => Ok(NodeType::Slash),
            _ => Err(GenomeError::InvalidKey(format!("node type {value}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sign {
    Positive,
    Negative,
    Neutral,
}

impl Sign {
    pub fn as_str(self) -> &'static str {
        match self {
            Sign::Positive => "+",
            Sign::Negative => "-",
            Sign::Neutral => "0",
        }
    }
}

impl fmt::Display for Sign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sign {
    type Err = GenomeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "+" | "positive" | "promote" => Ok(Sign::Positive),
            "-" | "negative" | "repress" => Ok(Sign::Negative),
            "0" | "neutral" | "" => Ok(Sign::Neutral),
            _ => Err(GenomeError::InvalidKey(format!("sign {value}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetLevel {
    Standard,
    Weak,
}

impl FromStr for TargetLevel {
    type Err = GenomeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "standard" | "" => Ok(TargetLevel::Standard),
            "weak" => Ok(TargetLevel::Weak),
            _ => Err(GenomeError::InvalidKey(format!("target level {value}"))),
        }
    }
}

/// Id of an item inside a genome instance: `<base>:<instance>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId {
    base: String,
    instance: u32,
}

impl InstanceId {
    pub fn new(base: impl Into<String>, instance: u32) -> Self {
        Self {
            base: base.into(),
            instance,
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn instance(&self) -> u32 {
        self.instance
    }

    /// Base part of either a root id or an instance id.
    pub fn base_of(id: &str) -> &str {
        match id.rsplit_once(':') {
            Some((base, suffix)) if suffix.chars().all(|ch| ch.is_ascii_digit()) => base,
            _ => id,
        }
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.base, self.instance)
    }
}

impl FromStr for InstanceId {
    type Err = GenomeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (base, instance) = value
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| GenomeError::InvalidKey(value.to_string()))?;
        if base.is_empty() {
            return Err(GenomeError::InvalidKey(value.to_string()));
        }
        let instance = instance
            .parse::<u32>()
            .map_err(|_| GenomeError::InvalidKey(value.to_string()))?;
        Ok(Self::new(base, instance))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TimeSelector {
    All,
    Hour(i32),
}

impl fmt::Display for TimeSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeSelector::All => f.write_str("ALL"),
            TimeSelector::Hour(hour) => write!(f, "{hour}"),
        }
    }
}

/// Key of one materialized dynamic model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DynamicKey {
    pub proxy_id: String,
    pub time: TimeSelector,
}

impl DynamicKey {
    pub fn new(proxy_id: impl Into<String>, time: TimeSelector) -> Self {
        Self {
            proxy_id: proxy_id.into(),
            time,
        }
    }

    pub fn is_dynamic_key(value: &str) -> bool {
        value.starts_with(DYNAMIC_PREFIX)
    }

    /// Hour carried by a serialized key; `None` for `ALL` or foreign keys.
    pub fn extract_time(value: &str) -> Option<i32> {
        match value.parse::<DynamicKey>().ok()?.time {
            TimeSelector::Hour(hour) => Some(hour),
            TimeSelector::All => None,
        }
    }
}

impl fmt::Display for DynamicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{DYNAMIC_PREFIX}{}:{}", self.proxy_id, self.time)
    }
}

impl FromStr for DynamicKey {
    type Err = GenomeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let caps = DYNAMIC_KEY_RE
            .captures(value.trim())
            .ok_or_else(|| GenomeError::InvalidKey(value.to_string()))?;
        let time = match &caps["time"] {
            "ALL" => TimeSelector::All,
            hour => TimeSelector::Hour(
                hour.parse()
                    .map_err(|_| GenomeError::InvalidKey(value.to_string()))?,
            ),
        };
        Ok(Self::new(&caps["proxy"], time))
    }
}

/// Identity of any model in the hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum GenomeKey {
    Root(String),
    Instance(String),
    Dynamic(DynamicKey),
}

impl GenomeKey {
    pub fn is_dynamic(&self) -> bool {
        matches!(self, GenomeKey::Dynamic(_))
    }

    pub fn static_id(&self) -> Option<&str> {
        match self {
            GenomeKey::Root(id) | GenomeKey::Instance(id) => Some(id),
            GenomeKey::Dynamic(_) => None,
        }
    }
}

impl fmt::Display for GenomeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenomeKey::Root(id) | GenomeKey::Instance(id) => f.write_str(id),
            GenomeKey::Dynamic(key) => write!(f, "{key}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum GroupMode {
    Legacy,
    AlwaysMainGroup,
    #[default]
    MainGroupAsFallback,
}

const GREEK: &[(char, &str)] = &[
    ('α', "alpha"),
    ('β', "beta"),
    ('γ', "gamma"),
    ('δ', "delta"),
    ('ε', "epsilon"),
    ('ζ', "zeta"),
    ('η', "eta"),
    ('θ', "theta"),
    ('ι', "iota"),
    ('κ', "kappa"),
    ('λ', "lambda"),
    ('μ', "mu"),
    ('ν', "nu"),
    ('ξ', "xi"),
    ('ο', "omicron"),
    ('π', "pi"),
    ('ρ', "rho"),
    ('σ', "sigma"),
    ('ς', "sigma"),
    ('τ', "tau"),
    ('υ', "upsilon"),
    ('φ', "phi"),
    ('χ', "chi"),
    ('ψ', "psi"),
    ('ω', "omega"),
];

/// Comparison key for names: whitespace removed, lowercased, Greek spelled out.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars().filter(|ch| !ch.is_whitespace()) {
        for lower in ch.to_lowercase() {
            match GREEK.iter().find(|(greek, _)| *greek == lower) {
                Some((_, spelled)) => out.push_str(spelled),
                None => out.push(lower),
            }
        }
    }
    out
}

pub fn names_match(left: &str, right: &str) -> bool {
    normalize_name(left) == normalize_name(right)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_instance_id() {
        let id: InstanceId = "G12:3".parse().unwrap();
        assert_eq!(id.base(), "G12");
        assert_eq!(id.instance(), 3);
        assert_eq!(id.to_string(), "G12:3");
    }

    #[test]
    fn parse_instance_id_invalid() {
        let err = "G12".parse::<InstanceId>().unwrap_err();
        assert_matches!(err, GenomeError::InvalidKey(_));
    }

    #[test]
    fn base_of_handles_both_spaces() {
        assert_eq!(InstanceId::base_of("G12:3"), "G12");
        assert_eq!(InstanceId::base_of("G12"), "G12");
    }

    #[test]
    fn dynamic_key_round_trip() {
        let key = DynamicKey::new("p7", TimeSelector::Hour(12));
        let text = key.to_string();
        assert_eq!(text, "{DiP}@root-p7:12");
        assert_eq!(text.parse::<DynamicKey>().unwrap(), key);
        assert_eq!(DynamicKey::extract_time(&text), Some(12));
        let all = DynamicKey::new("p7", TimeSelector::All).to_string();
        assert_eq!(DynamicKey::extract_time(&all), None);
    }

    #[test]
    fn normalization_ignores_case_space_and_greek() {
        assert_eq!(normalize_name("Wnt 8"), "wnt8");
        assert!(names_match("β-catenin", "BETA-catenin"));
        assert!(!names_match("otx", "otx2"));
    }
}
