//! Read-only expression and link-activation lookups used to derive dynamic
//! models. The providers are traits so callers can plug in their own data.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{Sign, names_match};

/// Expression of one gene in one region at one time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "level", rename_all = "snake_case")]
pub enum ExpressionLevel {
    NoData,
    NoRegion,
    NotExpressed,
    WeakExpression,
    Expressed,
    Variable(f64),
}

impl ExpressionLevel {
    pub fn token(self) -> &'static str {
        match self {
            ExpressionLevel::NoData => "noData",
            ExpressionLevel::NoRegion => "noRegion",
            ExpressionLevel::NotExpressed => "no",
            ExpressionLevel::WeakExpression => "weak",
            ExpressionLevel::Expressed => "yes",
            ExpressionLevel::Variable(_) => "variable",
        }
    }

    /// Numeric level, `None` where there is nothing to compare against.
    pub fn numeric(self, weak_level: f64) -> Option<f64> {
        match self {
            ExpressionLevel::Expressed => Some(1.0),
            ExpressionLevel::WeakExpression => Some(weak_level),
            ExpressionLevel::Variable(level) => Some(level),
            ExpressionLevel::NotExpressed => Some(0.0),
            ExpressionLevel::NoData | ExpressionLevel::NoRegion => None,
        }
    }
}

pub trait TimeCourseSource {
    fn expression(&self, base_id: &str, region: &str, time: i32) -> ExpressionLevel;

    /// Activity level assigned to weakly expressed genes.
    fn weak_level(&self) -> f64;

    fn simulation_level(&self, sim_key: &str, base_id: &str, region: &str, time: i32) -> Option<f64>;
}

/// One configured activation window of an input to a target gene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionAndRange {
    /// Target region the window applies to; `None` applies everywhere.
    pub region: Option<String>,
    /// Region the input must come from, if restricted.
    pub restricted_source: Option<String>,
    pub min_time: i32,
    pub max_time: i32,
    pub sign: Option<Sign>,
}

impl RegionAndRange {
    pub fn is_active(&self, time: i32) -> bool {
        self.min_time <= time && time <= self.max_time
    }

    pub fn applies_to(&self, target_region: Option<&str>, source_region: Option<&str>, sign: Sign) -> bool {
        let region_ok = match (&self.region, target_region) {
            (None, _) => true,
            (Some(wanted), Some(actual)) => names_match(wanted, actual),
            (Some(_), None) => false,
        };
        let source_ok = match (&self.restricted_source, source_region) {
            (None, _) => true,
            (Some(wanted), Some(actual)) => names_match(wanted, actual),
            (Some(_), None) => false,
        };
        let sign_ok = self.sign.is_none_or(|wanted| wanted == sign);
        region_ok && source_ok && sign_ok
    }
}

pub trait TemporalRangeSource {
    /// Windows for input `source_base` into `target_base`.
    fn ranges(&self, target_base: &str, source_base: &str) -> Vec<RegionAndRange>;

    fn has_data_for_target(&self, target_base: &str) -> bool;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeCourseData {
    pub weak_level: f64,
    /// gene base id -> region name -> time -> level
    pub genes: BTreeMap<String, BTreeMap<String, BTreeMap<i32, ExpressionLevel>>>,
    /// simulation key -> gene base id -> region name -> time -> level
    pub simulations: BTreeMap<String, BTreeMap<String, BTreeMap<String, BTreeMap<i32, f64>>>>,
}

impl Default for TimeCourseData {
    fn default() -> Self {
        Self {
            weak_level: 0.5,
            genes: BTreeMap::new(),
            simulations: BTreeMap::new(),
        }
    }
}

fn region_entry<'a, T>(map: &'a BTreeMap<String, T>, region: &str) -> Option<&'a T> {
    map.get(region).or_else(|| {
        map.iter()
            .find(|(name, _)| names_match(name, region))
            .map(|(_, value)| value)
    })
}

impl TimeCourseData {
    pub fn is_empty(&self) -> bool {
        self.genes.is_empty() && self.simulations.is_empty()
    }

    pub fn has_gene(&self, base_id: &str) -> bool {
        self.genes.contains_key(base_id)
    }

    pub fn set_expression(&mut self, base_id: &str, region: &str, time: i32, level: ExpressionLevel) {
        self.genes
            .entry(base_id.to_string())
            .or_default()
            .entry(region.to_string())
            .or_default()
            .insert(time, level);
    }

    pub fn set_simulation_level(&mut self, sim_key: &str, base_id: &str, region: &str, time: i32, level: f64) {
        self.simulations
            .entry(sim_key.to_string())
            .or_default()
            .entry(base_id.to_string())
            .or_default()
            .entry(region.to_string())
            .or_default()
            .insert(time, level);
    }

    /// Every time point mentioned anywhere in the data.
    pub fn times(&self) -> Vec<i32> {
        let mut times: Vec<i32> = self
            .genes
            .values()
            .flat_map(|regions| regions.values())
            .flat_map(|series| series.keys().copied())
            .collect();
        times.sort_unstable();
        times.dedup();
        times
    }
}

impl TimeCourseSource for TimeCourseData {
    fn expression(&self, base_id: &str, region: &str, time: i32) -> ExpressionLevel {
        let Some(regions) = self.genes.get(base_id) else {
            return ExpressionLevel::NoData;
        };
        let Some(series) = region_entry(regions, region) else {
            return ExpressionLevel::NoRegion;
        };
        series.get(&time).copied().unwrap_or(ExpressionLevel::NoData)
    }

    fn weak_level(&self) -> f64 {
        self.weak_level
    }

    fn simulation_level(&self, sim_key: &str, base_id: &str, region: &str, time: i32) -> Option<f64> {
        let regions = self.simulations.get(sim_key)?.get(base_id)?;
        region_entry(regions, region)?.get(&time).copied()
    }
}

/// Input windows for one (target, source) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalInput {
    pub source: String,
    pub ranges: Vec<RegionAndRange>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemporalInputRangeData {
    /// target base id -> inputs
    pub targets: BTreeMap<String, Vec<TemporalInput>>,
}

impl TemporalInputRangeData {
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn add_range(&mut self, target_base: &str, source_base: &str, range: RegionAndRange) {
        let inputs = self.targets.entry(target_base.to_string()).or_default();
        match inputs.iter_mut().find(|input| input.source == source_base) {
            Some(input) => input.ranges.push(range),
            None => inputs.push(TemporalInput {
                source: source_base.to_string(),
                ranges: vec![range],
            }),
        }
    }
}

impl TemporalRangeSource for TemporalInputRangeData {
    fn ranges(&self, target_base: &str, source_base: &str) -> Vec<RegionAndRange> {
        self.targets
            .get(target_base)
            .into_iter()
            .flatten()
            .filter(|input| input.source == source_base)
            .flat_map(|input| input.ranges.iter().cloned())
            .collect()
    }

    fn has_data_for_target(&self, target_base: &str) -> bool {
        self.targets
            .get(target_base)
            .is_some_and(|inputs| !inputs.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_distinguishes_missing_gene_and_region() {
        let mut data = TimeCourseData::default();
        data.set_expression("g1", "Endoderm", 6, ExpressionLevel::Expressed);
        assert_eq!(data.expression("g2", "Endoderm", 6), ExpressionLevel::NoData);
        assert_eq!(data.expression("g1", "Mesoderm", 6), ExpressionLevel::NoRegion);
        assert_eq!(data.expression("g1", "endo derm", 6), ExpressionLevel::Expressed);
        assert_eq!(data.expression("g1", "Endoderm", 7), ExpressionLevel::NoData);
    }

    #[test]
    fn range_filters_by_region_source_and_sign() {
        let range = RegionAndRange {
            region: Some("Endoderm".to_string()),
            restricted_source: Some("Mesoderm".to_string()),
            min_time: 4,
            max_time: 8,
            sign: Some(Sign::Positive),
        };
        assert!(range.applies_to(Some("endoderm"), Some("Mesoderm"), Sign::Positive));
        assert!(!range.applies_to(Some("endoderm"), Some("Ectoderm"), Sign::Positive));
        assert!(!range.applies_to(Some("endoderm"), Some("Mesoderm"), Sign::Negative));
        assert!(range.is_active(8));
        assert!(!range.is_active(9));
    }
}
