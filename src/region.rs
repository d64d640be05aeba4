//! Cis-regulatory region layout of a gene.
//!
//! A gene's landing pads `[first_pad, last_pad]` are tiled, without gaps or
//! overlaps, by named regions (modules) and anonymous holder regions. Every
//! structural edit produces a fresh list; lists are never patched pad by pad.
//! Pad numbering is right-aligned: the last pad is fixed and genes grow or
//! shrink on the left.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{DEFAULT_PAD_COUNT, normalize_name};
use crate::error::GenomeError;

const HOLDER_PREFIX: &str = "#h";
const LINK_HOLDER_PREFIX: &str = "#lh";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "key", rename_all = "snake_case")]
pub enum RegionKind {
    Named(String),
    Holder(String),
    /// Transient: marks a holder that carries link landings while a layout
    /// is being recomputed. Never persisted.
    LinkHolder(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneRegion {
    pub kind: RegionKind,
    pub start_pad: i32,
    pub end_pad: i32,
    pub evidence: u8,
}

impl GeneRegion {
    pub fn named(name: impl Into<String>, start_pad: i32, end_pad: i32) -> Self {
        Self {
            kind: RegionKind::Named(name.into()),
            start_pad,
            end_pad,
            evidence: 0,
        }
    }

    pub fn holder(internal: impl Into<String>, start_pad: i32, end_pad: i32) -> Self {
        Self {
            kind: RegionKind::Holder(internal.into()),
            start_pad,
            end_pad,
            evidence: 0,
        }
    }

    pub fn with_evidence(mut self, evidence: u8) -> Self {
        self.evidence = evidence;
        self
    }

    pub fn name(&self) -> Option<&str> {
        match &self.kind {
            RegionKind::Named(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_holder(&self) -> bool {
        matches!(self.kind, RegionKind::Holder(_))
    }

    pub fn is_link_holder(&self) -> bool {
        matches!(self.kind, RegionKind::LinkHolder(_))
    }

    pub fn is_anonymous(&self) -> bool {
        !matches!(self.kind, RegionKind::Named(_))
    }

    pub fn width(&self) -> i32 {
        self.end_pad - self.start_pad + 1
    }

    pub fn contains(&self, pad: i32) -> bool {
        self.start_pad <= pad && pad <= self.end_pad
    }

    pub fn key(&self) -> RegionKey {
        match &self.kind {
            RegionKind::Named(name) => RegionKey::named(name),
            RegionKind::Holder(internal) | RegionKind::LinkHolder(internal) => {
                RegionKey::internal(internal)
            }
        }
    }

    fn as_plain_holder(&self) -> GeneRegion {
        match &self.kind {
            RegionKind::LinkHolder(internal) => GeneRegion {
                kind: RegionKind::Holder(internal.clone()),
                ..self.clone()
            },
            _ => self.clone(),
        }
    }
}

/// Stable identity of a region across list rebuilds. Case-insensitive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionKey {
    display: String,
    internal: bool,
}

impl RegionKey {
    pub fn named(name: &str) -> Self {
        Self {
            display: name.to_string(),
            internal: false,
        }
    }

    pub fn internal(name: &str) -> Self {
        Self {
            display: name.to_string(),
            internal: true,
        }
    }

    pub fn is_internal(&self) -> bool {
        self.internal
    }

    pub fn as_str(&self) -> &str {
        &self.display
    }

    fn folded(&self) -> String {
        self.display.to_lowercase()
    }
}

impl PartialEq for RegionKey {
    fn eq(&self, other: &Self) -> bool {
        self.internal == other.internal && self.folded() == other.folded()
    }
}

impl Eq for RegionKey {}

impl Hash for RegionKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.internal.hash(state);
        self.folded().hash(state);
    }
}

impl PartialOrd for RegionKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RegionKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.internal, self.folded()).cmp(&(other.internal, other.folded()))
    }
}

impl fmt::Display for RegionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}

/// Pad extent of a gene with `pad_count` pads.
pub fn pad_extent(pad_count: i32) -> (i32, i32) {
    (DEFAULT_PAD_COUNT - pad_count, DEFAULT_PAD_COUNT - 1)
}

/// True when `list` tiles `[min_pad, max_pad]` exactly and named regions are
/// unique under normalized comparison. An empty list is a gene without modules.
pub fn valid_order(list: &[GeneRegion], min_pad: i32, max_pad: i32) -> bool {
    order_problem(list, min_pad, max_pad).is_none()
}

pub fn check_order(
    gene_id: &str,
    list: &[GeneRegion],
    min_pad: i32,
    max_pad: i32,
) -> Result<(), GenomeError> {
    match order_problem(list, min_pad, max_pad) {
        None => Ok(()),
        Some(reason) => Err(GenomeError::MalformedRegions {
            gene: gene_id.to_string(),
            reason,
        }),
    }
}

fn order_problem(list: &[GeneRegion], min_pad: i32, max_pad: i32) -> Option<String> {
    if list.is_empty() {
        return None;
    }
    let mut cursor = min_pad;
    let mut names = BTreeSet::new();
    for region in list {
        if region.start_pad > region.end_pad {
            return Some(format!(
                "region {} runs backwards ({}..{})",
                region.key(),
                region.start_pad,
                region.end_pad
            ));
        }
        if region.start_pad != cursor {
            return Some(format!(
                "region {} starts at {} but pad {} is next",
                region.key(),
                region.start_pad,
                cursor
            ));
        }
        if let Some(name) = region.name() {
            if !names.insert(normalize_name(name)) {
                return Some(format!("duplicate region name {name}"));
            }
        }
        cursor = region.end_pad + 1;
    }
    if cursor != max_pad + 1 {
        return Some(format!("regions end at {} instead of {}", cursor - 1, max_pad));
    }
    None
}

pub fn region_at(list: &[GeneRegion], pad: i32) -> Option<&GeneRegion> {
    list.iter().find(|region| region.contains(pad))
}

pub fn names_unique(list: &[GeneRegion]) -> bool {
    let mut seen = BTreeSet::new();
    list.iter()
        .filter_map(GeneRegion::name)
        .all(|name| seen.insert(normalize_name(name)))
}

fn fresh_internal_key(list: &[GeneRegion], prefix: &str) -> String {
    let next = list
        .iter()
        .filter_map(|region| match &region.kind {
            RegionKind::Holder(key) | RegionKind::LinkHolder(key) => Some(key.as_str()),
            RegionKind::Named(_) => None,
        })
        .filter_map(|key| {
            key.strip_prefix(LINK_HOLDER_PREFIX)
                .or_else(|| key.strip_prefix(HOLDER_PREFIX))
        })
        .filter_map(|suffix| suffix.parse::<u32>().ok())
        .max()
        .map(|max| max + 1)
        .unwrap_or(0);
    format!("{prefix}{next}")
}

pub fn fresh_holder_key(list: &[GeneRegion]) -> String {
    fresh_internal_key(list, HOLDER_PREFIX)
}

/// Grows the gene to `num_pads`; the new pads appear on the left edge.
pub fn stretch_the_list(list: &[GeneRegion], num_pads: i32) -> Result<Vec<GeneRegion>, GenomeError> {
    let Some(first) = list.first() else {
        return Ok(Vec::new());
    };
    let new_min = DEFAULT_PAD_COUNT - num_pads;
    if new_min >= first.start_pad {
        return Err(GenomeError::Precondition(format!(
            "stretch to {num_pads} pads does not grow a list starting at pad {}",
            first.start_pad
        )));
    }
    let mut out = list.to_vec();
    if out[0].is_anonymous() {
        out[0].start_pad = new_min;
    } else {
        let holder = GeneRegion::holder(fresh_holder_key(list), new_min, first.start_pad - 1);
        out.insert(0, holder);
    }
    Ok(out)
}

/// Outcome of shrinking a gene: the new layout and where every occupied pad moved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedRegions {
    pub regions: Vec<GeneRegion>,
    pub pad_map: BTreeMap<i32, i32>,
}

/// Pads that must survive inside a region: one per distinct link landing.
pub fn link_pad_requirement(region: &GeneRegion, occupied: &BTreeSet<i32>) -> i32 {
    occupied.range(region.start_pad..=region.end_pad).count() as i32
}

/// Converts holders carrying landings into link holders.
pub fn mark_link_holders(list: &[GeneRegion], occupied: &BTreeSet<i32>) -> Vec<GeneRegion> {
    list.iter()
        .map(|region| match &region.kind {
            RegionKind::Holder(key) if link_pad_requirement(region, occupied) > 0 => GeneRegion {
                kind: RegionKind::LinkHolder(key.clone()),
                ..region.clone()
            },
            _ => region.clone(),
        })
        .collect()
}

fn holder_slack(region: &GeneRegion, occupied: &BTreeSet<i32>) -> i32 {
    match region.kind {
        RegionKind::Named(_) => 0,
        RegionKind::Holder(_) => region.width(),
        RegionKind::LinkHolder(_) => region.width() - link_pad_requirement(region, occupied),
    }
}

fn shoulder_indices(len: usize) -> Vec<usize> {
    match len {
        0 => Vec::new(),
        1 => vec![0],
        _ => vec![0, len - 1],
    }
}

/// Holder slack available at the two ends of the gene.
pub fn shave_space(list: &[GeneRegion], occupied: &BTreeSet<i32>) -> i32 {
    let marked = mark_link_holders(list, occupied);
    shoulder_indices(marked.len())
        .into_iter()
        .map(|idx| holder_slack(&marked[idx], occupied))
        .sum()
}

/// All holder slack: both shoulders plus every interior holder.
pub fn available_space(list: &[GeneRegion], occupied: &BTreeSet<i32>) -> i32 {
    let marked = mark_link_holders(list, occupied);
    marked.iter().map(|region| holder_slack(region, occupied)).sum()
}

/// Takes up to `amount` pads from interior holders, left to right. Positions 0
/// and `len - 1` are shoulders and are never touched here. Returns what could
/// not be taken.
fn squeeze_out_space(widths: &mut [i32], slack: &[i32], amount: i32) -> i32 {
    let mut remaining = amount;
    let len = widths.len();
    if len < 3 {
        return remaining;
    }
    for idx in 1..len - 1 {
        if remaining == 0 {
            break;
        }
        let take = slack[idx].min(remaining);
        widths[idx] -= take;
        remaining -= take;
    }
    remaining
}

/// Places `pads` (sorted, inside `[old_start, old_end]`) into the new span,
/// keeping their order and their distance from the right edge where possible.
fn pack_pads(
    old_end: i32,
    new_start: i32,
    new_end: i32,
    pads: &[i32],
    pad_map: &mut BTreeMap<i32, i32>,
) {
    let count = pads.len() as i32;
    for (idx, pad) in pads.iter().enumerate() {
        let idx = idx as i32;
        let lo = new_start + idx;
        let hi = new_end - (count - 1 - idx);
        let candidate = new_end - (old_end - pad);
        pad_map.insert(*pad, candidate.clamp(lo, hi));
    }
}

/// Shrinks the gene from `old_pad_count` to `num_pads` pads.
///
/// Shoulder holders are shaved first (left, then right). If that is not
/// enough, interior holders are squeezed as well. Named regions never shrink
/// and no holder may drop below one pad per link landing it carries. A shrink
/// that cannot be met is rejected and the input is left alone.
pub fn compress_the_list(
    list: &[GeneRegion],
    old_pad_count: i32,
    num_pads: i32,
    occupied: &BTreeSet<i32>,
) -> Result<CompressedRegions, GenomeError> {
    let reduction = old_pad_count - num_pads;
    if reduction <= 0 {
        return Err(GenomeError::Precondition(format!(
            "compress from {old_pad_count} to {num_pads} pads does not shrink"
        )));
    }
    let (old_min, old_max) = pad_extent(old_pad_count);
    let new_min = old_min + reduction;

    if list.is_empty() {
        let pads: Vec<i32> = occupied.range(old_min..=old_max).copied().collect();
        if pads.len() as i32 > num_pads {
            return Err(GenomeError::Infeasible(format!(
                "{} link landings do not fit on {num_pads} pads",
                pads.len()
            )));
        }
        let mut pad_map = BTreeMap::new();
        pack_pads(old_max, new_min, old_max, &pads, &mut pad_map);
        return Ok(CompressedRegions {
            regions: Vec::new(),
            pad_map,
        });
    }

    let marked = mark_link_holders(list, occupied);
    let slack: Vec<i32> = marked
        .iter()
        .map(|region| holder_slack(region, occupied))
        .collect();
    let shoulders = shoulder_indices(marked.len());
    let shave: i32 = shoulders.iter().map(|idx| slack[*idx]).sum();
    let available: i32 = slack.iter().sum();
    debug!(reduction, shave, available, "compressing region list");
    if reduction > available {
        return Err(GenomeError::Infeasible(format!(
            "cannot remove {reduction} pads: only {available} free pads outside modules and link landings"
        )));
    }

    let mut widths: Vec<i32> = marked.iter().map(GeneRegion::width).collect();
    let mut remaining = reduction;
    for idx in &shoulders {
        let take = slack[*idx].min(remaining);
        widths[*idx] -= take;
        remaining -= take;
    }
    if remaining > 0 {
        remaining = squeeze_out_space(&mut widths, &slack, remaining);
    }
    if remaining > 0 {
        return Err(GenomeError::Infeasible(format!(
            "{remaining} pads could not be reclaimed"
        )));
    }

    let mut regions = Vec::with_capacity(marked.len());
    let mut pad_map = BTreeMap::new();
    let mut cursor = new_min;
    for (region, width) in marked.iter().zip(widths) {
        if width == 0 {
            continue;
        }
        let new_start = cursor;
        let new_end = cursor + width - 1;
        let pads: Vec<i32> = occupied
            .range(region.start_pad..=region.end_pad)
            .copied()
            .collect();
        if region.is_anonymous() {
            pack_pads(region.end_pad, new_start, new_end, &pads, &mut pad_map);
        } else {
            let shift = new_start - region.start_pad;
            for pad in pads {
                pad_map.insert(pad, pad + shift);
            }
        }
        let mut rebuilt = region.as_plain_holder();
        rebuilt.start_pad = new_start;
        rebuilt.end_pad = new_end;
        regions.push(rebuilt);
        cursor = new_end + 1;
    }
    Ok(CompressedRegions { regions, pad_map })
}

/// Collapses each run of adjacent holders into its first member. The map
/// sends every absorbed holder key to the survivor's key.
pub fn merge_holders(list: &[GeneRegion]) -> (Vec<GeneRegion>, BTreeMap<RegionKey, RegionKey>) {
    let mut out: Vec<GeneRegion> = Vec::with_capacity(list.len());
    let mut remap = BTreeMap::new();
    for region in list {
        match out.last_mut() {
            Some(last) if last.is_holder() && region.is_holder() => {
                remap.insert(region.key(), last.key());
                last.end_pad = last.end_pad.max(region.end_pad);
            }
            _ => out.push(region.clone()),
        }
    }
    (out, remap)
}

/// Fills any uncovered pads of `[min_pad, max_pad]` with fresh holders.
pub fn fill_gaps_with_holders(list: &[GeneRegion], min_pad: i32, max_pad: i32) -> Vec<GeneRegion> {
    if list.is_empty() {
        return Vec::new();
    }
    let mut sorted = list.to_vec();
    sorted.sort_by_key(|region| region.start_pad);
    let mut out = Vec::with_capacity(sorted.len() + 2);
    let mut cursor = min_pad;
    for region in sorted {
        if region.start_pad > cursor {
            let mut probe = out.clone();
            probe.extend(list.iter().cloned());
            out.push(GeneRegion::holder(
                fresh_holder_key(&probe),
                cursor,
                region.start_pad - 1,
            ));
        }
        cursor = cursor.max(region.end_pad + 1);
        out.push(region);
    }
    if cursor <= max_pad {
        let mut probe = out.clone();
        probe.extend(list.iter().cloned());
        out.push(GeneRegion::holder(fresh_holder_key(&probe), cursor, max_pad));
    }
    out
}

/// Index of the holder holding both `start_pad` and `end_pad`.
pub fn find_the_slot(list: &[GeneRegion], start_pad: i32, end_pad: i32) -> Option<usize> {
    list.iter().position(|region| {
        region.is_anonymous() && region.contains(start_pad) && region.contains(end_pad)
    })
}

/// Places a named region inside a single existing holder, splitting it into
/// up to three pieces. An empty list is first covered by one holder.
pub fn insert_in_holder(
    list: &[GeneRegion],
    new_region: GeneRegion,
    min_pad: i32,
    max_pad: i32,
) -> Result<Vec<GeneRegion>, GenomeError> {
    let Some(name) = new_region.name() else {
        return Err(GenomeError::Precondition(
            "only named regions can be inserted".to_string(),
        ));
    };
    if new_region.start_pad > new_region.end_pad {
        return Err(GenomeError::Infeasible(format!("region {name} runs backwards")));
    }
    let norm = normalize_name(name);
    if list
        .iter()
        .filter_map(GeneRegion::name)
        .any(|existing| normalize_name(existing) == norm)
    {
        return Err(GenomeError::Infeasible(format!("region name {name} already used")));
    }
    let base = if list.is_empty() {
        vec![GeneRegion::holder(fresh_holder_key(list), min_pad, max_pad)]
    } else {
        list.to_vec()
    };
    let slot = find_the_slot(&base, new_region.start_pad, new_region.end_pad).ok_or_else(|| {
        GenomeError::Infeasible(format!(
            "pads {}..{} are not inside a single free stretch",
            new_region.start_pad, new_region.end_pad
        ))
    })?;
    let holder = base[slot].as_plain_holder();
    let mut pieces = Vec::with_capacity(3);
    if new_region.start_pad > holder.start_pad {
        let mut left = holder.clone();
        left.end_pad = new_region.start_pad - 1;
        pieces.push(left);
    }
    let right_needed = new_region.end_pad < holder.end_pad;
    let right_start = new_region.end_pad + 1;
    pieces.push(new_region);
    if right_needed {
        let key = if pieces.len() == 2 {
            fresh_holder_key(&base)
        } else {
            match &holder.kind {
                RegionKind::Holder(key) => key.clone(),
                _ => fresh_holder_key(&base),
            }
        };
        pieces.push(GeneRegion::holder(key, right_start, holder.end_pad));
    }
    let mut out = base;
    out.splice(slot..=slot, pieces);
    Ok(out)
}

/// Turns a named region back into holder space.
pub fn remove_region(list: &[GeneRegion], key: &RegionKey) -> Result<Vec<GeneRegion>, GenomeError> {
    let idx = list
        .iter()
        .position(|region| !region.is_anonymous() && &region.key() == key)
        .ok_or_else(|| GenomeError::Precondition(format!("no region {key}")))?;
    let mut out = list.to_vec();
    let fresh = fresh_holder_key(list);
    out[idx] = GeneRegion::holder(fresh, list[idx].start_pad, list[idx].end_pad);
    let (merged, _) = merge_holders(&out);
    if merged.iter().all(GeneRegion::is_anonymous) {
        return Ok(Vec::new());
    }
    Ok(merged)
}

pub fn rename_region(
    list: &[GeneRegion],
    key: &RegionKey,
    new_name: &str,
) -> Result<Vec<GeneRegion>, GenomeError> {
    let norm = normalize_name(new_name);
    if list
        .iter()
        .filter(|region| &region.key() != key)
        .filter_map(GeneRegion::name)
        .any(|name| normalize_name(name) == norm)
    {
        return Err(GenomeError::Infeasible(format!(
            "region name {new_name} already used"
        )));
    }
    let mut found = false;
    let out = list
        .iter()
        .map(|region| {
            if !region.is_anonymous() && &region.key() == key {
                found = true;
                GeneRegion {
                    kind: RegionKind::Named(new_name.to_string()),
                    ..region.clone()
                }
            } else {
                region.clone()
            }
        })
        .collect();
    if !found {
        return Err(GenomeError::Precondition(format!("no region {key}")));
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyRegionFix {
    pub regions: Vec<GeneRegion>,
    pub corrections: Vec<String>,
}

/// Load-time repair for region lists written before boundaries were exact.
///
/// The outer regions are stretched to the gene extent. Where two neighbours
/// overlap, the contested pads go to whichever side has more link landings
/// next to the boundary; ties go to the left. This vote is a compatibility
/// heuristic for old files only.
pub fn legacy_io_fixup(
    gene_id: &str,
    list: &[GeneRegion],
    min_pad: i32,
    max_pad: i32,
    landings: &BTreeMap<i32, usize>,
) -> LegacyRegionFix {
    let mut corrections = Vec::new();
    if list.is_empty() {
        return LegacyRegionFix {
            regions: Vec::new(),
            corrections,
        };
    }
    let mut work: Vec<GeneRegion> = list.iter().map(GeneRegion::as_plain_holder).collect();
    work.sort_by_key(|region| (region.start_pad, region.end_pad));

    if work[0].start_pad != min_pad {
        corrections.push(format!(
            "gene {gene_id}: region {} now starts at pad {min_pad} (was {})",
            work[0].key(),
            work[0].start_pad
        ));
        work[0].start_pad = min_pad;
    }
    let last = work.len() - 1;
    if work[last].end_pad != max_pad {
        corrections.push(format!(
            "gene {gene_id}: region {} now ends at pad {max_pad} (was {})",
            work[last].key(),
            work[last].end_pad
        ));
        work[last].end_pad = max_pad;
    }

    let landing_count = |from: i32, to: i32| -> usize {
        if from > to {
            return 0;
        }
        landings.range(from..=to).map(|(_, count)| *count).sum()
    };

    let mut idx = 0;
    while idx + 1 < work.len() {
        let (left_end, right_start) = (work[idx].end_pad, work[idx + 1].start_pad);
        if left_end >= right_start {
            let contested_lo = right_start;
            let contested_hi = left_end;
            let below = landing_count(work[idx].start_pad, contested_lo - 1);
            let above = landing_count(contested_hi + 1, work[idx + 1].end_pad);
            let left_survives = contested_lo > work[idx].start_pad;
            let right_survives = contested_hi < work[idx + 1].end_pad;
            let give_right = (above > below && left_survives) || !right_survives;
            if give_right {
                work[idx].end_pad = contested_lo - 1;
            } else {
                work[idx + 1].start_pad = contested_hi + 1;
            }
            corrections.push(format!(
                "gene {gene_id}: pads {contested_lo}..{contested_hi} assigned to region {}",
                if give_right { work[idx + 1].key() } else { work[idx].key() }
            ));
            if work[idx].start_pad > work[idx].end_pad {
                corrections.push(format!("gene {gene_id}: dropped empty region {}", work[idx].key()));
                work.remove(idx);
                continue;
            }
            if work[idx + 1].start_pad > work[idx + 1].end_pad {
                corrections.push(format!(
                    "gene {gene_id}: dropped empty region {}",
                    work[idx + 1].key()
                ));
                work.remove(idx + 1);
                continue;
            }
        }
        idx += 1;
    }

    let filled = fill_gaps_with_holders(&work, min_pad, max_pad);
    if filled.len() != work.len() {
        corrections.push(format!(
            "gene {gene_id}: filled {} gap(s) with holder regions",
            filled.len() - work.len()
        ));
    }
    let (merged, remap) = merge_holders(&filled);
    if !remap.is_empty() {
        corrections.push(format!(
            "gene {gene_id}: merged {} adjacent holder region(s)",
            remap.len()
        ));
    }
    LegacyRegionFix {
        regions: merged,
        corrections,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<GeneRegion> {
        vec![
            GeneRegion::named("a", 8, 10),
            GeneRegion::holder("#h0", 11, 12),
            GeneRegion::named("b", 13, 15),
        ]
    }

    #[test]
    fn order_detects_gaps_and_duplicates() {
        assert!(valid_order(&sample(), 8, 15));
        let mut gap = sample();
        gap[1].start_pad = 12;
        assert!(!valid_order(&gap, 8, 15));
        let mut dup = sample();
        dup[2] = GeneRegion::named("A", 13, 15);
        assert!(!valid_order(&dup, 8, 15));
    }

    #[test]
    fn squeeze_leaves_shoulders_alone() {
        let mut widths = vec![3, 2, 4, 3];
        let slack = vec![3, 2, 4, 3];
        let left = squeeze_out_space(&mut widths, &slack, 5);
        assert_eq!(left, 0);
        assert_eq!(widths, vec![3, 0, 1, 3]);
    }

    #[test]
    fn pack_pads_keeps_order_inside_span() {
        let mut map = BTreeMap::new();
        pack_pads(9, 5, 7, &[4, 6, 9], &mut map);
        assert_eq!(map[&4], 5);
        assert_eq!(map[&6], 6);
        assert_eq!(map[&9], 7);
    }

    #[test]
    fn merge_remaps_absorbed_holders() {
        let list = vec![
            GeneRegion::holder("#h0", 0, 3),
            GeneRegion::holder("#h1", 4, 5),
            GeneRegion::named("a", 6, 15),
        ];
        let (merged, remap) = merge_holders(&list);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].end_pad, 5);
        assert_eq!(remap[&RegionKey::internal("#h1")], RegionKey::internal("#H0"));
    }
}
