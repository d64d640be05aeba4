use std::collections::{BTreeMap, BTreeSet};

use assert_matches::assert_matches;

use grn_hierarchy::domain::DEFAULT_PAD_COUNT;
use grn_hierarchy::error::GenomeError;
use grn_hierarchy::region::{
    self, GeneRegion, RegionKey, compress_the_list, fill_gaps_with_holders, insert_in_holder,
    merge_holders, stretch_the_list, valid_order,
};

fn eight_pad_gene() -> Vec<GeneRegion> {
    vec![
        GeneRegion::named("a", 8, 10),
        GeneRegion::holder("#h0", 11, 12),
        GeneRegion::named("b", 13, 15),
    ]
}

fn width_of(list: &[GeneRegion], name: &str) -> i32 {
    list.iter()
        .find(|region| region.name() == Some(name))
        .map(GeneRegion::width)
        .unwrap()
}

#[test]
fn stretch_adds_pads_on_the_left() {
    let list = eight_pad_gene();
    assert!(valid_order(&list, 8, 15));

    let stretched = stretch_the_list(&list, 10).unwrap();
    let total: i32 = stretched.iter().map(GeneRegion::width).sum();
    assert_eq!(total, 10);
    assert_eq!(stretched[0].start_pad, DEFAULT_PAD_COUNT - 10);
    assert_eq!(width_of(&stretched, "a"), 3);
    assert_eq!(width_of(&stretched, "b"), 3);
    assert!(valid_order(&stretched, 6, 15));
}

#[test]
fn stretch_widens_a_leading_holder() {
    let list = vec![GeneRegion::holder("#h0", 12, 13), GeneRegion::named("a", 14, 15)];
    let stretched = stretch_the_list(&list, 6).unwrap();
    assert_eq!(stretched.len(), 2);
    assert_eq!((stretched[0].start_pad, stretched[0].end_pad), (10, 13));
    assert!(valid_order(&stretched, 10, 15));
}

#[test]
fn compress_beyond_free_space_is_rejected() {
    let list = eight_pad_gene();
    let before = list.clone();
    let err = compress_the_list(&list, 8, 5, &BTreeSet::new()).unwrap_err();
    assert_matches!(err, GenomeError::Infeasible(_));
    assert_eq!(list, before);
}

#[test]
fn compress_squeezes_interior_holders() {
    let list = eight_pad_gene();
    let compressed = compress_the_list(&list, 8, 6, &BTreeSet::new()).unwrap();
    assert!(valid_order(&compressed.regions, 10, 15));
    assert_eq!(compressed.regions.len(), 2);
    assert_eq!(width_of(&compressed.regions, "a"), 3);
    assert_eq!(width_of(&compressed.regions, "b"), 3);
}

#[test]
fn compress_keeps_a_pad_for_every_landing() {
    let list = vec![
        GeneRegion::holder("#h0", 8, 11),
        GeneRegion::named("a", 12, 15),
    ];
    let occupied: BTreeSet<i32> = [9, 10].into_iter().collect();
    let compressed = compress_the_list(&list, 8, 6, &occupied).unwrap();
    assert!(valid_order(&compressed.regions, 10, 15));
    let moved: BTreeSet<i32> = compressed.pad_map.values().copied().collect();
    assert_eq!(moved.len(), 2);
    assert!(moved.iter().all(|pad| (10..=11).contains(pad)));

    let err = compress_the_list(&list, 8, 5, &occupied).unwrap_err();
    assert_matches!(err, GenomeError::Infeasible(_));
}

#[test]
fn transforms_preserve_the_partition() {
    let filled = fill_gaps_with_holders(
        &[GeneRegion::named("a", 8, 10), GeneRegion::named("b", 13, 15)],
        8,
        15,
    );
    assert_eq!(filled.len(), 3);
    assert!(valid_order(&filled, 8, 15));

    let (merged, remap) = merge_holders(&[
        GeneRegion::holder("#h0", 8, 9),
        GeneRegion::holder("#h1", 10, 12),
        GeneRegion::named("b", 13, 15),
    ]);
    assert_eq!(merged.len(), 2);
    assert!(valid_order(&merged, 8, 15));
    assert_eq!(remap.get(&RegionKey::internal("#h1")), Some(&RegionKey::internal("#h0")));

    let inserted = insert_in_holder(&eight_pad_gene(), GeneRegion::named("c", 11, 11), 8, 15).unwrap();
    assert_eq!(inserted.len(), 4);
    assert!(valid_order(&inserted, 8, 15));
}

#[test]
fn insert_outside_a_holder_is_infeasible() {
    let err = insert_in_holder(&eight_pad_gene(), GeneRegion::named("c", 10, 11), 8, 15).unwrap_err();
    assert_matches!(err, GenomeError::Infeasible(_));

    let err = insert_in_holder(&eight_pad_gene(), GeneRegion::named("A", 11, 11), 8, 15).unwrap_err();
    assert_matches!(err, GenomeError::Infeasible(_));
}

#[test]
fn check_order_reports_gaps() {
    let list = vec![GeneRegion::named("a", 8, 10), GeneRegion::named("b", 12, 15)];
    assert_matches!(
        region::check_order("g", &list, 8, 15),
        Err(GenomeError::MalformedRegions { gene, .. }) if gene == "g"
    );
    assert!(valid_order(&[], 8, 15));
}

#[test]
fn overlapping_pads_go_to_the_side_with_more_landings() {
    let overlapping = vec![GeneRegion::named("a", 8, 11), GeneRegion::named("b", 10, 15)];
    let split = |landings: &[(i32, usize)]| {
        let landings: BTreeMap<i32, usize> = landings.iter().copied().collect();
        let fix = region::legacy_io_fixup("n0", &overlapping, 8, 15, &landings);
        assert!(valid_order(&fix.regions, 8, 15));
        assert_eq!(fix.corrections.len(), 1);
        (fix.regions[0].end_pad, fix.regions[1].start_pad)
    };

    assert_eq!(split(&[(9, 2)]), (11, 12));
    assert_eq!(split(&[(13, 1)]), (9, 10));
    assert_eq!(split(&[(9, 1), (13, 1)]), (11, 12));
    assert_eq!(split(&[]), (11, 12));
}
