use std::cell::Cell;
use std::rc::Rc;

use assert_matches::assert_matches;

use grn_hierarchy::domain::{DynamicKey, GroupMode, NodeType, Sign, TimeSelector};
use grn_hierarchy::dynamic::{DerivationContext, DynamicGenomeInstance};
use grn_hierarchy::error::GenomeError;
use grn_hierarchy::expression::{
    ExpressionLevel, RegionAndRange, TemporalInputRangeData, TimeCourseData, TimeCourseSource,
};
use grn_hierarchy::items::{Activity, NodeInstance};
use grn_hierarchy::proxy::ProxyProperties;
use grn_hierarchy::source::{GenomeSource, SourceSettings};

/// Wraps real data and counts every expression lookup.
struct CountingTimeCourse {
    inner: TimeCourseData,
    calls: Cell<usize>,
}

impl TimeCourseSource for CountingTimeCourse {
    fn expression(&self, base_id: &str, region: &str, time: i32) -> ExpressionLevel {
        self.calls.set(self.calls.get() + 1);
        self.inner.expression(base_id, region, time)
    }

    fn weak_level(&self) -> f64 {
        self.inner.weak_level()
    }

    fn simulation_level(&self, sim_key: &str, base_id: &str, region: &str, time: i32) -> Option<f64> {
        self.inner.simulation_level(sim_key, base_id, region, time)
    }
}

struct Fixture {
    source: GenomeSource,
    gene: String,
    node: String,
    group: String,
    top: String,
    proxy: String,
    gene_inst: String,
    node_inst: String,
    link_inst: String,
}

fn expression_data(gene: &str, node: &str) -> TimeCourseData {
    let mut data = TimeCourseData::default();
    data.set_expression(gene, "Endoderm", 3, ExpressionLevel::Expressed);
    data.set_expression(gene, "Endoderm", 4, ExpressionLevel::WeakExpression);
    data.set_expression(gene, "Endoderm", 5, ExpressionLevel::NotExpressed);
    for hour in 2..=5 {
        data.set_expression(node, "Endoderm", hour, ExpressionLevel::Expressed);
    }
    data
}

/// One region holding a box that drives a gene, watched hourly from 2 to 5.
fn fixture(is_single: bool) -> Fixture {
    let mut source = GenomeSource::new("bioTapA", "Full Genome");
    let (gene, _) = source.add_gene("foxa").unwrap();
    let (node, _) = source.add_node(NodeType::Box, "Otx").unwrap();
    let (link, _) = source.add_root_link(&node, &gene, Sign::Positive).unwrap();
    let (top, _) = source.add_genome_instance("Embryo", None).unwrap();
    let (node_inst, _) = source.add_node_to_root_instance(&top, &node).unwrap();
    let (gene_inst, _) = source.add_node_to_root_instance(&top, &gene).unwrap();
    let (link_inst, _) = source
        .add_link_to_root_instance(&top, &link, &node_inst, &gene_inst)
        .unwrap();
    let (group, _) = source.add_group(&top, "Endoderm").unwrap();
    source.add_group_member(&top, &group, &node_inst).unwrap();
    source.add_group_member(&top, &group, &gene_inst).unwrap();
    let (proxy, _) = source
        .add_dynamic_proxy(
            &top,
            ProxyProperties {
                name: "Endoderm over time".to_string(),
                is_single,
                min_time: 2,
                max_time: 5,
            },
        )
        .unwrap();
    source.set_time_course(expression_data(&gene, &node));
    Fixture {
        source,
        gene,
        node,
        group,
        top,
        proxy,
        gene_inst,
        node_inst,
        link_inst,
    }
}

#[test]
fn hourly_proxy_exposes_one_key_per_hour() {
    let Fixture { source, proxy, .. } = fixture(false);
    let keys = source.dynamic_keys();
    assert_eq!(keys.len(), 4);
    let hours: Vec<Option<i32>> = keys
        .iter()
        .map(|key| DynamicKey::extract_time(&key.to_string()))
        .collect();
    assert_eq!(hours, [Some(2), Some(3), Some(4), Some(5)]);
    assert!(keys.iter().all(|key| key.proxy_id == proxy));

    let outside = DynamicKey::new(&proxy, TimeSelector::Hour(9));
    assert_matches!(source.dynamic_instance(&outside), Err(GenomeError::InvalidKey(_)));
}

#[test]
fn hourly_models_follow_expression() {
    let Fixture {
        source,
        proxy,
        gene_inst,
        node_inst,
        link_inst,
        ..
    } = fixture(false);

    let expressed = source
        .dynamic_instance(&DynamicKey::new(&proxy, TimeSelector::Hour(3)))
        .unwrap();
    assert_eq!(expressed.node(&gene_inst).unwrap().unwrap().activity, Activity::Active);
    assert!(expressed.link(&link_inst).unwrap().is_some());
    assert_eq!(
        expressed.group_for_node(&gene_inst).unwrap().unwrap().display_name(),
        "Endoderm"
    );

    let weak = source
        .dynamic_instance(&DynamicKey::new(&proxy, TimeSelector::Hour(4)))
        .unwrap();
    assert_eq!(weak.node(&gene_inst).unwrap().unwrap().activity, Activity::Variable(0.5));

    let silent = source
        .dynamic_instance(&DynamicKey::new(&proxy, TimeSelector::Hour(2)))
        .unwrap();
    assert!(silent.node(&gene_inst).unwrap().is_none());
    assert!(silent.node(&node_inst).unwrap().is_some());
    assert!(silent.link(&link_inst).unwrap().is_none());
}

#[test]
fn summary_model_takes_the_strongest_hour() {
    let Fixture {
        source,
        proxy,
        gene_inst,
        ..
    } = fixture(true);
    let keys = source.dynamic_keys();
    assert_eq!(keys, [DynamicKey::new(&proxy, TimeSelector::All)]);
    assert_eq!(DynamicKey::extract_time(&keys[0].to_string()), None);

    let all = source.dynamic_instance(&keys[0]).unwrap();
    assert_eq!(all.node(&gene_inst).unwrap().unwrap().activity, Activity::Active);
    let bounds = all.model().unwrap().time_bounds().unwrap();
    assert_eq!((bounds.min_time, bounds.max_time), (2, 5));
}

#[test]
fn derivation_runs_once_per_materialization() {
    let Fixture {
        mut source,
        top,
        proxy,
        ..
    } = fixture(false);
    let data = CountingTimeCourse {
        inner: source.time_course().clone(),
        calls: Cell::new(0),
    };
    let temporal = TemporalInputRangeData::default();
    let ctx = DerivationContext {
        root: source.root(),
        parent: source.instance(&top).unwrap(),
        proxy: source.proxy(&proxy).unwrap(),
        time_course: &data,
        temporal: &temporal,
        group_mode: GroupMode::default(),
        sim_key: None,
    };

    let model = DynamicGenomeInstance::new(DynamicKey::new(&proxy, TimeSelector::Hour(3)));
    assert!(!model.is_initialized());
    let first = model.initialize(&ctx).unwrap().clone();
    let lookups = data.calls.get();
    assert!(lookups > 0);
    let second = model.initialize(&ctx).unwrap();
    assert_eq!(data.calls.get(), lookups);
    assert_eq!(&first, second);

    let key = DynamicKey::new(&proxy, TimeSelector::Hour(3));
    let a = source.dynamic_instance(&key).unwrap();
    let b = source.dynamic_instance(&key).unwrap();
    assert!(Rc::ptr_eq(a.instance(), b.instance()));
    a.model().unwrap();
    assert!(b.instance().is_initialized());
    assert_eq!(source.proxy(&proxy).unwrap().cached_count(), 1);
    drop((a, b));

    source.edit_time_course(|data| data.weak_level = 0.25);
    assert_eq!(source.proxy(&proxy).unwrap().cached_count(), 0);
}

#[test]
fn dynamic_models_are_read_only() {
    let Fixture { source, proxy, .. } = fixture(false);
    let view = source
        .dynamic_instance(&DynamicKey::new(&proxy, TimeSelector::Hour(3)))
        .unwrap();
    let err = view.instance().add_node(NodeInstance::new("n9:0")).unwrap_err();
    assert_matches!(err, GenomeError::UnsupportedOnVariant { .. });
    assert_matches!(
        view.instance().remove_linkage("n2:0"),
        Err(GenomeError::UnsupportedOnVariant { .. })
    );
}

fn window(min_time: i32, max_time: i32) -> RegionAndRange {
    RegionAndRange {
        region: None,
        restricted_source: None,
        min_time,
        max_time,
        sign: None,
    }
}

fn hourly(min_time: i32, max_time: i32) -> ProxyProperties {
    ProxyProperties {
        name: "Hourly".to_string(),
        is_single: false,
        min_time,
        max_time,
    }
}

#[test]
fn input_windows_gate_links() {
    let Fixture {
        mut source,
        gene,
        node,
        proxy,
        gene_inst,
        link_inst,
        ..
    } = fixture(false);
    let mut ranges = TemporalInputRangeData::default();
    ranges.add_range(&gene, &node, window(4, 5));
    source.set_temporal_ranges(ranges);

    let closed = source
        .dynamic_instance(&DynamicKey::new(&proxy, TimeSelector::Hour(3)))
        .unwrap();
    assert!(closed.node(&gene_inst).unwrap().is_some());
    assert!(closed.link(&link_inst).unwrap().is_none());

    let open = source
        .dynamic_instance(&DynamicKey::new(&proxy, TimeSelector::Hour(4)))
        .unwrap();
    assert!(open.link(&link_inst).unwrap().is_some());
}

#[test]
fn open_windows_install_added_inputs_as_inactive() {
    let Fixture {
        mut source,
        gene,
        node,
        group,
        top,
        proxy,
        gene_inst,
        ..
    } = fixture(false);
    let (sox, _) = source.add_node(NodeType::Box, "Sox").unwrap();
    let (sox_link, _) = source.add_root_link(&sox, &gene, Sign::Positive).unwrap();
    let (sox_inst, _) = source.add_node_to_root_instance(&top, &sox).unwrap();
    let (sox_link_inst, _) = source
        .add_link_to_root_instance(&top, &sox_link, &sox_inst, &gene_inst)
        .unwrap();
    source
        .add_proxy_added_node(&proxy, &sox_inst, &format!("{group}:1"))
        .unwrap();
    let mut ranges = TemporalInputRangeData::default();
    ranges.add_range(&gene, &node, window(2, 5));
    ranges.add_range(&gene, &sox, window(3, 3));
    source.set_temporal_ranges(ranges);

    let open = source
        .dynamic_instance(&DynamicKey::new(&proxy, TimeSelector::Hour(3)))
        .unwrap();
    assert_eq!(open.node(&sox_inst).unwrap().unwrap().activity, Activity::Inactive);
    assert!(open.link(&sox_link_inst).unwrap().is_some());
    assert_eq!(
        open.group_for_node(&sox_inst).unwrap().unwrap().display_name(),
        "Endoderm"
    );

    let shut = source
        .dynamic_instance(&DynamicKey::new(&proxy, TimeSelector::Hour(4)))
        .unwrap();
    assert!(shut.node(&sox_inst).unwrap().is_none());
    assert!(shut.link(&sox_link_inst).unwrap().is_none());
}

#[test]
fn simulation_runs_keep_every_link_and_record_drift() {
    let Fixture {
        mut source,
        gene,
        node,
        proxy,
        gene_inst,
        node_inst,
        link_inst,
        ..
    } = fixture(false);
    let mut ranges = TemporalInputRangeData::default();
    ranges.add_range(&gene, &node, window(8, 9));
    source.set_temporal_ranges(ranges);
    source.edit_time_course(|data| {
        data.set_simulation_level("run1", &gene, "Endoderm", 3, 0.25);
        data.set_simulation_level("run1", &node, "Endoderm", 3, 0.5);
    });
    let key = DynamicKey::new(&proxy, TimeSelector::Hour(3));
    assert!(source.dynamic_instance(&key).unwrap().link(&link_inst).unwrap().is_none());

    source.set_settings(SourceSettings {
        group_mode: GroupMode::default(),
        sim_key: Some("run1".to_string()),
    });
    let view = source.dynamic_instance(&key).unwrap();
    assert_eq!(view.node(&gene_inst).unwrap().unwrap().sim_level, Some(0.75));
    assert_eq!(view.node(&node_inst).unwrap().unwrap().sim_level, Some(0.5));
    let link = view.link(&link_inst).unwrap().unwrap();
    assert_eq!(link.sim_diff, Some(0.5));
}

#[test]
fn simulation_drift_scans_every_hour_of_a_summary_model() {
    let Fixture {
        mut source,
        gene,
        proxy,
        gene_inst,
        ..
    } = fixture(true);
    source.edit_time_course(|data| {
        data.set_simulation_level("run1", &gene, "Endoderm", 3, 1.0);
        data.set_simulation_level("run1", &gene, "Endoderm", 5, 0.625);
    });
    source.set_settings(SourceSettings {
        group_mode: GroupMode::default(),
        sim_key: Some("run1".to_string()),
    });

    let all = source
        .dynamic_instance(&DynamicKey::new(&proxy, TimeSelector::All))
        .unwrap();
    let expressed = all.node(&gene_inst).unwrap().unwrap();
    assert_eq!(expressed.activity, Activity::Active);
    assert_eq!(expressed.sim_level, Some(0.625));
}

#[test]
fn groups_added_after_the_proxy_reach_its_models() {
    let mut source = GenomeSource::new("bioTapA", "Full Genome");
    let (gene, _) = source.add_gene("foxa").unwrap();
    let (top, _) = source.add_genome_instance("Embryo", None).unwrap();
    let (gene_inst, _) = source.add_node_to_root_instance(&top, &gene).unwrap();
    let (proxy, _) = source.add_dynamic_proxy(&top, hourly(2, 5)).unwrap();
    let mut data = TimeCourseData::default();
    data.set_expression(&gene, "Endoderm", 2, ExpressionLevel::Expressed);
    source.set_time_course(data);
    let key = DynamicKey::new(&proxy, TimeSelector::Hour(2));
    assert!(source.dynamic_instance(&key).unwrap().node(&gene_inst).unwrap().is_none());

    let (group, records) = source.add_group(&top, "Endoderm").unwrap();
    assert_eq!(records.len(), 2);
    assert!(source.proxy(&proxy).unwrap().group(&format!("{group}:1")).is_some());
    source.add_group_member(&top, &group, &gene_inst).unwrap();

    let view = source.dynamic_instance(&key).unwrap();
    assert!(view.node(&gene_inst).unwrap().is_some());
    assert_eq!(
        view.group_for_node(&gene_inst).unwrap().unwrap().display_name(),
        "Endoderm"
    );
}

#[test]
fn renaming_a_group_renames_its_inherited_copies() {
    let mut source = GenomeSource::new("bioTapA", "Full Genome");
    let (gene, _) = source.add_gene("foxa").unwrap();
    let (top, _) = source.add_genome_instance("Embryo", None).unwrap();
    let (gene_inst, _) = source.add_node_to_root_instance(&top, &gene).unwrap();
    let (group, _) = source.add_group(&top, "Endo").unwrap();
    source.add_group_member(&top, &group, &gene_inst).unwrap();
    let (child, _) = source.add_genome_instance("Late", Some(&top)).unwrap();
    source.include_parent_group(&child, &group).unwrap();
    let (proxy, _) = source.add_dynamic_proxy(&top, hourly(2, 5)).unwrap();
    let mut data = TimeCourseData::default();
    data.set_expression(&gene, "Endoderm", 2, ExpressionLevel::Expressed);
    source.set_time_course(data);
    let key = DynamicKey::new(&proxy, TimeSelector::Hour(2));
    assert!(source.dynamic_instance(&key).unwrap().node(&gene_inst).unwrap().is_none());

    let records = source.rename_group(&top, &group, "Endoderm").unwrap();
    assert_eq!(records.len(), 3);
    let inherited = format!("{group}:1");
    assert_eq!(
        source.instance(&child).unwrap().group(&inherited).unwrap().display_name(),
        "Endoderm"
    );
    {
        let view = source.dynamic_instance(&key).unwrap();
        assert!(view.node(&gene_inst).unwrap().is_some());
        assert_eq!(
            view.group_for_node(&gene_inst).unwrap().unwrap().display_name(),
            "Endoderm"
        );
    }

    source.undo_all(&records).unwrap();
    assert_eq!(
        source.proxy(&proxy).unwrap().group(&inherited).unwrap().display_name(),
        "Endo"
    );
    assert!(source.dynamic_instance(&key).unwrap().node(&gene_inst).unwrap().is_none());
}
