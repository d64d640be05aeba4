use assert_matches::assert_matches;

use grn_hierarchy::domain::{DynamicKey, GenomeKey, NodeType, Sign, TargetLevel, TimeSelector};
use grn_hierarchy::error::GenomeError;
use grn_hierarchy::items::Activity;
use grn_hierarchy::navigation::{PathStop, StartupView};
use grn_hierarchy::proxy::ProxyProperties;
use grn_hierarchy::region::GeneRegion;
use grn_hierarchy::source::GenomeSource;

struct Fixture {
    source: GenomeSource,
    gene: String,
    node: String,
    link: String,
    top: String,
}

/// Root with one box driving one gene, and a top model holding both.
fn fixture() -> Fixture {
    let mut source = GenomeSource::new("bioTapA", "Full Genome");
    let (gene, _) = source.add_gene("blimp1").unwrap();
    let (node, _) = source.add_node(NodeType::Box, "Wnt8").unwrap();
    let (link, _) = source.add_root_link(&node, &gene, Sign::Positive).unwrap();
    let (top, _) = source.add_genome_instance("Embryo", None).unwrap();
    let (node_inst, _) = source.add_node_to_root_instance(&top, &node).unwrap();
    let (gene_inst, _) = source.add_node_to_root_instance(&top, &gene).unwrap();
    source
        .add_link_to_root_instance(&top, &link, &node_inst, &gene_inst)
        .unwrap();
    Fixture {
        source,
        gene,
        node,
        link,
        top,
    }
}

#[test]
fn root_edits_undo_and_redo_exactly() {
    let Fixture {
        mut source,
        gene,
        node,
        link,
        ..
    } = fixture();
    let before = source.root().clone();

    let mut batch = Vec::new();
    batch.extend(source.change_gene_name(&gene, "Blimp1/Krox").unwrap());
    batch.extend(source.change_gene_evidence(&gene, 3).unwrap());
    batch.extend(source.change_node_size(&node, Some(4)).unwrap());
    batch.extend(source.change_link_sign(&link, Sign::Negative).unwrap());
    batch.extend(source.change_link_target_level(&link, TargetLevel::Weak).unwrap());
    let after = source.root().clone();
    assert_ne!(before, after);

    source.undo_all(&batch).unwrap();
    assert_eq!(source.root(), &before);
    source.redo_all(&batch).unwrap();
    assert_eq!(source.root(), &after);
}

#[test]
fn instance_edits_never_touch_the_root() {
    let Fixture {
        mut source, gene, top, ..
    } = fixture();
    let root_before = source.root().clone();
    let model_before = source.instance(&top).unwrap().clone();
    let gene_inst = format!("{gene}:0");

    let mut batch = Vec::new();
    batch.extend(
        source
            .change_node_activity(&top, &gene_inst, Activity::Variable(0.25))
            .unwrap(),
    );
    batch.extend(source.change_override_name(&top, &gene_inst, Some("blimp1b".to_string())).unwrap());
    batch.extend(source.change_node_description(&top, &gene_inst, Some("late".to_string())).unwrap());

    assert_eq!(source.root(), &root_before);
    source.undo_all(&batch).unwrap();
    assert_eq!(source.instance(&top).unwrap(), &model_before);
}

#[test]
fn deleting_an_instance_node_cascades_down_the_tree() {
    let Fixture {
        mut source,
        gene,
        node,
        link,
        top,
    } = fixture();
    let (child, _) = source.add_genome_instance("Late", Some(&top)).unwrap();
    let node_inst = format!("{node}:0");
    let gene_inst = format!("{gene}:0");
    let link_inst = format!("{link}:0");
    source.propagate_node(&child, &node_inst).unwrap();
    source.propagate_node(&child, &gene_inst).unwrap();
    source.propagate_link(&child, &link_inst).unwrap();
    let top_before = source.instance(&top).unwrap().clone();
    let child_before = source.instance(&child).unwrap().clone();

    let batch = source.delete_instance_node(&top, &gene_inst).unwrap();
    for model in [&top, &child] {
        let model = source.instance(model).unwrap();
        assert!(model.node(&gene_inst).is_none());
        assert!(model.link(&link_inst).is_none());
        assert!(model.node(&node_inst).is_some());
    }

    source.undo_all(&batch).unwrap();
    assert_eq!(source.instance(&top).unwrap(), &top_before);
    assert_eq!(source.instance(&child).unwrap(), &child_before);
}

#[test]
fn deleting_a_root_node_removes_every_trace() {
    let Fixture {
        mut source,
        gene,
        link,
        top,
        ..
    } = fixture();
    let root_before = source.root().clone();
    let model_before = source.instance(&top).unwrap().clone();

    let batch = source.delete_root_node(&gene).unwrap();
    assert!(source.root().gene(&gene).is_none());
    assert!(source.root().link(&link).is_none());
    assert_eq!(source.instance(&top).unwrap().instances_of(&gene).count(), 0);

    source.undo_all(&batch).unwrap();
    assert_eq!(source.root(), &root_before);
    assert_eq!(source.instance(&top).unwrap(), &model_before);
}

#[test]
fn deleting_a_model_takes_its_subtree_and_proxies() {
    let Fixture { mut source, top, .. } = fixture();
    let (child, _) = source.add_genome_instance("Late", Some(&top)).unwrap();
    let (proxy, _) = source
        .add_dynamic_proxy(
            &child,
            ProxyProperties {
                name: "Hourly".to_string(),
                is_single: false,
                min_time: 2,
                max_time: 5,
            },
        )
        .unwrap();

    let batch = source.delete_genome_instance(&top).unwrap();
    assert_eq!(source.instances().count(), 0);
    assert_matches!(source.proxy(&proxy), Err(GenomeError::MissingEntity { .. }));

    source.undo_all(&batch).unwrap();
    let order: Vec<&str> = source.instances().map(|model| model.id.as_str()).collect();
    assert_eq!(order, [top.as_str(), child.as_str()]);
    assert!(source.proxy(&proxy).is_ok());
}

#[test]
fn child_models_inherit_groups_and_lose_them_together() {
    let Fixture {
        mut source, gene, top, ..
    } = fixture();
    let (group, _) = source.add_group(&top, "Endoderm").unwrap();
    source.add_group_member(&top, &group, &format!("{gene}:0")).unwrap();
    let (child, _) = source.add_genome_instance("Late", Some(&top)).unwrap();

    let inherited = format!("{group}:1");
    let copy = source.instance(&child).unwrap().group(&inherited).unwrap();
    assert_eq!(copy.display_name(), "Endoderm");
    assert!(copy.members.is_empty());

    let batch = source.remove_group(&top, &group).unwrap();
    assert!(source.instance(&top).unwrap().group(&group).is_none());
    assert!(source.instance(&child).unwrap().group(&inherited).is_none());

    source.undo_all(&batch).unwrap();
    assert!(source.instance(&child).unwrap().group(&inherited).is_some());
    assert_eq!(source.instance(&top).unwrap().group(&group).unwrap().members.len(), 1);
}

#[test]
fn shrinking_a_gene_moves_instance_landings() {
    let Fixture {
        mut source,
        gene,
        link,
        top,
        ..
    } = fixture();
    source
        .set_gene_regions(
            &gene,
            vec![GeneRegion::holder("#h0", 0, 11), GeneRegion::named("a", 12, 15)],
        )
        .unwrap();
    let link_inst = format!("{link}:0");
    source.change_link_pads(&top, &link_inst, 0, 5).unwrap();
    let root_before = source.root().clone();
    let model_before = source.instance(&top).unwrap().clone();

    let batch = source.change_gene_pad_count(&gene, 10).unwrap();
    assert_eq!(source.root().gene(&gene).unwrap().pad_count, 10);
    assert_eq!(source.instance(&top).unwrap().link(&link_inst).unwrap().landing_pad, 6);
    assert_eq!(source.root().link(&link).unwrap().landing_pad, 15);

    let shrunk = source.root().clone();
    let err = source.change_gene_pad_count(&gene, 3).unwrap_err();
    assert_matches!(err, GenomeError::Infeasible(_));
    assert_eq!(source.root(), &shrunk);

    source.undo_all(&batch).unwrap();
    assert_eq!(source.root(), &root_before);
    assert_eq!(source.instance(&top).unwrap(), &model_before);
}

#[test]
fn landing_pads_stay_on_the_gene() {
    let Fixture {
        mut source, link, top, ..
    } = fixture();
    let err = source
        .change_link_pads(&top, &format!("{link}:0"), 0, 16)
        .unwrap_err();
    assert_matches!(err, GenomeError::Precondition(_));
}

#[test]
fn retyping_a_gene_moves_its_instances() {
    let Fixture {
        mut source, gene, top, ..
    } = fixture();
    let batch = source.change_node_type(&gene, NodeType::Bubble).unwrap();
    assert!(!source.root().is_gene(&gene));
    assert!(!source.instance(&top).unwrap().is_gene(&format!("{gene}:0")));

    source.undo_all(&batch).unwrap();
    assert!(source.root().is_gene(&gene));
    assert!(source.instance(&top).unwrap().is_gene(&format!("{gene}:0")));
}

#[test]
fn importer_labels_cannot_collide() {
    let Fixture { mut source, top, .. } = fixture();
    let err = source
        .add_genome_instance_existing_label(&top, "Again", None)
        .unwrap_err();
    assert_matches!(err, GenomeError::DuplicateId { .. });

    let key = source.next_genome_key();
    assert_ne!(key, top);
    source.add_genome_instance_existing_label(&key, "Imported", None).unwrap();
    assert_eq!(source.instance(&key).unwrap().name(), "Imported");
}

#[test]
fn narrowing_proxy_hours_drops_references_to_lost_hours() {
    let Fixture { mut source, top, .. } = fixture();
    let wide = ProxyProperties {
        name: "Hourly".to_string(),
        is_single: false,
        min_time: 2,
        max_time: 5,
    };
    let (proxy, _) = source.add_dynamic_proxy(&top, wide.clone()).unwrap();
    source
        .set_proxy_image(&proxy, TimeSelector::Hour(3), Some("img-3".to_string()))
        .unwrap();
    source
        .set_proxy_image(&proxy, TimeSelector::Hour(5), Some("img-5".to_string()))
        .unwrap();
    let stop = |hour: i32| PathStop::model(GenomeKey::Dynamic(DynamicKey::new(&proxy, TimeSelector::Hour(hour))));
    let (path, _) = source.add_tree_path("Tour", vec![stop(3), stop(5)]).unwrap();
    source
        .set_startup_view(StartupView {
            model: Some(stop(5).model),
            overlay: None,
        })
        .unwrap();
    let navigation = source.navigation().clone();

    let records = source
        .change_proxy_properties(
            &proxy,
            ProxyProperties {
                max_time: 4,
                ..wide
            },
        )
        .unwrap();
    let narrowed = source.proxy(&proxy).unwrap();
    assert_eq!(narrowed.max_time(), 4);
    assert_eq!(narrowed.image(TimeSelector::Hour(3)), Some("img-3"));
    assert_eq!(narrowed.image(TimeSelector::Hour(5)), None);
    assert_eq!(source.images().usage_count("img-3"), 1);
    assert_eq!(source.images().usage_count("img-5"), 0);
    assert_eq!(source.navigation().path(&path).unwrap().stops, vec![stop(3)]);
    assert_eq!(source.navigation().startup_view(), &StartupView::default());

    source.undo_all(&records).unwrap();
    let restored = source.proxy(&proxy).unwrap();
    assert_eq!(restored.max_time(), 5);
    assert_eq!(restored.image(TimeSelector::Hour(5)), Some("img-5"));
    assert_eq!(source.images().usage_count("img-5"), 1);
    assert_eq!(source.navigation(), &navigation);
}

#[test]
fn activating_a_subgroup_adds_and_selects_it_together() {
    let Fixture { mut source, top, .. } = fixture();
    let (endoderm, _) = source.add_group(&top, "Endoderm").unwrap();
    let (foregut, _) = source.add_subgroup(&top, &endoderm, "Foregut").unwrap();
    let (child, _) = source.add_genome_instance("Late", Some(&top)).unwrap();
    source.include_parent_group(&child, &endoderm).unwrap();
    let parent_group = format!("{endoderm}:1");
    let subset = format!("{foregut}:1");
    let before = source.instance(&child).unwrap().clone();

    let records = source.activate_subgroup(&child, &parent_group, &foregut).unwrap();
    assert_eq!(records.len(), 2);
    let model = source.instance(&child).unwrap();
    let added = model.group(&subset).unwrap();
    assert_eq!(added.parent.as_deref(), Some(parent_group.as_str()));
    assert_eq!(added.display_name(), "Foregut");
    assert_eq!(model.group(&parent_group).unwrap().active_subset.as_deref(), Some(subset.as_str()));

    source.undo_all(&records).unwrap();
    assert_eq!(source.instance(&child).unwrap(), &before);
    source.redo_all(&records).unwrap();
    assert!(source.instance(&child).unwrap().group(&subset).is_some());

    let settled = source.instance(&child).unwrap().clone();
    let err = source.activate_subgroup(&child, "grp99:1", &foregut).unwrap_err();
    assert_matches!(err, GenomeError::MissingEntity { .. });
    assert_eq!(source.instance(&child).unwrap(), &settled);
}
