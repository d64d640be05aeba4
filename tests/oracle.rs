use assert_matches::assert_matches;

use grn_hierarchy::domain::{GenomeKey, NodeType, Sign, TimeSelector};
use grn_hierarchy::error::GenomeError;
use grn_hierarchy::oracle::ModuleLinkStatus;
use grn_hierarchy::overlay::{NetModule, NetworkOverlay, OverlayOwner};
use grn_hierarchy::proxy::ProxyProperties;
use grn_hierarchy::region::GeneRegion;
use grn_hierarchy::source::GenomeSource;

struct Fixture {
    source: GenomeSource,
    gene: String,
    node: String,
    link: String,
    top: String,
    child: String,
}

/// Box driving a gene, placed in a top model and copied into one child.
fn fixture() -> Fixture {
    let mut source = GenomeSource::new("bioTapA", "Full Genome");
    let (gene, _) = source.add_gene("gataE").unwrap();
    let (node, _) = source.add_node(NodeType::Box, "Delta").unwrap();
    let (link, _) = source.add_root_link(&node, &gene, Sign::Positive).unwrap();
    let (top, _) = source.add_genome_instance("Embryo", None).unwrap();
    let (node_inst, _) = source.add_node_to_root_instance(&top, &node).unwrap();
    let (gene_inst, _) = source.add_node_to_root_instance(&top, &gene).unwrap();
    let (link_inst, _) = source
        .add_link_to_root_instance(&top, &link, &node_inst, &gene_inst)
        .unwrap();
    let (child, _) = source.add_genome_instance("Mesoderm", Some(&top)).unwrap();
    source.propagate_node(&child, &node_inst).unwrap();
    source.propagate_node(&child, &gene_inst).unwrap();
    source.propagate_link(&child, &link_inst).unwrap();
    Fixture {
        source,
        gene,
        node,
        link,
        top,
        child,
    }
}

#[test]
fn models_come_root_first_with_dynamic_models_after_their_parent() {
    let Fixture {
        mut source,
        top,
        child,
        ..
    } = fixture();
    let (proxy, _) = source
        .add_dynamic_proxy(
            &top,
            ProxyProperties {
                name: "Summary".to_string(),
                is_single: true,
                min_time: 10,
                max_time: 20,
            },
        )
        .unwrap();

    let ordered = source.oracle().ordered_models();
    assert_eq!(ordered.len(), 4);
    assert_eq!(ordered[0], GenomeKey::Root("bioTapA".to_string()));
    assert_eq!(ordered[1], GenomeKey::Instance(top.clone()));
    assert_matches!(&ordered[2], GenomeKey::Dynamic(key) if key.proxy_id == proxy && key.time == TimeSelector::All);
    assert_eq!(ordered[3], GenomeKey::Instance(child.clone()));

    let bottom_up = source.oracle().ordered_models_bottom_up();
    assert_eq!(bottom_up.first(), Some(&GenomeKey::Instance(child)));
    assert_eq!(bottom_up.last(), Some(&GenomeKey::Root("bioTapA".to_string())));
}

#[test]
fn overall_pad_needs_cover_every_model() {
    let Fixture {
        mut source,
        gene,
        node,
        link,
        top,
        child,
    } = fixture();
    source.change_link_pads(&top, &format!("{link}:0"), 3, 5).unwrap();

    let oracle = source.oracle();
    let launch = oracle.node_pad_requirements(&node).unwrap();
    let landing = oracle.node_pad_requirements(&gene).unwrap();
    for key in oracle.ordered_models() {
        let local = oracle.model_node_pad_requirements(&key, &node).unwrap();
        assert!(launch.launch >= local.launch, "{key}");
        let local = oracle.model_node_pad_requirements(&key, &gene).unwrap();
        assert!(landing.landing >= local.landing, "{key}");
    }
    assert_eq!(launch.launch, 4);
    assert_eq!(landing.landing, 11);

    let in_child = oracle
        .model_node_pad_requirements(&GenomeKey::Instance(child), &node)
        .unwrap();
    assert_eq!(in_child.launch, 1);
}

#[test]
fn module_members_report_their_pad_needs() {
    let Fixture {
        mut source,
        node,
        link,
        top,
        ..
    } = fixture();
    source.change_link_pads(&top, &format!("{link}:0"), 2, 15).unwrap();
    let owner = OverlayOwner::Instance(top.clone());
    let overlay_id = source.next_overlay_label();
    source
        .edit_overlays(&owner, |support| {
            let mut changes = vec![support.add_overlay(NetworkOverlay::new(&overlay_id, "Kernel"))?];
            changes.push(support.add_module(&overlay_id, NetModule::new("m0", "Founders"))?);
            changes.push(support.add_module_member(&overlay_id, "m0", &format!("{node}:0"))?);
            Ok(changes)
        })
        .unwrap();

    let needs = source.oracle().global_net_module_link_pad_needs().unwrap();
    assert_eq!(needs.len(), 1);
    assert_eq!(needs[&node].launch, 3);
}

#[test]
fn genes_without_modules_only_see_non_module_links() {
    let Fixture {
        mut source,
        gene,
        link,
        top,
        ..
    } = fixture();
    source.change_link_pads(&top, &format!("{link}:0"), 0, 5).unwrap();
    assert_eq!(source.root().gene(&gene).unwrap().num_regions(), 0);

    let analysis = source.oracle().analyze_links_into_modules(&gene).unwrap();
    assert_eq!(analysis.canonical[&link].status, ModuleLinkStatus::NonModule);
    assert_eq!(analysis.instances.len(), 2);
    assert!(
        analysis
            .instances
            .iter()
            .all(|landing| landing.status == ModuleLinkStatus::NonModule)
    );
    assert_eq!(analysis.drifted().count(), 0);
}

#[test]
fn instance_landings_are_classified_against_the_root_link() {
    let Fixture {
        mut source,
        gene,
        link,
        top,
        child,
        ..
    } = fixture();
    source
        .set_gene_regions(
            &gene,
            vec![
                GeneRegion::holder("#h0", 0, 7),
                GeneRegion::named("b", 8, 11),
                GeneRegion::named("a", 12, 15),
            ],
        )
        .unwrap();
    let link_inst = format!("{link}:0");
    source.change_link_pads(&top, &link_inst, 0, 14).unwrap();
    source.change_link_pads(&child, &link_inst, 0, 9).unwrap();

    let analysis = source.oracle().analyze_links_into_modules(&gene).unwrap();
    let root = &analysis.canonical[&link];
    assert_eq!(root.status, ModuleLinkStatus::Consistent);
    assert_eq!(root.region.as_deref(), Some("a"));

    let status_in = |model: &str| {
        analysis
            .instances
            .iter()
            .find(|landing| landing.model_id == model)
            .map(|landing| landing.status)
            .unwrap()
    };
    assert_eq!(status_in(&top), ModuleLinkStatus::Consistent);
    assert_eq!(status_in(&child), ModuleLinkStatus::Tresspass);

    source.change_link_pads(&child, &link_inst, 0, 3).unwrap();
    let analysis = source.oracle().analyze_links_into_modules(&gene).unwrap();
    let drifted: Vec<_> = analysis.drifted().collect();
    assert_eq!(drifted.len(), 1);
    assert_eq!(drifted[0].status, ModuleLinkStatus::Orphaned);
}

#[test]
fn duplicate_gene_names_are_refused() {
    let Fixture {
        mut source, gene, top, ..
    } = fixture();
    let (other, _) = source.add_gene("Brachyury").unwrap();

    let oracle = source.oracle();
    assert!(oracle.matches_existing_gene_name("brachy ury", Some(&gene)));
    assert!(!oracle.matches_existing_gene_name("gataE", Some(&gene)));
    assert!(oracle.matches_existing_gene_name("GATAE", None));
    assert!(!oracle.matches_existing_node_name("  ", None));

    let err = source.change_gene_name(&gene, "BRACHYURY").unwrap_err();
    assert_matches!(err, GenomeError::Infeasible(_));
    source.change_gene_name(&gene, "gataE").unwrap();
    assert_matches!(source.add_gene("Delta"), Err(GenomeError::Infeasible(_)));

    let err = source
        .change_override_name(&top, &format!("{gene}:0"), Some("brachyury".to_string()))
        .unwrap_err();
    assert_matches!(err, GenomeError::Infeasible(_));
    source
        .change_override_name(&top, &format!("{gene}:0"), Some("gata-e".to_string()))
        .unwrap();
    source.change_gene_name(&other, "Bra").unwrap();
    assert!(source.oracle().name_collisions().is_empty());
}

#[test]
fn greek_letters_fold_into_their_names() {
    let Fixture { mut source, .. } = fixture();
    source.add_gene("β-catenin").unwrap();
    assert!(source.oracle().matches_existing_gene_or_node_name("Beta-Catenin", None));
}
