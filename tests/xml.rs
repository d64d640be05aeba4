use assert_matches::assert_matches;
use tempfile::tempdir;

use grn_hierarchy::domain::{DynamicKey, NodeType, Sign, TimeSelector};
use grn_hierarchy::error::GenomeError;
use grn_hierarchy::expression::{ExpressionLevel, TimeCourseData, TimeCourseSource};
use grn_hierarchy::items::Activity;
use grn_hierarchy::proxy::ProxyProperties;
use grn_hierarchy::region::GeneRegion;
use grn_hierarchy::source::GenomeSource;
use grn_hierarchy::xml;

struct Saved {
    source: GenomeSource,
    gene: String,
    link: String,
    top: String,
    child: String,
    proxy: String,
}

fn hierarchy() -> Saved {
    let mut source = GenomeSource::new("bioTapA", "Full Genome");
    let (gene, _) = source.add_gene("hox11/13b").unwrap();
    let (node, _) = source.add_node(NodeType::Bubble, "Notch").unwrap();
    let (link, _) = source.add_root_link(&node, &gene, Sign::Negative).unwrap();
    source
        .set_gene_regions(&gene, vec![GeneRegion::holder("#h0", 0, 11), GeneRegion::named("A", 12, 15)])
        .unwrap();

    let (top, _) = source.add_genome_instance("Embryo", None).unwrap();
    let (node_inst, _) = source.add_node_to_root_instance(&top, &node).unwrap();
    let (gene_inst, _) = source.add_node_to_root_instance(&top, &gene).unwrap();
    let (link_inst, _) = source
        .add_link_to_root_instance(&top, &link, &node_inst, &gene_inst)
        .unwrap();
    source.change_link_pads(&top, &link_inst, 1, 13).unwrap();
    source
        .change_node_activity(&top, &gene_inst, Activity::Variable(0.75))
        .unwrap();
    let (group, _) = source.add_group(&top, "Veg2").unwrap();
    source.add_group_member(&top, &group, &gene_inst).unwrap();

    let (child, _) = source.add_genome_instance("Late", Some(&top)).unwrap();
    source.propagate_node(&child, &gene_inst).unwrap();
    source.add_instance_note(&child, "caveat", "inferred from <in situ> data").unwrap();

    let (proxy, _) = source
        .add_dynamic_proxy(
            &top,
            ProxyProperties {
                name: "Hourly".to_string(),
                is_single: false,
                min_time: 6,
                max_time: 9,
            },
        )
        .unwrap();
    source
        .set_proxy_image(&proxy, TimeSelector::Hour(7), Some("img-7".to_string()))
        .unwrap();

    let mut data = TimeCourseData::default();
    data.set_expression(&gene, "Veg2", 7, ExpressionLevel::Expressed);
    data.set_expression(&gene, "Veg2", 8, ExpressionLevel::Variable(0.3));
    source.set_time_course(data);

    Saved {
        source,
        gene,
        link,
        top,
        child,
        proxy,
    }
}

fn assert_same_hierarchy(saved: &Saved, loaded: &GenomeSource) {
    let original = &saved.source;
    assert_eq!(loaded.root().id, "bioTapA");
    let gene = loaded.root().gene(&saved.gene).unwrap();
    assert_eq!(gene.name, "hox11/13b");
    assert_eq!(gene.regions, original.root().gene(&saved.gene).unwrap().regions);
    assert_eq!(loaded.root().link(&saved.link).unwrap().sign, Sign::Negative);

    let order: Vec<&str> = loaded.instances().map(|model| model.id.as_str()).collect();
    assert_eq!(order, [saved.top.as_str(), saved.child.as_str()]);
    let top = loaded.instance(&saved.top).unwrap();
    assert_eq!(top.store(), original.instance(&saved.top).unwrap().store());
    assert_eq!(top.group_map(), original.instance(&saved.top).unwrap().group_map());
    let child = loaded.instance(&saved.child).unwrap();
    assert_eq!(child.generation(), 1);
    assert_eq!(child.vfg_parent(), Some(saved.top.as_str()));
    assert_eq!(
        child.store().notes().next().unwrap().text,
        "inferred from <in situ> data"
    );

    let proxy = loaded.proxy(&saved.proxy).unwrap();
    assert_eq!(proxy.properties(), original.proxy(&saved.proxy).unwrap().properties());
    assert_eq!(proxy.image(TimeSelector::Hour(7)), Some("img-7"));
    assert_eq!(
        loaded.time_course().expression(&saved.gene, "Veg2", 8),
        ExpressionLevel::Variable(0.3)
    );
}

#[test]
fn plain_file_round_trip() {
    let saved = hierarchy();
    let dir = tempdir().unwrap();
    let path = dir.path().join("hierarchy.xml");

    xml::write_hierarchy(&saved.source, &path).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("<hierarchy"));

    let (loaded, legacy) = xml::read_hierarchy(&path).unwrap();
    assert!(legacy.is_empty());
    assert_same_hierarchy(&saved, &loaded);
}

#[test]
fn gzip_round_trip_keeps_dynamic_models_derivable() {
    let saved = hierarchy();
    let dir = tempdir().unwrap();
    let path = dir.path().join("hierarchy.xml.gz");

    xml::write_hierarchy(&saved.source, &path).unwrap();
    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[..2], &[0x1f, 0x8b]);

    let (loaded, _) = xml::read_hierarchy(&path).unwrap();
    assert_same_hierarchy(&saved, &loaded);
    let view = loaded
        .dynamic_instance(&DynamicKey::new(&saved.proxy, TimeSelector::Hour(7)))
        .unwrap();
    assert_eq!(view.genes().unwrap().len(), 1);
}

#[test]
fn saving_twice_gives_the_same_document() {
    let saved = hierarchy();
    let first = xml::to_xml_string(&saved.source).unwrap();
    let reloaded = xml::parse_hierarchy(&first).unwrap();
    assert_eq!(xml::to_xml_string(&reloaded).unwrap(), first);
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempdir().unwrap();
    let err = xml::read_hierarchy(&dir.path().join("absent.xml")).unwrap_err();
    assert_matches!(err, GenomeError::Io { .. });
}

#[test]
fn garbage_is_an_xml_error() {
    assert_matches!(xml::parse_hierarchy("<hierarchy><genome"), Err(GenomeError::Xml(_)));
}

#[test]
fn overlapping_regions_are_repaired_on_load() {
    let saved = hierarchy();
    let text = xml::to_xml_string(&saved.source).unwrap();
    assert_eq!(text.matches(r#"startPad="12""#).count(), 1);
    let broken = text.replace(r#"startPad="12""#, r#"startPad="10""#);

    let as_written = xml::parse_hierarchy(&broken).unwrap();
    let overlapping = &as_written.root().gene(&saved.gene).unwrap().regions;
    assert_eq!(overlapping[1].start_pad, 10);

    let dir = tempdir().unwrap();
    let path = dir.path().join("old.xml");
    std::fs::write(&path, &broken).unwrap();
    let (loaded, legacy) = xml::read_hierarchy(&path).unwrap();
    assert_eq!(legacy.corrections.len(), 1);
    assert!(legacy.corrections[0].contains("pads 10..11"));
    // the landing at pad 13 pulls the contested pads into "A"
    assert_eq!(
        loaded.root().gene(&saved.gene).unwrap().regions,
        vec![GeneRegion::holder("#h0", 0, 9), GeneRegion::named("A", 10, 15)]
    );

    let untouched = xml::read_hierarchy_as_written(&path).unwrap();
    assert_eq!(untouched.root().gene(&saved.gene).unwrap().regions[1].start_pad, 10);
}
