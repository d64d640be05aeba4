use assert_matches::assert_matches;

use grn_hierarchy::csv_build::{BuildInstruction, BuildPlan, ExitSignal, HierarchyBuilder};
use grn_hierarchy::error::GenomeError;
use grn_hierarchy::source::GenomeSource;

const PLAN: &str = "\
# two stages of the endoderm kernel
model,Embryo,,0,30
model,Late,Embryo
region,Embryo,Endoderm,endo
general,Embryo,box,Wnt8,gene,blimp1,+,,endo
general,Late,box,Wnt8,gene,blimp1,+,,endo
standalone,Late,gene,otx,endo
";

fn model_id(source: &GenomeSource, name: &str) -> String {
    source
        .instances()
        .find(|model| model.name() == name)
        .map(|model| model.id.clone())
        .unwrap()
}

#[test]
fn plan_parses_every_record_kind() {
    let plan = BuildPlan::parse(PLAN).unwrap();
    assert_eq!(plan.top_down().len(), 2);
    assert_eq!(plan.regions()[0].abbrev.as_deref(), Some("endo"));
    assert_eq!(plan.instructions().len(), 3);
    assert_matches!(
        &plan.instructions()[2],
        BuildInstruction::Standalone { model, region: Some(region), .. } if model == "Late" && region == "endo"
    );
}

#[test]
fn build_creates_models_regions_and_links() {
    let plan = BuildPlan::parse(PLAN).unwrap();
    let mut source = GenomeSource::new("bioTapA", "Full Genome");
    let report = HierarchyBuilder::new(&mut source, ExitSignal::new())
        .apply(&plan)
        .unwrap();

    assert!(!report.cancelled);
    assert_eq!(report.models_created, 2);
    assert_eq!(report.regions_created, 1);
    assert_eq!(report.instructions_applied, 3);
    assert_eq!(source.root().store().genes().count(), 2);
    assert_eq!(source.root().store().links().count(), 1);

    let embryo = source.instance(&model_id(&source, "Embryo")).unwrap();
    let bounds = embryo.time_bounds().unwrap();
    assert_eq!((bounds.min_time, bounds.max_time), (0, 30));

    let late = source.instance(&model_id(&source, "Late")).unwrap();
    assert_eq!(late.vfg_parent(), Some(embryo.id.as_str()));
    assert_eq!(late.all_nodes().count(), 3);
    assert_eq!(late.store().links().count(), 1);
    let region = late
        .groups()
        .find(|group| group.display_name() == "Endoderm")
        .unwrap();
    assert_eq!(region.members.len(), 2);
}

#[test]
fn rebuilding_the_same_plan_changes_nothing() {
    let plan = BuildPlan::parse(PLAN).unwrap();
    let mut source = GenomeSource::new("bioTapA", "Full Genome");
    HierarchyBuilder::new(&mut source, ExitSignal::new())
        .apply(&plan)
        .unwrap();
    let again = HierarchyBuilder::new(&mut source, ExitSignal::new())
        .apply(&plan)
        .unwrap();
    assert!(again.changes.is_empty());
    assert_eq!(again.models_created, 0);
    assert_eq!(again.regions_created, 0);
    assert_eq!(again.instructions_applied, 3);
}

#[test]
fn build_records_undo_the_whole_build() {
    let plan = BuildPlan::parse(PLAN).unwrap();
    let mut source = GenomeSource::new("bioTapA", "Full Genome");
    let report = HierarchyBuilder::new(&mut source, ExitSignal::new())
        .apply(&plan)
        .unwrap();
    source.undo_all(&report.changes).unwrap();
    assert_eq!(source.instances().count(), 0);
    assert_eq!(source.root().store().genes().count(), 0);
    assert_eq!(source.root().store().nodes().count(), 0);
}

#[test]
fn requested_exit_stops_before_the_next_step() {
    let plan = BuildPlan::parse(PLAN).unwrap();
    let mut source = GenomeSource::new("bioTapA", "Full Genome");
    let signal = ExitSignal::new();
    let handle = signal.clone();
    handle.request();

    let report = HierarchyBuilder::new(&mut source, signal).apply(&plan).unwrap();
    assert!(report.cancelled);
    assert!(report.changes.is_empty());
    assert!(report.summary().cancelled);
    assert_eq!(source.instances().count(), 0);
}

#[test]
fn regions_need_a_known_model() {
    let plan = BuildPlan::parse("region,Nowhere,Endoderm\n").unwrap();
    let mut source = GenomeSource::new("bioTapA", "Full Genome");
    let err = HierarchyBuilder::new(&mut source, ExitSignal::new())
        .apply(&plan)
        .unwrap_err();
    assert_matches!(err, GenomeError::MissingEntity { .. });
}

#[test]
fn unknown_record_kinds_are_rejected() {
    let err = BuildPlan::parse("model,A,\nlink,A,b\n").unwrap_err();
    assert_matches!(err, GenomeError::Csv(message) if message.contains("link"));
}
