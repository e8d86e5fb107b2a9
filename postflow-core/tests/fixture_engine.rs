//! End-to-end runs against the in-memory fixture engine.

#![cfg(feature = "testkit")]

use postflow_core::entity::Entity;
use postflow_core::testkit::{
    displacement_value, path_seed, FixtureEngine, DISPLACEMENT_COMPONENTS, DISPLACEMENT_NODES,
    DISPLACEMENT_SETS,
};
use postflow_core::{
    DataSources, DataTree, EngineVersion, Error, Field, FieldsContainer, Id, Location,
    MeshedRegion, Operator, PropertyField, Scoping, Server, ServerContext, Workflow,
};

fn server() -> Server {
    let _ = simplelog::SimpleLogger::init(
        simplelog::LevelFilter::Debug,
        simplelog::Config::default(),
    );
    FixtureEngine::new().into_server().unwrap()
}

fn field_with_data(server: &Server, ids: Vec<Id>, data: Vec<f64>) -> Field {
    let field = Field::new(server, Location::Nodal, 1).unwrap();
    let scoping = Scoping::new(server, Location::Nodal).unwrap();
    scoping.set_ids(ids).unwrap();
    field.set_scoping(&scoping).unwrap();
    field.set_data(data).unwrap();
    field
}

#[test]
fn scale_operator_scales_field_data() {
    let server = server();
    let field = field_with_data(&server, vec![1, 2, 3], vec![1.0, 2.0, 3.0]);

    let scale = Operator::new(&server, "scale").unwrap();
    scale.connect(0, &field).unwrap();
    scale.connect(1, 2.5).unwrap();

    let scaled: Field = scale.get_output(0).unwrap();
    assert_eq!(scaled.data().unwrap(), vec![2.5, 5.0, 7.5]);
    assert_eq!(scaled.scoping().unwrap().ids().unwrap(), vec![1, 2, 3]);
}

#[test]
fn named_pins_and_aliases_resolve() {
    let server = server();
    let field = field_with_data(&server, vec![1, 2], vec![3.0, 4.0]);

    let scale = Operator::new(&server, "scale").unwrap();
    scale.connect(0, &field).unwrap();
    // "ponderation" is the deprecated alias of "weights"
    scale.connect_named("ponderation", 2.0).unwrap();
    let scaled: Field = scale.get_output(0).unwrap();
    assert_eq!(scaled.data().unwrap(), vec![6.0, 8.0]);
}

#[test]
fn alias_resolution_needs_a_recent_engine() {
    let server = FixtureEngine::new()
        .with_version(EngineVersion::new(9, 0, 0))
        .into_server()
        .unwrap();
    let field = field_with_data(&server, vec![1], vec![1.0]);

    let scale = Operator::new(&server, "scale").unwrap();
    scale.connect(0, &field).unwrap();
    // the canonical name still routes on the old engine
    scale.connect_named("weights", 2.0).unwrap();
    match scale.connect_named("ponderation", 2.0) {
        Err(Error::VersionNotSupported { required, .. }) => assert_eq!(required, "10.0"),
        other => panic!("expected a version gate, got {:?}", other),
    }
}

#[test]
fn unknown_operators_get_a_nearest_name_hint() {
    let server = server();
    let err = Operator::new(&server, "min_max_fd").unwrap_err();
    assert!(
        err.to_string().contains("min_max_fc"),
        "no hint in: {}",
        err
    );
}

#[test]
fn displacement_chain_matches_the_fixture_formula() {
    let server = server();
    let sources = DataSources::new(&server).unwrap();
    sources.set_result_file_path("/data/model.rst").unwrap();

    let displacement = Operator::new(&server, "displacement").unwrap();
    displacement.connect(4, &sources).unwrap();
    let min_max = Operator::new(&server, "min_max_fc").unwrap();
    min_max.connect(0, displacement.output(0)).unwrap();

    let min: Field = min_max.get_output(0).unwrap();
    let max: Field = min_max.get_output(1).unwrap();

    let seed = path_seed("/data/model.rst");
    let len = DISPLACEMENT_NODES * DISPLACEMENT_COMPONENTS;
    let expected_min: Vec<f64> = (0..len).map(|i| displacement_value(seed, 1, i)).collect();
    let expected_max: Vec<f64> = (0..len)
        .map(|i| displacement_value(seed, DISPLACEMENT_SETS as Id, i))
        .collect();
    assert_eq!(min.data().unwrap(), expected_min);
    assert_eq!(max.data().unwrap(), expected_max);
}

#[test]
fn displacement_honors_a_time_scoping() {
    let server = server();
    let sources = DataSources::new(&server).unwrap();
    sources.set_result_file_path("/data/model.rst").unwrap();
    let time = Scoping::new(&server, Location::TimeFreq).unwrap();
    time.set_ids(vec![3, 7]).unwrap();

    let displacement = Operator::new(&server, "displacement").unwrap();
    displacement.connect(0, &time).unwrap();
    displacement.connect(4, &sources).unwrap();

    let fields: FieldsContainer = displacement.get_output(0).unwrap();
    assert_eq!(fields.len().unwrap(), 2);
    let seed = path_seed("/data/model.rst");
    let set7 = fields.get_field_by_time_id(7).unwrap();
    let expected: Vec<f64> = (0..DISPLACEMENT_NODES * DISPLACEMENT_COMPONENTS)
        .map(|i| displacement_value(seed, 7, i))
        .collect();
    assert_eq!(set7.data().unwrap(), expected);
}

#[test]
fn workflow_exposes_named_pins() {
    let server = server();
    let sources = DataSources::new(&server).unwrap();
    sources.set_result_file_path("/data/model.rst").unwrap();

    let displacement = Operator::new(&server, "displacement").unwrap();
    let norm = Operator::new(&server, "norm_fc").unwrap();
    norm.connect(0, displacement.output(0)).unwrap();

    let workflow = Workflow::new(&server).unwrap();
    workflow
        .set_input_name("data_sources", &displacement, 4)
        .unwrap();
    workflow.set_output_name("norms", &norm, 0).unwrap();
    workflow.connect("data_sources", &sources).unwrap();

    let norms: FieldsContainer = workflow.get_output("norms").unwrap();
    assert_eq!(norms.len().unwrap(), DISPLACEMENT_SETS);

    let names = workflow.operator_names().unwrap();
    assert!(names.contains(&"displacement".to_string()));
    assert!(names.contains(&"norm_fc".to_string()));

    let topology = workflow.topology().unwrap();
    assert_eq!(topology.operator_edges.len(), 1);
    assert_eq!(topology.exposed_inputs.len(), 1);
    assert_eq!(topology.exposed_outputs.len(), 1);
}

#[test]
fn workflow_topology_needs_a_recent_engine() {
    let server = FixtureEngine::new()
        .with_version(EngineVersion::new(9, 0, 0))
        .into_server()
        .unwrap();
    let workflow = Workflow::new(&server).unwrap();
    assert!(matches!(
        workflow.topology(),
        Err(Error::VersionNotSupported { .. })
    ));
}

#[test]
fn recorded_workflow_transfer_is_consumed_once() {
    let server = server();
    let workflow = Workflow::new(&server).unwrap();
    let forward = Operator::new(&server, "forward").unwrap();
    workflow.set_input_name("in", &forward, 0).unwrap();
    workflow.set_output_name("out", &forward, 0).unwrap();

    let id = workflow.record(true).unwrap();
    drop(workflow);
    let restored = Workflow::get_recorded(&server, id).unwrap();
    restored.connect("in", 42 as Id).unwrap();
    assert_eq!(restored.get_output::<Id>("out").unwrap(), 42);
    assert!(Workflow::get_recorded(&server, id).is_err());
}

#[test]
fn recorded_workflow_without_transfer_stays_retrievable() {
    let server = server();
    let workflow = Workflow::new(&server).unwrap();
    let forward = Operator::new(&server, "forward").unwrap();
    workflow.set_input_name("in", &forward, 0).unwrap();
    workflow.set_output_name("out", &forward, 0).unwrap();

    let id = workflow.record(false).unwrap();
    drop(workflow);
    let first = Workflow::get_recorded(&server, id).unwrap();
    let second = Workflow::get_recorded(&server, id).unwrap();
    first.connect("in", 1 as Id).unwrap();
    second.connect("in", 2 as Id).unwrap();
    assert_eq!(second.get_output::<Id>("out").unwrap(), 2);
}

#[test]
fn deep_copy_moves_content_between_servers() {
    let source = server();
    let target = server();
    let field = field_with_data(&source, vec![10, 20], vec![1.5, -2.5]);

    let copy = field.deep_copy(&target).unwrap();
    assert_eq!(copy.data().unwrap(), vec![1.5, -2.5]);
    assert_eq!(copy.scoping().unwrap().ids().unwrap(), vec![10, 20]);

    let again = field.deep_copy(&target).unwrap();
    assert!(copy.content_equals(&again).unwrap());

    again.set_data(vec![1.5, 0.0]).unwrap();
    assert!(!copy.content_equals(&again).unwrap());
}

#[test]
fn content_comparison_rejects_mixed_servers() {
    let a = server();
    let b = server();
    let left = field_with_data(&a, vec![1], vec![1.0]);
    let right = field_with_data(&b, vec![1], vec![1.0]);
    assert!(left.content_equals(&right).is_err());
}

#[test]
fn refused_license_blocks_operator_creation() {
    let server = FixtureEngine::new()
        .with_license(false)
        .into_server()
        .unwrap();
    match Operator::new(&server, "forward") {
        Err(Error::License(message)) => assert!(message.contains("ANSYS_DPF_ACCEPT_LA")),
        other => panic!("expected a license error, got {:?}", other),
    }
}

#[test]
fn premium_operators_need_a_premium_context() {
    let entry = FixtureEngine::new()
        .with_context(ServerContext::Entry)
        .into_server()
        .unwrap();
    assert!(Operator::new(&entry, "accumulate_over_label_fc").is_err());
    assert!(Operator::new(&entry, "forward").is_ok());

    let premium = server();
    assert!(Operator::new(&premium, "accumulate_over_label_fc").is_ok());
}

#[test]
fn closed_sessions_refuse_further_calls() {
    let server = server();
    let field = field_with_data(&server, vec![1], vec![1.0]);
    server.close();
    assert!(server.is_closed());
    assert!(field.data().is_err());
    // dropping wrappers after close must not panic
    drop(field);
}

#[test]
fn face_only_meshes_are_not_empty() {
    let server = server();
    let mesh = MeshedRegion::new(&server).unwrap();
    assert!(mesh.is_empty().unwrap());

    let faces = PropertyField::new(&server, Location::Faces, 1).unwrap();
    faces.set_data(vec![1, 2, 3]).unwrap();
    mesh.set_property_field("faces", &faces).unwrap();

    assert_eq!(mesh.face_count().unwrap(), 3);
    assert!(!mesh.is_empty().unwrap());
}

#[test]
fn unit_setters_are_idempotent() {
    let server = server();
    let field = field_with_data(&server, vec![1], vec![1.0]);

    field.set_unit("m").unwrap();
    field.set_unit("m").unwrap();
    assert_eq!(field.unit().unwrap(), "m");

    field.set_named_unit("ratio", "poisson").unwrap();
    field.set_named_unit("ratio", "poisson").unwrap();
    assert_eq!(field.unit().unwrap(), "ratio:poisson");
}

#[test]
fn named_units_need_a_recent_engine() {
    let server = FixtureEngine::new()
        .with_version(EngineVersion::new(10, 0, 0))
        .into_server()
        .unwrap();
    let field = field_with_data(&server, vec![1], vec![1.0]);

    field.set_unit("Pa").unwrap();
    match field.set_named_unit("ratio", "poisson") {
        Err(Error::VersionNotSupported { required, .. }) => assert_eq!(required, "11.0"),
        other => panic!("expected a version gate, got {:?}", other),
    }
}

#[test]
fn local_field_edits_flush_on_release() {
    let server = server();
    let field = field_with_data(&server, vec![1, 2], vec![0.0, 0.0]);

    let mut local = field.as_local_field().unwrap();
    local.set_data(vec![5.0, 6.0]);
    local.append(&[7.0], 3).unwrap();
    local.release().unwrap();

    assert_eq!(field.data().unwrap(), vec![5.0, 6.0, 7.0]);
    assert_eq!(field.scoping().unwrap().ids().unwrap(), vec![1, 2, 3]);
}

#[test]
fn local_scoping_edits_flush_on_release() {
    let server = server();
    let scoping = Scoping::new(&server, Location::Elemental).unwrap();
    scoping.set_ids(vec![4, 5]).unwrap();

    let mut local = scoping.as_local_scoping().unwrap();
    local.append(6);
    local.set_id(0, 40).unwrap();
    local.release().unwrap();

    assert_eq!(scoping.ids().unwrap(), vec![40, 5, 6]);
}

#[test]
fn data_tree_text_round_trip_is_byte_stable() {
    let server = server();
    let tree = DataTree::new(&server).unwrap();
    tree.set_int("count", 3).unwrap();
    tree.set_double("tolerance", 0.5).unwrap();
    tree.set_string("name", "assembly").unwrap();
    tree.set_int_vec("sets", vec![1, 2, 3]).unwrap();
    let sub = DataTree::new(&server).unwrap();
    sub.set_string("unit", "m").unwrap();
    tree.set_sub_tree("mesh", &sub).unwrap();

    let text = tree.to_txt().unwrap();
    let parsed = DataTree::from_txt(&server, &text).unwrap();
    assert_eq!(parsed.to_txt().unwrap(), text);
    assert_eq!(parsed.get_int("count").unwrap(), 3);
    assert_eq!(parsed.sub_tree("mesh").unwrap().get_string("unit").unwrap(), "m");

    let json = tree.to_json().unwrap();
    let from_json = DataTree::from_json(&server, &json).unwrap();
    assert_eq!(from_json.to_json().unwrap(), json);
}

#[test]
fn text_trees_keep_string_payloads_typed() {
    let server = server();
    let tree = DataTree::new(&server).unwrap();
    tree.set_string("label", "42").unwrap();
    tree.set_string("empty", "").unwrap();
    tree.set_string("joined", "a;b").unwrap();
    tree.set_string_vec("names", vec!["one".to_string()]).unwrap();

    let text = tree.to_txt().unwrap();
    let parsed = DataTree::from_txt(&server, &text).unwrap();
    assert_eq!(parsed.to_txt().unwrap(), text);
    assert_eq!(parsed.get_string("label").unwrap(), "42");
    assert_eq!(parsed.get_string("empty").unwrap(), "");
    assert_eq!(parsed.get_string("joined").unwrap(), "a;b");
    assert_eq!(parsed.get_string_vec("names").unwrap(), vec!["one"]);
}

#[test]
fn collections_reject_foreign_label_spaces() {
    let server = server();
    let fields = FieldsContainer::new(&server, &["time"]).unwrap();
    let field = field_with_data(&server, vec![1], vec![1.0]);

    fields.add(&field, &[("time", 1)]).unwrap();
    assert!(fields.add(&field, &[("zone", 1)]).is_err());
    assert!(fields.get_by_label_space(&[("zone", 1)]).is_err());

    // a lookup on a subset of the labels matches every entry completing it
    assert_eq!(fields.get_by_label_space(&[("time", 1)]).unwrap().len(), 1);
}

#[test]
fn label_catalog_reflects_later_additions() {
    let server = server();
    let fields = FieldsContainer::new(&server, &["time"]).unwrap();
    assert_eq!(fields.labels().unwrap(), vec!["time".to_string()]);
    fields.add_label("zone", 0).unwrap();
    assert_eq!(
        fields.labels().unwrap(),
        vec!["time".to_string(), "zone".to_string()]
    );
}

#[test]
fn derivate_clones_configuration_not_inputs() {
    let server = server();
    let field = field_with_data(&server, vec![1], vec![1.0]);
    let scale = Operator::new(&server, "scale").unwrap();
    scale.connect(0, &field).unwrap();
    scale.connect(1, 2.0).unwrap();

    let fresh = scale.derivate().unwrap();
    // the clone has no inputs connected yet
    assert!(fresh.get_output::<Field>(0).is_err());
    assert_eq!(scale.get_output::<Field>(0).unwrap().data().unwrap(), vec![2.0]);
}
