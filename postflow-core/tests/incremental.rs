//! Chunked evaluation against the monolithic reference.

#![cfg(feature = "testkit")]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use postflow_core::entity::Entity;
use postflow_core::incremental::IncrementalRunner;
use postflow_core::testkit::{FixtureEngine, DISPLACEMENT_SETS};
use postflow_core::{
    DataSources, Field, FieldsContainer, Id, Location, Operator, Scoping, Server, Workflow,
};

fn server() -> Server {
    FixtureEngine::new().into_server().unwrap()
}

/// Workflow computing displacement norms, with the time scoping exposed as
/// `time` and the resulting container as `fields`.
fn norm_workflow(server: &Server, sources: &DataSources) -> Workflow {
    let displacement = Operator::new(server, "displacement").unwrap();
    displacement.connect(4, sources).unwrap();
    let norm = Operator::new(server, "norm_fc").unwrap();
    norm.connect(0, displacement.output(0)).unwrap();

    let workflow = Workflow::new(server).unwrap();
    workflow.set_input_name("time", &displacement, 0).unwrap();
    workflow.set_output_name("fields", &norm, 0).unwrap();
    workflow
}

fn all_sets(server: &Server) -> Scoping {
    let scoping = Scoping::new(server, Location::TimeFreq).unwrap();
    scoping
        .set_ids((1..=DISPLACEMENT_SETS as Id).collect())
        .unwrap();
    scoping
}

#[test]
fn chunked_min_max_matches_the_monolithic_run() {
    let server = server();
    let sources = DataSources::new(&server).unwrap();
    sources.set_result_file_path("/data/model.rst").unwrap();

    // monolithic reference over every time set
    let reference = norm_workflow(&server, &sources);
    reference.connect("time", &all_sets(&server)).unwrap();
    let all: FieldsContainer = reference.get_output("fields").unwrap();
    let min_max = Operator::new(&server, "min_max_fc").unwrap();
    min_max.connect(0, &all).unwrap();
    let expected_min: Field = min_max.get_output(0).unwrap();
    let expected_max: Field = min_max.get_output(1).unwrap();

    // same aggregate, 5 time sets at a time
    let runner = IncrementalRunner::new(norm_workflow(&server, &sources), "time", "fields", 5)
        .unwrap()
        .with_merge_operator("min_max_fc_inc");
    let merger = runner.run(&all_sets(&server)).unwrap();
    let min: Field = merger.get_output(0).unwrap();
    let max: Field = merger.get_output(1).unwrap();

    assert!(min.content_equals_with(&expected_min, 1e-12).unwrap());
    assert!(max.content_equals_with(&expected_max, 1e-12).unwrap());
}

#[test]
fn merged_container_covers_every_chunk() {
    let server = server();
    let sources = DataSources::new(&server).unwrap();
    sources.set_result_file_path("/data/model.rst").unwrap();

    let runner =
        IncrementalRunner::new(norm_workflow(&server, &sources), "time", "fields", 7).unwrap();
    let merged = runner.run_merged(&all_sets(&server)).unwrap();
    assert_eq!(merged.len().unwrap(), DISPLACEMENT_SETS);
}

#[test]
fn progress_reports_every_chunk_in_order() {
    let server = server();
    let sources = DataSources::new(&server).unwrap();
    sources.set_result_file_path("/data/model.rst").unwrap();

    let seen = Arc::new(AtomicUsize::new(0));
    let seen_cb = Arc::clone(&seen);
    let runner =
        IncrementalRunner::new(norm_workflow(&server, &sources), "time", "fields", 5)
            .unwrap()
            .with_progress(move |done, total| {
                assert_eq!(total, 4);
                assert_eq!(done, seen_cb.load(Ordering::SeqCst) + 1);
                seen_cb.store(done, Ordering::SeqCst);
            });
    runner.run_merged(&all_sets(&server)).unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 4);
}

#[test]
fn empty_scopings_and_zero_chunks_are_rejected() {
    let server = server();
    let sources = DataSources::new(&server).unwrap();
    sources.set_result_file_path("/data/model.rst").unwrap();

    assert!(IncrementalRunner::new(norm_workflow(&server, &sources), "time", "fields", 0).is_err());

    let runner =
        IncrementalRunner::new(norm_workflow(&server, &sources), "time", "fields", 5).unwrap();
    let empty = Scoping::new(&server, Location::TimeFreq).unwrap();
    assert!(runner.run(&empty).is_err());
}
