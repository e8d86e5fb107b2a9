//! Measurements of chunked versus monolithic evaluation.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use postflow_core::incremental::IncrementalRunner;
use postflow_core::testkit::{FixtureEngine, DISPLACEMENT_SETS};
use postflow_core::{
    DataSources, Field, FieldsContainer, Id, Location, Operator, Scoping, Server, Workflow,
};

criterion_group!(incremental, monolithic_min_max, chunked_min_max);
criterion_main!(incremental);

fn setup() -> (Server, DataSources) {
    let server = FixtureEngine::new().into_server().unwrap();
    let sources = DataSources::new(&server).unwrap();
    sources.set_result_file_path("/data/model.rst").unwrap();
    (server, sources)
}

fn displacement_workflow(server: &Server, sources: &DataSources) -> Workflow {
    let displacement = Operator::new(server, "displacement").unwrap();
    displacement.connect(4, sources).unwrap();
    let workflow = Workflow::new(server).unwrap();
    workflow.set_input_name("time", &displacement, 0).unwrap();
    workflow.set_output_name("fields", &displacement, 0).unwrap();
    workflow
}

fn all_sets(server: &Server) -> Scoping {
    let scoping = Scoping::new(server, Location::TimeFreq).unwrap();
    scoping
        .set_ids((1..=DISPLACEMENT_SETS as Id).collect())
        .unwrap();
    scoping
}

fn monolithic_min_max(c: &mut Criterion) {
    let (server, sources) = setup();
    let workflow = displacement_workflow(&server, &sources);
    workflow.connect("time", &all_sets(&server)).unwrap();

    c.bench_function("min_max_monolithic", |b| {
        b.iter(|| {
            let fields: FieldsContainer = workflow.get_output("fields").unwrap();
            let min_max = Operator::new(&server, "min_max_fc").unwrap();
            min_max.connect(0, &fields).unwrap();
            black_box(min_max.get_output::<Field>(1).unwrap())
        })
    });
}

fn chunked_min_max(c: &mut Criterion) {
    let (server, sources) = setup();
    let scoping = all_sets(&server);

    c.bench_function("min_max_chunked_5", |b| {
        b.iter(|| {
            let runner =
                IncrementalRunner::new(displacement_workflow(&server, &sources), "time", "fields", 5)
                    .unwrap()
                    .with_merge_operator("min_max_fc_inc");
            let merger = runner.run(&scoping).unwrap();
            black_box(merger.get_output::<Field>(1).unwrap())
        })
    });
}
