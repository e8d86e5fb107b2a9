//! Runs a displacement post-processing chain against the in-memory fixture
//! engine, printing the evaluated extrema.

#![allow(unused)]

extern crate postflow_core as postflow;
extern crate simplelog;

use postflow::testkit::FixtureEngine;
use postflow::{DataSources, Field, Operator, Workflow};
use simplelog::{Config, LevelFilter, TermLogger, TerminalMode};

fn main() {
    TermLogger::init(LevelFilter::Debug, Config::default(), TerminalMode::Mixed).unwrap();

    let server = FixtureEngine::new().into_server().unwrap();
    println!(
        "connected: engine {} in {} context",
        server.version(),
        server.context()
    );

    let sources = DataSources::new(&server).unwrap();
    sources.set_result_file_path("/data/model.rst").unwrap();

    let displacement = Operator::new(&server, "displacement").unwrap();
    displacement.connect(4, &sources).unwrap();
    let min_max = Operator::new(&server, "min_max_fc").unwrap();
    min_max.connect(0, displacement.output(0)).unwrap();

    let min: Field = min_max.get_output(0).unwrap();
    let max: Field = min_max.get_output(1).unwrap();
    println!("min: {:?}", min.data().unwrap());
    println!("max: {:?}", max.data().unwrap());
}
