//! A real client/host pair over TCP loopback, backed by the fixture engine.

use std::sync::Arc;
use std::thread::JoinHandle;

use postflow_core::entity::Entity;
use postflow_core::testkit::FixtureEngine;
use postflow_core::{
    DataSources, Error, Field, FieldsContainer, Location, Operator, RuntimeConfig, Scoping,
    Server,
};
use postflow_net::{Endpoint, EngineHost, RemoteBinding};

/// Hosts a fixture engine on an ephemeral loopback port and serves
/// `clients` connections on background threads.
fn host_fixture(
    engine: FixtureEngine,
    config: RuntimeConfig,
    clients: usize,
) -> (Endpoint, JoinHandle<Vec<JoinHandle<()>>>) {
    let host = EngineHost::bind("127.0.0.1:0", Arc::new(engine), config).unwrap();
    let addr = host.local_addr().unwrap();
    let serving = std::thread::spawn(move || host.serve_connections(clients).unwrap());
    (Endpoint::Tcp(addr.to_string()), serving)
}

fn quick_config() -> RuntimeConfig {
    let _ = simplelog::SimpleLogger::init(
        simplelog::LevelFilter::Debug,
        simplelog::Config::default(),
    );
    RuntimeConfig {
        call_timeout_ms: Some(5_000),
        heartbeat_secs: 0,
        ..RuntimeConfig::default()
    }
}

fn connect(endpoint: &Endpoint, config: &RuntimeConfig) -> Server {
    RemoteBinding::connect(endpoint.clone(), config)
        .unwrap()
        .into_server()
        .unwrap()
}

#[test]
fn remote_calls_behave_like_in_process_calls() {
    let (endpoint, serving) = host_fixture(FixtureEngine::new(), quick_config(), 1);
    {
        let server = connect(&endpoint, &quick_config());

        let field = Field::new(&server, Location::Nodal, 1).unwrap();
        let scoping = Scoping::new(&server, Location::Nodal).unwrap();
        scoping.set_ids(vec![1, 2, 3]).unwrap();
        field.set_scoping(&scoping).unwrap();
        field.set_data(vec![1.0, 2.0, 3.0]).unwrap();

        let scale = Operator::new(&server, "scale").unwrap();
        scale.connect(0, &field).unwrap();
        scale.connect(1, 10.0).unwrap();
        let scaled: Field = scale.get_output(0).unwrap();
        assert_eq!(scaled.data().unwrap(), vec![10.0, 20.0, 30.0]);
    }
    for handle in serving.join().unwrap() {
        handle.join().unwrap();
    }
}

#[test]
fn engine_faults_arrive_as_typed_errors() {
    let (endpoint, serving) = host_fixture(FixtureEngine::new(), quick_config(), 1);
    {
        let server = connect(&endpoint, &quick_config());
        let scale = Operator::new(&server, "scale").unwrap();
        // pin 0 never connected
        match scale.get_output::<Field>(0) {
            Err(Error::Engine { operator, .. }) => assert_eq!(operator, "scale"),
            other => panic!("expected an engine fault, got {:?}", other),
        }
    }
    serving.join().unwrap();
}

#[test]
fn license_refusals_cross_the_wire() {
    let engine = FixtureEngine::new().with_license(false);
    let (endpoint, serving) = host_fixture(engine, quick_config(), 1);
    {
        let server = connect(&endpoint, &quick_config());
        assert!(matches!(
            Operator::new(&server, "forward"),
            Err(Error::License(_))
        ));
    }
    serving.join().unwrap();
}

#[test]
fn deep_copy_between_two_remote_servers() {
    let (endpoint_a, serving_a) = host_fixture(FixtureEngine::new(), quick_config(), 1);
    let (endpoint_b, serving_b) = host_fixture(FixtureEngine::new(), quick_config(), 1);
    {
        let a = connect(&endpoint_a, &quick_config());
        let b = connect(&endpoint_b, &quick_config());

        let field = Field::new(&a, Location::Nodal, 1).unwrap();
        let scoping = Scoping::new(&a, Location::Nodal).unwrap();
        scoping.set_ids(vec![5, 6]).unwrap();
        field.set_scoping(&scoping).unwrap();
        field.set_data(vec![0.25, -0.75]).unwrap();

        let copy = field.deep_copy(&b).unwrap();
        assert_eq!(copy.data().unwrap(), vec![0.25, -0.75]);
        let again = field.deep_copy(&b).unwrap();
        assert!(copy.content_equals(&again).unwrap());
    }
    serving_a.join().unwrap();
    serving_b.join().unwrap();
}

#[test]
fn bulk_arrays_travel_in_small_chunks() {
    // a 256 byte chunk size forces many frames per message
    let config = RuntimeConfig {
        streaming_buffer_size: 256,
        ..quick_config()
    };
    let (endpoint, serving) = host_fixture(FixtureEngine::new(), config.clone(), 1);
    {
        let server = connect(&endpoint, &config);
        let field = Field::new(&server, Location::Nodal, 1).unwrap();
        let data: Vec<f64> = (0..10_000).map(|i| i as f64 * 0.125).collect();
        field.set_data(data.clone()).unwrap();
        assert_eq!(field.data().unwrap(), data);
    }
    serving.join().unwrap();
}

#[cfg(feature = "lz4")]
#[test]
fn compressed_streams_round_trip() {
    let config = RuntimeConfig {
        compress_streams: true,
        ..quick_config()
    };
    let (endpoint, serving) = host_fixture(FixtureEngine::new(), config.clone(), 1);
    {
        let server = connect(&endpoint, &config);
        let field = Field::new(&server, Location::Nodal, 1).unwrap();
        let data = vec![1.0; 4096];
        field.set_data(data.clone()).unwrap();
        assert_eq!(field.data().unwrap(), data);
    }
    serving.join().unwrap();
}

#[test]
fn heartbeats_do_not_disturb_calls() {
    let config = RuntimeConfig {
        heartbeat_secs: 1,
        ..quick_config()
    };
    let (endpoint, serving) = host_fixture(FixtureEngine::new(), config.clone(), 1);
    {
        let server = connect(&endpoint, &config);
        let sources = DataSources::new(&server).unwrap();
        sources.set_result_file_path("/data/model.rst").unwrap();

        std::thread::sleep(std::time::Duration::from_millis(1_300));

        let displacement = Operator::new(&server, "displacement").unwrap();
        displacement.connect(4, &sources).unwrap();
        let fields: FieldsContainer = displacement.get_output(0).unwrap();
        assert!(!fields.is_empty().unwrap());
    }
    serving.join().unwrap();
}

#[test]
fn unavailable_transports_fail_on_connect_not_parse() {
    let wnua: Endpoint = "wnua://:50054".parse().unwrap();
    match RemoteBinding::connect(wnua, &quick_config()) {
        Err(postflow_net::Error::TransportUnavailable(reason)) => {
            assert!(reason.contains("wnua"))
        }
        other => panic!("expected an unavailable transport, got {:?}", other.err()),
    }
}
