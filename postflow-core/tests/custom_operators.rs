//! Registry-backed custom operators running inside the fixture engine.

#![cfg(feature = "testkit")]

use postflow_core::plugin::{CustomOperator, OperatorContext, OperatorRegistry};
use postflow_core::testkit::FixtureEngine;
use postflow_core::{Error, Operator, PinSpecification, Result, Server, Specification};

/// Sums a vector of doubles into a single scalar.
struct SumDoubles;

impl CustomOperator for SumDoubles {
    fn name(&self) -> &str {
        "demo::sum_doubles"
    }

    fn specification(&self) -> Specification {
        Specification::new("Sums a vector of doubles.")
            .with_input(0, PinSpecification::new("values", &["vector<double>"], "summands"))
            .with_output(0, PinSpecification::new("sum", &["double"], "total"))
    }

    fn run(&self, context: &mut OperatorContext) -> Result<()> {
        let total: f64 = context.input_double_vec(0)?.iter().sum();
        context.set_output(0, total)
    }
}

/// Always fails, to exercise error attribution.
struct AlwaysFails;

impl CustomOperator for AlwaysFails {
    fn name(&self) -> &str {
        "demo::always_fails"
    }

    fn specification(&self) -> Specification {
        Specification::new("Fails on purpose.")
    }

    fn run(&self, _context: &mut OperatorContext) -> Result<()> {
        Err(Error::Validation("nothing to compute".to_string()))
    }
}

fn server_with_plugins() -> Server {
    let mut registry = OperatorRegistry::new();
    registry.record_operator(Box::new(SumDoubles));
    registry.record_operator(Box::new(AlwaysFails));
    FixtureEngine::new()
        .with_registry(registry)
        .into_server()
        .unwrap()
}

#[test]
fn registered_operators_evaluate_like_builtins() {
    let server = server_with_plugins();
    assert!(server.has_operator("demo::sum_doubles"));

    let sum = Operator::new(&server, "demo::sum_doubles").unwrap();
    sum.connect(0, vec![1.0, 2.0, 3.5]).unwrap();
    assert_eq!(sum.get_output::<f64>(0).unwrap(), 6.5);
}

#[test]
fn registered_specifications_are_served() {
    let server = server_with_plugins();
    let sum = Operator::new(&server, "demo::sum_doubles").unwrap();
    let spec = sum.specification().unwrap();
    assert_eq!(spec.input_pin_by_name("values").unwrap(), (0, false));
}

#[test]
fn named_pins_route_through_custom_specifications() {
    let server = server_with_plugins();
    let sum = Operator::new(&server, "demo::sum_doubles").unwrap();
    sum.connect_named("values", vec![2.0, 2.0]).unwrap();
    assert_eq!(sum.get_output::<f64>(0).unwrap(), 4.0);
}

#[test]
fn failures_are_attributed_to_the_operator() {
    let server = server_with_plugins();
    let failing = Operator::new(&server, "demo::always_fails").unwrap();
    match failing.get_output::<f64>(0) {
        Err(Error::Engine { operator, .. }) => assert_eq!(operator, "demo::always_fails"),
        other => panic!("expected an attributed engine error, got {:?}", other),
    }
}

#[test]
fn unregistered_names_are_not_served() {
    let server = server_with_plugins();
    assert!(Operator::new(&server, "demo::missing").is_err());
}
