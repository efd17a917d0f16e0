use std::cell::RefCell;
use std::rc::Rc;

use dcflow_network::energy::ManualClock;
use dcflow_network::fairness::FairnessMode;
use dcflow_network::network::{Network, NetworkController};
use dcflow_network::node::NodeId;
use dcflow_network::port::Port;
use dcflow_network::units::DataRate;
use dcflow_network::Error;

fn assert_float_eq(x: f64, y: f64, eps: f64) {
    assert!(
        (x - y).abs() < eps || (x.max(y) - x.min(y)) / x.min(y) < eps,
        "Values do not match: {:.15} vs {:.15}",
        x,
        y
    );
}

fn assert_rate_eq(rate: DataRate, kbps: f64) {
    assert_float_eq(rate.to_kbps(), kbps, 1e-9);
}

fn port_towards<'a>(net: &'a Network, from: NodeId, to: NodeId) -> &'a Port {
    net.node(from)
        .unwrap()
        .ports()
        .iter()
        .find(|p| p.peer().map(|r| r.node) == Some(to))
        .unwrap_or_else(|| panic!("no port from {} towards {}", from, to))
}

/// Capacity, conservation and peer-consistency invariants that must hold in
/// every stable state.
fn check_invariants(net: &Network) {
    for node in net.nodes() {
        for port in node.ports() {
            if !port.max_speed().is_unlimited() {
                assert!(
                    port.total_outgoing_rate().bits_per_sec()
                        <= port.max_speed().bits_per_sec() * (1. + 1e-9),
                    "port capacity exceeded at node {}",
                    node.id()
                );
            }
            if let Some(peer) = port.peer() {
                let peer_port = net.node(peer.node).unwrap().port(peer.port);
                for (&flow, &rate) in port.outgoing_flows() {
                    assert!(
                        peer_port.incoming_rate(flow).approx_eq(rate),
                        "peer rate mismatch for flow {} between {} and {}",
                        flow,
                        node.id(),
                        peer.node
                    );
                }
                for (&flow, &rate) in port.incoming_flows() {
                    assert!(
                        peer_port.outgoing_rate(flow).approx_eq(rate),
                        "peer rate mismatch for flow {} between {} and {}",
                        flow,
                        peer.node,
                        node.id()
                    );
                }
            }
        }
        for &flow in node.flow_handler().transit() {
            assert!(
                node.outgoing_rate_of(flow).bits_per_sec()
                    <= node.incoming_rate_of(flow).bits_per_sec() * (1. + 1e-9),
                "transit node {} sends more of flow {} than it receives",
                node.id(),
                flow
            );
        }
    }
}

/// `{H1-S-H2}` with 1000 Kbps ports.
fn two_hosts_one_switch(mode: FairnessMode) -> (NetworkController, NodeId, NodeId, NodeId) {
    let mut controller = NetworkController::with_fairness(mode);
    let h1 = controller.add_host("h1", DataRate::from_kbps(1000.), 1);
    let h2 = controller.add_host("h2", DataRate::from_kbps(1000.), 1);
    let s = controller.add_switch("s", DataRate::from_kbps(1000.), 4);
    controller.connect(h1, s).unwrap();
    controller.connect(h2, s).unwrap();
    (controller, h1, h2, s)
}

/// Two senders contending for the switch's single link towards `h2`.
fn contention_topology(mode: FairnessMode) -> (NetworkController, NodeId, NodeId, NodeId, NodeId) {
    let mut controller = NetworkController::with_fairness(mode);
    let h1a = controller.add_host("h1a", DataRate::from_kbps(1000.), 1);
    let h1b = controller.add_host("h1b", DataRate::from_kbps(1000.), 1);
    let h2 = controller.add_host("h2", DataRate::from_kbps(1000.), 1);
    let s = controller.add_switch("s", DataRate::from_kbps(1000.), 4);
    controller.connect(h1a, s).unwrap();
    controller.connect(h1b, s).unwrap();
    controller.connect(h2, s).unwrap();
    (controller, h1a, h1b, h2, s)
}

// S1 ------------------------------------------------------------------------------------------------------------------

#[test]
fn single_switch_two_hosts() {
    let _ = env_logger::Builder::from_default_env().try_init();
    let (mut controller, h1, h2, s) = two_hosts_one_switch(FairnessMode::MaxMin);

    let flow = controller
        .start_flow(h1, h2, DataRate::from_kbps(500.))
        .unwrap();
    controller.await_stability().unwrap();

    assert_rate_eq(flow.throughput(), 500.);
    assert_rate_eq(port_towards(controller.network(), s, h2).total_outgoing_rate(), 500.);
    check_invariants(controller.network());

    let snapshot = controller.snapshot();
    assert!(snapshot.converged);
    let switch_record = snapshot
        .node_records
        .iter()
        .find(|r| r.node_id == s)
        .unwrap();
    assert!(switch_record.power_draw_watts > 0.);
    assert_eq!(switch_record.incoming_flows, 1);
    assert_eq!(switch_record.outgoing_flows, 1);
}

// S2 ------------------------------------------------------------------------------------------------------------------

#[test]
fn ecmp_splits_across_equal_cost_legs() {
    let mut controller = NetworkController::new();
    let speed = DataRate::from_kbps(1000.);
    let h1 = controller.add_host("h1", speed, 1);
    let h2 = controller.add_host("h2", speed, 1);
    let s1 = controller.add_switch("s1", speed, 4);
    let s2a = controller.add_switch("s2a", speed, 2);
    let s2b = controller.add_switch("s2b", speed, 2);
    let s3 = controller.add_switch("s3", speed, 4);
    controller.connect(h1, s1).unwrap();
    controller.connect(s1, s2a).unwrap();
    controller.connect(s1, s2b).unwrap();
    controller.connect(s2a, s3).unwrap();
    controller.connect(s2b, s3).unwrap();
    controller.connect(s3, h2).unwrap();

    let flow = controller
        .start_flow(h1, h2, DataRate::from_kbps(800.))
        .unwrap();
    controller.await_stability().unwrap();

    assert_rate_eq(flow.throughput(), 800.);
    assert_eq!(controller.route_towards(s1, h2).unwrap().len(), 2);
    assert_rate_eq(port_towards(controller.network(), s1, s2a).total_outgoing_rate(), 400.);
    assert_rate_eq(port_towards(controller.network(), s1, s2b).total_outgoing_rate(), 400.);
    assert_rate_eq(port_towards(controller.network(), s3, h2).total_outgoing_rate(), 800.);
    check_invariants(controller.network());
}

// S3 ------------------------------------------------------------------------------------------------------------------

#[test]
fn oversubscribed_link_splits_max_min() {
    let (mut controller, h1a, h1b, h2, s) = contention_topology(FairnessMode::MaxMin);

    let first = controller
        .start_flow(h1a, h2, DataRate::from_kbps(800.))
        .unwrap();
    controller.await_stability().unwrap();
    assert_rate_eq(first.throughput(), 800.);

    let second = controller
        .start_flow(h1b, h2, DataRate::from_kbps(800.))
        .unwrap();
    controller.await_stability().unwrap();

    assert_rate_eq(first.throughput(), 500.);
    assert_rate_eq(second.throughput(), 500.);
    assert_rate_eq(port_towards(controller.network(), s, h2).total_outgoing_rate(), 1000.);
    check_invariants(controller.network());

    let snapshot = controller.snapshot();
    assert_float_eq(snapshot.avg_flow_throughput_ratio.unwrap(), 0.625, 1e-9);
}

// S4 ------------------------------------------------------------------------------------------------------------------

#[test]
fn oversubscribed_link_serves_first_come_first() {
    let (mut controller, h1a, h1b, h2, s) = contention_topology(FairnessMode::FirstComeFirstServed);

    let first = controller
        .start_flow(h1a, h2, DataRate::from_kbps(800.))
        .unwrap();
    controller.await_stability().unwrap();

    let second = controller
        .start_flow(h1b, h2, DataRate::from_kbps(800.))
        .unwrap();
    controller.await_stability().unwrap();

    assert_rate_eq(first.throughput(), 800.);
    assert_rate_eq(second.throughput(), 200.);
    assert_rate_eq(port_towards(controller.network(), s, h2).total_outgoing_rate(), 1000.);
    check_invariants(controller.network());
}

// S5 ------------------------------------------------------------------------------------------------------------------

#[test]
fn stopping_a_flow_releases_its_share() {
    let (mut controller, h1a, h1b, h2, s) = contention_topology(FairnessMode::MaxMin);

    let first = controller
        .start_flow(h1a, h2, DataRate::from_kbps(800.))
        .unwrap();
    let second = controller
        .start_flow(h1b, h2, DataRate::from_kbps(800.))
        .unwrap();
    controller.await_stability().unwrap();
    assert_rate_eq(first.throughput(), 500.);
    assert_rate_eq(second.throughput(), 500.);

    controller.stop_flow(first.id()).unwrap();
    controller.await_stability().unwrap();

    assert_rate_eq(second.throughput(), 800.);
    assert_rate_eq(first.throughput(), 0.);
    assert!(controller.get_flow(first.id()).is_none());
    assert_eq!(controller.network().num_of_active_flows(), 1);
    let switch = controller.network().node(s).unwrap();
    assert!(switch.outgoing_rate_of(first.id()).is_zero());
    assert!(!switch.flow_handler().transit().contains(&first.id()));
    check_invariants(controller.network());
}

// S6 ------------------------------------------------------------------------------------------------------------------

#[test]
fn unroutable_flow_is_registered_at_zero_throughput() {
    let (mut controller, h1, _h2, s) = two_hosts_one_switch(FairnessMode::MaxMin);
    let stranded = controller.add_host("stranded", DataRate::from_kbps(1000.), 1);

    let flow = controller
        .start_flow(h1, stranded, DataRate::from_kbps(500.))
        .unwrap();
    controller.await_stability().unwrap();

    assert!(flow.throughput().is_zero());
    assert!(!controller.has_route(h1, stranded).unwrap());
    assert!(matches!(
        controller.route_towards(h1, stranded),
        Err(Error::NoRoute { .. })
    ));
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.num_of_active_flows, 1);

    // Wiring the stranded host in re-triggers propagation.
    controller.connect(stranded, s).unwrap();
    controller.await_stability().unwrap();
    assert_rate_eq(flow.throughput(), 500.);
    assert_eq!(controller.route_towards(h1, stranded).unwrap().len(), 1);
    check_invariants(controller.network());
}

// Errors --------------------------------------------------------------------------------------------------------------

#[test]
fn flow_between_unknown_nodes_is_rejected() {
    let (mut controller, h1, _h2, _s) = two_hosts_one_switch(FairnessMode::MaxMin);
    let err = controller
        .start_flow(h1, 999, DataRate::from_kbps(100.))
        .unwrap_err();
    assert!(matches!(err, Error::UnknownNode(999)));
    assert_eq!(controller.network().num_of_active_flows(), 0);

    let err = controller.stop_flow(42).unwrap_err();
    assert!(matches!(err, Error::UnknownFlow(42)));
}

#[test]
fn only_core_switches_reach_the_internet() {
    let mut controller = NetworkController::new();
    let h = controller.add_host("h", DataRate::from_kbps(1000.), 2);
    let internet = controller.internet();
    assert!(matches!(
        controller.connect(h, internet),
        Err(Error::InvalidTopology(_))
    ));
}

// Demand changes and damping ------------------------------------------------------------------------------------------

#[test]
fn demand_growth_does_not_claw_back_existing_allocations() {
    let (mut controller, h1a, h1b, h2, _s) = contention_topology(FairnessMode::MaxMin);

    let small = controller
        .start_flow(h1a, h2, DataRate::from_kbps(200.))
        .unwrap();
    let big = controller
        .start_flow(h1b, h2, DataRate::from_kbps(800.))
        .unwrap();
    controller.await_stability().unwrap();
    assert_rate_eq(small.throughput(), 200.);
    assert_rate_eq(big.throughput(), 800.);

    // The port is saturated and the contender set is unchanged, so the
    // grown demand waits instead of shrinking the established flow.
    controller
        .set_flow_demand(small.id(), DataRate::from_kbps(800.))
        .unwrap();
    controller.await_stability().unwrap();
    assert_rate_eq(small.throughput(), 200.);
    assert_rate_eq(big.throughput(), 800.);

    // A demand drop of the established flow frees capacity immediately.
    controller
        .set_flow_demand(big.id(), DataRate::from_kbps(300.))
        .unwrap();
    controller.await_stability().unwrap();
    assert_rate_eq(big.throughput(), 300.);
    assert_rate_eq(small.throughput(), 700.);
    check_invariants(controller.network());
}

#[test]
fn link_degradation_permits_reductions() {
    let (mut controller, h1a, h1b, h2, s) = contention_topology(FairnessMode::MaxMin);

    let first = controller
        .start_flow(h1a, h2, DataRate::from_kbps(800.))
        .unwrap();
    let second = controller
        .start_flow(h1b, h2, DataRate::from_kbps(800.))
        .unwrap();
    controller.await_stability().unwrap();
    assert_rate_eq(first.throughput(), 500.);
    assert_rate_eq(second.throughput(), 500.);

    let towards_h2 = {
        let port = port_towards(controller.network(), s, h2);
        dcflow_network::port::PortRef { node: s, port: port.index() }
    };
    controller
        .set_link_speed(towards_h2, DataRate::from_kbps(600.))
        .unwrap();
    controller.await_stability().unwrap();

    assert_rate_eq(first.throughput(), 300.);
    assert_rate_eq(second.throughput(), 300.);
    check_invariants(controller.network());
}

// Dynamic topology ----------------------------------------------------------------------------------------------------

#[test]
fn disconnect_reroutes_and_zeroes_stranded_flows() {
    let (mut controller, h1, h2, s) = two_hosts_one_switch(FairnessMode::MaxMin);

    let flow = controller
        .start_flow(h1, h2, DataRate::from_kbps(500.))
        .unwrap();
    controller.await_stability().unwrap();
    assert_rate_eq(flow.throughput(), 500.);

    let link = {
        let port = port_towards(controller.network(), s, h2);
        dcflow_network::port::PortRef { node: s, port: port.index() }
    };
    controller.disconnect(link).unwrap();
    controller.await_stability().unwrap();
    assert!(flow.throughput().is_zero());
    assert!(!controller.has_route(h1, h2).unwrap());
    assert_eq!(controller.network().num_of_active_flows(), 1);

    controller.connect(s, h2).unwrap();
    controller.await_stability().unwrap();
    assert_rate_eq(flow.throughput(), 500.);
    check_invariants(controller.network());
}

#[test]
fn parallel_links_survive_single_disconnect() {
    let mut controller = NetworkController::new();
    let h1 = controller.add_host("h1", DataRate::from_kbps(1000.), 2);
    let h2 = controller.add_host("h2", DataRate::from_kbps(1000.), 1);
    let s = controller.add_switch("s", DataRate::from_kbps(1000.), 4);
    let (first_link, _) = controller.connect(h1, s).unwrap();
    controller.connect(h1, s).unwrap();
    controller.connect(h2, s).unwrap();

    let flow = controller
        .start_flow(h1, h2, DataRate::from_kbps(800.))
        .unwrap();
    controller.await_stability().unwrap();
    assert_rate_eq(flow.throughput(), 800.);
    assert_eq!(controller.route_towards(h1, h2).unwrap().len(), 2);

    // The twin link keeps every destination reachable at the same distance,
    // so the purge alone suffices and the flow re-converges on one leg.
    controller.disconnect(first_link).unwrap();
    controller.await_stability().unwrap();
    assert_eq!(controller.route_towards(h1, h2).unwrap().len(), 1);
    assert_eq!(controller.route_towards(h1, s).unwrap().len(), 1);
    assert_rate_eq(flow.throughput(), 800.);
    check_invariants(controller.network());
}

// Internet ------------------------------------------------------------------------------------------------------------

#[test]
fn internet_flows_enter_through_core_switches() {
    let mut controller = NetworkController::new();
    let h = controller.add_host("h", DataRate::from_kbps(1000.), 1);
    let cs = controller.add_core_switch("cs", DataRate::from_kbps(1000.), 4);
    controller.connect(h, cs).unwrap();
    controller.connect(cs, controller.internet()).unwrap();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let log = seen.clone();
    let flow = controller
        .from_internet(
            h,
            DataRate::from_kbps(500.),
            Rc::new(move |_, old, new| log.borrow_mut().push((old.to_kbps(), new.to_kbps()))),
        )
        .unwrap();
    controller.await_stability().unwrap();

    assert_rate_eq(flow.throughput(), 500.);
    assert_eq!(*seen.borrow(), vec![(0., 500.)]);
    check_invariants(controller.network());
}

#[test]
fn internet_grows_ports_on_demand() {
    let mut controller = NetworkController::new();
    let speed = DataRate::from_kbps(1000.);
    let cs1 = controller.add_core_switch("cs1", speed, 2);
    let cs2 = controller.add_core_switch("cs2", speed, 2);
    let cs3 = controller.add_core_switch("cs3", speed, 2);
    for cs in [cs1, cs2, cs3] {
        controller.connect(cs, controller.internet()).unwrap();
    }
    let internet = controller.network().node(controller.internet()).unwrap();
    assert_eq!(internet.ports().len(), 3);
    assert!(internet.ports().iter().all(|p| p.is_connected()));
    assert!(internet.ports().iter().all(|p| p.max_speed().is_unlimited()));
}

// Stability and snapshots ---------------------------------------------------------------------------------------------

#[test]
fn await_stability_is_idempotent() {
    let (mut controller, h1, h2, _s) = two_hosts_one_switch(FairnessMode::MaxMin);
    controller
        .start_flow(h1, h2, DataRate::from_kbps(500.))
        .unwrap();
    controller.await_stability().unwrap();
    assert!(controller.network().validator().is_stable());
    controller.await_stability().unwrap();

    let first = serde_json::to_string(&controller.snapshot()).unwrap();
    let second = serde_json::to_string(&controller.snapshot()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn identical_runs_produce_identical_snapshots() {
    fn run() -> String {
        let (mut controller, h1a, h1b, h2, _s) = contention_topology(FairnessMode::MaxMin);
        controller
            .start_flow(h1a, h2, DataRate::from_kbps(800.))
            .unwrap();
        controller
            .start_flow(h1b, h2, DataRate::from_kbps(600.))
            .unwrap();
        controller.await_stability().unwrap();
        controller
            .start_flow(h2, h1a, DataRate::from_kbps(400.))
            .unwrap();
        controller.await_stability().unwrap();
        serde_json::to_string(&controller.snapshot()).unwrap()
    }
    assert_eq!(run(), run());
}

#[test]
fn stable_region_passes_values_through() {
    let (mut controller, h1, h2, _s) = two_hosts_one_switch(FairnessMode::MaxMin);
    controller
        .start_flow(h1, h2, DataRate::from_kbps(500.))
        .unwrap();
    controller.await_stability().unwrap();
    let flows = controller.check_is_stable_while(|| controller.network().num_of_active_flows());
    assert_eq!(flows, 1);
}

#[test]
fn self_loop_flows_are_delivered_locally() {
    let (mut controller, h1, _h2, _s) = two_hosts_one_switch(FairnessMode::MaxMin);
    let flow = controller
        .start_flow(h1, h1, DataRate::from_kbps(250.))
        .unwrap();
    controller.await_stability().unwrap();
    assert_rate_eq(flow.throughput(), 250.);
    assert!(controller.network().node(h1).unwrap().total_outgoing_rate().is_zero());
}

// Energy --------------------------------------------------------------------------------------------------------------

#[test]
fn energy_integrates_power_over_wall_time() {
    let (mut controller, h1, h2, s) = two_hosts_one_switch(FairnessMode::MaxMin);
    let clock = Rc::new(ManualClock::new(0.));
    controller.set_instant_source(clock.clone());

    controller
        .start_flow(h1, h2, DataRate::from_kbps(500.))
        .unwrap();
    let before = controller.snapshot();
    assert_eq!(before.timestamp_ms, 0);
    assert_eq!(before.total_energy_consumed_joule, 0.);
    let switch_power = before
        .node_records
        .iter()
        .find(|r| r.node_id == s)
        .unwrap()
        .power_draw_watts;
    assert!(switch_power > 0.);

    clock.advance(2000.);
    let after = controller.snapshot();
    assert_eq!(after.timestamp_ms, 2000);
    assert_float_eq(
        after.total_energy_consumed_joule,
        before.total_power_draw_watts * 2.,
        1e-9,
    );
    let switch_energy = after
        .node_records
        .iter()
        .find(|r| r.node_id == s)
        .unwrap()
        .energy_consumed_joule;
    assert_float_eq(switch_energy, switch_power * 2., 1e-9);
}

#[test]
fn power_observers_see_transitions() {
    let (mut controller, h1, h2, s) = two_hosts_one_switch(FairnessMode::MaxMin);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let log = seen.clone();
    controller
        .add_power_observer(
            s,
            Rc::new(move |old, new| log.borrow_mut().push((old.watts(), new.watts()))),
        )
        .unwrap();

    controller
        .start_flow(h1, h2, DataRate::from_kbps(500.))
        .unwrap();
    controller.await_stability().unwrap();

    let seen = seen.borrow();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, 0.);
    assert!(seen[0].1 > 0.);
}

// Topology specification ----------------------------------------------------------------------------------------------

#[test]
fn network_builds_from_json_spec() {
    let mut controller = NetworkController::from_json(
        r#"{
            "nodes": [
                {"kind": "host", "id": 0, "port_speed": 1000.0, "num_of_ports": 1},
                {"kind": "host", "id": 1, "port_speed": 1000.0, "num_of_ports": 1},
                {"kind": "switch", "id": 2, "port_speed": 1000.0, "num_of_ports": 4}
            ],
            "links": [{"a": 0, "b": 2}, {"a": 1, "b": 2}]
        }"#,
        FairnessMode::MaxMin,
    )
    .unwrap();

    let flow = controller
        .start_flow(0, 1, DataRate::from_kbps(500.))
        .unwrap();
    controller.await_stability().unwrap();
    assert_rate_eq(flow.throughput(), 500.);
    assert_eq!(controller.network().num_of_nodes(), 4); // three nodes plus the internet
    check_invariants(controller.network());
}

#[test]
fn json_spec_links_to_unknown_nodes_are_rejected() {
    let err = NetworkController::from_json(
        r#"{
            "nodes": [{"kind": "host", "id": 0, "port_speed": 1000.0, "num_of_ports": 1}],
            "links": [{"a": 0, "b": 5}]
        }"#,
        FairnessMode::MaxMin,
    )
    .unwrap_err();
    assert!(matches!(err, Error::UnknownNode(5)));
}
