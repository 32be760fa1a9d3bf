//! Fault-injection and topology invariants, exercised against a minimal
//! relay process: on a local injection it forwards the payload to a
//! configured peer address (or back to itself, for the self-addressed
//! case); on a network arrival it reports receipt as a local emission
//! so the test can observe delivery.

use std::time::Duration;

use serde_json::{Value, json};
use tokio::net::TcpListener;

use dst_controller::{Controller, ControllerConfig, StepResult};
use dst_shim::{Context, Message, Mode, Process, run_connected};
use dst_wire::{Envelope, LOCAL};

const TIMEOUT: Duration = Duration::from_secs(5);

struct Relay {
    /// `None` forwards back to this process's own address.
    peer_addr: Option<String>,
}

impl Process for Relay {
    type Payload = Value;

    fn receive(&mut self, ctx: &mut Context<Value>, msg: Message<Value>) {
        let body = msg.payload.unwrap_or(Value::Null);
        if msg.sender == LOCAL {
            let target = self.peer_addr.clone().unwrap_or_else(|| ctx.addr().to_string());
            ctx.send(&msg.kind, &body, &target);
        } else {
            ctx.send_local(&msg.kind, &body);
        }
    }

    fn on_timer(&mut self, _ctx: &mut Context<Value>, _name: &str) {}
}

async fn start_controller(seed: u64) -> (Controller, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let config = ControllerConfig {
        bind_addr: addr.clone(),
        seed,
        ..ControllerConfig::default()
    };
    (Controller::from_listener(config, listener).unwrap(), addr)
}

/// Spawns relay `b` first (so its address is known), then relay `a`
/// configured to forward to `b`. Local injections at `a` are what drive
/// these tests; `b` only ever reports arrivals.
async fn spawn_relay_pair(controller: &mut Controller, bind_addr: &str) {
    tokio::spawn(run_connected("b", Relay { peer_addr: None }, bind_addr.to_string(), Mode::Control));
    controller.wait_processes(1, TIMEOUT).await.unwrap();
    let b_addr = controller.get_process_addr("b").unwrap();

    tokio::spawn(run_connected("a", Relay { peer_addr: Some(b_addr) }, bind_addr.to_string(), Mode::Control));
    controller.wait_processes(2, TIMEOUT).await.unwrap();
    // Disable wall-clock pacing so these tests aren't paying real sleep
    // time for the scheduler's default 0.1s cross-process delay.
    controller.set_real_time_mode(false);
}

fn send_envelope(kind: &str, body: impl Into<Value>) -> Vec<u8> {
    Envelope::new(kind).with_sender(LOCAL).with_body(body.into()).encode()
}

#[tokio::test]
async fn no_drop_no_duplicate_multiset_equality() {
    let (mut controller, addr) = start_controller(1).await;
    spawn_relay_pair(&mut controller, &addr).await;

    let bodies = ["m0", "m1", "m2", "m3"];
    for body in &bodies {
        controller
            .send_local_message("a", send_envelope("RELAY", json!(*body)), TIMEOUT)
            .await
            .unwrap();
    }

    controller.step_until_no_events(TIMEOUT).await.unwrap();

    let mut received: Vec<String> = Vec::new();
    while let Some(raw) = controller.take_local_message("b") {
        let env = Envelope::decode(&raw).unwrap();
        received.push(env.body.unwrap().as_str().unwrap().to_string());
    }
    received.sort();
    let mut expected: Vec<String> = bodies.iter().map(|s| s.to_string()).collect();
    expected.sort();
    assert_eq!(received, expected);
}

#[tokio::test]
async fn drop_rate_one_never_delivers_but_still_progresses() {
    let (mut controller, addr) = start_controller(2).await;
    spawn_relay_pair(&mut controller, &addr).await;

    controller.set_message_drop_rate(1.0);
    controller
        .send_local_message("a", send_envelope("RELAY", json!("never")), TIMEOUT)
        .await
        .unwrap();

    let result = controller.step_until_no_events(TIMEOUT).await.unwrap();
    assert_eq!(result, StepResult::Idle);
    assert_eq!(controller.local_message_count("b"), 0);
}

#[tokio::test]
async fn repeat_rate_one_delivers_k_plus_one_copies() {
    let (mut controller, addr) = start_controller(3).await;
    spawn_relay_pair(&mut controller, &addr).await;

    controller.set_repeat_rate(1.0, 2);
    controller
        .send_local_message("a", send_envelope("RELAY", json!("dup-me")), TIMEOUT)
        .await
        .unwrap();

    controller.step_until_no_events(TIMEOUT).await.unwrap();

    let mut count = 0;
    while controller.take_local_message("b").is_some() {
        count += 1;
    }
    assert_eq!(count, 3, "repeat_times=2 should deliver the original plus 2 copies");
}

#[tokio::test]
async fn crashed_process_never_receives_in_flight_messages() {
    let (mut controller, addr) = start_controller(4).await;
    spawn_relay_pair(&mut controller, &addr).await;

    controller
        .send_local_message("a", send_envelope("RELAY", json!("too late")), TIMEOUT)
        .await
        .unwrap();
    assert!(controller.event_count() > 0, "the relay message should be pending");

    controller.crash_process("b");
    let result = controller.step_until_no_events(TIMEOUT).await.unwrap();
    assert_eq!(result, StepResult::Idle);
    assert_eq!(controller.local_message_count("b"), 0);
}

#[tokio::test]
async fn partitioned_link_blocks_until_reset() {
    let (mut controller, addr) = start_controller(5).await;
    spawn_relay_pair(&mut controller, &addr).await;

    controller.partition_network(&["a".to_string()], &["b".to_string()]);
    controller
        .send_local_message("a", send_envelope("RELAY", json!("blocked")), TIMEOUT)
        .await
        .unwrap();
    controller.step_until_no_events(TIMEOUT).await.unwrap();
    assert_eq!(controller.local_message_count("b"), 0);

    controller.reset_network();
    controller
        .send_local_message("a", send_envelope("RELAY", json!("through")), TIMEOUT)
        .await
        .unwrap();
    controller.step_until_no_events(TIMEOUT).await.unwrap();
    assert_eq!(controller.local_message_count("b"), 1);
    let raw = controller.take_local_message("b").unwrap();
    assert_eq!(Envelope::decode(&raw).unwrap().body, Some(json!("through")));
}

#[tokio::test]
async fn self_addressed_message_has_zero_default_delay() {
    let (mut controller, addr) = start_controller(6).await;

    tokio::spawn(run_connected("solo", Relay { peer_addr: None }, addr.clone(), Mode::Control));
    controller.wait_processes(1, TIMEOUT).await.unwrap();

    controller
        .send_local_message("solo", send_envelope("RELAY", json!("echo")), TIMEOUT)
        .await
        .unwrap();
    assert_eq!(controller.now(), 0.0, "no events dispatched yet");

    let result = controller.step(TIMEOUT).await.unwrap();
    assert_eq!(result, StepResult::Progressed);
    assert_eq!(controller.now(), 0.0, "self-addressed messages carry zero default delay");
    assert_eq!(controller.local_message_count("solo"), 1);
}
