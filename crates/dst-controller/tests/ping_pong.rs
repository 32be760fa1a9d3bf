//! Clean-path, drop-then-retry, and reordering-tolerant delivery: a
//! minimal ping/pong pair of processes driven through a real shim over
//! a loopback `TcpStream`, exercising the actual wire protocol rather
//! than calling controller internals directly.

use std::time::Duration;

use serde_json::json;
use tokio::net::TcpListener;

use dst_controller::{Controller, ControllerConfig, StepResult};
use dst_shim::{Context, Message, Mode, Process, run_connected};
use dst_wire::{Envelope, LOCAL};

const TIMEOUT: Duration = Duration::from_secs(5);

struct PingClient {
    server_addr: String,
    last_body: Option<String>,
}

impl Process for PingClient {
    type Payload = String;

    fn receive(&mut self, ctx: &mut Context<String>, msg: Message<String>) {
        match msg.kind.as_str() {
            "PING" if msg.sender == LOCAL => {
                let body = msg.payload.unwrap_or_default();
                self.last_body = Some(body.clone());
                ctx.send("PING", &body, &self.server_addr);
                ctx.set_timer("retry", 1.0);
            }
            "PONG" => {
                ctx.cancel_timer("retry");
                ctx.send_local("PONG", &msg.payload.unwrap_or_default());
            }
            _ => {}
        }
    }

    fn on_timer(&mut self, ctx: &mut Context<String>, name: &str) {
        if name == "retry" {
            if let Some(body) = self.last_body.clone() {
                ctx.send("PING", &body, &self.server_addr);
                ctx.set_timer("retry", 1.0);
            }
        }
    }
}

struct PingServer;

impl Process for PingServer {
    type Payload = String;

    fn receive(&mut self, ctx: &mut Context<String>, msg: Message<String>) {
        if msg.kind == "PING" {
            ctx.send("PONG", &msg.payload.unwrap_or_default(), &msg.sender);
        }
    }

    fn on_timer(&mut self, _ctx: &mut Context<String>, _name: &str) {}
}

async fn start_controller() -> (Controller, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let config = ControllerConfig {
        bind_addr: addr.clone(),
        seed: 1,
        ..ControllerConfig::default()
    };
    (Controller::from_listener(config, listener).unwrap(), addr)
}

/// Spawns the server, waits for its handshake, then spawns the client
/// wired to the server's bound address. Returns once both have joined.
async fn spawn_ping_pong(controller: &mut Controller, bind_addr: &str) {
    tokio::spawn(run_connected("server", PingServer, bind_addr.to_string(), Mode::Control));
    controller.wait_processes(1, TIMEOUT).await.unwrap();
    let server_addr = controller.get_process_addr("server").unwrap();

    tokio::spawn(run_connected(
        "client",
        PingClient { server_addr, last_body: None },
        bind_addr.to_string(),
        Mode::Control,
    ));
    controller.wait_processes(2, TIMEOUT).await.unwrap();
}

fn ping_envelope(body: &str) -> Vec<u8> {
    Envelope::new("PING").with_sender(LOCAL).with_body(json!(body)).encode()
}

#[tokio::test]
async fn ping_pong_clean_path() {
    let (mut controller, addr) = start_controller().await;
    spawn_ping_pong(&mut controller, &addr).await;

    controller
        .send_local_message("client", ping_envelope("Hello!"), TIMEOUT)
        .await
        .unwrap();

    let result = controller.step_until_local_message("client", TIMEOUT).await.unwrap();
    assert_eq!(result, StepResult::Progressed);

    let raw = controller.take_local_message("client").unwrap();
    let pong = Envelope::decode(&raw).unwrap();
    assert_eq!(pong.kind, "PONG");
    assert_eq!(pong.body, Some(json!("Hello!")));
}

#[tokio::test]
async fn ping_lost_then_retried() {
    let (mut controller, addr) = start_controller().await;
    spawn_ping_pong(&mut controller, &addr).await;

    controller
        .send_local_message("client", ping_envelope("Hello!"), TIMEOUT)
        .await
        .unwrap();

    controller.set_message_drop_rate(1.0);
    controller.step(TIMEOUT).await.unwrap();
    controller.set_message_drop_rate(0.0);

    let result = controller
        .step_until_local_message("client", Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(result, StepResult::Progressed);

    let raw = controller.take_local_message("client").unwrap();
    let pong = Envelope::decode(&raw).unwrap();
    assert_eq!(pong.kind, "PONG");
    assert_eq!(pong.body, Some(json!("Hello!")));
}

#[tokio::test]
async fn reordering_still_delivers_the_pong() {
    let (mut controller, addr) = start_controller().await;
    spawn_ping_pong(&mut controller, &addr).await;

    controller.set_event_reordering(true);
    controller.set_real_time_mode(false);

    controller
        .send_local_message("client", ping_envelope("Hello!"), TIMEOUT)
        .await
        .unwrap();

    let mut delivered = false;
    for _ in 0..100 {
        if controller.local_message_count("client") > 0 {
            delivered = true;
            break;
        }
        if controller.step(TIMEOUT).await.unwrap() == StepResult::Idle {
            break;
        }
    }
    assert!(delivered, "expected a PONG within 100 steps under reordering");

    let raw = controller.take_local_message("client").unwrap();
    let pong = Envelope::decode(&raw).unwrap();
    assert_eq!(pong.kind, "PONG");
    assert_eq!(pong.body, Some(json!("Hello!")));
}
