//! End-to-end control-channel scenarios over loopback mTLS: trigger
//! acceptance, every rejection path, and fleet dispatch.

mod common;

use std::io::Write;
use std::net::TcpListener;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use palioxis::client::dispatch::Dispatcher;
use palioxis::client::nodes::{self, Node};
use palioxis::core::settings::Settings;
use palioxis::logger::audit::AuditLog;
use palioxis::net::codec;
use palioxis::net::dpop::ProofSigner;
use palioxis::net::tls::TlsClient;
use palioxis::server::Server;
use palioxis::server::trigger::NoopPower;

struct Agent {
    port: u16,
    power: Arc<NoopPower>,
    handle: thread::JoinHandle<palioxis::core::errors::Result<()>>,
    settings: Settings,
}

impl Agent {
    fn spawn(key: &str, targets: &[&Path]) -> Self {
        let settings = common::agent_settings(key, targets);
        let mut server = Server::new(&settings, AuditLog::discard()).expect("server must build");
        let power = Arc::new(NoopPower::new());
        server.set_power(power.clone());
        let port = server.local_addr().unwrap().port();
        let handle = thread::spawn(move || server.run());
        Self {
            port,
            power,
            handle,
            settings,
        }
    }

    fn node(&self, key: &str) -> Node {
        Node {
            host: "127.0.0.1".to_string(),
            port: self.port,
            key: key.to_string(),
        }
    }

    fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(&self.settings, AuditLog::discard()).expect("dispatcher must build")
    }

    fn destroy_url(&self) -> String {
        format!("https://127.0.0.1:{}/destroy", self.port)
    }

    /// Send a raw pre-framed request and return (status, message).
    fn send_raw(&self, raw: &[u8]) -> (u16, String) {
        let client = TlsClient::new(&common::fixture_certs(), Duration::from_secs(5)).unwrap();
        let mut stream = client.connect("127.0.0.1", self.port).unwrap();
        stream.write_all(raw).unwrap();
        stream.flush().unwrap();
        let response = common::read_to_close(&mut stream);
        codec::parse_response(&response).expect("parsable response")
    }

    /// Fire a valid trigger so the serve loop ends, then join.
    fn trigger_and_join(self, key: &str) {
        let (code, _) = self.dispatcher().send_signal(&self.node(key)).unwrap();
        assert_eq!(code, 200);
        self.handle.join().unwrap().unwrap();
        assert_eq!(self.power.halt_count(), 1);
    }
}

fn client_signer() -> ProofSigner {
    ProofSigner::from_key_file(&common::data("client.key")).unwrap()
}

fn now_epoch() -> i64 {
    i64::try_from(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs(),
    )
    .unwrap()
}

// ──────────────────── scenarios ────────────────────

#[test]
fn happy_path_destroys_targets_and_halts_once() {
    let dir = tempfile::tempdir().unwrap();
    let tree = common::make_target_tree(dir.path());
    let agent = Agent::spawn("OHSNAP", &[&tree]);

    let (code, message) = agent
        .dispatcher()
        .send_signal(&agent.node("OHSNAP"))
        .unwrap();
    assert_eq!(code, 200);
    assert!(message.contains("self-destruct"), "got: {message}");

    agent.handle.join().unwrap().unwrap();
    assert!(!tree.exists(), "target tree must be gone");
    assert_eq!(agent.power.halt_count(), 1, "shutdown exactly once");
}

#[test]
fn wrong_key_gets_403_and_server_keeps_listening() {
    let dir = tempfile::tempdir().unwrap();
    let tree = common::make_target_tree(dir.path());
    let agent = Agent::spawn("OHSNAP", &[&tree]);

    let (code, _) = agent.dispatcher().send_signal(&agent.node("NOPE")).unwrap();
    assert_eq!(code, 403);
    assert!(tree.exists(), "no destroyer invocation on key mismatch");
    assert_eq!(agent.power.halt_count(), 0);

    // Still listening: the real key works on the next connection.
    agent.trigger_and_join("OHSNAP");
    assert!(!tree.exists());
}

#[test]
fn missing_dpop_header_gets_401() {
    let dir = tempfile::tempdir().unwrap();
    let tree = common::make_target_tree(dir.path());
    let agent = Agent::spawn("OHSNAP", &[&tree]);

    let body = b"OHSNAP";
    let mut raw = format!(
        "POST /destroy HTTP/1.1\r\nHost: 127.0.0.1:{}\r\nContent-Length: {}\r\n\r\n",
        agent.port,
        body.len()
    )
    .into_bytes();
    raw.extend_from_slice(body);

    let (code, _) = agent.send_raw(&raw);
    assert_eq!(code, 401);
    assert!(tree.exists());

    agent.trigger_and_join("OHSNAP");
}

#[test]
fn expired_proof_gets_401() {
    let dir = tempfile::tempdir().unwrap();
    let tree = common::make_target_tree(dir.path());
    let agent = Agent::spawn("OHSNAP", &[&tree]);

    let token = client_signer()
        .proof_at("POST", &agent.destroy_url(), now_epoch() - 400)
        .unwrap();
    let raw = codec::render_request("127.0.0.1", agent.port, &token, b"OHSNAP");

    let (code, _) = agent.send_raw(&raw);
    assert_eq!(code, 401);
    assert!(tree.exists());

    agent.trigger_and_join("OHSNAP");
}

#[test]
fn proof_from_a_foreign_key_gets_401() {
    // Well-formed and fresh, but signed by a key that is not the mTLS
    // client certificate's key.
    let dir = tempfile::tempdir().unwrap();
    let tree = common::make_target_tree(dir.path());
    let agent = Agent::spawn("OHSNAP", &[&tree]);

    let rogue = ProofSigner::from_key_file(&common::data("other_rsa.key")).unwrap();
    let token = rogue.proof("POST", &agent.destroy_url()).unwrap();
    let raw = codec::render_request("127.0.0.1", agent.port, &token, b"OHSNAP");

    let (code, _) = agent.send_raw(&raw);
    assert_eq!(code, 401);
    assert!(tree.exists());

    agent.trigger_and_join("OHSNAP");
}

#[test]
fn wrong_method_gets_405_after_authentication() {
    let dir = tempfile::tempdir().unwrap();
    let tree = common::make_target_tree(dir.path());
    let agent = Agent::spawn("OHSNAP", &[&tree]);

    // The proof itself binds GET, so DPoP verification passes and the
    // method check is what rejects.
    let token = client_signer().proof("GET", &agent.destroy_url()).unwrap();
    let raw = format!(
        "GET /destroy HTTP/1.1\r\nHost: 127.0.0.1:{}\r\nDPoP: {token}\r\nContent-Length: 6\r\n\r\nOHSNAP",
        agent.port
    );

    let (code, _) = agent.send_raw(raw.as_bytes());
    assert_eq!(code, 405);
    assert!(tree.exists());

    agent.trigger_and_join("OHSNAP");
}

#[test]
fn replayed_proof_gets_401_on_second_use() {
    let dir = tempfile::tempdir().unwrap();
    let tree = common::make_target_tree(dir.path());
    let agent = Agent::spawn("OHSNAP", &[&tree]);

    let token = client_signer().proof("POST", &agent.destroy_url()).unwrap();

    // First use with a wrong key: authenticates (caching the jti), then 403.
    let raw = codec::render_request("127.0.0.1", agent.port, &token, b"NOPE");
    let (code, _) = agent.send_raw(&raw);
    assert_eq!(code, 403);

    // Same proof again, now with the right key: replay is caught first.
    let raw = codec::render_request("127.0.0.1", agent.port, &token, b"OHSNAP");
    let (code, _) = agent.send_raw(&raw);
    assert_eq!(code, 401);
    assert!(tree.exists());

    agent.trigger_and_join("OHSNAP");
}

#[test]
fn malformed_request_gets_400() {
    let dir = tempfile::tempdir().unwrap();
    let tree = common::make_target_tree(dir.path());
    let agent = Agent::spawn("OHSNAP", &[&tree]);

    let (code, _) = agent.send_raw(b"definitely not a request\r\n\r\n");
    assert_eq!(code, 400);
    assert!(tree.exists());

    agent.trigger_and_join("OHSNAP");
}

#[test]
fn fleet_dispatch_aggregates_mixed_outcomes() {
    let dir = tempfile::tempdir().unwrap();
    let tree = common::make_target_tree(dir.path());
    let agent = Agent::spawn("OHSNAP", &[&tree]);

    // A port with nothing listening: bind ephemeral, then free it.
    let dead_port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let nodes_file = dir.path().join("nodes.txt");
    std::fs::write(
        &nodes_file,
        format!(
            "# fleet\n127.0.0.1 {} OHSNAP\n127.0.0.1 {} OHSNAP\nmalformed-line\n",
            agent.port, dead_port
        ),
    )
    .unwrap();

    let specs = nodes::load_node_list(&nodes_file).unwrap();
    assert_eq!(specs.len(), 3);

    let result = agent.dispatcher().dispatch(&specs);
    assert_eq!(result.outcomes.len(), 3);
    assert!(result.outcomes[0].success, "{}", result.outcomes[0].message);
    assert!(!result.outcomes[1].success);
    assert!(!result.outcomes[2].success);
    assert_eq!(result.summary(), "Processed 3 node(s): 1 succeeded, 2 failed");
    // Lenient fleet semantics: one acceptance makes the run a success.
    assert!(result.is_success());

    agent.handle.join().unwrap().unwrap();
    assert!(!tree.exists());
    assert_eq!(agent.power.halt_count(), 1);
}

#[test]
fn idle_shutdown_request_stops_the_listener() {
    let dir = tempfile::tempdir().unwrap();
    let tree = common::make_target_tree(dir.path());

    let settings = common::agent_settings("OHSNAP", &[&tree]);
    let server = Server::new(&settings, AuditLog::discard()).unwrap();
    let signals = server.signal_handler();
    let handle = thread::spawn(move || server.run());

    // The accept loop polls, so the flag alone is enough to stop it.
    signals.request_shutdown();

    handle.join().unwrap().unwrap();
    assert!(tree.exists(), "idle shutdown must not destroy anything");
}
