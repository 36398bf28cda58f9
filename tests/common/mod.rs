//! Shared test infrastructure for palioxis integration tests.
//!
//! Provides fixture certificate paths (a pre-generated private CA with
//! server and client leaves under `tests/data/`), settings builders, and a
//! target-tree builder mirroring the spec scenarios.

#![allow(dead_code)]

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use palioxis::core::settings::{CertificatePaths, Settings};
use palioxis::net::tls::ClientStream;

/// Path to a file under `tests/data/`.
pub fn data(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/data")
        .join(name)
}

/// The fixture CA, server, and client material.
pub fn fixture_certs() -> CertificatePaths {
    CertificatePaths {
        ca_cert: data("ca.crt"),
        server_cert: data("server.crt"),
        server_key: data("server.key"),
        client_cert: data("client.crt"),
        client_key: data("client.key"),
    }
}

/// Agent settings bound to 127.0.0.1 on an ephemeral port, using the fixture
/// certificates, the fast destroyer with a single pass, and the given
/// targets.
pub fn agent_settings(key: &str, targets: &[&Path]) -> Settings {
    let dirs = targets
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join("\n");
    let certs = fixture_certs();
    let toml = format!(
        r#"
[Server]
host = "127.0.0.1"
port = 0
key = "{key}"

[Certificates]
ca_cert = "{ca}"
server_cert = "{server_cert}"
server_key = "{server_key}"
client_cert = "{client_cert}"
client_key = "{client_key}"

[Destroyer]
module = "fast"
fast_passes = 1

[Targets]
directories = """
{dirs}
"""
"#,
        ca = certs.ca_cert.display(),
        server_cert = certs.server_cert.display(),
        server_key = certs.server_key.display(),
        client_cert = certs.client_cert.display(),
        client_key = certs.client_key.display(),
    );
    Settings::from_toml_str(&toml).expect("fixture settings must parse")
}

/// Build the spec's happy-path target: a directory holding one 1024-byte
/// file named `a`. Returns the tree root.
pub fn make_target_tree(parent: &Path) -> PathBuf {
    let tree = parent.join("x");
    fs::create_dir(&tree).expect("create target tree");
    fs::write(tree.join("a"), vec![0x5Au8; 1024]).expect("write target file");
    tree
}

/// Read a raw response until the server closes the connection.
pub fn read_to_close(stream: &mut ClientStream) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
            Err(_) => break,
        }
    }
    buf
}
