//! Node-list parsing: one `host port key` triple per line.
//!
//! Empty lines and `#` comments are ignored. Malformed entries are carried
//! through as per-node failures rather than aborting the run — the client's
//! job is to reach as much of the fleet as it can.

#![allow(missing_docs)]

use std::fs;
use std::path::Path;

use crate::core::errors::{PalioxisError, Result};

/// One reachable agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub host: String,
    pub port: u16,
    pub key: String,
}

/// A node-list line after parsing: usable, or recorded as malformed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeSpec {
    Valid(Node),
    Invalid {
        /// 1-based line number in the list file.
        line: usize,
        raw: String,
        reason: String,
    },
}

/// Parse node-list text. The result preserves file order.
#[must_use]
pub fn parse_node_list(raw: &str) -> Vec<NodeSpec> {
    let mut specs = Vec::new();

    for (index, line) in raw.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let mut fields = trimmed.split_whitespace();
        let (Some(host), Some(port_raw), Some(key)) =
            (fields.next(), fields.next(), fields.next())
        else {
            specs.push(NodeSpec::Invalid {
                line: index + 1,
                raw: trimmed.to_string(),
                reason: "expected `host port key`".to_string(),
            });
            continue;
        };

        let Ok(port) = port_raw.parse::<u16>() else {
            specs.push(NodeSpec::Invalid {
                line: index + 1,
                raw: trimmed.to_string(),
                reason: format!("bad port `{port_raw}`"),
            });
            continue;
        };

        specs.push(NodeSpec::Valid(Node {
            host: host.to_string(),
            port,
            key: key.to_string(),
        }));
    }

    specs
}

/// Load and parse a node-list file.
pub fn load_node_list(path: &Path) -> Result<Vec<NodeSpec>> {
    if !path.exists() {
        return Err(PalioxisError::ConfigMissing {
            what: format!("node list {}", path.display()),
        });
    }
    let raw = fs::read_to_string(path).map_err(|source| PalioxisError::io(path, source))?;
    Ok(parse_node_list(&raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_triples_in_order() {
        let specs = parse_node_list("10.0.0.1 8443 OHSNAP\nagent.example 9443 KEY2\n");
        assert_eq!(specs.len(), 2);
        assert_eq!(
            specs[0],
            NodeSpec::Valid(Node {
                host: "10.0.0.1".to_string(),
                port: 8443,
                key: "OHSNAP".to_string(),
            })
        );
        assert_eq!(
            specs[1],
            NodeSpec::Valid(Node {
                host: "agent.example".to_string(),
                port: 9443,
                key: "KEY2".to_string(),
            })
        );
    }

    #[test]
    fn skips_comments_and_blank_lines() {
        let specs = parse_node_list("# fleet\n\n   \n10.0.0.1 8443 K\n  # tail comment\n");
        assert_eq!(specs.len(), 1);
    }

    #[test]
    fn short_lines_are_invalid_not_fatal() {
        let specs = parse_node_list("10.0.0.1 8443\nok.example 8443 KEY\n");
        assert_eq!(specs.len(), 2);
        match &specs[0] {
            NodeSpec::Invalid { line, reason, .. } => {
                assert_eq!(*line, 1);
                assert!(reason.contains("host port key"));
            }
            NodeSpec::Valid(_) => panic!("expected invalid entry"),
        }
        assert!(matches!(specs[1], NodeSpec::Valid(_)));
    }

    #[test]
    fn non_numeric_port_is_invalid() {
        let specs = parse_node_list("10.0.0.1 https OHSNAP\n");
        match &specs[0] {
            NodeSpec::Invalid { reason, .. } => assert!(reason.contains("bad port")),
            NodeSpec::Valid(_) => panic!("expected invalid entry"),
        }
    }

    #[test]
    fn extra_fields_are_ignored() {
        // Keys cannot contain whitespace; trailing tokens are commentary.
        let specs = parse_node_list("10.0.0.1 8443 KEY primary-rack\n");
        assert_eq!(
            specs[0],
            NodeSpec::Valid(Node {
                host: "10.0.0.1".to_string(),
                port: 8443,
                key: "KEY".to_string(),
            })
        );
    }

    #[test]
    fn missing_file_is_config_missing() {
        let err = load_node_list(Path::new("/no/such/nodes.txt")).unwrap_err();
        assert_eq!(err.code(), "PLX-1001");
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.txt");
        fs::write(&path, "127.0.0.1 8443 OHSNAP\n").unwrap();
        let specs = load_node_list(&path).unwrap();
        assert_eq!(specs.len(), 1);
    }
}
