//! Built-in scenario matrix

use crate::common::{HarnessConfig, Ports, ProtocolConfig, Result};
use crate::script::{Script, ScriptStep};

use super::{Scenario, ScenarioKind};

/// Every built-in scenario for the configured protocols and ports
///
/// Each protocol gets a direct transfer and the good SOCKS dialogues. The
/// bad SOCKS dialogues do not depend on the protocol and run once, against
/// the first configured protocol.
pub fn catalog(config: &HarnessConfig) -> Result<Vec<Scenario>> {
    let ports = &config.ports;
    let mut scenarios = Vec::new();

    for protocol in &config.protocols {
        scenarios.push(
            Scenario::new(
                format!("direct_{}", protocol.name),
                ScenarioKind::Direct {
                    args: direct_args(protocol, ports),
                },
            )
            .with_description("Transfer the test file through a server/client pair in one process"),
        );

        for (test, script) in good_socks_dialogues(ports)? {
            scenarios.push(Scenario::new(
                format!("socks_{}::{}", protocol.name, test),
                ScenarioKind::Socks {
                    client_args: socks_client_args(protocol, ports),
                    server_args: Some(server_args(protocol, ports)),
                    script,
                },
            ));
        }
    }

    if let Some(protocol) = config.protocols.first() {
        for (test, script) in bad_socks_dialogues(ports)? {
            scenarios.push(Scenario::new(
                format!("socks_bad::{}", test),
                ScenarioKind::Socks {
                    client_args: socks_client_args(protocol, ports),
                    server_args: None,
                    script,
                },
            ));
        }
    }

    Ok(scenarios)
}

fn loopback(port: u16) -> String {
    format!("127.0.0.1:{}", port)
}

fn direct_args(protocol: &ProtocolConfig, ports: &Ports) -> Vec<String> {
    let mut args = server_args(protocol, ports);
    args.extend([
        protocol.name.clone(),
        "client".to_string(),
        loopback(ports.entry),
        loopback(ports.server),
    ]);
    args.extend(protocol.client_extra.iter().cloned());
    args
}

fn server_args(protocol: &ProtocolConfig, ports: &Ports) -> Vec<String> {
    vec![
        protocol.name.clone(),
        "server".to_string(),
        loopback(ports.server),
        loopback(ports.exit),
    ]
}

fn socks_client_args(protocol: &ProtocolConfig, ports: &Ports) -> Vec<String> {
    let mut args = vec![
        protocol.name.clone(),
        "socks".to_string(),
        loopback(ports.entry),
    ];
    args.extend(protocol.client_extra.iter().cloned());
    args
}

fn lit(bytes: &[u8]) -> ScriptStep {
    ScriptStep::literal(bytes)
}

/// Dialogues a working SOCKS front end must complete
fn good_socks_dialogues(ports: &Ports) -> Result<Vec<(&'static str, Script)>> {
    let port = i64::from(ports.server);
    Ok(vec![
        (
            "socks4_transfer",
            Script::new(vec![
                ScriptStep::packed(&[4, 1, port, 127, 0, 0, 1, 0], "!BBH5B")?,
                ScriptStep::packed(&[0, 90, port, 127, 0, 0, 1], "!BBH4B")?,
            ])?,
        ),
        (
            "socks5_transfer",
            Script::new(vec![
                lit(b"\x05\x01\x00"),
                lit(b"\x05\x00"),
                ScriptStep::packed(&[5, 1, 0, 1, 127, 0, 0, 1, port], "!8BH")?,
                ScriptStep::packed(&[5, 0, 0, 1, 127, 0, 0, 1, port], "!8BH")?,
            ])?,
        ),
    ])
}

/// Dialogues after which the SOCKS front end must hang up
fn bad_socks_dialogues(ports: &Ports) -> Result<Vec<(&'static str, Script)>> {
    let port = i64::from(ports.server);
    let rejected = b"\x05\x07\x00\x01\x00\x00\x00\x00\x00\x00";
    Ok(vec![
        (
            "illformed",
            Script::new(vec![
                lit(b"GET / HTTP/1.1\r\nHost: 127.0.0.1\r\nConnection: close\r\n\r\n"),
                ScriptStep::ExpectDrop,
            ])?,
        ),
        (
            "socks4_unsupported_method_1",
            Script::new(vec![
                ScriptStep::packed(&[4, 2, port, 127, 0, 0, 1, 0], "!BBH5B")?,
                ScriptStep::ExpectDrop,
            ])?,
        ),
        (
            "socks5_bad_handshake_1",
            Script::new(vec![lit(b"\x05"), ScriptStep::ExpectDrop])?,
        ),
        (
            "socks5_bad_handshake_2",
            Script::new(vec![lit(b"\x05\x00"), ScriptStep::ExpectDrop])?,
        ),
        (
            "socks5_bad_handshake_3",
            Script::new(vec![lit(b"\x05\x01\x01"), ScriptStep::ExpectDrop])?,
        ),
        (
            "socks5_bad_handshake_4",
            Script::new(vec![lit(b"\x05\x01\x080"), ScriptStep::ExpectDrop])?,
        ),
        (
            "socks5_bad_handshake_5",
            Script::new(vec![lit(b"\x05\x02\x01\x02"), ScriptStep::ExpectDrop])?,
        ),
        (
            "socks5_good_handshake_1",
            Script::new(vec![lit(b"\x05\x01\x00"), lit(b"\x05\x00"), ScriptStep::ExpectDrop])?,
        ),
        (
            "socks5_good_handshake_2",
            Script::new(vec![lit(b"\x05\x02\x00\x01"), lit(b"\x05\x00"), ScriptStep::ExpectDrop])?,
        ),
        (
            "socks5_unsupported_method_1",
            Script::new(vec![
                lit(b"\x05\x01\x00"),
                lit(b"\x05\x00"),
                ScriptStep::packed(&[5, 2, 0, 1, 127, 0, 0, 1, port], "!8BH")?,
                lit(rejected),
                ScriptStep::ExpectDrop,
            ])?,
        ),
        (
            "socks5_unsupported_method_2",
            Script::new(vec![
                lit(b"\x05\x01\x00"),
                lit(b"\x05\x00"),
                ScriptStep::packed(&[5, 3, 0, 1, 127, 0, 0, 1, port], "!8BH")?,
                lit(rejected),
                ScriptStep::ExpectDrop,
            ])?,
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_names() {
        let config = HarnessConfig::default();
        let names: Vec<String> = catalog(&config).unwrap().into_iter().map(|s| s.name).collect();
        assert!(names.contains(&"direct_dummy".to_string()));
        assert!(names.contains(&"direct_x_dsteg".to_string()));
        assert!(names.contains(&"socks_x_dsteg::socks5_transfer".to_string()));
        assert!(names.contains(&"socks_bad::socks5_bad_handshake_5".to_string()));
        // 2 protocols x 3 + 11 bad dialogues
        assert_eq!(names.len(), 17);
    }

    #[test]
    fn test_direct_args_chain_server_then_client() {
        let config = HarnessConfig::default();
        let scenarios = catalog(&config).unwrap();
        let xdsteg = scenarios.iter().find(|s| s.name == "direct_x_dsteg").unwrap();
        match &xdsteg.kind {
            ScenarioKind::Direct { args } => assert_eq!(
                args,
                &[
                    "x_dsteg", "server", "127.0.0.1:5000", "127.0.0.1:5001",
                    "x_dsteg", "client", "127.0.0.1:4999", "127.0.0.1:5000", "x_http",
                ]
            ),
            other => panic!("Expected Direct, got {other:?}"),
        }
    }

    #[test]
    fn test_socks4_request_bytes() {
        let config = HarnessConfig::default();
        let scenarios = catalog(&config).unwrap();
        let socks4 = scenarios
            .iter()
            .find(|s| s.name == "socks_dummy::socks4_transfer")
            .unwrap();
        match &socks4.kind {
            ScenarioKind::Socks { script, server_args, .. } => {
                assert!(server_args.is_some());
                assert_eq!(
                    script.steps()[0].bytes(),
                    Some(&[4u8, 1, 0x13, 0x88, 127, 0, 0, 1, 0][..])
                );
            }
            other => panic!("Expected Socks, got {other:?}"),
        }
    }

    #[test]
    fn test_bad_dialogues_all_expect_drop() {
        let config = HarnessConfig::default();
        for scenario in catalog(&config).unwrap() {
            if let ScenarioKind::Socks { script, server_args: None, .. } = &scenario.kind {
                assert!(script.expects_drop(), "{} does not end in a drop", scenario.name);
            }
        }
    }
}
