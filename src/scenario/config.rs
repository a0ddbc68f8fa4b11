//! Scenario file format
//!
//! Defines the data structures for deserializing YAML scenarios and turns
//! them into runnable [`Scenario`]s for a given port block.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::common::{Error, Ports, Result};
use crate::script::{Script, ScriptStep};

use super::{Scenario, ScenarioKind};

/// A scenario loaded from a YAML file
#[derive(Deserialize, Debug)]
pub struct ScenarioFile {
    /// Name of the scenario
    pub name: String,
    /// Optional description of what the scenario checks
    pub description: Option<String>,
    /// What to run, selected by the `kind` key
    #[serde(flatten)]
    pub body: ScenarioBody,
}

/// Scenario body; argv entries may use `{entry_port}`, `{server_port}`
/// and `{exit_port}`
#[derive(Deserialize, Debug)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScenarioBody {
    Direct {
        args: Vec<String>,
    },
    Socks {
        client_args: Vec<String>,
        server_args: Option<Vec<String>>,
        script: Vec<StepEntry>,
    },
    Timeline {
        /// Relative paths are taken from the scenario file's directory
        script_file: PathBuf,
        proxy_args: Vec<String>,
    },
}

/// One script step as written in YAML
#[derive(Deserialize, Debug)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum StepEntry {
    /// Each character is one byte (`"\x05\x01\x00"`); characters above
    /// U+00FF are rejected
    Literal { data: String },
    /// Hex digits, whitespace ignored
    Hex { data: String },
    /// Binary record packed from integers or port names
    Packed { format: String, values: Vec<PackValue> },
    /// The peer must hang up here
    Drop,
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
pub enum PackValue {
    Int(i64),
    Port(PortName),
}

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum PortName {
    EntryPort,
    ServerPort,
    ExitPort,
}

impl PortName {
    fn resolve(self, ports: &Ports) -> u16 {
        match self {
            Self::EntryPort => ports.entry,
            Self::ServerPort => ports.server,
            Self::ExitPort => ports.exit,
        }
    }
}

impl ScenarioFile {
    pub fn parse(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Build a runnable scenario; `base_dir` anchors relative script files
    pub fn into_scenario(self, ports: &Ports, base_dir: &Path) -> Result<Scenario> {
        let substitute = |args: Vec<String>| -> Vec<String> {
            args.iter().map(|arg| ports.substitute(arg)).collect()
        };

        let kind = match self.body {
            ScenarioBody::Direct { args } => ScenarioKind::Direct {
                args: substitute(args),
            },
            ScenarioBody::Socks {
                client_args,
                server_args,
                script,
            } => {
                let steps = script
                    .into_iter()
                    .map(|step| step.into_step(ports))
                    .collect::<Result<Vec<_>>>()?;
                ScenarioKind::Socks {
                    client_args: substitute(client_args),
                    server_args: server_args.map(substitute),
                    script: Script::new(steps)?,
                }
            }
            ScenarioBody::Timeline {
                script_file,
                proxy_args,
            } => ScenarioKind::Timeline {
                script_file: if script_file.is_absolute() {
                    script_file
                } else {
                    base_dir.join(script_file)
                },
                proxy_args: substitute(proxy_args),
            },
        };

        Ok(Scenario {
            name: self.name,
            description: self.description,
            kind,
        })
    }
}

impl StepEntry {
    fn into_step(self, ports: &Ports) -> Result<ScriptStep> {
        match self {
            Self::Literal { data } => Ok(ScriptStep::literal(latin1_bytes(&data)?)),
            Self::Hex { data } => Ok(ScriptStep::literal(hex_bytes(&data)?)),
            Self::Packed { format, values } => {
                let values: Vec<i64> = values
                    .into_iter()
                    .map(|value| match value {
                        PackValue::Int(n) => n,
                        PackValue::Port(name) => i64::from(name.resolve(ports)),
                    })
                    .collect();
                ScriptStep::packed(&values, &format)
            }
            Self::Drop => Ok(ScriptStep::ExpectDrop),
        }
    }
}

fn latin1_bytes(text: &str) -> Result<Vec<u8>> {
    text.chars()
        .map(|c| {
            u8::try_from(u32::from(c)).map_err(|_| {
                Error::Script(format!(
                    "literal contains {:?}, which is not a single byte; use a hex step",
                    c
                ))
            })
        })
        .collect()
}

fn hex_bytes(text: &str) -> Result<Vec<u8>> {
    let digits: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    hex::decode(&digits).map_err(|e| Error::Script(format!("invalid hex in {:?}: {}", text, e)))
}

/// Load a scenario file and bind it to `ports`
pub fn load_scenario(path: &Path, ports: &Ports) -> Result<Scenario> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
        path: path.display().to_string(),
        error: e.to_string(),
    })?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    ScenarioFile::parse(&content)?.into_scenario(ports, base_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOCKS5: &str = r#"
name: socks5_by_hand
description: SOCKS5 CONNECT to the server-side proxy
kind: socks
client_args: [dummy, socks, "127.0.0.1:{entry_port}"]
server_args: [dummy, server, "127.0.0.1:{server_port}", "127.0.0.1:{exit_port}"]
script:
  - step: literal
    data: "\x05\x01\x00"
  - step: hex
    data: "05 00"
  - step: packed
    format: "!8BH"
    values: [5, 1, 0, 1, 127, 0, 0, 1, server_port]
  - step: packed
    format: "!8BH"
    values: [5, 0, 0, 1, 127, 0, 0, 1, server_port]
"#;

    #[test]
    fn test_socks_file_binds_ports() {
        let ports = Ports::block(6000).unwrap();
        let scenario = ScenarioFile::parse(SOCKS5)
            .unwrap()
            .into_scenario(&ports, Path::new("."))
            .unwrap();
        assert_eq!(scenario.name, "socks5_by_hand");
        match scenario.kind {
            ScenarioKind::Socks {
                client_args,
                server_args,
                script,
            } => {
                assert_eq!(client_args[2], "127.0.0.1:6000");
                assert_eq!(server_args.unwrap()[3], "127.0.0.1:6002");
                assert_eq!(script.steps()[0].bytes(), Some(&[5u8, 1, 0][..]));
                assert_eq!(script.steps()[1].bytes(), Some(&[5u8, 0][..]));
                assert_eq!(
                    script.steps()[2].bytes(),
                    Some(&[5u8, 1, 0, 1, 127, 0, 0, 1, 0x17, 0x71][..])
                );
            }
            other => panic!("Expected Socks, got {other:?}"),
        }
    }

    #[test]
    fn test_drop_step_and_missing_server() {
        let yaml = r#"
name: bad
kind: socks
client_args: [dummy, socks, "127.0.0.1:{entry_port}"]
script:
  - step: literal
    data: "\x05"
  - step: drop
"#;
        let scenario = ScenarioFile::parse(yaml)
            .unwrap()
            .into_scenario(&Ports::default(), Path::new("."))
            .unwrap();
        match scenario.kind {
            ScenarioKind::Socks {
                server_args, script, ..
            } => {
                assert!(server_args.is_none());
                assert!(script.expects_drop());
            }
            other => panic!("Expected Socks, got {other:?}"),
        }
    }

    #[test]
    fn test_timeline_path_is_relative_to_file() {
        let yaml = r#"
name: replay
kind: timeline
script_file: timelines/basic.tl
proxy_args: [dummy, socks, "127.0.0.1:{entry_port}"]
"#;
        let scenario = ScenarioFile::parse(yaml)
            .unwrap()
            .into_scenario(&Ports::default(), Path::new("/srv/scenarios"))
            .unwrap();
        match scenario.kind {
            ScenarioKind::Timeline { script_file, .. } => {
                assert_eq!(script_file, PathBuf::from("/srv/scenarios/timelines/basic.tl"));
            }
            other => panic!("Expected Timeline, got {other:?}"),
        }
    }

    #[test]
    fn test_bad_step_payloads() {
        assert!(latin1_bytes("\u{2603}").is_err());
        assert_eq!(latin1_bytes("\u{ff}").unwrap(), vec![0xff]);
        assert!(hex_bytes("0").is_err());
        assert!(hex_bytes("zz").is_err());
        assert!(hex_bytes("05 0").unwrap_err().to_string().contains("invalid hex"));
        assert_eq!(hex_bytes("de ad\nbe ef").unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let err = ScenarioFile::parse("name: x\nkind: ftp\n").unwrap_err();
        assert!(matches!(err, Error::Yaml(_)));
    }
}
