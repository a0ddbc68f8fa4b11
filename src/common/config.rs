//! Configuration file handling

use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::config_path;
use super::{Error, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct HarnessConfig {
    /// Proxy binary under test
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Loopback ports shared by every scenario
    #[serde(default)]
    pub ports: Ports,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Protocols the scenario catalog is generated for
    #[serde(default = "default_protocols")]
    pub protocols: Vec<ProtocolConfig>,

    /// Timeline replay tool
    #[serde(default)]
    pub timeline: TimelineConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            proxy: ProxyConfig::default(),
            ports: Ports::default(),
            timeouts: Timeouts::default(),
            protocols: default_protocols(),
            timeline: TimelineConfig::default(),
        }
    }
}

/// Configuration for the proxy binary
#[derive(Debug, Deserialize, Clone)]
pub struct ProxyConfig {
    /// Path (or bare name on PATH) of the proxy executable
    #[serde(default = "default_proxy_program")]
    pub program: PathBuf,

    /// Flags prepended to every proxy argument vector
    #[serde(default = "default_fixed_args")]
    pub fixed_args: Vec<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            program: default_proxy_program(),
            fixed_args: default_fixed_args(),
        }
    }
}

fn default_proxy_program() -> PathBuf {
    PathBuf::from("./obfsproxy")
}

fn default_fixed_args() -> Vec<String> {
    vec!["--log-min-severity=debug".to_string()]
}

/// Entry, server, and exit ports on 127.0.0.1
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct Ports {
    #[serde(default = "default_entry_port")]
    pub entry: u16,
    #[serde(default = "default_server_port")]
    pub server: u16,
    #[serde(default = "default_exit_port")]
    pub exit: u16,
}

impl Default for Ports {
    fn default() -> Self {
        Self {
            entry: default_entry_port(),
            server: default_server_port(),
            exit: default_exit_port(),
        }
    }
}

fn default_entry_port() -> u16 {
    4999
}
fn default_server_port() -> u16 {
    5000
}
fn default_exit_port() -> u16 {
    5001
}

impl Ports {
    /// Three consecutive ports starting at `base`
    pub fn block(base: u16) -> Result<Self> {
        let exit = base.checked_add(2).ok_or_else(|| {
            Error::Config(format!("port block starting at {} runs past 65535", base))
        })?;
        Ok(Self {
            entry: base,
            server: base + 1,
            exit,
        })
    }

    pub fn entry_addr(&self) -> SocketAddr {
        loopback(self.entry)
    }

    pub fn exit_addr(&self) -> SocketAddr {
        loopback(self.exit)
    }

    /// Replace `{entry_port}`, `{server_port}`, `{exit_port}` in `template`
    pub fn substitute(&self, template: &str) -> String {
        template
            .replace("{entry_port}", &self.entry.to_string())
            .replace("{server_port}", &self.server.to_string())
            .replace("{exit_port}", &self.exit.to_string())
    }
}

fn loopback(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}

/// Timeout settings in milliseconds
#[derive(Debug, Deserialize, Clone)]
pub struct Timeouts {
    /// Grace period between the interrupt signal and a forced kill
    #[serde(default = "default_kill_grace")]
    pub kill_grace_ms: u64,

    /// Bounded wait when collecting a capture
    #[serde(default = "default_capture_join")]
    pub capture_join_ms: u64,

    /// Poll interval for the capture listener and reader
    #[serde(default = "default_accept_poll")]
    pub accept_poll_ms: u64,

    /// Client socket send/receive timeout
    #[serde(default = "default_socket")]
    pub socket_ms: u64,

    /// Connection attempts made while the proxy is still starting
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,

    /// Pause between refused connection attempts
    #[serde(default = "default_connect_interval")]
    pub connect_interval_ms: u64,

    /// Deadline for one timeline replay run
    #[serde(default = "default_timeline")]
    pub timeline_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            kill_grace_ms: default_kill_grace(),
            capture_join_ms: default_capture_join(),
            accept_poll_ms: default_accept_poll(),
            socket_ms: default_socket(),
            connect_attempts: default_connect_attempts(),
            connect_interval_ms: default_connect_interval(),
            timeline_ms: default_timeline(),
        }
    }
}

fn default_kill_grace() -> u64 {
    1000
}
fn default_capture_join() -> u64 {
    500
}
fn default_accept_poll() -> u64 {
    100
}
fn default_socket() -> u64 {
    1000
}
fn default_connect_attempts() -> u32 {
    20
}
fn default_connect_interval() -> u64 {
    50
}
fn default_timeline() -> u64 {
    10_000
}

impl Timeouts {
    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    pub fn capture_join(&self) -> Duration {
        Duration::from_millis(self.capture_join_ms)
    }

    pub fn accept_poll(&self) -> Duration {
        Duration::from_millis(self.accept_poll_ms)
    }

    pub fn socket(&self) -> Duration {
        Duration::from_millis(self.socket_ms)
    }

    pub fn connect_interval(&self) -> Duration {
        Duration::from_millis(self.connect_interval_ms)
    }

    pub fn timeline(&self) -> Duration {
        Duration::from_millis(self.timeline_ms)
    }
}

/// One protocol the catalog exercises
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ProtocolConfig {
    /// Protocol name as the proxy expects it on its command line
    pub name: String,

    /// Extra arguments appended after the client-side listener
    #[serde(default)]
    pub client_extra: Vec<String>,
}

impl ProtocolConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            client_extra: Vec::new(),
        }
    }
}

fn default_protocols() -> Vec<ProtocolConfig> {
    vec![
        ProtocolConfig::new("dummy"),
        ProtocolConfig {
            name: "x_dsteg".to_string(),
            client_extra: vec!["x_http".to_string()],
        },
    ]
}

/// Timeline replay tool configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TimelineConfig {
    #[serde(default = "default_timeline_program")]
    pub program: PathBuf,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            program: default_timeline_program(),
        }
    }
}

fn default_timeline_program() -> PathBuf {
    PathBuf::from("./tltester")
}

impl HarnessConfig {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Resolve the proxy executable
    ///
    /// Paths are used as given; a bare name is searched on PATH.
    pub fn proxy_program(&self) -> Result<PathBuf> {
        resolve_program(&self.proxy.program)
    }

    /// Resolve the timeline replay executable
    pub fn timeline_program(&self) -> Result<PathBuf> {
        resolve_program(&self.timeline.program)
    }
}

fn resolve_program(program: &Path) -> Result<PathBuf> {
    if program.components().count() > 1 || program.is_absolute() {
        return Ok(program.to_path_buf());
    }
    which::which(program).map_err(|e| {
        Error::Config(format!(
            "Program '{}' not found on PATH: {}",
            program.display(),
            e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HarnessConfig::parse("").unwrap();
        assert_eq!(config.ports, Ports::default());
        assert_eq!(config.ports.entry_addr().to_string(), "127.0.0.1:4999");
        assert_eq!(config.proxy.fixed_args, vec!["--log-min-severity=debug"]);
        assert_eq!(config.timeouts.kill_grace(), Duration::from_secs(1));
        assert_eq!(config.timeouts.connect_attempts, 20);
        assert_eq!(config.protocols.len(), 2);
        assert_eq!(config.protocols[1].client_extra, vec!["x_http"]);
    }

    #[test]
    fn test_parse_overrides() {
        let config = HarnessConfig::parse(
            r#"
[proxy]
program = "/usr/local/bin/stegotorus"
fixed_args = []

[ports]
entry = 7000

[[protocols]]
name = "chop"
client_extra = ["nosteg"]
"#,
        )
        .unwrap();
        assert!(config.proxy.fixed_args.is_empty());
        assert_eq!(config.ports.entry, 7000);
        assert_eq!(config.ports.server, 5000);
        assert_eq!(config.protocols, vec![ProtocolConfig {
            name: "chop".to_string(),
            client_extra: vec!["nosteg".to_string()],
        }]);
        assert_eq!(
            config.proxy_program().unwrap(),
            PathBuf::from("/usr/local/bin/stegotorus")
        );
    }

    #[test]
    fn test_parse_error() {
        let err = HarnessConfig::parse("[ports]\nentry = \"x\"").unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }

    #[test]
    fn test_port_substitution() {
        let ports = Ports::block(6000).unwrap();
        assert_eq!(
            ports.substitute("127.0.0.1:{server_port} -> {exit_port}"),
            "127.0.0.1:6001 -> 6002"
        );
    }

    #[test]
    fn test_port_block_must_fit() {
        let ports = Ports::block(65533).unwrap();
        assert_eq!(ports.exit_addr().to_string(), "127.0.0.1:65535");
        assert!(matches!(Ports::block(65534), Err(Error::Config(_))));
        assert!(matches!(Ports::block(65535), Err(Error::Config(_))));
    }

    #[test]
    fn test_relative_program_is_kept() {
        let config = HarnessConfig::default();
        assert_eq!(config.proxy_program().unwrap(), PathBuf::from("./obfsproxy"));
    }
}
