//! Mock chaining proxy for integration testing
//!
//! Accepts the same command line shape as the proxy under test
//! (`<protocol> <mode> <listen> [<dest>] [extra...]`, repeated) and relays
//! plain bytes for any protocol name. `socks` mode speaks SOCKS4 CONNECT and
//! SOCKS5 no-auth CONNECT and hangs up on everything else. Diagnostics go to
//! stderr tagged `[debug]`, like the real thing.
//!
//! Misbehaviour switches let tests check that the harness notices:
//! `--mock-stdout`, `--mock-warn`, `--mock-exit-code=N`,
//! `--mock-ignore-sigint`.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const CONNECT_ATTEMPTS: u32 = 20;
const CONNECT_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Server,
    Client,
    Socks,
}

impl Mode {
    fn parse(word: &str) -> Option<Self> {
        match word {
            "server" => Some(Self::Server),
            "client" => Some(Self::Client),
            "socks" => Some(Self::Socks),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct Endpoint {
    protocol: String,
    mode: Mode,
    listen: SocketAddr,
    dest: Option<SocketAddr>,
}

#[derive(Debug, Default)]
struct MockOptions {
    stdout_noise: bool,
    warn: bool,
    exit_code: i32,
    ignore_sigint: bool,
    endpoints: Vec<Endpoint>,
}

fn parse_addr(text: &str) -> Result<SocketAddr, String> {
    text.parse()
        .map_err(|e| format!("bad address '{}': {}", text, e))
}

fn parse_args(args: &[String]) -> Result<MockOptions, String> {
    let mut options = MockOptions::default();
    let mut rest = Vec::new();

    for arg in args {
        if arg == "--mock-stdout" {
            options.stdout_noise = true;
        } else if arg == "--mock-warn" {
            options.warn = true;
        } else if arg == "--mock-ignore-sigint" {
            options.ignore_sigint = true;
        } else if let Some(code) = arg.strip_prefix("--mock-exit-code=") {
            options.exit_code = code
                .parse()
                .map_err(|_| format!("bad exit code '{}'", code))?;
        } else if arg.starts_with("--") {
            // Logging switches of the real proxy
        } else {
            rest.push(arg.as_str());
        }
    }

    let mut i = 0;
    while i < rest.len() {
        let mode = rest.get(i + 1).and_then(|w| Mode::parse(w));
        let Some(mode) = mode else {
            // Protocol-specific extras such as a steg module name
            i += 1;
            continue;
        };
        let listen = rest
            .get(i + 2)
            .ok_or_else(|| format!("{} {:?}: missing listen address", rest[i], mode))?;
        let mut endpoint = Endpoint {
            protocol: rest[i].to_string(),
            mode,
            listen: parse_addr(listen)?,
            dest: None,
        };
        i += 3;
        if mode != Mode::Socks {
            let dest = rest
                .get(i)
                .ok_or_else(|| format!("{} {:?}: missing destination", endpoint.protocol, mode))?;
            endpoint.dest = Some(parse_addr(dest)?);
            i += 1;
        }
        options.endpoints.push(endpoint);
    }

    if options.endpoints.is_empty() {
        return Err("usage: mock_proxy [--mock-*] <protocol> <mode> <listen> [<dest>] ...".to_string());
    }
    Ok(options)
}

#[cfg(unix)]
struct Interrupt(tokio::signal::unix::Signal);

#[cfg(unix)]
impl Interrupt {
    fn install() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self(signal(SignalKind::interrupt())?))
    }

    async fn recv(&mut self) {
        self.0.recv().await;
    }
}

#[cfg(not(unix))]
struct Interrupt;

#[cfg(not(unix))]
impl Interrupt {
    fn install() -> io::Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let options = match parse_args(&args) {
        Ok(options) => options,
        Err(msg) => {
            eprintln!("[err] {}", msg);
            std::process::exit(2);
        }
    };

    // The handler must be in place before the first port opens: the harness
    // may interrupt as soon as it can connect.
    let mut interrupt = match Interrupt::install() {
        Ok(interrupt) => interrupt,
        Err(e) => {
            eprintln!("[err] cannot install interrupt handler: {}", e);
            std::process::exit(1);
        }
    };

    if options.stdout_noise {
        println!("mock proxy chattering on stdout");
    }
    if options.warn {
        eprintln!("[warn] mock proxy was asked to warn");
    }

    for endpoint in &options.endpoints {
        let listener = match TcpListener::bind(endpoint.listen).await {
            Ok(listener) => listener,
            Err(e) => {
                eprintln!("[err] {}: cannot listen on {}: {}", endpoint.protocol, endpoint.listen, e);
                std::process::exit(1);
            }
        };
        eprintln!(
            "[debug] {} {:?} listening on {}",
            endpoint.protocol, endpoint.mode, endpoint.listen
        );
        tokio::spawn(serve(listener, endpoint.mode, endpoint.dest));
    }

    loop {
        interrupt.recv().await;
        if options.ignore_sigint {
            eprintln!("[debug] ignoring interrupt");
            continue;
        }
        break;
    }

    eprintln!("[debug] interrupted, exiting");
    std::process::exit(options.exit_code);
}

async fn serve(listener: TcpListener, mode: Mode, dest: Option<SocketAddr>) {
    loop {
        let (inbound, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                eprintln!("[debug] accept failed: {}", e);
                continue;
            }
        };
        eprintln!("[debug] {:?}: connection from {}", mode, peer);

        tokio::spawn(async move {
            let result = match (mode, dest) {
                (Mode::Socks, _) => socks(inbound).await,
                (_, Some(dest)) => relay(inbound, dest).await,
                (_, None) => Ok(()),
            };
            match result {
                Ok(()) => eprintln!("[debug] {:?}: {} closed", mode, peer),
                Err(e) => eprintln!("[debug] {:?}: {} ended: {}", mode, peer, e),
            }
        });
    }
}

/// Connect to the next hop, riding out a peer that is still starting up
async fn connect_upstream(addr: SocketAddr) -> io::Result<TcpStream> {
    let mut attempt = 0;
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused && attempt < CONNECT_ATTEMPTS => {
                attempt += 1;
                tokio::time::sleep(CONNECT_INTERVAL).await;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn relay(mut inbound: TcpStream, dest: SocketAddr) -> io::Result<()> {
    let mut outbound = connect_upstream(dest).await?;
    pump(&mut inbound, &mut outbound).await
}

async fn pump(inbound: &mut TcpStream, outbound: &mut TcpStream) -> io::Result<()> {
    let (up, down) = tokio::io::copy_bidirectional(inbound, outbound).await?;
    eprintln!("[debug] relayed {} bytes up, {} bytes down", up, down);
    Ok(())
}

async fn socks(mut inbound: TcpStream) -> io::Result<()> {
    let outbound = match inbound.read_u8().await? {
        4 => socks4(&mut inbound).await?,
        5 => socks5(&mut inbound).await?,
        other => {
            eprintln!("[debug] not a SOCKS request (first byte {:#04x}), dropping", other);
            None
        }
    };
    match outbound {
        Some(mut outbound) => pump(&mut inbound, &mut outbound).await,
        None => Ok(()),
    }
}

async fn socks4(inbound: &mut TcpStream) -> io::Result<Option<TcpStream>> {
    let command = inbound.read_u8().await?;
    let port = inbound.read_u16().await?;
    let mut ip = [0u8; 4];
    inbound.read_exact(&mut ip).await?;

    let mut user_len = 0usize;
    while inbound.read_u8().await? != 0 {
        user_len += 1;
        if user_len > 255 {
            eprintln!("[debug] SOCKS4 user id too long, dropping");
            return Ok(None);
        }
    }

    if command != 1 {
        eprintln!("[debug] SOCKS4 command {} not supported, dropping", command);
        return Ok(None);
    }

    let target = SocketAddrV4::new(Ipv4Addr::from(ip), port);
    let mut reply = [0u8; 8];
    reply[2..4].copy_from_slice(&port.to_be_bytes());
    reply[4..].copy_from_slice(&ip);
    match connect_upstream(SocketAddr::V4(target)).await {
        Ok(outbound) => {
            reply[1] = 90;
            inbound.write_all(&reply).await?;
            Ok(Some(outbound))
        }
        Err(e) => {
            reply[1] = 91;
            inbound.write_all(&reply).await?;
            Err(e)
        }
    }
}

fn socks5_reply(code: u8, bound: SocketAddrV4) -> [u8; 10] {
    let mut reply = [5, code, 0, 1, 0, 0, 0, 0, 0, 0];
    reply[4..8].copy_from_slice(&bound.ip().octets());
    reply[8..].copy_from_slice(&bound.port().to_be_bytes());
    reply
}

async fn socks5(inbound: &mut TcpStream) -> io::Result<Option<TcpStream>> {
    let unspecified = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);

    let method_count = inbound.read_u8().await?;
    let mut methods = vec![0u8; usize::from(method_count)];
    inbound.read_exact(&mut methods).await?;
    if !methods.contains(&0) {
        eprintln!("[debug] SOCKS5 client offers no usable method, dropping");
        return Ok(None);
    }
    inbound.write_all(&[5, 0]).await?;

    let mut head = [0u8; 4];
    inbound.read_exact(&mut head).await?;
    let [version, command, _, address_type] = head;
    if version != 5 {
        eprintln!("[debug] SOCKS5 request with version {}, dropping", version);
        return Ok(None);
    }
    if address_type != 1 {
        inbound.write_all(&socks5_reply(8, unspecified)).await?;
        return Ok(None);
    }
    let mut ip = [0u8; 4];
    inbound.read_exact(&mut ip).await?;
    let port = inbound.read_u16().await?;

    if command != 1 {
        eprintln!("[debug] SOCKS5 command {} not supported", command);
        inbound.write_all(&socks5_reply(7, unspecified)).await?;
        return Ok(None);
    }

    let target = SocketAddrV4::new(Ipv4Addr::from(ip), port);
    match connect_upstream(SocketAddr::V4(target)).await {
        Ok(outbound) => {
            inbound.write_all(&socks5_reply(0, target)).await?;
            Ok(Some(outbound))
        }
        Err(e) => {
            inbound.write_all(&socks5_reply(5, unspecified)).await?;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_chained_endpoints() {
        let options = parse_args(&args(&[
            "--log-min-severity=debug",
            "--mock-exit-code=3",
            "x_dsteg", "server", "127.0.0.1:5000", "127.0.0.1:5001",
            "x_dsteg", "client", "127.0.0.1:4999", "127.0.0.1:5000", "x_http",
        ]))
        .unwrap();
        assert_eq!(options.exit_code, 3);
        assert_eq!(options.endpoints.len(), 2);
        assert_eq!(options.endpoints[1].mode, Mode::Client);
        assert_eq!(options.endpoints[1].dest, Some("127.0.0.1:5000".parse().unwrap()));
    }

    #[test]
    fn test_parse_socks_endpoint() {
        let options = parse_args(&args(&["dummy", "socks", "127.0.0.1:4999"])).unwrap();
        assert_eq!(options.endpoints[0].mode, Mode::Socks);
        assert!(options.endpoints[0].dest.is_none());
    }

    #[test]
    fn test_parse_rejects_incomplete() {
        assert!(parse_args(&args(&["dummy", "server", "127.0.0.1:5000"])).is_err());
        assert!(parse_args(&args(&["--mock-warn"])).is_err());
    }

    #[test]
    fn test_socks5_reply_layout() {
        let reply = socks5_reply(0, SocketAddrV4::new(Ipv4Addr::LOCALHOST, 5000));
        assert_eq!(reply, [5, 0, 0, 1, 127, 0, 0, 1, 0x13, 0x88]);
    }
}
