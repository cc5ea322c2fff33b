//! Async IRC client.
//!
//! This is the main entry point for SDK consumers. It manages the TCP
//! connection, IRC registration, CAP/SASL negotiation, keepalive and
//! outbound flood control, and emits events. Supports both plaintext and
//! TLS connections.
//!
//! ## Authentication
//!
//! - **Server password**: `config.password` is sent with `PASS` before `NICK`.
//! - **SASL PLAIN**: set `config.sasl`. The `sasl` capability is requested
//!   only when the server advertises it.
//!
//! ## Reconnection
//!
//! A session started with [`connect`] ends with a single
//! [`Event::Disconnected`]. [`run_with_reconnect`] wraps sessions with
//! exponential backoff (2→4→8→16→30s cap by default) and rejoins channels
//! after every registration.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use base64::Engine;
use rand::Rng;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls;

use crate::event::Event;
use crate::irc::{self, Message, ctcp};
use crate::throttle::Throttle;

/// Disconnect reason reported after the consumer asked us to quit.
pub const QUIT_REASON: &str = "Client quit";

/// Nick attempts before giving up on registration.
const MAX_NICK_TRIES: u32 = 6;

/// Capabilities requested whenever the server offers them.
const WANTED_CAPS: &[&str] = &["multi-prefix", "message-tags", "server-time", "away-notify"];

/// SASL PLAIN account credentials.
#[derive(Debug, Clone)]
pub struct SaslCredentials {
    pub username: String,
    pub password: String,
}

/// Configuration for connecting to an IRC server.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Server address (host:port).
    pub server_addr: String,
    /// Desired nickname.
    pub nick: String,
    /// Username (ident).
    pub user: String,
    /// Real name.
    pub realname: String,
    /// Use TLS. Implied by port 6697.
    pub tls: bool,
    /// Skip TLS certificate verification (for self-signed certs).
    pub tls_insecure: bool,
    /// Server password (PASS).
    pub password: Option<String>,
    pub sasl: Option<SaslCredentials>,
    /// Lines sent without delay before flood control kicks in.
    pub flood_burst: u32,
    /// Delay between lines once the burst is spent. Zero disables throttling.
    pub flood_interval: Duration,
    /// Silence before we PING the server.
    pub ping_interval: Duration,
    /// Silence after which the connection is considered dead.
    pub ping_timeout: Duration,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:6667".to_string(),
            nick: "perch".to_string(),
            user: "perch".to_string(),
            realname: "perch".to_string(),
            tls: false,
            tls_insecure: false,
            password: None,
            sasl: None,
            flood_burst: 5,
            flood_interval: Duration::from_millis(700),
            ping_interval: Duration::from_secs(60),
            ping_timeout: Duration::from_secs(120),
        }
    }
}

impl ConnectConfig {
    pub fn use_tls(&self) -> bool {
        self.tls || self.server_addr.ends_with(":6697")
    }

    /// Host part of `server_addr`, without port or IPv6 brackets.
    pub fn host(&self) -> &str {
        let host = match self.server_addr.rsplit_once(':') {
            Some((h, port)) if port.chars().all(|c| c.is_ascii_digit()) => h,
            _ => self.server_addr.as_str(),
        };
        host.trim_start_matches('[').trim_end_matches(']')
    }
}

/// Commands the consumer can send to the client.
#[derive(Debug)]
pub enum Command {
    Join(String),
    Part { channel: String, reason: Option<String> },
    Privmsg { target: String, text: String },
    Notice { target: String, text: String },
    Nick(String),
    Raw(String),
    Quit(Option<String>),
}

/// A handle to a running IRC client connection.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    cmd_tx: mpsc::Sender<Command>,
}

impl ClientHandle {
    /// A handle not bound to any connection: commands are delivered to the
    /// returned receiver. Useful for driving consumers in tests.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Command>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(capacity);
        (Self { cmd_tx }, cmd_rx)
    }

    pub async fn join(&self, channel: &str) -> Result<()> {
        self.send(Command::Join(channel.to_string())).await
    }

    pub async fn part(&self, channel: &str, reason: Option<&str>) -> Result<()> {
        self.send(Command::Part {
            channel: channel.to_string(),
            reason: reason.map(str::to_string),
        })
        .await
    }

    /// Send a PRIVMSG. Long text is split across several lines.
    pub async fn privmsg(&self, target: &str, text: &str) -> Result<()> {
        self.send(Command::Privmsg {
            target: target.to_string(),
            text: text.to_string(),
        })
        .await
    }

    pub async fn notice(&self, target: &str, text: &str) -> Result<()> {
        self.send(Command::Notice {
            target: target.to_string(),
            text: text.to_string(),
        })
        .await
    }

    /// Answer a CTCP request (sent as NOTICE).
    pub async fn ctcp_reply(&self, target: &str, command: &str, params: &str) -> Result<()> {
        self.notice(target, &ctcp::encode(command, params)).await
    }

    pub async fn nick(&self, nick: &str) -> Result<()> {
        self.send(Command::Nick(nick.to_string())).await
    }

    pub async fn raw(&self, line: &str) -> Result<()> {
        self.send(Command::Raw(line.to_string())).await
    }

    pub async fn quit(&self, message: Option<&str>) -> Result<()> {
        self.send(Command::Quit(message.map(str::to_string))).await
    }

    /// False once the session task has exited.
    pub fn is_connected(&self) -> bool {
        !self.cmd_tx.is_closed()
    }

    async fn send(&self, cmd: Command) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| anyhow::anyhow!("IRC connection is closed"))
    }
}

/// A connection that has completed TCP (and optionally TLS) but hasn't
/// started IRC registration yet.
pub enum EstablishedConnection {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

/// Establish TCP (and optionally TLS) connection to the server.
///
/// Separate from [`connect_with_stream`] so connection errors surface to
/// the caller before any session task exists.
pub async fn establish_connection(config: &ConnectConfig) -> Result<EstablishedConnection> {
    let use_tls = config.use_tls();
    let mode = if use_tls { "TLS" } else { "plain" };

    tracing::debug!("Resolving {}...", config.server_addr);
    let tcp = TcpStream::connect(&config.server_addr)
        .await
        .with_context(|| format!("TCP connect to {} failed", config.server_addr))?;
    tracing::debug!("TCP connected to {} ({mode})", config.server_addr);

    if !use_tls {
        return Ok(EstablishedConnection::Plain(tcp));
    }

    let tls_config = if config.tls_insecure {
        tracing::debug!("TLS: insecure mode (skipping cert verification)");
        rustls_insecure_config()
    } else {
        rustls_default_config()
    };
    let connector = TlsConnector::from(Arc::new(tls_config));
    let dns_name = rustls::pki_types::ServerName::try_from(config.host().to_string())
        .with_context(|| format!("Invalid TLS server name {}", config.host()))?;
    let tls_stream = connector
        .connect(dns_name, tcp)
        .await
        .with_context(|| format!("TLS handshake with {} failed", config.server_addr))?;
    tracing::debug!("TLS handshake complete");
    Ok(EstablishedConnection::Tls(Box::new(tls_stream)))
}

/// Connect using an already-established connection.
pub fn connect_with_stream(
    conn: EstablishedConnection,
    config: ConnectConfig,
) -> (ClientHandle, mpsc::Receiver<Event>) {
    match conn {
        EstablishedConnection::Plain(tcp) => connect_with_io(tcp, config),
        EstablishedConnection::Tls(tls) => connect_with_io(*tls, config),
    }
}

/// Run the IRC protocol over any byte stream.
///
/// Returns a handle for sending commands and a receiver for events. The
/// protocol runs in a spawned task and always finishes with exactly one
/// [`Event::Disconnected`].
pub fn connect_with_io<S>(stream: S, config: ConnectConfig) -> (ClientHandle, mpsc::Receiver<Event>)
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (event_tx, event_rx) = mpsc::channel(4096);
    let (cmd_tx, cmd_rx) = mpsc::channel(256);

    tokio::spawn(async move {
        let _ = event_tx.send(Event::Connected).await;
        let (reader, writer) = tokio::io::split(stream);
        let reason = match run_irc(BufReader::new(reader), writer, &config, &event_tx, cmd_rx).await {
            Ok(reason) => reason,
            Err(e) => format!("{e:#}"),
        };
        tracing::debug!(%reason, "IRC session ended");
        let _ = event_tx.send(Event::Disconnected { reason }).await;
    });

    (ClientHandle { cmd_tx }, event_rx)
}

/// Connect to an IRC server and start a session.
pub async fn connect(config: ConnectConfig) -> Result<(ClientHandle, mpsc::Receiver<Event>)> {
    let conn = establish_connection(&config).await?;
    Ok(connect_with_stream(conn, config))
}

fn install_crypto_provider() {
    // ring is preferred when both are enabled; aws-lc-rs is the default.
    #[cfg(feature = "ring")]
    {
        let _ = rustls::crypto::ring::default_provider().install_default();
    }
    #[cfg(all(feature = "aws-lc-rs", not(feature = "ring")))]
    {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    }
}

fn rustls_default_config() -> rustls::ClientConfig {
    install_crypto_provider();

    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth()
}

fn rustls_insecure_config() -> rustls::ClientConfig {
    install_crypto_provider();
    rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(InsecureVerifier))
        .with_no_client_auth()
}

#[derive(Debug)]
struct InsecureVerifier;

impl rustls::client::danger::ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::CryptoProvider::get_default()
            .map(|p| p.signature_verification_algorithms.supported_schemes())
            .unwrap_or_default()
    }
}

async fn send_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> Result<()> {
    tracing::trace!(%line, "->");
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\r\n").await?;
    writer.flush().await?;
    Ok(())
}

/// Result of handling one server line.
enum Flow {
    Continue,
    Stop(String),
}

/// Per-connection protocol state.
struct Session<'a> {
    config: &'a ConnectConfig,
    event_tx: &'a mpsc::Sender<Event>,
    registered: bool,
    nick: String,
    nick_tries: u32,
    offered_caps: Vec<String>,
    account: Option<String>,
    pending: Vec<Command>,
}

async fn run_irc<R, W>(
    mut reader: R,
    mut writer: W,
    config: &ConnectConfig,
    event_tx: &mpsc::Sender<Event>,
    mut cmd_rx: mpsc::Receiver<Command>,
) -> Result<String>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    send_line(&mut writer, "CAP LS 302").await?;
    if let Some(ref pass) = config.password {
        send_line(&mut writer, &format!("PASS {pass}")).await?;
    }
    send_line(&mut writer, &format!("NICK {}", config.nick)).await?;
    send_line(
        &mut writer,
        &format!("USER {} 0 * :{}", config.user, config.realname),
    )
    .await?;

    let mut session = Session {
        config,
        event_tx,
        registered: false,
        nick: config.nick.clone(),
        nick_tries: 0,
        offered_caps: Vec::new(),
        account: None,
        pending: Vec::new(),
    };
    let mut throttle = Throttle::new(config.flood_burst, config.flood_interval);
    let mut line_buf: Vec<u8> = Vec::new();
    let mut last_activity = Instant::now();
    let mut ping_sent: Option<Instant> = None;
    let pong_grace = config.ping_timeout.saturating_sub(config.ping_interval);

    loop {
        let deadline = match ping_sent {
            Some(at) => at + pong_grace,
            None => last_activity + config.ping_interval,
        };

        tokio::select! {
            result = reader.read_until(b'\n', &mut line_buf) => {
                let n = result.context("read from server failed")?;
                if n == 0 {
                    return Ok("EOF".to_string());
                }
                last_activity = Instant::now();
                ping_sent = None;

                let raw = String::from_utf8_lossy(&line_buf).trim_end().to_string();
                line_buf.clear();
                tracing::trace!(line = %raw, "<-");
                let _ = event_tx.send(Event::RawLine(raw.clone())).await;

                let Some(msg) = Message::parse(&raw) else { continue };
                if let Flow::Stop(reason) = session.handle(&msg, &mut writer, &mut throttle).await? {
                    return Ok(reason);
                }
            }
            Some(cmd) = cmd_rx.recv() => {
                if matches!(cmd, Command::Quit(_)) {
                    execute_command(&mut writer, &mut throttle, cmd).await?;
                    let _ = writer.shutdown().await;
                    return Ok(QUIT_REASON.to_string());
                }
                if session.registered {
                    execute_command(&mut writer, &mut throttle, cmd).await?;
                } else {
                    // JOINs before registration are dropped by servers
                    session.pending.push(cmd);
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                if ping_sent.is_some() {
                    return Ok("Ping timeout".to_string());
                }
                send_line(&mut writer, "PING :keepalive").await?;
                ping_sent = Some(Instant::now());
            }
        }
    }
}

impl Session<'_> {
    async fn emit(&self, event: Event) {
        let _ = self.event_tx.send(event).await;
    }

    async fn handle<W: AsyncWrite + Unpin>(
        &mut self,
        msg: &Message,
        writer: &mut W,
        throttle: &mut Throttle,
    ) -> Result<Flow> {
        let param = |i: usize| msg.params.get(i).cloned().unwrap_or_default();

        match msg.command.as_str() {
            "PING" => {
                send_line(writer, &Message::pong(&param(0)).to_string()).await?;
            }
            // RPL_WELCOME
            "001" => {
                self.registered = true;
                if let Some(nick) = msg.params.first() {
                    self.nick = nick.clone();
                }
                self.emit(Event::Registered { nick: self.nick.clone() }).await;
                for cmd in std::mem::take(&mut self.pending) {
                    execute_command(writer, throttle, cmd).await?;
                }
            }
            // ERR_NICKNAMEINUSE
            "433" if !self.registered => {
                self.nick_tries += 1;
                if self.nick_tries > MAX_NICK_TRIES {
                    return Ok(Flow::Stop("Nick in use".to_string()));
                }
                let alt = alternate_nick(&self.config.nick, self.nick_tries);
                tracing::debug!(nick = %alt, "Nick in use, retrying");
                send_line(writer, &Message::nick(&alt).to_string()).await?;
                self.nick = alt;
            }
            "CAP" => self.handle_cap(msg, writer).await?,
            "AUTHENTICATE" => {
                if param(0) == "+"
                    && let Some(ref sasl) = self.config.sasl
                {
                    for line in authenticate_lines(&sasl_plain_payload(sasl)) {
                        send_line(writer, &line).await?;
                    }
                }
            }
            // RPL_LOGGEDIN: <nick> <hostmask> <account> :You are now logged in
            "900" => {
                self.account = msg.params.get(2).cloned();
            }
            // RPL_SASLSUCCESS
            "903" => {
                let account = self
                    .account
                    .take()
                    .or_else(|| self.config.sasl.as_ref().map(|s| s.username.clone()))
                    .unwrap_or_default();
                self.emit(Event::Authenticated { account }).await;
                send_line(writer, "CAP END").await?;
            }
            // ERR_NICKLOCKED, ERR_SASLFAIL, ERR_SASLTOOLONG, ERR_SASLABORTED
            "902" | "904" | "905" | "906" => {
                let reason = msg.params.last().cloned().unwrap_or_else(|| "SASL failed".to_string());
                self.emit(Event::AuthFailed { reason }).await;
                send_line(writer, "CAP END").await?;
            }
            "JOIN" => {
                let channel = param(0);
                let nick = msg.source_nick().to_string();
                self.emit(Event::Joined { channel, nick }).await;
            }
            "PART" => {
                let channel = param(0);
                let nick = msg.source_nick().to_string();
                let reason = msg.params.get(1).cloned();
                self.emit(Event::Parted { channel, nick, reason }).await;
            }
            "NICK" => {
                let old_nick = msg.source_nick().to_string();
                let new_nick = param(0);
                if old_nick.is_empty() || new_nick.is_empty() {
                    return Ok(Flow::Continue);
                }
                if old_nick.eq_ignore_ascii_case(&self.nick) {
                    self.nick = new_nick.clone();
                }
                self.emit(Event::NickChanged { old_nick, new_nick }).await;
            }
            "KICK" if msg.params.len() >= 2 => {
                let by = msg.prefix.as_deref().map_or("server", |_| msg.source_nick()).to_string();
                self.emit(Event::Kicked {
                    channel: param(0),
                    nick: param(1),
                    by,
                    reason: param(2),
                })
                .await;
            }
            "INVITE" if msg.params.len() >= 2 => {
                let by = msg.source_nick().to_string();
                self.emit(Event::Invited { channel: param(1), by }).await;
            }
            "TOPIC" if !msg.params.is_empty() => {
                let set_by = msg.prefix.as_ref().map(|_| msg.source_nick().to_string());
                self.emit(Event::TopicChanged {
                    channel: param(0),
                    topic: param(1),
                    set_by,
                })
                .await;
            }
            // RPL_TOPIC
            "332" if msg.params.len() >= 3 => {
                self.emit(Event::TopicChanged {
                    channel: param(1),
                    topic: param(2),
                    set_by: None,
                })
                .await;
            }
            "QUIT" => {
                let nick = msg.source_nick().to_string();
                self.emit(Event::UserQuit { nick, reason: param(0) }).await;
            }
            "PRIVMSG" | "NOTICE" if msg.params.len() >= 2 => self.handle_message(msg).await,
            "ERROR" => {
                self.emit(Event::ServerNotice { text: msg.params.join(" ") }).await;
            }
            _ => {
                // Surface error numerics so the consumer can log them.
                if let Ok(num) = msg.command.parse::<u16>()
                    && (400..600).contains(&num)
                {
                    let text = if msg.params.len() > 1 {
                        msg.params[1..].join(" ")
                    } else {
                        msg.params.join(" ")
                    };
                    self.emit(Event::ServerNotice { text }).await;
                }
            }
        }
        Ok(Flow::Continue)
    }

    async fn handle_message(&self, msg: &Message) {
        let prefix = msg.prefix.as_deref().unwrap_or("");
        let is_notice = msg.command == "NOTICE";
        let target = msg.params[0].clone();
        let text = msg.params[1].clone();

        if is_notice && !prefix.contains('!') {
            self.emit(Event::ServerNotice { text }).await;
            return;
        }
        let source = msg.source().unwrap_or_default();

        if let Some((command, params)) = ctcp::parse(&text)
            && command != "ACTION"
        {
            // CTCP replies arrive as NOTICE; we never send requests.
            if !is_notice {
                self.emit(Event::Ctcp { source, target, command, params }).await;
            }
            return;
        }

        if is_notice {
            self.emit(Event::Notice { source, target, text }).await;
        } else {
            let tags = msg.tags.clone();
            self.emit(Event::Message { source, target, text, tags }).await;
        }
    }

    async fn handle_cap<W: AsyncWrite + Unpin>(&mut self, msg: &Message, writer: &mut W) -> Result<()> {
        let subcmd = msg.params.get(1).map(|s| s.to_ascii_uppercase());
        match subcmd.as_deref() {
            Some("LS") => {
                let caps_str = msg.params.last().map(String::as_str).unwrap_or("");
                self.offered_caps.extend(
                    caps_str
                        .split_whitespace()
                        .map(|c| c.split('=').next().unwrap_or(c).to_string()),
                );
                // Multi-line LS: "CAP * LS * :..." means more lines follow
                if msg.params.len() >= 4 && msg.params[2] == "*" {
                    return Ok(());
                }
                let mut req_caps: Vec<&str> = WANTED_CAPS
                    .iter()
                    .copied()
                    .filter(|cap| self.offered_caps.iter().any(|c| c == cap))
                    .collect();
                if self.config.sasl.is_some() && self.offered_caps.iter().any(|c| c == "sasl") {
                    req_caps.push("sasl");
                }
                if req_caps.is_empty() {
                    send_line(writer, "CAP END").await?;
                } else {
                    send_line(writer, &format!("CAP REQ :{}", req_caps.join(" "))).await?;
                }
            }
            Some("ACK") => {
                let caps = msg.params.last().map(String::as_str).unwrap_or("");
                if caps.split_whitespace().any(|c| c == "sasl") {
                    send_line(writer, "AUTHENTICATE PLAIN").await?;
                } else {
                    send_line(writer, "CAP END").await?;
                }
            }
            Some("NAK") => {
                send_line(writer, "CAP END").await?;
            }
            _ => {}
        }
        Ok(())
    }
}

/// Execute a single IRC command on the wire.
async fn execute_command<W: AsyncWrite + Unpin>(
    writer: &mut W,
    throttle: &mut Throttle,
    cmd: Command,
) -> Result<()> {
    let lines: Vec<String> = match cmd {
        Command::Join(channel) => vec![Message::join(&channel).to_string()],
        Command::Part { channel, reason } => {
            vec![Message::part(&channel, reason.as_deref()).to_string()]
        }
        Command::Privmsg { target, text } => irc::split_message(&text, irc::max_payload("PRIVMSG", &target))
            .iter()
            .map(|chunk| Message::privmsg(&target, chunk).to_string())
            .collect(),
        Command::Notice { target, text } => irc::split_message(&text, irc::max_payload("NOTICE", &target))
            .iter()
            .map(|chunk| Message::notice(&target, chunk).to_string())
            .collect(),
        Command::Nick(nick) => vec![Message::nick(&nick).to_string()],
        Command::Raw(line) => vec![line],
        Command::Quit(reason) => vec![Message::quit(reason.as_deref()).to_string()],
    };
    for line in lines {
        throttle.acquire().await;
        send_line(writer, &line).await?;
    }
    Ok(())
}

/// `perch_` on the first collision, then `perch1`, `perch2`, ...
fn alternate_nick(base: &str, attempt: u32) -> String {
    if attempt <= 1 {
        format!("{base}_")
    } else {
        format!("{base}{}", attempt - 1)
    }
}

fn sasl_plain_payload(sasl: &SaslCredentials) -> String {
    let raw = format!("{0}\0{0}\0{1}", sasl.username, sasl.password);
    base64::engine::general_purpose::STANDARD.encode(raw.as_bytes())
}

/// AUTHENTICATE payloads are sent in 400-byte chunks; a final exact-size
/// chunk is followed by `AUTHENTICATE +`.
fn authenticate_lines(encoded: &str) -> Vec<String> {
    let mut lines: Vec<String> = encoded
        .as_bytes()
        .chunks(400)
        .map(|c| format!("AUTHENTICATE {}", String::from_utf8_lossy(c)))
        .collect();
    if encoded.is_empty() || encoded.len() % 400 == 0 {
        lines.push("AUTHENTICATE +".to_string());
    }
    lines
}

// ── Reconnect helper ──

/// Configuration for automatic reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial delay before first reconnect attempt.
    pub initial_delay: Duration,
    /// Maximum delay between reconnect attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_factor: f64,
    /// Channels to join after every registration.
    pub channels: Vec<String>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            channels: Vec::new(),
        }
    }
}

impl ReconnectConfig {
    /// Next backoff delay: `delay * factor` plus up to 25% jitter, capped.
    pub fn next_delay(&self, delay: Duration) -> Duration {
        let base = delay.as_millis() as f64 * self.backoff_factor;
        let jitter_max = delay.as_millis() as u64 / 4;
        let jitter = if jitter_max == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_max)
        };
        Duration::from_millis((base as u64).saturating_add(jitter)).min(self.max_delay)
    }
}

/// Run an event loop with automatic reconnection.
///
/// The `handler` is called for each event. When disconnected, the loop
/// reconnects with exponential backoff and joins the configured channels
/// once registered. Handler errors are logged and do not stop the loop.
///
/// Returns `Ok(())` after a session ends because the consumer sent QUIT.
pub async fn run_with_reconnect<F>(
    config: ConnectConfig,
    reconnect_config: ReconnectConfig,
    handler: F,
) -> Result<()>
where
    F: Fn(ClientHandle, Event) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync,
{
    let mut delay = reconnect_config.initial_delay;
    let mut consecutive_failures = 0u32;

    loop {
        let conn = match establish_connection(&config).await {
            Ok(c) => c,
            Err(e) => {
                consecutive_failures += 1;
                tracing::warn!(
                    error = %e,
                    attempt = consecutive_failures,
                    delay_secs = delay.as_secs(),
                    "Connection failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = reconnect_config.next_delay(delay);
                continue;
            }
        };

        let (handle, mut events) = connect_with_stream(conn, config.clone());

        let mut quit = false;
        while let Some(event) = events.recv().await {
            if matches!(&event, Event::Registered { .. }) {
                consecutive_failures = 0;
                delay = reconnect_config.initial_delay;
                for ch in &reconnect_config.channels {
                    let _ = handle.join(ch).await;
                }
            }
            let disconnected = match &event {
                Event::Disconnected { reason } => {
                    quit = reason == QUIT_REASON;
                    true
                }
                _ => false,
            };
            if let Err(e) = handler(handle.clone(), event).await {
                tracing::error!(error = %e, "Handler error");
            }
            if disconnected {
                break;
            }
        }

        if quit {
            return Ok(());
        }

        tracing::info!(delay_secs = delay.as_secs(), "Disconnected, will reconnect");
        tokio::time::sleep(delay).await;
        delay = reconnect_config.next_delay(delay);
    }
}
