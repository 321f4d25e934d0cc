//! Peer configuration: JSON file, then `SEAL_PEER_*` overrides

use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use shared_protocol::{AeadSuite, Curve, SessionRole};

pub const ENV_PREFIX: &str = "SEAL_PEER_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Accept peers and echo their records back
    Server,
    /// Dial a server and send stdin lines
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Tcp,
    Quic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    pub mode: Mode,
    pub transport: TransportKind,
    pub listen_addr: SocketAddr,
    pub connect_addr: SocketAddr,
    pub curve: Curve,
    pub suite: AeadSuite,
    /// Exchange key-confirmation records after the handshake
    pub confirm: bool,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Server,
            transport: TransportKind::Tcp,
            listen_addr: SocketAddr::from(([0, 0, 0, 0], net_transport::DEFAULT_QUIC_PORT)),
            connect_addr: SocketAddr::from(([127, 0, 0, 1], net_transport::DEFAULT_QUIC_PORT)),
            curve: Curve::default(),
            suite: AeadSuite::default(),
            confirm: true,
        }
    }
}

impl PeerConfig {
    /// Load from an optional JSON file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                Self::from_json(&raw)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw).context("parsing config")
    }

    /// Apply `SEAL_PEER_<FIELD>` values found through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |field: &str| lookup(&format!("{ENV_PREFIX}{field}"));

        if let Some(mode) = var("MODE") {
            self.mode = match mode.to_ascii_lowercase().as_str() {
                "server" => Mode::Server,
                "client" => Mode::Client,
                other => bail!("unknown mode: {other}"),
            };
        }
        if let Some(transport) = var("TRANSPORT") {
            self.transport = match transport.to_ascii_lowercase().as_str() {
                "tcp" => TransportKind::Tcp,
                "quic" => TransportKind::Quic,
                other => bail!("unknown transport: {other}"),
            };
        }
        if let Some(addr) = var("LISTEN_ADDR") {
            self.listen_addr = addr.parse().context("SEAL_PEER_LISTEN_ADDR")?;
        }
        if let Some(addr) = var("CONNECT_ADDR") {
            self.connect_addr = addr.parse().context("SEAL_PEER_CONNECT_ADDR")?;
        }
        if let Some(curve) = var("CURVE") {
            self.curve = Curve::from_str(&curve)?;
        }
        if let Some(suite) = var("SUITE") {
            self.suite = AeadSuite::from_str(&suite)?;
        }
        if let Some(confirm) = var("CONFIRM") {
            self.confirm = confirm.parse().context("SEAL_PEER_CONFIRM")?;
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.suite.is_encrypting() {
            bail!("suite {} does not encrypt", self.suite);
        }
        Ok(())
    }

    /// Servers answer handshakes, clients start them
    pub fn role(&self) -> SessionRole {
        match self.mode {
            Mode::Server => SessionRole::Responder,
            Mode::Client => SessionRole::Initiator,
        }
    }
}
