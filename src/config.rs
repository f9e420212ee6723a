//! Runtime configuration.
//!
//! Built once at startup from command-line flags, optionally layered over a
//! TOML file, and then shared read-only by every agent.

use std::path::Path;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::crypto::{Cipher, CipherKind, MasterKey};
use crate::error::{Error, Result};
use crate::proxy::address::Address;
use crate::proxy::tcptun::{self, TcpTunnel};

/// URL scheme required on `-addr`.
pub const SCHEME: &str = "ss";

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Remote agent address: where the server listens and the client dials
    pub addr: Address,
    /// Tunnel cipher and master key
    pub cipher: Cipher,
    /// Run the remote agent
    pub server: bool,
    /// Run the local agent
    pub client: bool,
    /// SOCKS5 listen address (client only)
    pub socks: Option<String>,
    /// Static tunnels (client only)
    pub tcptun: Vec<TcpTunnel>,
}

/// What the command line asked for.
#[derive(Debug)]
pub enum Command {
    /// Start the agents
    Run(Config),
    /// Print usage and exit
    Help,
}

/// Configuration file format, also the unvalidated form of the flags.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    /// `ss://[CIPHER:PASSWORD@]host:port`
    pub addr: Option<String>,
    /// Cipher name
    pub cipher: Option<String>,
    /// Base64url master key
    pub key: Option<String>,
    /// Password for key derivation
    pub password: Option<String>,
    /// SOCKS5 listen address
    pub socks: Option<String>,
    /// Static tunnels, each `listen=host:port`
    pub tcptun: Option<Vec<TcpTunnel>>,
    /// Server mode
    pub server: Option<bool>,
    /// Client mode
    pub client: Option<bool>,
}

impl ConfigFile {
    /// Load a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml(&content)
            .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))
    }

    /// Parse TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::config(e.to_string()))
    }

    /// Layer `over` on top of `self`; every field set in `over` wins.
    pub fn overlay(self, over: ConfigFile) -> ConfigFile {
        ConfigFile {
            addr: over.addr.or(self.addr),
            cipher: over.cipher.or(self.cipher),
            key: over.key.or(self.key),
            password: over.password.or(self.password),
            socks: over.socks.or(self.socks),
            tcptun: over.tcptun.or(self.tcptun),
            server: over.server.or(self.server),
            client: over.client.or(self.client),
        }
    }

    /// Validate into a runtime [`Config`].
    pub fn into_config(self) -> Result<Config> {
        let raw_addr = self
            .addr
            .ok_or_else(|| Error::config("-addr is required"))?;
        let server_url = parse_server_url(&raw_addr)?;

        let cipher_name = self.cipher.or(server_url.cipher);
        let kind = match cipher_name.as_deref() {
            Some(name) => name.parse()?,
            None => CipherKind::default(),
        };
        let password = self.password.or(server_url.password);
        let cipher = resolve_cipher(kind, self.key.as_deref(), password.as_deref())?;

        let server = self.server.unwrap_or(false);
        let client = self.client.unwrap_or(false);
        if !server && !client {
            return Err(Error::config("select a mode with -s, -c, or both"));
        }

        let socks = self.socks.filter(|s| !s.is_empty());
        let tcptun = self.tcptun.unwrap_or_default();
        if client && socks.is_none() && tcptun.is_empty() {
            return Err(Error::config("client mode needs -socks or -tcptun"));
        }

        Ok(Config {
            addr: server_url.addr,
            cipher,
            server,
            client,
            socks,
            tcptun,
        })
    }
}

struct ServerUrl {
    addr: Address,
    cipher: Option<String>,
    password: Option<String>,
}

fn parse_server_url(raw: &str) -> Result<ServerUrl> {
    if !raw.starts_with("ss://") {
        return Err(Error::config(format!("-addr must start with ss://, got {:?}", raw)));
    }
    let url = Url::parse(raw).map_err(|e| Error::config(format!("bad -addr {:?}: {}", raw, e)))?;
    if url.scheme() != SCHEME {
        return Err(Error::config(format!("bad -addr scheme {:?}", url.scheme())));
    }

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| Error::config(format!("-addr {:?} has no host", raw)))?;
    let port = url
        .port()
        .ok_or_else(|| Error::config(format!("-addr {:?} has no port", raw)))?;
    let addr = format!("{}:{}", host, port)
        .parse()
        .map_err(|e| Error::config(format!("bad -addr {:?}: {}", raw, e)))?;

    let cipher = Some(url.username())
        .filter(|u| !u.is_empty())
        .map(str::to_string);
    let password = url
        .password()
        .map(|p| {
            percent_decode_str(p)
                .decode_utf8()
                .map(|p| p.into_owned())
                .map_err(|e| Error::config(format!("-addr password is not UTF-8: {}", e)))
        })
        .transpose()?;

    Ok(ServerUrl {
        addr,
        cipher,
        password,
    })
}

/// Turn key material into cipher parameters.
///
/// An explicit key wins over a password.
pub fn resolve_cipher(kind: CipherKind, key: Option<&str>, password: Option<&str>) -> Result<Cipher> {
    if let Some(key) = key.filter(|k| !k.is_empty()) {
        let bytes = URL_SAFE_NO_PAD
            .decode(key.trim_end_matches('='))
            .map_err(|e| Error::config(format!("-key is not base64url: {}", e)))?;
        return Cipher::new(kind, MasterKey::from(bytes));
    }
    match password.filter(|p| !p.is_empty()) {
        Some(password) => Ok(Cipher::from_password(kind, password)),
        None => Err(Error::config("either -key or -password is required")),
    }
}

/// Parse command-line arguments, not including the program name.
///
/// Flags follow Go conventions: `-name value`, `-name=value`, and the
/// double-dash forms of both.
pub fn parse_args<I, S>(args: I) -> Result<Command>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut flags = ConfigFile::default();
    let mut config_path: Option<String> = None;
    let mut args = args.into_iter().map(Into::into);

    while let Some(arg) = args.next() {
        let name = arg
            .strip_prefix("--")
            .or_else(|| arg.strip_prefix('-'))
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::config(format!("unexpected argument: {}", arg)))?;
        let (name, inline) = match name.split_once('=') {
            Some((n, v)) => (n, Some(v.to_string())),
            None => (name, None),
        };

        match name {
            "h" | "help" => return Ok(Command::Help),
            "s" => flags.server = Some(parse_switch(name, inline)?),
            "c" => flags.client = Some(parse_switch(name, inline)?),
            _ => {
                let value = match inline {
                    Some(v) => v,
                    None => args
                        .next()
                        .ok_or_else(|| Error::config(format!("flag -{} needs a value", name)))?,
                };
                match name {
                    "addr" => flags.addr = Some(value),
                    "cipher" => flags.cipher = Some(value),
                    "key" => flags.key = Some(value),
                    "password" => flags.password = Some(value),
                    "socks" => flags.socks = Some(value),
                    "tcptun" => flags.tcptun = Some(tcptun::parse_list(&value)?),
                    "config" => config_path = Some(value),
                    other => return Err(Error::config(format!("unknown flag: -{}", other))),
                }
            }
        }
    }

    let merged = match config_path {
        Some(path) => ConfigFile::load(path)?.overlay(flags),
        None => flags,
    };
    merged.into_config().map(Command::Run)
}

fn parse_switch(name: &str, value: Option<String>) -> Result<bool> {
    match value.as_deref() {
        None | Some("true") | Some("1") => Ok(true),
        Some("false") | Some("0") => Ok(false),
        Some(other) => Err(Error::config(format!(
            "invalid value {:?} for switch -{}",
            other, name
        ))),
    }
}
