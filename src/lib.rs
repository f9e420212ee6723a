//! # sstunnel
//!
//! An encrypted TCP tunnel in the shadowsocks style: a local agent accepts
//! SOCKS5 clients and carries each one over its own encrypted connection to
//! a remote agent, which dials the real destination and relays bytes both
//! ways.
//!
//! ## Architecture Overview
//!
//! ```text
//! client ──SOCKS5──▶ local agent ══AEAD tunnel══▶ remote agent ──TCP──▶ destination
//!                    │                            │
//!                    ├─ socks5 handshake          ├─ address decode
//!                    ├─ cipher stream (seal)      ├─ cipher stream (open)
//!                    └─ duplex relay              └─ duplex relay
//! ```
//!
//! Every tunnel connection starts with the destination address, followed
//! directly by the proxied bytes. Sessions share nothing with each other.

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod config;
pub mod crypto;
pub mod error;
pub mod proxy;

pub use config::{Command, Config};
pub use error::{Error, Result};
