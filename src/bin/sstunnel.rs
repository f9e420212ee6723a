//! sstunnel binary
//!
//! Usage: sstunnel -addr ss://HOST:PORT (-s | -c) [OPTIONS]
//!
//! Runs the remote agent (`-s`), the local agent (`-c`), or both.

use std::env;

use tokio::task::JoinSet;

use sstunnel::config::{parse_args, Command, Config};
use sstunnel::proxy::{local, remote, tcptun};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing; respects RUST_LOG (e.g. RUST_LOG=debug)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = match parse_args(env::args().skip(1)) {
        Ok(Command::Run(config)) => config,
        Ok(Command::Help) => {
            print_usage();
            return Ok(());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            print_usage();
            std::process::exit(2);
        }
    };

    run(&config).await
}

fn print_usage() {
    println!(
        r#"sstunnel - encrypted SOCKS5 tunnel

USAGE:
    sstunnel -addr ss://[CIPHER:PASSWORD@]HOST:PORT (-s | -c) [OPTIONS]

OPTIONS:
    -addr <URL>          Remote agent address (server listens, client dials)
    -cipher <NAME>       AEAD_CHACHA20_POLY1305 (default), AEAD_AES_256_GCM,
                         AEAD_AES_128_GCM
    -key <BASE64URL>     Master key (derived from -password if empty)
    -password <TEXT>     Password
    -socks <ADDR>        (client) SOCKS5 listen address
    -tcptun <LIST>       (client) TCP tunnels: laddr1=raddr1,laddr2=raddr2,...
    -s                   Run the remote agent
    -c                   Run the local agent
    -config <FILE>       TOML file with the same keys; flags override it
    -h, --help           Print help information

EXAMPLES:
    Remote side:
        sstunnel -s -addr ss://0.0.0.0:8388 -password secret

    Local side:
        sstunnel -c -addr ss://server.example:8388 -password secret -socks 127.0.0.1:1080
"#
    );
}

async fn run(config: &Config) -> anyhow::Result<()> {
    let mut agents = JoinSet::new();

    if config.server {
        let listen = config.addr.to_string();
        let cipher = config.cipher.clone();
        agents.spawn(async move { remote::run_tunnel_server(&listen, cipher).await });
    }

    if config.client {
        if let Some(socks) = config.socks.clone() {
            let server = config.addr.clone();
            let cipher = config.cipher.clone();
            agents.spawn(async move { local::run_socks5_proxy(&socks, server, cipher).await });
        }
        for tunnel in config.tcptun.iter().cloned() {
            let server = config.addr.clone();
            let cipher = config.cipher.clone();
            agents.spawn(async move { tcptun::run_tcp_tunnel(tunnel, server, cipher).await });
        }
    }

    tracing::info!(
        "Started ({}), tunnel {} via {}",
        mode_name(config),
        config.addr,
        config.cipher.kind()
    );

    // Agents only return on a fatal error, so the first one back ends the process.
    tokio::select! {
        _ = shutdown_signal() => {
            tracing::info!("Received shutdown signal, stopping...");
            Ok(())
        }
        Some(result) = agents.join_next() => {
            match result {
                Ok(Ok(())) => anyhow::bail!("agent stopped unexpectedly"),
                Ok(Err(e)) => {
                    tracing::error!("{}", e);
                    Err(e.into())
                }
                Err(e) => {
                    tracing::error!("Agent task panicked: {}", e);
                    Err(e.into())
                }
            }
        }
    }
}

fn mode_name(config: &Config) -> &'static str {
    match (config.server, config.client) {
        (true, true) => "server+client",
        (true, false) => "server",
        _ => "client",
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Cannot listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = ctrl_c => {}
        _ = wait_for_sigterm() => {}
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!("Cannot listen for SIGTERM: {}", e);
            std::future::pending::<()>().await
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await
}
