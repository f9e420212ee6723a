//! End-to-end tests: SOCKS5 client -> local agent -> remote agent -> echo server.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use sstunnel::crypto::{Cipher, CipherKind};
use sstunnel::proxy::address::Address;
use sstunnel::proxy::{local, remote, tcptun};

const LIMIT: Duration = Duration::from_secs(10);

async fn loopback() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

async fn spawn_echo() -> SocketAddr {
    let (listener, addr) = loopback().await;
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let (mut r, mut w) = stream.split();
                let _ = tokio::io::copy(&mut r, &mut w).await;
            });
        }
    });
    addr
}

async fn spawn_remote(cipher: Cipher) -> SocketAddr {
    let (listener, addr) = loopback().await;
    tokio::spawn(remote::serve(listener, cipher));
    addr
}

async fn spawn_local(server: SocketAddr, cipher: Cipher) -> SocketAddr {
    let (listener, addr) = loopback().await;
    tokio::spawn(local::serve(listener, Address::from(server), cipher));
    addr
}

/// Connect through the SOCKS5 listener and complete the handshake.
async fn socks_connect(proxy: SocketAddr, target: &Address) -> TcpStream {
    let mut client = TcpStream::connect(proxy).await.unwrap();

    client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut method = [0u8; 2];
    client.read_exact(&mut method).await.unwrap();
    assert_eq!(method, [0x05, 0x00]);

    let mut request = vec![0x05, 0x01, 0x00];
    request.extend_from_slice(&target.encode());
    client.write_all(&request).await.unwrap();

    let mut reply = [0u8; 10];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, [0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);
    client
}

fn cipher(kind: CipherKind, password: &str) -> Cipher {
    Cipher::from_password(kind, password)
}

#[tokio::test]
async fn test_socks5_echo_through_tunnel() {
    let echo = spawn_echo().await;
    let c = cipher(CipherKind::ChaCha20Poly1305, "integration");
    let server = spawn_remote(c.clone()).await;
    let proxy = spawn_local(server, c).await;

    timeout(LIMIT, async {
        let mut client = socks_connect(proxy, &Address::from(echo)).await;
        client.write_all(b"hello through the tunnel").await.unwrap();

        let mut echoed = [0u8; 24];
        client.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"hello through the tunnel");
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_large_transfer_for_each_cipher() {
    let echo = spawn_echo().await;

    for kind in [
        CipherKind::ChaCha20Poly1305,
        CipherKind::Aes256Gcm,
        CipherKind::Aes128Gcm,
    ] {
        let c = cipher(kind, "bulk");
        let server = spawn_remote(c.clone()).await;
        let proxy = spawn_local(server, c).await;

        timeout(LIMIT, async {
            let client = socks_connect(proxy, &Address::from(echo)).await;
            let (mut rd, mut wr) = client.into_split();

            let payload: Vec<u8> = (0..200_000u32).map(|i| (i * 31 % 251) as u8).collect();
            let expected = payload.clone();
            let writer = tokio::spawn(async move {
                wr.write_all(&payload).await.unwrap();
                wr
            });

            let mut echoed = vec![0u8; expected.len()];
            rd.read_exact(&mut echoed).await.unwrap();
            assert_eq!(echoed, expected, "{kind}");
            drop(writer.await.unwrap());
        })
        .await
        .unwrap();
    }
}

#[tokio::test]
async fn test_concurrent_sessions_are_independent() {
    let echo = spawn_echo().await;
    let c = cipher(CipherKind::Aes256Gcm, "many");
    let server = spawn_remote(c.clone()).await;
    let proxy = spawn_local(server, c).await;

    let sessions = (0..8u8).map(|id| {
        tokio::spawn(async move {
            let mut client = socks_connect(proxy, &Address::from(echo)).await;
            let msg = vec![id; 1000];
            client.write_all(&msg).await.unwrap();
            let mut echoed = vec![0u8; msg.len()];
            client.read_exact(&mut echoed).await.unwrap();
            assert_eq!(echoed, msg);
        })
    });

    timeout(LIMIT, async {
        for session in sessions.collect::<Vec<_>>() {
            session.await.unwrap();
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_password_mismatch_drops_session() {
    let echo = spawn_echo().await;
    let server = spawn_remote(cipher(CipherKind::ChaCha20Poly1305, "right")).await;
    let proxy = spawn_local(server, cipher(CipherKind::ChaCha20Poly1305, "wrong")).await;

    timeout(LIMIT, async {
        let mut client = socks_connect(proxy, &Address::from(echo)).await;
        let _ = client.write_all(b"never echoed").await;

        let mut buf = [0u8; 64];
        match client.read(&mut buf).await {
            Ok(0) | Err(_) => {}
            Ok(n) => panic!("received {n} bytes over a corrupted tunnel"),
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_remote_drops_plaintext_probe() {
    let server = spawn_remote(cipher(CipherKind::ChaCha20Poly1305, "probe")).await;

    timeout(LIMIT, async {
        let mut probe = TcpStream::connect(server).await.unwrap();
        probe
            .write_all(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n")
            .await
            .unwrap();

        let mut buf = [0u8; 64];
        match probe.read(&mut buf).await {
            Ok(0) | Err(_) => {}
            Ok(n) => panic!("remote answered a probe with {n} bytes"),
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_unsupported_command_closes_client() {
    let c = cipher(CipherKind::ChaCha20Poly1305, "bind");
    let server = spawn_remote(c.clone()).await;
    let proxy = spawn_local(server, c).await;

    timeout(LIMIT, async {
        let mut client = TcpStream::connect(proxy).await.unwrap();
        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        let mut method = [0u8; 2];
        client.read_exact(&mut method).await.unwrap();

        client
            .write_all(&[0x05, 0x02, 0x00, 0x01, 127, 0, 0, 1, 0, 80])
            .await
            .unwrap();
        let mut rest = Vec::new();
        let _ = client.read_to_end(&mut rest).await;
        assert!(rest.is_empty());
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_unreachable_destination_closes_client() {
    let c = cipher(CipherKind::ChaCha20Poly1305, "dial");
    let server = spawn_remote(c.clone()).await;
    let proxy = spawn_local(server, c).await;

    // Bind then drop, so nothing listens on this port.
    let closed = {
        let (listener, addr) = loopback().await;
        drop(listener);
        addr
    };

    timeout(LIMIT, async {
        let mut client = socks_connect(proxy, &Address::from(closed)).await;
        let _ = client.write_all(b"anyone?").await;
        let mut buf = [0u8; 16];
        match client.read(&mut buf).await {
            Ok(0) | Err(_) => {}
            Ok(n) => panic!("received {n} bytes from a closed port"),
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_static_tcp_tunnel() {
    let echo = spawn_echo().await;
    let c = cipher(CipherKind::Aes128Gcm, "tcptun");
    let server = spawn_remote(c.clone()).await;

    let (listener, entry) = loopback().await;
    tokio::spawn(tcptun::serve(
        listener,
        Address::from(echo),
        Address::from(server),
        c,
    ));

    timeout(LIMIT, async {
        let mut client = TcpStream::connect(entry).await.unwrap();
        client.write_all(b"no handshake needed").await.unwrap();
        let mut echoed = [0u8; 19];
        client.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"no handshake needed");
    })
    .await
    .unwrap();
}
