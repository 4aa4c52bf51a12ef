use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use mdl_nbd_client::{Client, EndpointAddress, Error, FrameType, Limits};

/// A symbolic constant for 1 MiB.
#[allow(non_upper_case_globals)]
pub const MiB: u64 = 1 << 20;

/// Produces a complete oldstyle server handshake for an export of `size`.
fn handshake(size: u64) -> Vec<u8> {
    [
        &b"NBDMAGIC"[..],
        &[0x00, 0x00, 0x42, 0x02, 0x81, 0x86, 0x12, 0x53],
        &size.to_be_bytes(),
        &[0u8; 128],
    ]
    .concat()
}

/// Binds a TCP listener on the first address "localhost" resolves to, so that
/// a client resolving "localhost" will connect to it.
async fn listen() -> (TcpListener, String) {
    let endpoint = EndpointAddress::resolve("localhost", 0)
        .await
        .expect("failed to resolve localhost");

    let listener = TcpListener::bind(endpoint.addr())
        .await
        .expect("failed to listen");

    let port = listener
        .local_addr()
        .expect("failed to get listener address")
        .port()
        .to_string();

    (listener, port)
}

#[tokio::test]
async fn connect() {
    let (listener, port) = listen().await;

    let server_handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("failed to accept");

        socket
            .write_all(&handshake(MiB))
            .await
            .expect("failed to write handshake");

        // The client sends nothing during the handshake, so the next read only
        // completes once it disconnects.
        let mut buf = [0u8; 1];
        let n = socket.read(&mut buf).await.expect("failed to read");
        assert_eq!(n, 0, "client sent unexpected data");
    });

    let client_handle = tokio::spawn(async move {
        let client = Client::new().block_size(1024);
        let session = client
            .connect("localhost", &port)
            .await
            .expect("failed to negotiate session");

        let geometry = session.geometry();
        assert_eq!(geometry.size(), MiB, "unexpected export size");
        assert_eq!(geometry.block_size(), 1024, "unexpected block size");
        assert_eq!(geometry.blocks(), 1024, "unexpected block count");

        let endpoint = session.endpoint().expect("session has no endpoint");
        assert_eq!(endpoint.port().to_string(), port);
        assert!(session
            .stream()
            .nodelay()
            .expect("failed to get TCP_NODELAY"));
    });

    client_handle.await.expect("failed to run client");
    server_handle.await.expect("failed to run server");
}

#[tokio::test]
async fn truncated() {
    let (listener, port) = listen().await;

    let server_handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("failed to accept");

        // Send half of the password, then stop sending.
        socket
            .write_all(b"NBDM")
            .await
            .expect("failed to write partial handshake");
        socket.shutdown().await.expect("failed to shut down");

        // The client must close its socket after failing the handshake.
        let mut buf = [0u8; 1];
        let n = socket.read(&mut buf).await.expect("failed to read");
        assert_eq!(n, 0, "client did not close its socket");
    });

    let client_handle = tokio::spawn(async move {
        let err = Client::new()
            .connect("localhost", &port)
            .await
            .expect_err("handshake succeeded");

        assert!(
            matches!(err, Error::TruncatedHandshake(FrameType::Password)),
            "expected Error::TruncatedHandshake, but got: {err:?}"
        );
    });

    client_handle.await.expect("failed to run client");
    server_handle.await.expect("failed to run server");
}

#[tokio::test]
async fn peer_closed() {
    let (listener, port) = listen().await;

    let server_handle = tokio::spawn(async move {
        // Accept and immediately close, as a server which cannot open its
        // export would.
        let (socket, _) = listener.accept().await.expect("failed to accept");
        drop(socket);
    });

    let err = Client::new()
        .connect("localhost", &port)
        .await
        .expect_err("handshake succeeded");

    assert!(
        matches!(err, Error::PeerClosed),
        "expected Error::PeerClosed, but got: {err:?}"
    );

    server_handle.await.expect("failed to run server");
}

#[tokio::test]
async fn export_too_large() {
    let (listener, port) = listen().await;

    let server_handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("failed to accept");

        // The client may hang up before the reserved bytes are written.
        let _ = socket.write_all(&handshake(1 << 42)).await;
    });

    let err = Client::new()
        .limits(Limits::bits(32))
        .connect("localhost", &port)
        .await
        .expect_err("handshake succeeded");

    assert!(
        matches!(err, Error::ExportTooLarge { size, .. } if size == 1 << 42),
        "expected Error::ExportTooLarge, but got: {err:?}"
    );

    server_handle.await.expect("failed to run server");
}

#[tokio::test]
async fn connection_refused() {
    let (listener, port) = listen().await;
    drop(listener);

    let err = Client::new()
        .connect("localhost", &port)
        .await
        .expect_err("connected to closed listener");

    assert!(
        matches!(err, Error::Connect { .. }),
        "expected Error::Connect, but got: {err:?}"
    );
}
