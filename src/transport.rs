//! TCP control transport and UDP sink setup (C6).

use crate::error::{Result, ServerError};
use std::net::{IpAddr, SocketAddr};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};

/// One request block per read call, no pipelining across reads.
pub const BUF_SIZE: usize = 10_000;

/// Read up to `BUF_SIZE` bytes from the control connection and decode as
/// (possibly lossy) UTF-8. Returns `None` on a clean EOF (peer closed the
/// connection without sending a final request).
pub async fn read_request_block(stream: &mut TcpStream) -> Result<Option<String>> {
    let mut buf = vec![0u8; BUF_SIZE];
    let n = stream.read(&mut buf).await.map_err(ServerError::Io)?;
    if n == 0 {
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(&buf[..n]).into_owned()))
}

/// Write a response block to the control connection.
pub async fn write_response(stream: &mut TcpStream, response: &str) -> Result<()> {
    stream
        .write_all(response.as_bytes())
        .await
        .map_err(ServerError::Io)
}

/// The pair of UDP sockets a session sends RTP/RTCP on, each "connected" to
/// the client's advertised ports so plain `send` works without re-specifying
/// the destination per datagram.
pub struct MediaSockets {
    pub rtp: UdpSocket,
    pub rtcp: UdpSocket,
}

/// Open two UDP sockets connected to `(client_ip, client_rtp_port)` and
/// `(client_ip, client_rtcp_port)`.
///
/// The local port each socket binds to is ephemeral (`0.0.0.0:0`): binding
/// every concurrent session to the same fixed `server_rtp_port` is not
/// possible without `SO_REUSEPORT`, which the standard library doesn't
/// expose. The server still *advertises* the fixed configured ports in the
/// `SETUP` response (spec requires this), it just doesn't literally bind
/// them — a detail that doesn't affect any client that trusts the response.
pub async fn setup_media_sockets(
    client_ip: IpAddr,
    client_rtp_port: u16,
    client_rtcp_port: u16,
) -> Result<MediaSockets> {
    let rtp = UdpSocket::bind("0.0.0.0:0").await.map_err(ServerError::Io)?;
    rtp.connect(SocketAddr::new(client_ip, client_rtp_port))
        .await
        .map_err(ServerError::Io)?;

    let rtcp = UdpSocket::bind("0.0.0.0:0").await.map_err(ServerError::Io)?;
    rtcp.connect(SocketAddr::new(client_ip, client_rtcp_port))
        .await
        .map_err(ServerError::Io)?;

    Ok(MediaSockets { rtp, rtcp })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn read_request_block_returns_sent_bytes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream
                .write_all(b"OPTIONS rtsp://127.0.0.1:8554 RTSP/1.0\r\nCSeq: 1\r\n")
                .await
                .unwrap();
        });

        let (mut server_stream, _) = listener.accept().await.unwrap();
        let block = read_request_block(&mut server_stream).await.unwrap();
        assert_eq!(
            block.unwrap(),
            "OPTIONS rtsp://127.0.0.1:8554 RTSP/1.0\r\nCSeq: 1\r\n"
        );
        client.await.unwrap();
    }

    #[tokio::test]
    async fn read_request_block_returns_none_on_eof() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let _ = TcpStream::connect(addr).await.unwrap();
        });

        let (mut server_stream, _) = listener.accept().await.unwrap();
        let block = read_request_block(&mut server_stream).await.unwrap();
        assert!(block.is_none());
    }

    #[tokio::test]
    async fn media_sockets_connect_to_client_ports() {
        let rtp_listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let rtcp_listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let sockets = setup_media_sockets(
            "127.0.0.1".parse().unwrap(),
            rtp_listener.local_addr().unwrap().port(),
            rtcp_listener.local_addr().unwrap().port(),
        )
        .await
        .unwrap();

        sockets.rtp.send(b"hello-rtp").await.unwrap();
        let mut buf = [0u8; 16];
        let n = rtp_listener.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello-rtp");

        sockets.rtcp.send(b"hello-rtcp").await.unwrap();
        let n = rtcp_listener.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello-rtcp");
    }
}
