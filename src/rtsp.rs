//! RTSP request parser (C4) and per-connection session state machine (C5).

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::h264;
use crate::rtp::{self, RtpCounters};
use crate::transport::{self, MediaSockets};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::TcpStream;

/// The four methods this server understands. Any other method word falls
/// through parsing unrecognized and is ignored at dispatch time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Options,
    Describe,
    Setup,
    Play,
}

impl Method {
    const ALL: [(&'static str, Method); 4] = [
        ("OPTIONS", Method::Options),
        ("DESCRIBE", Method::Describe),
        ("SETUP", Method::Setup),
        ("PLAY", Method::Play),
    ];

    fn from_request_line(line: &str) -> Option<Method> {
        Method::ALL
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix))
            .map(|&(_, method)| method)
    }
}

/// A parsed RTSP request block. Fields not present on the wire keep their
/// sentinel (`-1` for integers, empty string for `url`/`version`, `None`
/// for an unrecognized method) — spec policy: sentinel-on-absent,
/// error-on-malformed-recognized-line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtspRequest {
    pub method: Option<Method>,
    pub url: String,
    pub version: String,
    pub cseq: i64,
    pub client_rtp_port: i64,
    pub client_rtcp_port: i64,
}

impl RtspRequest {
    fn empty() -> Self {
        RtspRequest {
            method: None,
            url: String::new(),
            version: String::new(),
            cseq: -1,
            client_rtp_port: -1,
            client_rtcp_port: -1,
        }
    }
}

/// Parse a request block received on the control connection. The block is
/// split on `\n`; a trailing `\r` on each line is tolerated.
pub fn parse_request(block: &str) -> Result<RtspRequest> {
    let mut req = RtspRequest::empty();

    for raw_line in block.split('\n') {
        let line = raw_line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }

        if let Some(method) = Method::from_request_line(line) {
            let mut parts = line.split_whitespace();
            parts.next(); // method token, already matched
            let url = parts
                .next()
                .ok_or_else(|| ServerError::Parse(format!("request line missing URL: {line:?}")))?;
            let version = parts.next().ok_or_else(|| {
                ServerError::Parse(format!("request line missing version: {line:?}"))
            })?;
            req.method = Some(method);
            req.url = url.to_string();
            req.version = version.to_string();
        } else if let Some(rest) = line.strip_prefix("CSeq") {
            let value = rest.trim_start_matches(':').trim();
            req.cseq = value
                .parse()
                .map_err(|_| ServerError::Parse(format!("malformed CSeq: {value:?}")))?;
        } else if let Some(rest) = line.strip_prefix("Transport:") {
            let (rtp_port, rtcp_port) = parse_client_port_range(rest)?;
            req.client_rtp_port = rtp_port;
            req.client_rtcp_port = rtcp_port;
        }
        // any other line is ignored, per spec
    }

    Ok(req)
}

fn parse_client_port_range(transport_value: &str) -> Result<(i64, i64)> {
    const MARKER: &str = "client_port=";
    let start = transport_value.find(MARKER).ok_or_else(|| {
        ServerError::Parse(format!(
            "Transport line missing client_port: {transport_value:?}"
        ))
    })? + MARKER.len();

    let remainder = &transport_value[start..];
    let ports_part = remainder.split(';').next().unwrap_or(remainder).trim();
    let (rtp_str, rtcp_str) = ports_part.split_once('-').ok_or_else(|| {
        ServerError::Parse(format!("malformed client_port range: {ports_part:?}"))
    })?;

    let rtp_port = rtp_str
        .trim()
        .parse::<i64>()
        .map_err(|_| ServerError::Parse(format!("malformed client rtp port: {rtp_str:?}")))?;
    let rtcp_port = rtcp_str
        .trim()
        .parse::<i64>()
        .map_err(|_| ServerError::Parse(format!("malformed client rtcp port: {rtcp_str:?}")))?;

    Ok((rtp_port, rtcp_port))
}

/// Session lifecycle states (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Ready,
    Playing,
    Closed,
}

/// Per-connection state carried across requests.
pub struct Session {
    pub id: i64,
    pub client_addr: SocketAddr,
    pub state: SessionState,
    pub client_rtp_port: i64,
    pub client_rtcp_port: i64,
    pub media: Option<MediaSockets>,
    pub counters: RtpCounters,
}

impl Session {
    pub fn new(id: i64, client_addr: SocketAddr) -> Self {
        Session {
            id,
            client_addr,
            state: SessionState::Init,
            client_rtp_port: -1,
            client_rtcp_port: -1,
            media: None,
            counters: RtpCounters::new(),
        }
    }
}

enum ControlFlow {
    Continue,
    Close,
}

fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn build_options_response(req: &RtspRequest) -> String {
    format!(
        "RTSP/1.0 200 OK\r\nCSeq: {}\r\nPublic: OPTIONS, DESCRIBE, SETUP, PLAY\r\n\r\n",
        req.cseq
    )
}

fn build_describe_response(req: &RtspRequest, unix_secs: u64) -> String {
    // The reference scans everything after "rtsp://" up to whitespace as a
    // single token (it never splits off a path), so a path-bearing URL
    // would land in the SDP verbatim too. Carried over as documented
    // source behavior.
    let host_port = req.url.strip_prefix("rtsp://").unwrap_or(&req.url);

    let sdp = format!(
        "v=0\r\no=- 9{unix_secs} 1 IN IP4 {host_port}\r\nt=0 0\r\na=control:*\r\nm=video 0 RTP/AVP 96\r\na=rtpmap:96 H264/90000\r\na=control:track0\r\n"
    );

    format!(
        "RTSP/1.0 200 OK\r\nCSeq: {}\r\nContent-Base: {}\r\nContent-type: application/sdp\r\nContent-length: {}u\r\n\r\n{}",
        req.cseq,
        req.url,
        sdp.len(),
        sdp
    )
}

fn build_setup_response(req: &RtspRequest, config: &ServerConfig) -> String {
    format!(
        "RTSP/1.0 200 OK\r\nCSeq: {}\r\nTransport: RTP/AVP;unicast;client_port={}-{};server_port={}-{}\r\nSession: {}\r\n\r\n",
        req.cseq,
        req.client_rtp_port,
        req.client_rtcp_port,
        config.server_rtp_port,
        config.server_rtcp_port,
        config.session_id
    )
}

fn build_play_response(req: &RtspRequest, config: &ServerConfig) -> String {
    format!(
        "RTSP/1.0 200 OK\r\nCSeq: {}\r\nRange: npt=0.000-\r\nSession: {}; timeout=10\r\n\r\n",
        req.cseq, config.session_id
    )
}

async fn dispatch(
    conn: &mut TcpStream,
    session: &mut Session,
    request: &RtspRequest,
    config: &ServerConfig,
) -> Result<ControlFlow> {
    let Some(method) = request.method else {
        log::debug!("[session {}] ignoring request with no recognized method", session.id);
        return Ok(ControlFlow::Continue);
    };

    match method {
        Method::Options => {
            transport::write_response(conn, &build_options_response(request)).await?;
            Ok(ControlFlow::Continue)
        }

        Method::Describe => {
            let response = build_describe_response(request, unix_now_secs());
            transport::write_response(conn, &response).await?;
            Ok(ControlFlow::Continue)
        }

        Method::Setup => {
            if session.state != SessionState::Init {
                log::debug!(
                    "[session {}] ignoring SETUP outside INIT (state={:?})",
                    session.id,
                    session.state
                );
                return Ok(ControlFlow::Continue);
            }

            let client_rtp_port = u16::try_from(request.client_rtp_port)
                .map_err(|_| ServerError::Protocol("client_rtp_port out of range".to_string()))?;
            let client_rtcp_port = u16::try_from(request.client_rtcp_port)
                .map_err(|_| ServerError::Protocol("client_rtcp_port out of range".to_string()))?;

            let media = transport::setup_media_sockets(
                session.client_addr.ip(),
                client_rtp_port,
                client_rtcp_port,
            )
            .await?;

            session.media = Some(media);
            session.client_rtp_port = request.client_rtp_port;
            session.client_rtcp_port = request.client_rtcp_port;
            session.state = SessionState::Ready;

            transport::write_response(conn, &build_setup_response(request, config)).await?;
            Ok(ControlFlow::Continue)
        }

        Method::Play => {
            if session.state != SessionState::Ready {
                log::debug!(
                    "[session {}] ignoring PLAY outside READY (state={:?})",
                    session.id,
                    session.state
                );
                return Ok(ControlFlow::Continue);
            }

            session.state = SessionState::Playing;
            transport::write_response(conn, &build_play_response(request, config)).await?;

            if let Err(err) = run_streaming_loop(session, config).await {
                log::warn!("[session {}] streaming loop ended with error: {err}", session.id);
            }

            session.state = SessionState::Closed;
            Ok(ControlFlow::Close)
        }
    }
}

/// The data-plane heart of `PLAY`: framer producer + packetizer consumer
/// joined by a bounded channel, paced by `SEND_FRAME_SLEEP_GAP` (spec §4.5).
async fn run_streaming_loop(session: &mut Session, config: &ServerConfig) -> Result<()> {
    let file = tokio::fs::File::open(&config.video_path)
        .await
        .map_err(ServerError::Io)?;
    let mut framer = h264::spawn_framer(file, config.frame_out_chan_size);

    let media = session
        .media
        .as_ref()
        .ok_or_else(|| ServerError::Protocol("PLAY reached without SETUP".to_string()))?;

    // `error_rx` only ever carries a value when the framer task hit a real
    // reader error (h264::run_framer sends before returning). On a clean
    // EOF the task returns Ok(()) and just drops `error_tx`, which makes
    // `error_rx` resolve to `Err(RecvError)` immediately — well before
    // `nal_rx` (bounded to FRAME_OUT_CHAN_SIZE) has drained its backlog.
    // `select!` picks whichever branch is ready with no preference, so
    // treating that `Err` as terminal would race-truncate the tail of the
    // stream. Only an `Ok(err)` ends the loop early; a plain sender drop
    // just disables this branch and the loop keeps draining `nal_rx` until
    // it reports closed.
    let mut framer_error_pending = true;

    loop {
        tokio::select! {
            nal = framer.nal_rx.recv() => {
                match nal {
                    Some(nal) => {
                        if nal.is_empty() {
                            continue;
                        }
                        if let Err(err) = rtp::send_nal(
                            &nal,
                            &media.rtp,
                            &mut session.counters,
                            config.ssrc,
                            config.rtp_max_pkt_size,
                            config.fps,
                        )
                        .await
                        {
                            log::warn!("[session {}] RTP send error: {err}", session.id);
                        }
                        tokio::time::sleep(config.send_frame_sleep_gap).await;
                    }
                    None => break,
                }
            }
            err = &mut framer.error_rx, if framer_error_pending => {
                framer_error_pending = false;
                if let Ok(err) = err {
                    log::warn!("[session {}] framer error: {err}", session.id);
                    break;
                }
            }
        }
    }

    Ok(())
}

/// Drive one accepted control connection end-to-end: read request blocks,
/// parse, dispatch, until the peer closes, an I/O error occurs, a parse
/// error (logged, connection stays open), or `PLAY`'s streaming loop ends.
pub async fn handle_connection(
    mut conn: TcpStream,
    client_addr: SocketAddr,
    id: i64,
    config: Arc<ServerConfig>,
) {
    let mut session = Session::new(id, client_addr);

    loop {
        let block = match transport::read_request_block(&mut conn).await {
            Ok(Some(block)) => block,
            Ok(None) => {
                log::debug!("[session {id}] connection closed by peer");
                break;
            }
            Err(err) => {
                log::warn!("[session {id}] read error: {err}");
                break;
            }
        };

        let request = match parse_request(&block) {
            Ok(request) => request,
            Err(err) => {
                log::warn!("[session {id}] parse error (no response sent): {err}");
                continue;
            }
        };

        match dispatch(&mut conn, &mut session, &request, &config).await {
            Ok(ControlFlow::Continue) => continue,
            Ok(ControlFlow::Close) => break,
            Err(err) => {
                log::warn!("[session {id}] closing after error: {err}");
                break;
            }
        }
    }
}
