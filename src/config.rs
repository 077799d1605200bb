use std::net::SocketAddr;

/// Process-wide constants. Not overridable by environment variable or CLI
/// flag (see spec §6) — a different `ServerConfig` is built in code when a
/// caller needs different values.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// RTSP control listening address.
    pub rtsp_addr: SocketAddr,
    /// Fixed UDP port the server sends RTP on.
    pub server_rtp_port: u16,
    /// Fixed UDP port the server reserves for RTCP (never sent on).
    pub server_rtcp_port: u16,
    /// Path to the Annex-B H.264 elementary stream served to every client.
    pub video_path: String,
    /// Maximum RTP payload size before FU-A fragmentation kicks in.
    pub rtp_max_pkt_size: usize,
    /// Presentation frame rate used to derive the 90kHz timestamp step.
    pub fps: u32,
    /// Pacing delay between NAL units during PLAY.
    pub send_frame_sleep_gap: std::time::Duration,
    /// Capacity of the framer-to-sender channel.
    pub frame_out_chan_size: usize,
    /// Fixed SSRC advertised by every session.
    pub ssrc: u32,
    /// Fixed RTSP session id string returned to every client.
    pub session_id: &'static str,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            rtsp_addr: SocketAddr::from(([127, 0, 0, 1], 8554)),
            server_rtp_port: 55532,
            server_rtcp_port: 55533,
            video_path: "videos/test.h264".to_string(),
            rtp_max_pkt_size: 1400,
            fps: 29,
            send_frame_sleep_gap: std::time::Duration::from_millis(30),
            frame_out_chan_size: 32,
            ssrc: 0x8892_3423,
            session_id: "66334873",
        }
    }
}
