//! RTP header codec (C1) and H.264 RTP packetizer (C3).
//!
//! The header is kept as logical fields and serialized to wire form at send
//! time, rather than mutated in place as two packed bytes — this sidesteps
//! a whole class of field-ordering bugs that show up when bits are poked
//! directly into a byte (spec §9, REDESIGN FLAGS).

use crate::error::{Result, ServerError};

pub const RTP_VERSION: u8 = 2;
pub const RTP_PAYLOAD_TYPE_H264: u8 = 96;

const NAL_HEADER_TYPE_MASK: u8 = 0x1F;
const NAL_TYPE_SPS: u8 = 7;
const NAL_TYPE_PPS: u8 = 8;
const FU_A_TYPE: u8 = 28;

/// The 12-byte RTP fixed header (RFC 3550 §5.1), no CSRCs, no extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub csrc_count: u8,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    /// Build a header for an H.264 RTP packet with everything but
    /// sequence/timestamp/ssrc fixed at their session-constant values.
    pub fn new(sequence_number: u16, timestamp: u32, ssrc: u32) -> Self {
        RtpHeader {
            version: RTP_VERSION,
            padding: false,
            extension: false,
            csrc_count: 0,
            marker: false,
            payload_type: RTP_PAYLOAD_TYPE_H264,
            sequence_number,
            timestamp,
            ssrc,
        }
    }

    /// Serialize to the 12-byte network-byte-order wire form.
    pub fn to_bytes(&self) -> [u8; 12] {
        let mut buf = [0u8; 12];
        buf[0] = (self.version << 6)
            | ((self.padding as u8) << 5)
            | ((self.extension as u8) << 4)
            | (self.csrc_count & 0x0F);
        buf[1] = ((self.marker as u8) << 7) | (self.payload_type & 0x7F);
        buf[2..4].copy_from_slice(&self.sequence_number.to_be_bytes());
        buf[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        buf
    }

    /// Inverse of `to_bytes`. Provided for testing only — the server never
    /// needs to parse RTP it sends.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < 12 {
            return None;
        }
        Some(RtpHeader {
            version: buf[0] >> 6,
            padding: (buf[0] >> 5) & 1 != 0,
            extension: (buf[0] >> 4) & 1 != 0,
            csrc_count: buf[0] & 0x0F,
            marker: (buf[1] >> 7) & 1 != 0,
            payload_type: buf[1] & 0x7F,
            sequence_number: u16::from_be_bytes([buf[2], buf[3]]),
            timestamp: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            ssrc: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        })
    }
}

/// A header plus an opaque payload. For single-NAL mode the payload IS the
/// NAL unit; for FU-A mode it's `FU-indicator || FU-header || fragment`.
#[derive(Debug, Clone)]
pub struct RtpPacket {
    pub header: RtpHeader,
    pub payload: Vec<u8>,
}

impl RtpPacket {
    pub fn to_datagram(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12 + self.payload.len());
        out.extend_from_slice(&self.header.to_bytes());
        out.extend_from_slice(&self.payload);
        out
    }
}

/// A connected datagram transport the packetizer sends RTP packets through.
/// Implemented for `tokio::net::UdpSocket`; tests supply an in-memory fake.
pub trait DatagramSink {
    async fn send(&self, buf: &[u8]) -> std::io::Result<usize>;
}

impl DatagramSink for tokio::net::UdpSocket {
    async fn send(&self, buf: &[u8]) -> std::io::Result<usize> {
        tokio::net::UdpSocket::send(self, buf).await
    }
}

/// Running per-session RTP state: sequence number and presentation timestamp.
#[derive(Debug, Clone, Copy, Default)]
pub struct RtpCounters {
    pub sequence_number: u16,
    pub timestamp: u32,
}

impl RtpCounters {
    pub fn new() -> Self {
        RtpCounters::default()
    }
}

/// Packetizes one NAL unit into one or more RTP datagrams and sends them via
/// `sink`, advancing `counters` in place. See spec §4.3.
///
/// `counters.sequence_number` is advanced by one per datagram sent (mod
/// 2^16). `counters.timestamp` is advanced by `90_000 / fps` once per NAL
/// unit, except NAL types 7 (SPS) and 8 (PPS), which never advance it.
///
/// On send failure, the error is returned and both counters reflect progress
/// made up to the failed fragment — partial sends are not rolled back.
pub async fn send_nal<S: DatagramSink>(
    nal: &[u8],
    sink: &S,
    counters: &mut RtpCounters,
    ssrc: u32,
    rtp_max_pkt_size: usize,
    fps: u32,
) -> Result<()> {
    if nal.is_empty() {
        return Ok(());
    }

    let nal_header = nal[0];
    let nal_type = nal_header & NAL_HEADER_TYPE_MASK;

    if nal.len() <= rtp_max_pkt_size {
        send_single(nal, sink, counters, ssrc).await?;
    } else {
        send_fragmented(nal, nal_header, sink, counters, ssrc, rtp_max_pkt_size).await?;
    }

    if nal_type != NAL_TYPE_SPS && nal_type != NAL_TYPE_PPS {
        counters.timestamp = counters
            .timestamp
            .wrapping_add(90_000u32.wrapping_div(fps.max(1)));
    }

    Ok(())
}

async fn send_single<S: DatagramSink>(
    nal: &[u8],
    sink: &S,
    counters: &mut RtpCounters,
    ssrc: u32,
) -> Result<()> {
    let header = RtpHeader::new(counters.sequence_number, counters.timestamp, ssrc);
    let packet = RtpPacket {
        header,
        payload: nal.to_vec(),
    };
    sink.send(&packet.to_datagram())
        .await
        .map_err(ServerError::Io)?;
    counters.sequence_number = counters.sequence_number.wrapping_add(1);
    Ok(())
}

async fn send_fragmented<S: DatagramSink>(
    nal: &[u8],
    nal_header: u8,
    sink: &S,
    counters: &mut RtpCounters,
    ssrc: u32,
    rtp_max_pkt_size: usize,
) -> Result<()> {
    // The NAL header itself is not retransmitted; fragments cover nal[1..].
    let body = &nal[1..];
    let fu_indicator = (nal_header & 0x60) | FU_A_TYPE;
    let nal_type_bits = nal_header & 0x1F;

    let full = body.len() / rtp_max_pkt_size;
    let tail = body.len() % rtp_max_pkt_size;
    let total_fragments = full + if tail > 0 { 1 } else { 0 };

    for i in 0..total_fragments {
        let start = i * rtp_max_pkt_size;
        let is_last = i == total_fragments - 1;
        let end = if is_last {
            body.len()
        } else {
            start + rtp_max_pkt_size
        };

        let mut fu_header = nal_type_bits;
        if i == 0 {
            fu_header |= 0x80; // S bit
        }
        if is_last {
            fu_header |= 0x40; // E bit
        }

        let mut payload = Vec::with_capacity(2 + (end - start));
        payload.push(fu_indicator);
        payload.push(fu_header);
        payload.extend_from_slice(&body[start..end]);

        let header = RtpHeader::new(counters.sequence_number, counters.timestamp, ssrc);
        let packet = RtpPacket { header, payload };
        sink.send(&packet.to_datagram())
            .await
            .map_err(ServerError::Io)?;
        counters.sequence_number = counters.sequence_number.wrapping_add(1);
    }

    Ok(())
}
