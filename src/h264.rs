//! H.264 Annex-B NAL-unit framer (C2).
//!
//! Splits a byte stream into NAL units at 4-byte `00 00 00 01` start codes.
//! 3-byte start codes are not recognized — documented source behavior
//! (spec §4.2) carried over from the reference implementation.

use crate::error::{Result, ServerError};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, oneshot};

const START_CODE: [u8; 4] = [0, 0, 0, 1];
const READ_CHUNK_SIZE: usize = 8192;

/// Incremental start-code scanner. Holds back up to 3 trailing zero bytes
/// at a time (the longest possible partial match of the 4-byte start code)
/// so a byte never lands in `data` if it might still turn out to be part of
/// a start code seen in a later chunk.
struct NalScanner {
    data: Vec<u8>,
    pending_zeros: usize,
}

impl NalScanner {
    fn new() -> Self {
        NalScanner {
            data: Vec::new(),
            pending_zeros: 0,
        }
    }

    /// Feed one byte. Returns a completed NAL unit if this byte completed a
    /// start code (the NAL unit preceding that start code, which may be
    /// empty for the leading region).
    fn push_byte(&mut self, b: u8) -> Option<Vec<u8>> {
        if b == 0 {
            if self.pending_zeros >= START_CODE.len() - 1 {
                // A 4th (or later) consecutive zero can't itself be part of
                // the eventual start code match — the oldest held-back zero
                // is now safe to commit to `data`.
                self.data.push(0);
            } else {
                self.pending_zeros += 1;
            }
            None
        } else if b == 1 && self.pending_zeros >= START_CODE.len() - 1 {
            let nal = std::mem::take(&mut self.data);
            self.pending_zeros = 0;
            Some(nal)
        } else {
            for _ in 0..self.pending_zeros {
                self.data.push(0);
            }
            self.pending_zeros = 0;
            self.data.push(b);
            None
        }
    }

    /// Flush any held-back bytes at end of input and return the final
    /// (possibly empty) NAL unit.
    fn finish(mut self) -> Vec<u8> {
        for _ in 0..self.pending_zeros {
            self.data.push(0);
        }
        self.data
    }
}

/// Split a complete in-memory byte stream into NAL units, per spec §4.2 /
/// §8 P2. Used directly by tests; the async framer below is a thin
/// chunk-at-a-time wrapper around the same scanner for streaming readers.
pub fn split_nal_units(bytes: &[u8]) -> Vec<Vec<u8>> {
    let mut scanner = NalScanner::new();
    let mut out = Vec::new();
    for &b in bytes {
        if let Some(nal) = scanner.push_byte(b) {
            out.push(nal);
        }
    }
    out.push(scanner.finish());
    out
}

/// Handle to a spawned framer task: a bounded channel of NAL units and a
/// one-shot error channel (spec §4.5's "framer producing into a bounded
/// channel ... and an error channel").
pub struct Framer {
    pub nal_rx: mpsc::Receiver<Vec<u8>>,
    pub error_rx: oneshot::Receiver<ServerError>,
}

/// Spawn the framer as its own task reading `reader` to completion. The
/// task runs until EOF, a reader error, or until the consumer drops
/// `nal_rx` (send then fails and the task exits quietly — this is the
/// intended cancellation path, not reported as an error).
pub fn spawn_framer<R>(reader: R, channel_capacity: usize) -> Framer
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (nal_tx, nal_rx) = mpsc::channel(channel_capacity);
    let (error_tx, error_rx) = oneshot::channel();

    tokio::spawn(async move {
        if let Err(err) = run_framer(reader, nal_tx).await {
            let _ = error_tx.send(err);
        }
    });

    Framer { nal_rx, error_rx }
}

async fn run_framer<R>(mut reader: R, nal_tx: mpsc::Sender<Vec<u8>>) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut scanner = NalScanner::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        let n = reader
            .read(&mut chunk)
            .await
            .map_err(|err| ServerError::Framer(err.to_string()))?;
        if n == 0 {
            break;
        }
        for &b in &chunk[..n] {
            if let Some(nal) = scanner.push_byte(b) {
                if nal_tx.send(nal).await.is_err() {
                    return Ok(());
                }
            }
        }
    }

    let _ = nal_tx.send(scanner.finish()).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Scenario 1 (spec §8): leading empty NAL, then two NALs split on
    // 4-byte start codes.
    #[test]
    fn splits_on_four_byte_start_codes() {
        let input = [
            0x00, 0x00, 0x00, 0x01, 0x06, 0x05, 0x5A, 0xB3, 0xE1, 0x63, 0x30, 0x8C, 0x3C, 0x9E,
            0x4F, 0xC2, 0x00, 0x00, 0x00, 0x01, 0x0F, 0x0F, 0x0F, 0x0F,
        ];
        let nals = split_nal_units(&input);
        assert_eq!(nals.len(), 3);
        assert!(nals[0].is_empty());
        assert_eq!(
            nals[1],
            vec![0x06, 0x05, 0x5A, 0xB3, 0xE1, 0x63, 0x30, 0x8C, 0x3C, 0x9E, 0x4F, 0xC2]
        );
        assert_eq!(nals[2], vec![0x0F, 0x0F, 0x0F, 0x0F]);
    }

    // Scenario 2 (spec §8): an internal `00 00 02 00` must NOT be mistaken
    // for a start code and must be preserved verbatim.
    #[test]
    fn preserves_non_matching_internal_zero_runs() {
        let input = [
            0x00, 0x00, 0x00, 0x01, 0x06, 0x05, 0x5A, 0xB3, 0x00, 0x00, 0x02, 0x00, 0x00, 0x0F,
            0x00, 0x00, 0x00, 0x01, 0x34, 0x40,
        ];
        let nals = split_nal_units(&input);
        assert_eq!(nals.len(), 3);
        assert!(nals[0].is_empty());
        assert_eq!(
            nals[1],
            vec![0x06, 0x05, 0x5A, 0xB3, 0x00, 0x00, 0x02, 0x00, 0x00, 0x0F]
        );
        assert_eq!(nals[2], vec![0x34, 0x40]);
    }

    #[test]
    fn empty_input_emits_single_empty_nal() {
        let nals = split_nal_units(&[]);
        assert_eq!(nals, vec![Vec::<u8>::new()]);
    }

    #[test]
    fn stream_ending_exactly_at_start_code_emits_trailing_empty_nal() {
        let input = [0x00, 0x00, 0x00, 0x01, 0xAB, 0x00, 0x00, 0x00, 0x01];
        let nals = split_nal_units(&input);
        assert_eq!(nals.len(), 3);
        assert!(nals[0].is_empty());
        assert_eq!(nals[1], vec![0xAB]);
        assert!(nals[2].is_empty());
    }

    #[test]
    fn three_byte_start_codes_are_not_recognized() {
        // 00 00 01 is NOT a 4-byte start code, so it must stay inside the NAL.
        let input = [0x00, 0x00, 0x00, 0x01, 0x65, 0x00, 0x00, 0x01, 0x99];
        let nals = split_nal_units(&input);
        assert_eq!(nals.len(), 2);
        assert!(nals[0].is_empty());
        assert_eq!(nals[1], vec![0x65, 0x00, 0x00, 0x01, 0x99]);
    }

    #[tokio::test]
    async fn async_framer_matches_synchronous_scanner() {
        let input: Vec<u8> = {
            let mut v = Vec::new();
            v.extend_from_slice(&START_CODE);
            v.extend_from_slice(&[1, 2, 3, 4, 5]);
            v.extend_from_slice(&START_CODE);
            v.extend_from_slice(&[6, 7, 8]);
            v
        };
        let expected = split_nal_units(&input);

        let mut framer = spawn_framer(std::io::Cursor::new(input), 32);
        let mut received = Vec::new();
        while let Some(nal) = framer.nal_rx.recv().await {
            received.push(nal);
        }
        assert_eq!(received, expected);
        assert!(framer.error_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn async_framer_surfaces_reader_errors() {
        struct FailingReader;
        impl AsyncRead for FailingReader {
            fn poll_read(
                self: std::pin::Pin<&mut Self>,
                _cx: &mut std::task::Context<'_>,
                _buf: &mut tokio::io::ReadBuf<'_>,
            ) -> std::task::Poll<std::io::Result<()>> {
                std::task::Poll::Ready(Err(std::io::Error::other("boom")))
            }
        }

        let mut framer = spawn_framer(FailingReader, 32);
        assert!(framer.nal_rx.recv().await.is_none());
        let err = framer.error_rx.await.expect("error reported");
        assert!(matches!(err, ServerError::Framer(_)));
    }
}
