//! Byte taps: read-only consumers of the upstream stream.
//!
//! A tap sees every chunk read from upstream, in order, tagged with the
//! absolute stream position of its first byte. Protocol decoders belong
//! here, outside the ring and the eviction logic.

/// Read-only observer of ingested upstream bytes.
pub trait ByteTap {
    fn on_ingest(&mut self, position: u64, bytes: &[u8]);
}

/// Default cap on how many bytes of a chunk get dumped.
pub const HEX_DUMP_LIMIT: usize = 128;

/// Logs each ingested chunk as hex at debug level.
#[derive(Debug)]
pub struct HexDumpTap {
    limit: usize,
}

impl HexDumpTap {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }
}

impl Default for HexDumpTap {
    fn default() -> Self {
        Self::new(HEX_DUMP_LIMIT)
    }
}

impl ByteTap for HexDumpTap {
    fn on_ingest(&mut self, position: u64, bytes: &[u8]) {
        if !tracing::enabled!(tracing::Level::DEBUG) {
            return;
        }
        tracing::debug!(
            "Received {} bytes at {}: {}",
            bytes.len(),
            position,
            hex_preview(bytes, self.limit)
        );
    }
}

/// Uppercase hex of the first `limit` bytes, with a trailing `..` when cut.
pub fn hex_preview(bytes: &[u8], limit: usize) -> String {
    let shown = &bytes[..bytes.len().min(limit)];
    let mut out = hex::encode_upper(shown);
    if shown.len() < bytes.len() {
        out.push_str("..");
    }
    out
}
