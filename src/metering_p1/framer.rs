use log::{debug, warn};

pub const START_MARKER: u8 = b'/';
pub const END_MARKER: u8 = b'!';
pub const CHECKSUM_LEN: usize = 4;

/* A DSMR 5 telegram is well below 2 KiB, anything this large is line noise */
pub const MAX_TELEGRAM_LEN: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq)]
enum FramerState {
    /// Discarding bytes until a start marker shows up
    Hunting,
    /// Inside a telegram, waiting for the end marker
    Body,
    /// End marker seen, copying the checksum digits verbatim
    Checksum(usize),
}

/// Reassembles P1 telegrams from a byte stream.
///
/// Bytes may be fed one at a time or in chunks of any size, the result is the
/// same. A start marker always restarts the telegram, so a partial telegram
/// followed by a fresh `/` is silently dropped.
pub struct TelegramFramer {
    buffer: Vec<u8>,
    state: FramerState,
}

impl TelegramFramer {
    pub fn new() -> Self {
        TelegramFramer {
            buffer: Vec::with_capacity(1024),
            state: FramerState::Hunting,
        }
    }

    /// Push one byte, returns the complete telegram once its checksum digits arrived.
    pub fn feed(&mut self, byte: u8) -> Option<Vec<u8>> {
        match self.state {
            FramerState::Checksum(missing) => {
                self.buffer.push(byte);
                if missing > 1 {
                    self.state = FramerState::Checksum(missing - 1);
                    return None;
                }

                self.state = FramerState::Hunting;
                let frame = std::mem::take(&mut self.buffer);
                debug!("Complete telegram with {} bytes", frame.len());
                Some(frame)
            }
            _ if byte == START_MARKER => {
                if !self.buffer.is_empty() {
                    debug!("Start marker inside telegram, dropping {} buffered bytes", self.buffer.len());
                    self.buffer.clear();
                }
                self.buffer.push(byte);
                self.state = FramerState::Body;
                None
            }
            FramerState::Hunting => None,
            FramerState::Body => {
                self.buffer.push(byte);
                if byte == END_MARKER {
                    self.state = FramerState::Checksum(CHECKSUM_LEN);
                } else if self.buffer.len() > MAX_TELEGRAM_LEN {
                    warn!("Telegram exceeds {} bytes without end marker, discarding", MAX_TELEGRAM_LEN);
                    self.reset();
                }
                None
            }
        }
    }

    /// Push a chunk of bytes, returns every telegram completed by it in order.
    pub fn feed_chunk(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        data.iter().filter_map(|b| self.feed(*b)).collect()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.state = FramerState::Hunting;
    }

    /// Number of bytes of the telegram currently being assembled.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for TelegramFramer {
    fn default() -> Self {
        Self::new()
    }
}
