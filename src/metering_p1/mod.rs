use crate::{config::Config, hub::ReadingHub};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;

pub mod utils;
pub mod framer;
pub mod checksum;
pub mod obis_parser;
#[cfg(feature = "serial")]
pub mod serial;

use framer::TelegramFramer;

/// Shortest read timeout the loop waits for, a zero timeout would spin on an idle line
pub const MIN_READ_TIMEOUT: Duration = Duration::from_millis(10);

/// Custom error types for P1 telegram handling
#[derive(Error, Debug)]
pub enum P1Error {
    #[error("Telegram has no end marker")]
    MissingEndMarker,
    #[error("Telegram has more than one end marker")]
    MultipleEndMarkers,
    #[error("Checksum after end marker is too short")]
    ChecksumTooShort,
    #[error("Checksum mismatch, transmitted {transmitted} computed {computed}")]
    ChecksumMismatch { transmitted: String, computed: String },
    #[error("Unable to open serial port: {0}")]
    SerialOpen(String),
    #[error("Serial read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Too many consecutive errors ({0}), reader stopped")]
    TooManyErrors(u32),
}

#[derive(Debug, Clone)]
pub struct ReaderSettings {
    pub read_timeout: Duration,
    pub max_consecutive_errors: u32,
    pub error_backoff: Duration,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        ReaderSettings {
            read_timeout: Duration::from_secs(1),
            max_consecutive_errors: 10,
            error_backoff: Duration::from_secs(1),
        }
    }
}

impl ReaderSettings {
    pub fn from_config(config: &Config) -> Self {
        ReaderSettings {
            read_timeout: Duration::from_millis(config.serial.read_timeout_ms),
            max_consecutive_errors: config.reader.max_consecutive_errors,
            error_backoff: Duration::from_millis(config.reader.error_backoff_ms),
        }
    }
}

/// Why the ingestion loop returned
#[derive(Debug)]
pub enum ReaderExit {
    Cancelled,
    Failed(P1Error),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReaderStats {
    pub frames: u64,
    pub rejected: u64,
    pub published: u64,
    pub io_errors: u64,
}

/// Drives framer, checksum and decoder and publishes into the hub.
/// This is the only writer of the hub's latest reading.
pub struct P1Manager {
    hub: Arc<ReadingHub>,
    settings: ReaderSettings,
    framer: TelegramFramer,
    stats: ReaderStats,
}

impl P1Manager {
    pub fn new(hub: Arc<ReadingHub>, mut settings: ReaderSettings) -> Self {
        settings.read_timeout = settings.read_timeout.max(MIN_READ_TIMEOUT);
        P1Manager {
            hub,
            settings,
            framer: TelegramFramer::new(),
            stats: ReaderStats::default(),
        }
    }

    pub fn stats(&self) -> &ReaderStats {
        &self.stats
    }

    /// Validate, decode and publish one complete telegram.
    pub fn handle_frame(&mut self, frame: &[u8]) -> bool {
        self.stats.frames += 1;

        if let Err(e) = checksum::verify(frame) {
            self.stats.rejected += 1;
            warn!("Dropping telegram: {e}");
            return false;
        }

        let reading = obis_parser::decode(frame);
        debug!("Publishing reading from {}", reading.timestamp);
        self.hub.publish(reading);
        self.stats.published += 1;
        true
    }

    /// Feed received bytes, returns the number of telegrams published.
    pub fn handle_bytes(&mut self, data: &[u8]) -> usize {
        let mut published = 0;
        for frame in self.framer.feed_chunk(data) {
            if self.handle_frame(&frame) {
                published += 1;
            }
        }
        published
    }

    /// Read telegrams from `source` until cancelled or too many reads in a row
    /// failed. A read of zero bytes counts as a failed read, USB adapters report
    /// a hang-up that way. The source is dropped on return.
    pub async fn start_thread<R>(&mut self, mut source: R, mut shutdown: watch::Receiver<bool>) -> ReaderExit
    where
        R: AsyncRead + Unpin,
    {
        info!("Starting P1 reader thread");

        let read_timeout = self.settings.read_timeout;
        let max_errors = self.settings.max_consecutive_errors;
        let mut consecutive_errors: u32 = 0;
        let mut buf = [0u8; 1024];

        loop {
            let read = tokio::select! {
                _ = wait_for_shutdown(&mut shutdown) => return self.finish(ReaderExit::Cancelled),
                read = tokio::time::timeout(read_timeout, source.read(&mut buf)) => read,
            };

            let failure = match read {
                Err(_) => {
                    /* Nothing on the line yet, the meter sends once per second */
                    continue;
                }
                Ok(Ok(0)) => "source returned end of stream".to_string(),
                Ok(Ok(n)) => {
                    if self.handle_bytes(&buf[..n]) > 0 {
                        consecutive_errors = 0;
                    }
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
            };

            consecutive_errors += 1;
            self.stats.io_errors += 1;
            error!("Error reading telegram ({}/{}): {}", consecutive_errors, max_errors, failure);

            if consecutive_errors >= max_errors {
                error!("Too many consecutive errors ({}), stopping reader", max_errors);
                return self.finish(ReaderExit::Failed(P1Error::TooManyErrors(max_errors)));
            }

            tokio::select! {
                _ = wait_for_shutdown(&mut shutdown) => return self.finish(ReaderExit::Cancelled),
                _ = tokio::time::sleep(self.settings.error_backoff) => {},
            }
        }
    }

    fn finish(&self, exit: ReaderExit) -> ReaderExit {
        info!(
            "P1 reader finished ({:?}): {} telegrams, {} rejected, {} published, {} read errors",
            exit, self.stats.frames, self.stats.rejected, self.stats.published, self.stats.io_errors
        );
        exit
    }
}

/* Resolves once shutdown was requested, never if the sender is gone */
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let result = shutdown.wait_for(|stop| *stop).await.map(|_| ());
    if result.is_err() {
        std::future::pending::<()>().await;
    }
}
