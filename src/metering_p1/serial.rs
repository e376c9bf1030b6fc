//! Serial side of the P1 port: 8N1 with XON/XOFF, baud rate from the config

use super::{P1Error, P1Manager, ReaderExit, ReaderSettings};
use crate::{config::{Config, SerialConfig}, hub::ReadingHub};
use log::{error, info};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};

pub fn open_port(config: &SerialConfig) -> Result<SerialStream, P1Error> {
    tokio_serial::new(config.port.as_str(), config.baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::Software)
        .open_native_async()
        .map_err(|e| P1Error::SerialOpen(format!("{}: {}", config.port, e)))
}

/// Open the configured port and run the reader on it until it stops.
pub async fn run_serial_reader(hub: Arc<ReadingHub>, config: &Config, shutdown: watch::Receiver<bool>) -> ReaderExit {
    let port = match open_port(&config.serial) {
        Ok(port) => port,
        Err(e) => {
            error!("Failed to connect to P1 port: {e}");
            return ReaderExit::Failed(e);
        }
    };
    info!("Connected to P1 port on {} ({} baud)", config.serial.port, config.serial.baud_rate);

    let mut manager = P1Manager::new(hub, ReaderSettings::from_config(config));
    let exit = manager.start_thread(port, shutdown).await;

    info!("Disconnected from P1 port");
    exit
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_port_fails() {
        let mut config = Config::default();
        config.serial.port = "/dev/p1reader-does-not-exist".to_string();

        let (_tx, rx) = watch::channel(false);
        let hub = Arc::new(ReadingHub::new());
        let exit = run_serial_reader(hub.clone(), &config, rx).await;

        assert!(matches!(exit, ReaderExit::Failed(P1Error::SerialOpen(_))));
        assert!(hub.snapshot().is_none());
    }
}
