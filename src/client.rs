//! Sensor driver loop.
//!
//! Ties a [`ReadingSource`] to a [`ReliableSender`]: every data interval
//! the sensor either reports readings or, after enough quiet time, a
//! heartbeat.  The reconciler runs beside it as its own task.
//!
//! Shutdown is immediate: frames still awaiting an ACK are abandoned.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::SensorConfig;
use crate::readings::ReadingSource;
use crate::sender::ReliableSender;
use crate::socket::{Socket, SocketError};

/// Aborts the wrapped task when dropped, so no exit path leaves it running.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run one sensor until `shutdown` reads `true`.
pub async fn run(config: SensorConfig, shutdown: watch::Receiver<bool>) -> Result<(), SocketError> {
    let source = ReadingSource::new(config.max_readings);
    run_with_source(config, source, shutdown).await
}

/// [`run`] with a caller-supplied reading source.
pub async fn run_with_source(
    config: SensorConfig,
    mut source: ReadingSource,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), SocketError> {
    let socket = Arc::new(Socket::bind(config.bind).await?);
    log::info!(
        "[sensor] device {} started on {}, sending to {}",
        config.device_id,
        socket.local_addr,
        config.collector
    );

    let mut sender = ReliableSender::new(socket, config.collector, config.device_id, config.timers);
    let mut reconciler = AbortOnDrop(sender.reconciler().spawn(shutdown.clone()));

    let mut ticker = tokio::time::interval(config.data_interval);
    let mut last_tx: Option<Instant> = None;

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            joined = &mut reconciler.0 => {
                // The reconciler only ends early on a socket failure.
                return match joined {
                    Ok(result) => result,
                    Err(e) => Err(SocketError::Io(std::io::Error::other(e))),
                };
            }
            _ = ticker.tick() => {
                if source.chance(config.data_probability) {
                    let readings = source.next_batch();
                    if config.batching {
                        sender.send_batch(&readings).await?;
                    } else {
                        sender.send_individually(&readings).await?;
                    }
                    last_tx = Some(Instant::now());
                } else if last_tx.map_or(true, |t| t.elapsed() >= config.heartbeat_interval) {
                    sender.send_heartbeat().await?;
                    last_tx = Some(Instant::now());
                }
            }
        }
    }

    log::info!(
        "[sensor] device {} stopped at seq={} with {} frame(s) unacknowledged",
        config.device_id,
        sender.last_seq(),
        sender.pending_len()
    );
    Ok(())
}
