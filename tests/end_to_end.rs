//! End-to-end tests for the sensor ⇄ collector reliability loop.
//!
//! Every test runs on loopback: a real [`Collector`] (or a bare socket
//! standing in for one) in a background task, and a [`ReliableSender`]
//! with its reconciler on the test task.  Timers are shortened so retry
//! exhaustion happens in well under a second.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use telemetry_over_udp::{
    client,
    config::SensorConfig,
    packet::{decode, Frame, MsgType},
    readings::ReadingSource,
    recorder::{CsvRecorder, MemoryRecorder, CSV_HEADER},
    sender::ReliableSender,
    server::Collector,
    simulator::{Relay, SimulatorConfig},
    socket::Socket,
    timer::TimerConfig,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

/// Short timers so a frame is abandoned after roughly 300 ms.
fn fast_timers() -> TimerConfig {
    TimerConfig {
        ack_timeout: Duration::from_millis(100),
        max_retries: 2,
        sweep_interval: Duration::from_millis(20),
        recv_poll: Duration::from_millis(50),
    }
}

/// Start an in-memory collector; returns its address, the shutdown switch,
/// and a handle yielding the collector once it has stopped.
async fn spawn_collector() -> (
    SocketAddr,
    watch::Sender<bool>,
    JoinHandle<Collector<MemoryRecorder>>,
) {
    let mut collector = Collector::bind(loopback(), MemoryRecorder::default(), fast_timers())
        .await
        .expect("bind collector");
    let addr = collector.local_addr();
    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        collector.run(rx).await.expect("collector run");
        collector
    });
    (addr, tx, handle)
}

async fn stop_collector(
    tx: watch::Sender<bool>,
    handle: JoinHandle<Collector<MemoryRecorder>>,
) -> Collector<MemoryRecorder> {
    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("collector did not stop")
        .expect("collector task panicked")
}

/// Poll `cond` every 10 ms until it holds or five seconds pass.
async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn sender_to(collector: SocketAddr, device_id: u16) -> ReliableSender {
    let socket = Arc::new(Socket::bind(loopback()).await.expect("bind sensor"));
    ReliableSender::new(socket, collector, device_id, fast_timers())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// A batch is recorded once, acknowledged, and cleared from the pending table.
#[tokio::test]
async fn batch_is_recorded_and_acknowledged() {
    let (addr, tx, handle) = spawn_collector().await;

    let (_stop_sensor, sensor_rx) = watch::channel(false);
    let mut sender = sender_to(addr, 1).await;
    let reconciler = sender.reconciler().spawn(sensor_rx);

    let seq = sender
        .send_batch(&["temp=21.50,hum=48.20", "temp=21.60,hum=48.10"])
        .await
        .expect("send batch");
    assert_eq!(seq, 1);

    wait_until(|| sender.pending_len() == 0).await;
    reconciler.abort();

    let collector = stop_collector(tx, handle).await;
    let history = collector.history();
    assert_eq!(history.len(), 1, "ACK arrived so nothing was resent");

    let record = &history[0];
    assert_eq!(record.msg_type, MsgType::Data);
    assert_eq!((record.device_id, record.seq_num, record.batch_count), (1, 1, 2));
    assert!(record.valid_checksum);
    assert!(!record.duplicate);
    assert!(!record.gap);
    assert_eq!(record.payload, b"temp=21.50,hum=48.20|temp=21.60,hum=48.10");

    let sink = collector.into_sink();
    assert_eq!(sink.appended.len(), 1);
    assert_eq!(sink.sorted.as_ref().map(Vec::len), Some(1));
}

/// Without ACKs the original bytes are resent `max_retries` times, then dropped.
#[tokio::test]
async fn unacknowledged_frame_is_resent_then_abandoned() {
    let silent = Socket::bind(loopback()).await.expect("bind silent peer");

    let (_stop_sensor, sensor_rx) = watch::channel(false);
    let mut sender = sender_to(silent.local_addr, 4).await;
    let reconciler = sender.reconciler().spawn(sensor_rx);

    let seq = sender.send_batch(&["temp=25.00,hum=50.00"]).await.unwrap();

    let mut copies = Vec::new();
    for _ in 0..3 {
        let (bytes, _) = tokio::time::timeout(Duration::from_secs(2), silent.recv_raw())
            .await
            .expect("expected a (re)transmission")
            .unwrap();
        copies.push(bytes);
    }
    assert!(copies.windows(2).all(|w| w[0] == w[1]), "retransmits must be byte-identical");
    assert_eq!(decode(&copies[0]).unwrap().frame.seq_num, seq);

    wait_until(|| !sender.is_pending(seq)).await;

    // Budget spent: no fourth copy.
    let extra = silent.recv_timeout(Duration::from_millis(300)).await.unwrap();
    assert!(extra.is_none(), "frame was sent more than 1 + max_retries times");

    reconciler.abort();
}

/// Dropping every ACK in a relay makes the collector see duplicates.
#[tokio::test]
async fn lost_acks_surface_as_duplicates() {
    let (addr, tx, handle) = spawn_collector().await;

    let relay = Relay::bind(
        loopback(),
        addr,
        SimulatorConfig {
            downstream_loss: 1.0,
            seed: Some(11),
            ..SimulatorConfig::default()
        },
    )
    .await
    .expect("bind relay");
    let relay_addr = relay.local_addr();
    let (relay_tx, relay_rx) = watch::channel(false);
    let relay_task = tokio::spawn(relay.run(relay_rx));

    let (_stop_sensor, sensor_rx) = watch::channel(false);
    let mut sender = sender_to(relay_addr, 2).await;
    let reconciler = sender.reconciler().spawn(sensor_rx);

    let seq = sender.send_batch(&["temp=23.00,hum=41.00"]).await.unwrap();
    wait_until(|| !sender.is_pending(seq)).await;
    reconciler.abort();

    relay_tx.send(true).unwrap();
    let stats = relay_task.await.unwrap().expect("relay run");
    assert_eq!(stats.forwarded, 3);
    assert_eq!(stats.dropped, 3, "all three ACKs dropped");

    let collector = stop_collector(tx, handle).await;
    let flags: Vec<(u16, bool, bool)> = collector
        .history()
        .iter()
        .map(|r| (r.seq_num, r.duplicate, r.gap))
        .collect();
    assert_eq!(flags, vec![(1, false, false), (1, true, false), (1, true, false)]);
}

/// A skipped sequence number is flagged and both frames are still ACKed.
#[tokio::test]
async fn skipped_sequence_is_flagged_as_gap() {
    let (addr, tx, handle) = spawn_collector().await;
    let peer = Socket::bind(loopback()).await.unwrap();

    for seq in [1u16, 3] {
        let frame = Frame {
            msg_type: MsgType::Data,
            device_id: 9,
            seq_num: seq,
            timestamp: 1_700_000_000 + u32::from(seq),
            batch_count: 1,
            payload: b"temp=20.00,hum=40.00".to_vec(),
        };
        peer.send_frame(&frame, addr).await.unwrap();

        let (bytes, _) = tokio::time::timeout(Duration::from_secs(2), peer.recv_raw())
            .await
            .expect("no ACK")
            .unwrap();
        let ack = decode(&bytes).unwrap();
        assert!(ack.valid_checksum);
        assert_eq!(ack.frame, Frame::ack(9, seq, frame.timestamp));
    }

    let collector = stop_collector(tx, handle).await;
    let gaps: Vec<bool> = collector.history().iter().map(|r| r.gap).collect();
    assert_eq!(gaps, vec![false, true]);
    assert_eq!(collector.tracker().device(9).map(|d| d.highest()), Some(3));
}

/// The sensor loop numbers its frames 1, 2, 3, … and stops on request.
#[tokio::test]
async fn sensor_loop_delivers_in_sequence() {
    let (addr, tx, handle) = spawn_collector().await;

    let config = SensorConfig {
        device_id: 7,
        collector: addr,
        bind: loopback(),
        data_interval: Duration::from_millis(20),
        data_probability: 1.0,
        timers: fast_timers(),
        ..SensorConfig::default()
    };
    let (sensor_tx, sensor_rx) = watch::channel(false);
    let sensor = tokio::spawn(client::run_with_source(
        config,
        ReadingSource::seeded(5, 3),
        sensor_rx,
    ));

    tokio::time::sleep(Duration::from_millis(250)).await;
    sensor_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), sensor)
        .await
        .expect("sensor did not stop")
        .expect("sensor task panicked")
        .expect("sensor run");

    let collector = stop_collector(tx, handle).await;
    let history = collector.history();
    assert!(history.len() >= 3, "only {} frame(s) arrived", history.len());
    assert!(history.iter().all(|r| r.device_id == 7 && r.msg_type == MsgType::Data));
    assert!(history.iter().all(|r| r.valid_checksum && !r.duplicate && !r.gap));

    let seqs: Vec<u16> = history.iter().map(|r| r.seq_num).collect();
    let expected: Vec<u16> = (1..=seqs.len() as u16).collect();
    assert_eq!(seqs, expected);
}

/// The CSV sink writes a live log in arrival order and a sorted copy at shutdown.
#[tokio::test]
async fn csv_files_are_written() {
    let dir = tempfile::tempdir().unwrap();
    let live = dir.path().join("live.csv");
    let sorted = dir.path().join("sorted.csv");

    let sink = CsvRecorder::create(&live, sorted.clone()).unwrap();
    let mut collector = Collector::bind(loopback(), sink, fast_timers()).await.unwrap();
    let addr = collector.local_addr();
    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(async move { collector.run(rx).await });

    let peer = Socket::bind(loopback()).await.unwrap();
    // Timestamps deliberately out of order.
    for (seq, ts) in [(1u16, 300u32), (2, 100), (3, 200)] {
        let frame = Frame {
            msg_type: MsgType::Data,
            device_id: 3,
            seq_num: seq,
            timestamp: ts,
            batch_count: 1,
            payload: b"temp=22.00,hum=44.00".to_vec(),
        };
        peer.send_frame(&frame, addr).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), peer.recv_raw())
            .await
            .expect("no ACK")
            .unwrap();
    }

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("collector did not stop")
        .unwrap()
        .expect("collector run");

    let column = |path: &std::path::Path, idx: usize| -> Vec<String> {
        let text = std::fs::read_to_string(path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some(CSV_HEADER));
        lines
            .map(|l| l.split(',').nth(idx).unwrap().to_string())
            .collect()
    };

    assert_eq!(column(&live, 3), vec!["300", "100", "200"]);
    assert_eq!(column(&sorted, 3), vec!["100", "200", "300"]);
    assert_eq!(column(&sorted, 2), vec!["2", "3", "1"]);
}
