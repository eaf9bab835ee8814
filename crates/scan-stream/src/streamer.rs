//! Scan Streamer Implementation

use scanner_session::{RequestKind, Scan, ScannerSession};
use scip_protocol::{ScipError, Transport};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

/// Configuration for the scan streamer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Continuous request kind
    pub kind: RequestKind,
    /// First step, defaults to the measurable area
    pub first: Option<i32>,
    /// Last step, defaults to the measurable area
    pub last: Option<i32>,
    /// Angular stride
    pub skip_lines: u32,
    /// Temporal stride
    pub skip_frames: u32,
    /// Scans to capture, 0 for endless
    pub capture_times: u32,
    /// Consecutive receive failures before the request is re-issued
    pub max_retries: u8,
    /// Retry backoff base in milliseconds
    pub retry_backoff_ms: u64,
    /// Scans buffered between the sensor and the consumer
    pub channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            kind: RequestKind::Continuous,
            first: None,
            last: None,
            skip_lines: 1,
            skip_frames: 0,
            capture_times: 0,
            max_retries: 3,
            retry_backoff_ms: 100,
            channel_capacity: 8,
        }
    }
}

/// Counters for one streaming run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamStats {
    /// Scans decoded
    pub scans: u64,
    /// Receive attempts that produced no scan
    pub failures: u64,
    /// Times the request was re-issued
    pub restarts: u64,
}

/// Session and result handed back when a spawned stream ends
pub struct StreamOutcome<T> {
    pub session: ScannerSession<T>,
    pub result: Result<StreamStats, ScipError>,
}

/// Handle to a stream running on a blocking task
pub struct StreamTask<T> {
    running: Arc<AtomicBool>,
    handle: JoinHandle<StreamOutcome<T>>,
}

impl<T> StreamTask<T> {
    /// Ask the loop to stop after the scan in progress
    pub fn stop(&self) {
        info!("Stopping scan stream");
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the loop to end and take the session back
    pub async fn join(self) -> Result<StreamOutcome<T>, JoinError> {
        self.handle.await
    }
}

/// Continuous capture loop over a scanner session
pub struct ScanStreamer {
    config: StreamConfig,
    running: Arc<AtomicBool>,
}

impl ScanStreamer {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Stop the loop
    pub fn stop(&self) {
        info!("Stopping scan stream");
        self.running.store(false, Ordering::SeqCst);
    }

    /// Check if the loop is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn request<T: Transport>(&self, session: &mut ScannerSession<T>) -> Result<(), ScipError> {
        session.set_skip_lines(self.config.skip_lines)?;
        session.set_skip_frames(self.config.skip_frames)?;
        session.set_capture_times(self.config.capture_times);
        session.request_data(self.config.kind, self.config.first, self.config.last)
    }

    /// Run the capture loop on the calling thread.
    ///
    /// Ends when stopped, when the consumer goes away, or when a finite
    /// stream delivered its last scan. The laser is switched off on the way
    /// out.
    pub fn run<T: Transport>(&self, session: &mut ScannerSession<T>, tx: &mpsc::Sender<Scan>) -> Result<StreamStats, ScipError> {
        self.running.store(true, Ordering::SeqCst);
        self.stream(session, tx)
    }

    fn stream<T: Transport>(&self, session: &mut ScannerSession<T>, tx: &mpsc::Sender<Scan>) -> Result<StreamStats, ScipError> {
        if !self.config.kind.is_continuous() {
            self.running.store(false, Ordering::SeqCst);
            return Err(ScipError::InvalidArgument(format!("{:?} is not a continuous request", self.config.kind)));
        }

        info!("Starting scan stream ({:?})", self.config.kind);
        let mut stats = StreamStats::default();
        let result = self.capture_loop(session, tx, &mut stats);
        self.running.store(false, Ordering::SeqCst);

        if let Err(e) = session.laser_off() {
            debug!("Laser off after stream failed: {}", e);
            if let Err(e) = session.drain() {
                debug!("Drain after stream failed: {}", e);
            }
        }
        info!(
            "Scan stream stopped: {} scans, {} failures, {} restarts",
            stats.scans, stats.failures, stats.restarts
        );
        result.map(|_| stats)
    }

    fn capture_loop<T: Transport>(
        &self,
        session: &mut ScannerSession<T>,
        tx: &mpsc::Sender<Scan>,
        stats: &mut StreamStats,
    ) -> Result<(), ScipError> {
        let finite = self.config.capture_times > 0;
        self.request(session)?;

        let mut failures: u8 = 0;
        while self.is_running() {
            match session.receive_scan() {
                Ok(scan) => {
                    failures = 0;
                    stats.scans += 1;
                    let last = finite && scan.remaining == 0;

                    if tx.blocking_send(scan).is_err() {
                        info!("Scan consumer dropped");
                        break;
                    }
                    if last {
                        info!("Requested scans delivered");
                        break;
                    }
                }
                Err(e) if e.is_recoverable() => {
                    failures += 1;
                    stats.failures += 1;
                    warn!("Scan receive failed (attempt {}): {}", failures, e);

                    if failures >= self.config.max_retries {
                        stats.restarts += 1;
                        let backoff = self.config.retry_backoff_ms * stats.restarts.min(10);
                        warn!("Max retries reached, re-issuing request in {} ms", backoff);
                        std::thread::sleep(Duration::from_millis(backoff));

                        if let Err(e) = session.laser_off() {
                            debug!("Stop before restart failed: {}", e);
                        }
                        session.drain()?;
                        self.request(session)?;
                        failures = 0;
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Move `session` onto a blocking task and stream its scans
    pub fn spawn<T>(self, mut session: ScannerSession<T>) -> (StreamTask<T>, mpsc::Receiver<Scan>)
    where
        T: Transport + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();

        let handle = tokio::task::spawn_blocking(move || {
            let result = self.stream(&mut session, &tx);
            if let Err(e) = &result {
                warn!("Scan stream ended with error: {}", e);
            }
            StreamOutcome { session, result }
        });

        (StreamTask { running, handle }, rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanner_session::SessionConfig;
    use scip_protocol::mock::MockSensor;
    use scip_protocol::with_checksum;

    fn session() -> ScannerSession<MockSensor> {
        let mut session = ScannerSession::new(MockSensor::default(), SessionConfig::fast());
        session.connect("/dev/ttyACM0", 115200).unwrap();
        session
    }

    #[test]
    fn test_default_config() {
        let config = StreamConfig::default();
        assert_eq!(config.kind, RequestKind::Continuous);
        assert_eq!(config.capture_times, 0);
        assert!(config.channel_capacity > 0);
    }

    #[test]
    fn test_run_rejects_single_shot() {
        let streamer = ScanStreamer::new(StreamConfig {
            kind: RequestKind::SingleShot,
            ..Default::default()
        });
        let (tx, _rx) = mpsc::channel(1);
        let mut session = session();
        assert!(matches!(
            streamer.run(&mut session, &tx),
            Err(ScipError::InvalidArgument(_))
        ));
        assert!(!streamer.is_running());
    }

    #[test]
    fn test_run_requires_connection() {
        let streamer = ScanStreamer::new(StreamConfig::default());
        let (tx, _rx) = mpsc::channel(1);
        let mut session = ScannerSession::new(MockSensor::default(), SessionConfig::fast());
        assert!(matches!(streamer.run(&mut session, &tx), Err(ScipError::NotConnected)));
    }

    #[tokio::test]
    async fn test_finite_stream_delivers_all_scans() {
        let streamer = ScanStreamer::new(StreamConfig {
            capture_times: 3,
            ..Default::default()
        });
        let (task, mut rx) = streamer.spawn(session());

        let mut remaining = Vec::new();
        while let Some(scan) = rx.recv().await {
            assert_eq!(scan.len(), 726);
            remaining.push(scan.remaining);
        }
        assert_eq!(remaining, vec![2, 1, 0]);

        let outcome = task.join().await.unwrap();
        assert_eq!(outcome.result.unwrap().scans, 3);
        assert!(outcome.session.is_connected());
        assert!(!outcome.session.transport().is_laser_on());
    }

    #[tokio::test]
    async fn test_stop_ends_endless_stream() {
        let streamer = ScanStreamer::new(StreamConfig {
            kind: RequestKind::ContinuousCompact,
            skip_lines: 4,
            ..Default::default()
        });
        let (task, mut rx) = streamer.spawn(session());

        let first = rx.recv().await.unwrap();
        assert_eq!(&first.ranges[44..48], &[1044i64; 4]);
        assert!(rx.recv().await.is_some());

        task.stop();
        drop(rx);
        let outcome = task.join().await.unwrap();
        assert!(outcome.result.unwrap().scans >= 2);
        assert!(!outcome.session.transport().is_streaming());
    }

    #[tokio::test]
    async fn test_laser_off_reply_is_retried_not_forwarded() {
        let mut session = session();
        let mut rejected = b"MD0044072501001\n".to_vec();
        rejected.extend(with_checksum(b"10"));
        rejected.extend_from_slice(b"\n\n");
        session.transport_mut().push_output(&rejected);

        let streamer = ScanStreamer::new(StreamConfig {
            capture_times: 1,
            ..Default::default()
        });
        let (task, mut rx) = streamer.spawn(session);

        let scan = rx.recv().await.unwrap();
        assert_eq!(scan.len(), 726);
        assert_eq!(scan.ranges[44], 1044);
        assert!(rx.recv().await.is_none());

        let stats = task.join().await.unwrap().result.unwrap();
        assert_eq!((stats.scans, stats.failures, stats.restarts), (1, 1, 0));
    }

    #[tokio::test]
    async fn test_dropped_consumer_ends_stream() {
        let (task, rx) = ScanStreamer::new(StreamConfig::default()).spawn(session());
        drop(rx);

        let outcome = task.join().await.unwrap();
        assert_eq!(outcome.result.unwrap().scans, 1);
        assert!(outcome.session.is_connected());
        assert!(!outcome.session.transport().is_streaming());
    }
}
