//! Stand-in controllers for manual runs and tests.
//!
//! Each simulated controller dials its robot's endpoint, acknowledges every
//! task it receives with `Task {label} done by {name}` and reconnects when
//! the scheduler goes away.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::RobotSetup;

const RECV_BUFFER_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy)]
pub struct PeerOptions {
    /// Simulated processing time before each reply.
    pub response_delay: Duration,
    /// Wait between failed connection attempts.
    pub retry_delay: Duration,
}

impl Default for PeerOptions {
    fn default() -> Self {
        Self {
            response_delay: Duration::from_secs(1),
            retry_delay: Duration::from_secs(5),
        }
    }
}

/// `(received at, robot, label)` in the order tasks arrived.
type Journal = Arc<Mutex<Vec<(Instant, String, String)>>>;

pub struct PeerSimulator {
    stop: Arc<AtomicBool>,
    received: Journal,
    tasks: JoinSet<()>,
}

impl PeerSimulator {
    /// Starts one client task per entry in `setup`.
    pub fn spawn(setup: Vec<RobotSetup>, options: PeerOptions) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let received: Journal = Arc::default();
        let mut tasks = JoinSet::new();
        for robot in setup {
            let peer = Peer {
                robot,
                options,
                stop: Arc::clone(&stop),
                received: Arc::clone(&received),
            };
            tasks.spawn(peer.run());
        }
        Self {
            stop,
            received,
            tasks,
        }
    }

    /// Every task received so far as `(robot, label)`.
    pub fn received(&self) -> Vec<(String, String)> {
        self.timeline()
            .into_iter()
            .map(|(_, robot, label)| (robot, label))
            .collect()
    }

    /// Every task received so far with its arrival time.
    pub fn timeline(&self) -> Vec<(Instant, String, String)> {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Signals every client and waits for them to disconnect.
    pub async fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        while self.tasks.join_next().await.is_some() {}
        info!("Peer simulator stopped");
    }
}

struct Peer {
    robot: RobotSetup,
    options: PeerOptions,
    stop: Arc<AtomicBool>,
    received: Journal,
}

impl Peer {
    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Short enough that a stop request is noticed promptly.
    fn poll(&self) -> Duration {
        self.options.retry_delay.min(Duration::from_millis(100))
    }

    async fn run(self) {
        let endpoint = format!("{}:{}", self.robot.host, self.robot.port);
        info!(robot = %self.robot.name, %endpoint, "Peer client started");
        while !self.stopped() {
            match TcpStream::connect(&endpoint).await {
                Ok(stream) => {
                    info!(robot = %self.robot.name, %endpoint, "Connected to scheduler");
                    if let Err(e) = self.serve(stream).await {
                        warn!(robot = %self.robot.name, error = %e, "Connection error");
                    }
                }
                Err(e) => {
                    debug!(robot = %self.robot.name, error = %e, "Connect failed, retrying");
                    self.pause(self.options.retry_delay).await;
                }
            }
        }
        info!(robot = %self.robot.name, "Peer client stopped");
    }

    /// Sleeps for `total`, waking early on stop.
    async fn pause(&self, total: Duration) {
        let mut left = total;
        while !left.is_zero() && !self.stopped() {
            let step = left.min(self.poll());
            sleep(step).await;
            left -= step;
        }
    }

    async fn serve(&self, mut stream: TcpStream) -> std::io::Result<()> {
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        while !self.stopped() {
            let n = match timeout(self.poll(), stream.read(&mut buf)).await {
                Err(_) => continue,
                Ok(read) => read?,
            };
            if n == 0 {
                info!(robot = %self.robot.name, "Scheduler closed the connection");
                self.pause(self.options.retry_delay).await;
                return Ok(());
            }
            let label = String::from_utf8_lossy(&buf[..n]).into_owned();
            info!(robot = %self.robot.name, label = %label, "Received task");
            self.received
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((Instant::now(), self.robot.name.clone(), label.clone()));

            self.pause(self.options.response_delay).await;
            if self.stopped() {
                break;
            }
            let reply = format!("Task {label} done by {}", self.robot.name);
            stream.write_all(reply.as_bytes()).await?;
            debug!(robot = %self.robot.name, reply = %reply, "Response sent");
        }
        stream.shutdown().await
    }
}
