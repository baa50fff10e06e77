//! Listening TCP endpoint for one physical arm controller.
//!
//! The controller is the TCP client; the scheduler keeps a fixed listening
//! port per device and re-accepts whenever the controller power-cycles.
//! Every wait in this module is a bounded poll at the link's interval, so a
//! [`RobotLink::stop`] is observed by pending calls within one interval.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use tokio::io::ReadBuf;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::RobotSetup;
use crate::error::{ErrorKind, LinkError, SchedulerError};

/// Largest completion payload read in one call.
const RECV_BUFFER_SIZE: usize = 1024;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
pub struct RobotLink {
    name: String,
    host: String,
    port: u16,
    poll_interval: Duration,
    connection: Mutex<Option<Arc<TcpStream>>>,
    local_addr: Mutex<Option<SocketAddr>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl RobotLink {
    pub fn new(setup: &RobotSetup, poll_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: setup.name.clone(),
            host: setup.host.clone(),
            port: setup.port,
            poll_interval,
            connection: Mutex::new(None),
            local_addr: Mutex::new(None),
            accept_task: Mutex::new(None),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The configured `host:port`.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The bound address once [`start`](Self::start) succeeded.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *lock(&self.local_addr)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Binds the listening endpoint and spawns the accept loop.
    ///
    /// The port is fixed per device, so a bind failure is returned as is and
    /// never retried.
    pub async fn start(self: &Arc<Self>) -> Result<SocketAddr, SchedulerError> {
        let endpoint = self.endpoint();
        let listener = TcpListener::bind(&endpoint)
            .await
            .map_err(|source| SchedulerError::Bind {
                robot: self.name.clone(),
                addr: endpoint.clone(),
                source,
            })?;
        let addr = listener.local_addr()?;
        *lock(&self.local_addr) = Some(addr);
        info!(robot = %self.name, %addr, "Listening for controller");

        let link = Arc::clone(self);
        let handle = tokio::spawn(async move { link.accept_loop(listener).await });
        *lock(&self.accept_task) = Some(handle);
        Ok(addr)
    }

    async fn accept_loop(&self, listener: TcpListener) {
        let mut waiting_logged = false;
        while !self.is_stopped() {
            if matches!(self.live_stream(), Ok(Some(_))) {
                sleep(self.poll_interval).await;
                continue;
            }
            if !waiting_logged {
                info!(robot = %self.name, "Waiting for controller to connect");
                waiting_logged = true;
            }
            match timeout(self.poll_interval, listener.accept()).await {
                Err(_) => continue,
                Ok(Ok((stream, peer))) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(robot = %self.name, error = %e, "Could not set TCP_NODELAY");
                    }
                    *lock(&self.connection) = Some(Arc::new(stream));
                    waiting_logged = false;
                    info!(robot = %self.name, %peer, "Controller connected");
                }
                Ok(Err(e)) => {
                    warn!(robot = %self.name, error = %e, "Accept failed");
                    sleep(self.poll_interval).await;
                }
            }
        }
        debug!(robot = %self.name, "Accept loop exited");
    }

    fn current(&self) -> Option<Arc<TcpStream>> {
        lock(&self.connection).clone()
    }

    /// Drops `stream` as the active connection unless the accept loop has
    /// already replaced it.
    fn forget(&self, stream: &Arc<TcpStream>) {
        let mut slot = lock(&self.connection);
        if slot.as_ref().is_some_and(|s| Arc::ptr_eq(s, stream)) {
            *slot = None;
            info!(robot = %self.name, "Controller disconnected");
        }
    }

    /// Returns the active connection if its peer is still there.
    fn live_stream(&self) -> Result<Option<Arc<TcpStream>>, LinkError> {
        let Some(stream) = self.current() else {
            return Ok(None);
        };
        match probe(&stream) {
            Ok(true) => Ok(Some(stream)),
            Ok(false) => {
                self.forget(&stream);
                Ok(None)
            }
            Err(source) => Err(LinkError::Io {
                robot: self.name.clone(),
                peer: stream.peer_addr().ok(),
                source,
            }),
        }
    }

    /// Non-blocking liveness probe.
    ///
    /// Would-block and peer-reset conditions never surface as errors; any
    /// other socket error does.
    pub fn is_connected(&self) -> Result<bool, LinkError> {
        if self.is_stopped() {
            return Ok(false);
        }
        self.live_stream().map(|s| s.is_some())
    }

    fn ensure_running(&self) -> Result<(), LinkError> {
        if self.is_stopped() {
            Err(LinkError::Stopped {
                robot: self.name.clone(),
            })
        } else {
            Ok(())
        }
    }

    /// Waits until a controller is connected.
    pub async fn wait_for_connection(&self) -> Result<(), LinkError> {
        loop {
            self.ensure_running()?;
            match self.is_connected() {
                Ok(true) => return Ok(()),
                Ok(false) => debug!(robot = %self.name, "Waiting for connection"),
                Err(e) => warn!(robot = %self.name, error = %e, "Liveness probe failed"),
            }
            sleep(self.poll_interval).await;
        }
    }

    /// Sends `label` as a single write once the controller is connected.
    ///
    /// Write failures are logged and the send is retried on the next poll.
    pub async fn dispatch(&self, label: &str) -> Result<(), LinkError> {
        loop {
            self.ensure_running()?;
            match self.live_stream() {
                Ok(Some(stream)) => match write_frame(&stream, label.as_bytes()).await {
                    Ok(()) => {
                        info!(robot = %self.name, label, "Task sent");
                        return Ok(());
                    }
                    Err(e) => {
                        warn!(
                            robot = %self.name,
                            label,
                            kind = %ErrorKind::SendFailure,
                            error = %e,
                            "Send failed, retrying"
                        );
                        self.forget(&stream);
                    }
                },
                Ok(None) => {
                    debug!(robot = %self.name, label, "Waiting for controller before sending")
                }
                Err(e) => warn!(robot = %self.name, error = %e, "Liveness probe failed"),
            }
            sleep(self.poll_interval).await;
        }
    }

    /// Waits for any non-empty reply from the controller.
    ///
    /// The contents are not interpreted. There is no timeout: a controller
    /// that never replies keeps the caller here until the link is stopped.
    pub async fn await_completion(&self) -> Result<(), LinkError> {
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        loop {
            self.ensure_running()?;
            let Some(stream) = self.current() else {
                sleep(self.poll_interval).await;
                continue;
            };
            match timeout(self.poll_interval, stream.readable()).await {
                Err(_) => continue,
                Ok(Err(e)) => {
                    warn!(robot = %self.name, kind = %ErrorKind::RecvFailure, error = %e, "Wait for reply failed");
                    sleep(self.poll_interval).await;
                }
                Ok(Ok(())) => match stream.try_read(&mut buf) {
                    Ok(0) => {
                        warn!(
                            robot = %self.name,
                            kind = %ErrorKind::ConnectionLost,
                            "Controller closed the connection while a task was running"
                        );
                        self.forget(&stream);
                        sleep(self.poll_interval).await;
                    }
                    Ok(n) => {
                        info!(
                            robot = %self.name,
                            reply = %String::from_utf8_lossy(&buf[..n]),
                            "Task ended"
                        );
                        return Ok(());
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                    Err(e) => {
                        warn!(robot = %self.name, kind = %ErrorKind::RecvFailure, error = %e, "Read failed");
                        self.forget(&stream);
                        sleep(self.poll_interval).await;
                    }
                },
            }
        }
    }

    /// Marks the link terminal and closes the connection and listener.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = lock(&self.accept_task).take() {
            handle.abort();
        }
        lock(&self.connection).take();
        info!(robot = %self.name, endpoint = %self.endpoint(), "Link stopped");
    }
}

/// Peeks one byte without blocking. EOF and reset mean the peer is gone.
fn probe(stream: &TcpStream) -> io::Result<bool> {
    let mut byte = [0u8; 1];
    let mut buf = ReadBuf::new(&mut byte);
    let mut cx = Context::from_waker(Waker::noop());
    match stream.poll_peek(&mut cx, &mut buf) {
        Poll::Pending => Ok(true),
        Poll::Ready(Ok(0)) => Ok(false),
        Poll::Ready(Ok(_)) => Ok(true),
        Poll::Ready(Err(e)) => match e.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Ok(true),
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof => Ok(false),
            _ => Err(e),
        },
    }
}

async fn write_frame(stream: &TcpStream, mut bytes: &[u8]) -> io::Result<()> {
    while !bytes.is_empty() {
        stream.writable().await?;
        match stream.try_write(bytes) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => bytes = &bytes[n..],
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
