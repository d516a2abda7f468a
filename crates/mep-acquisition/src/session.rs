//! Device session: UDP socket, JOIN handshake and background receive loop
//!
//! The receive loop runs on its own thread. It only decodes datagrams and
//! appends to the shared buffers; the consumer drains them on its own
//! schedule. Every receive is bounded by the configured timeout, which is
//! how the loop notices `stop()`.

use crate::buffer::SampleBuffer;
use crate::config::SessionConfig;
use mep_core::frame::TriggerRecord;
use mep_core::{
    decode_frame, encode_join, ConnectionState, DecodeError, Frame, MeasurementStartInfo,
    MeasurementState, MepError, MepResult, SampleBundle, TriggerEvent,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Longest single sleep while waiting between JOIN attempts
const RETRY_SLICE: Duration = Duration::from_millis(50);

/// Counters maintained by the receive loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Datagrams received, acknowledgements included
    pub datagrams: u64,
    /// Datagrams dropped as malformed
    pub decode_errors: u64,
    /// Samples frames dropped because no measurement was configured
    pub unconfigured_drops: u64,
    /// Samples frames whose sequence number did not follow the previous one
    pub sequence_gaps: u64,
    /// JOIN packets sent
    pub join_packets: u64,
    /// Socket errors other than timeouts
    pub receive_errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    datagrams: AtomicU64,
    decode_errors: AtomicU64,
    unconfigured_drops: AtomicU64,
    sequence_gaps: AtomicU64,
    join_packets: AtomicU64,
    receive_errors: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SessionStats {
        SessionStats {
            datagrams: self.datagrams.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            unconfigured_drops: self.unconfigured_drops.load(Ordering::Relaxed),
            sequence_gaps: self.sequence_gaps.load(Ordering::Relaxed),
            join_packets: self.join_packets.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
        }
    }
}

/// State shared between the session handle and its receive thread
#[derive(Debug, Default)]
struct Shared {
    running: AtomicBool,
    measuring: AtomicBool,
    connection: RwLock<ConnectionState>,
    measurement: RwLock<Option<MeasurementStartInfo>>,
    samples: SampleBuffer<SampleBundle>,
    triggers: SampleBuffer<TriggerEvent>,
    counters: Counters,
}

impl Shared {
    fn connection(&self) -> ConnectionState {
        *self.connection.read()
    }

    fn set_connection(&self, state: ConnectionState) {
        *self.connection.write() = state;
    }

    fn end_measurement(&self) {
        self.measuring.store(false, Ordering::Release);
        *self.measurement.write() = None;
    }

    fn reset(&self) {
        self.set_connection(ConnectionState::Disconnected);
        self.end_measurement();
        self.samples.clear();
        self.triggers.clear();
    }
}

/// Acquisition session with one amplifier
pub struct DeviceSession {
    config: SessionConfig,
    socket: Option<UdpSocket>,
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl DeviceSession {
    /// Bind the data socket. A bind failure is fatal and not retried.
    pub fn new(config: SessionConfig) -> MepResult<Self> {
        config.validate()?;
        let socket = bind_socket(config.local_addr, config.recv_timeout())?;
        let local_addr = socket.local_addr()?;
        info!(%local_addr, device = %config.device_addr, "device session bound");

        Ok(Self {
            config,
            socket: Some(socket),
            local_addr,
            shared: Arc::new(Shared::default()),
            worker: None,
        })
    }

    /// Start the receive thread. No-op if already running.
    pub fn start(&mut self) -> MepResult<()> {
        if self.worker.is_some() {
            return Ok(());
        }

        let socket = match self.socket.take() {
            Some(socket) => socket,
            None => bind_socket(self.config.local_addr, self.config.recv_timeout())?,
        };
        self.local_addr = socket.local_addr()?;

        self.shared.running.store(true, Ordering::Release);
        self.shared.set_connection(ConnectionState::Connecting);

        let receiver = ReceiveLoop {
            socket,
            shared: Arc::clone(&self.shared),
            device_addr: self.config.device_addr,
            retry_interval: self.config.retry_interval(),
            recv_buffer_size: self.config.recv_buffer_size,
            last_sequence: None,
        };
        let spawned = thread::Builder::new()
            .name("mep-receive".to_string())
            .spawn(move || receiver.run());

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                info!(local_addr = %self.local_addr, "device session started");
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                self.shared.reset();
                Err(MepError::Io(e))
            }
        }
    }

    /// Stop the receive thread and wait for it to exit. The socket is
    /// closed; a later `start()` binds a new one.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!("receive thread panicked");
            }
            info!("device session stopped");
        }
        self.socket = None;
        self.shared.reset();
    }

    /// Whether the receive thread is running
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Whether the device has answered the JOIN handshake
    pub fn connection_state(&self) -> bool {
        self.connection() == ConnectionState::Connected
    }

    pub fn connection(&self) -> ConnectionState {
        self.shared.connection()
    }

    /// Whether a measurement is in progress
    pub fn measurement_active(&self) -> bool {
        self.shared.measuring.load(Ordering::Acquire)
    }

    pub fn measurement(&self) -> MeasurementState {
        if self.measurement_active() {
            MeasurementState::Measuring
        } else {
            MeasurementState::Idle
        }
    }

    /// Parameters of the active measurement
    pub fn measurement_info(&self) -> Option<MeasurementStartInfo> {
        *self.shared.measurement.read()
    }

    pub fn sampling_rate(&self) -> Option<u32> {
        self.measurement_info().map(|info| info.sampling_rate_hz)
    }

    /// Address the data socket is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn stats(&self) -> SessionStats {
        self.shared.counters.snapshot()
    }

    /// Take every sample bundle received since the last drain.
    ///
    /// Only meaningful while running, connected and measuring; otherwise
    /// returns an empty vec and leaves the buffer as it is.
    pub fn drain_samples(&self) -> Vec<SampleBundle> {
        if !self.is_streaming() {
            return Vec::new();
        }
        self.shared.samples.drain()
    }

    /// Take every trigger received since the last drain, under the same
    /// condition as [`drain_samples`](Self::drain_samples).
    pub fn drain_triggers(&self) -> Vec<TriggerEvent> {
        if !self.is_streaming() {
            return Vec::new();
        }
        self.shared.triggers.drain()
    }

    fn is_streaming(&self) -> bool {
        self.connection_state() && self.measurement_active() && self.is_running()
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Receive thread state
struct ReceiveLoop {
    socket: UdpSocket,
    shared: Arc<Shared>,
    device_addr: SocketAddr,
    retry_interval: Duration,
    recv_buffer_size: usize,
    last_sequence: Option<u32>,
}

impl ReceiveLoop {
    fn run(mut self) {
        let mut buf = vec![0u8; self.recv_buffer_size];

        while self.shared.running.load(Ordering::Acquire) {
            if self.shared.connection() != ConnectionState::Connected {
                self.try_connect(&mut buf);
                continue;
            }

            match self.socket.recv_from(&mut buf) {
                Ok((len, _)) => self.handle_datagram(&buf[..len]),
                Err(e) if is_timeout(&e) => continue,
                Err(e) => {
                    Counters::bump(&self.shared.counters.receive_errors);
                    warn!(error = %e, "receive failed");
                }
            }
        }

        debug!("receive loop exiting, closing socket");
    }

    /// One handshake attempt: send JOIN, wait one receive timeout.
    ///
    /// Any datagram means the device is live. Zero-length is the plain
    /// acknowledgement; anything else is already stream data.
    fn try_connect(&mut self, buf: &mut [u8]) {
        self.shared.set_connection(ConnectionState::Connecting);
        self.send_join();

        match self.socket.recv_from(buf) {
            Ok((len, from)) => {
                info!(%from, "device answered JOIN, connected");
                self.shared.set_connection(ConnectionState::Connected);
                self.handle_datagram(&buf[..len]);
            }
            Err(e) => {
                if is_timeout(&e) {
                    debug!(device = %self.device_addr, "no answer to JOIN, retrying");
                } else {
                    Counters::bump(&self.shared.counters.receive_errors);
                    warn!(error = %e, "receive failed while connecting");
                }
                self.pause(self.retry_interval);
            }
        }
    }

    fn send_join(&self) {
        let unspecified: SocketAddr = match self.device_addr {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let sent = UdpSocket::bind(unspecified)
            .and_then(|socket| socket.send_to(&encode_join(), self.device_addr));
        match sent {
            Ok(_) => {
                Counters::bump(&self.shared.counters.join_packets);
                trace!(device = %self.device_addr, "JOIN sent");
            }
            Err(e) => warn!(device = %self.device_addr, error = %e, "failed to send JOIN"),
        }
    }

    /// Sleep for `duration`, waking early when stopped
    fn pause(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while self.shared.running.load(Ordering::Acquire) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(RETRY_SLICE.min(deadline - now));
        }
    }

    fn handle_datagram(&mut self, datagram: &[u8]) {
        Counters::bump(&self.shared.counters.datagrams);
        if datagram.is_empty() {
            return;
        }

        match decode_frame(datagram) {
            Ok(frame) => self.dispatch(frame),
            Err(DecodeError::Unknown(frame_type)) => {
                trace!(frame_type, "ignoring unknown frame type");
            }
            Err(e) => {
                Counters::bump(&self.shared.counters.decode_errors);
                debug!(error = %e, "dropping malformed datagram");
            }
        }
    }

    fn dispatch(&mut self, frame: Frame<'_>) {
        match frame {
            Frame::MeasurementStart(info) => {
                if !info.is_configured() {
                    warn!(
                        sampling_rate_hz = info.sampling_rate_hz,
                        num_channels = info.num_channels,
                        "ignoring measurement start without rate or channels"
                    );
                    return;
                }
                // Nothing left over from the previous measurement is delivered
                self.shared.samples.clear();
                self.shared.triggers.clear();
                *self.shared.measurement.write() = Some(info);
                self.shared.measuring.store(true, Ordering::Release);
                self.last_sequence = None;
                info!(
                    sampling_rate_hz = info.sampling_rate_hz,
                    num_channels = info.num_channels,
                    "measurement started"
                );
            }
            Frame::Samples(samples) => {
                let Some(info) = *self.shared.measurement.read() else {
                    Counters::bump(&self.shared.counters.unconfigured_drops);
                    return;
                };
                self.track_sequence(samples.sequence_no);
                match samples.bundles(info.num_channels) {
                    Ok(bundles) => self.shared.samples.push_batch(bundles),
                    Err(e) => {
                        Counters::bump(&self.shared.counters.decode_errors);
                        debug!(
                            sequence_no = samples.sequence_no,
                            error = %e,
                            "dropping samples frame"
                        );
                    }
                }
            }
            Frame::Trigger(trigger) => {
                if !self.shared.measuring.load(Ordering::Acquire) {
                    debug!(sequence_no = trigger.sequence_no, "trigger outside a measurement");
                    return;
                }
                self.shared
                    .triggers
                    .push_batch(trigger.triggers.iter().map(TriggerRecord::event));
            }
            Frame::MeasurementEnd => {
                self.shared.end_measurement();
                self.last_sequence = None;
                info!("measurement ended");
            }
            Frame::Join => trace!("ignoring JOIN frame"),
        }
    }

    // Sequence numbers are only checked for gaps; frames are never reordered.
    fn track_sequence(&mut self, sequence_no: u32) {
        if let Some(last) = self.last_sequence {
            if sequence_no != last.wrapping_add(1) {
                Counters::bump(&self.shared.counters.sequence_gaps);
                debug!(expected = last.wrapping_add(1), got = sequence_no, "sequence gap");
            }
        }
        self.last_sequence = Some(sequence_no);
    }
}

/// Bind a UDP socket with address reuse and a read timeout
fn bind_socket(addr: SocketAddr, recv_timeout: Duration) -> MepResult<UdpSocket> {
    let setup = |source| MepError::Setup { addr, source };

    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
        .map_err(setup)?;
    socket.set_reuse_address(true).map_err(setup)?;
    socket.bind(&addr.into()).map_err(setup)?;

    let socket: UdpSocket = socket.into();
    socket.set_read_timeout(Some(recv_timeout)).map_err(setup)?;
    Ok(socket)
}

// Read timeouts surface as WouldBlock on Unix and TimedOut on Windows.
fn is_timeout(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_device() -> UdpSocket {
        UdpSocket::bind("127.0.0.1:0").unwrap()
    }

    fn fast_config(device_addr: SocketAddr) -> SessionConfig {
        SessionConfig {
            recv_timeout_ms: 100,
            retry_interval_ms: 50,
            ..SessionConfig::loopback(device_addr)
        }
    }

    #[test]
    fn test_bind_failure_is_setup_error() {
        let mut config = SessionConfig::loopback("127.0.0.1:5050".parse().unwrap());
        config.local_addr = "203.0.113.1:0".parse().unwrap();
        assert!(matches!(
            DeviceSession::new(config),
            Err(MepError::Setup { .. })
        ));
    }

    #[test]
    fn test_initial_state() {
        let device = quiet_device();
        let session = DeviceSession::new(fast_config(device.local_addr().unwrap())).unwrap();

        assert_eq!(session.connection(), ConnectionState::Disconnected);
        assert!(!session.connection_state());
        assert!(!session.measurement_active());
        assert_eq!(session.measurement(), MeasurementState::Idle);
        assert!(!session.is_running());
        assert_eq!(session.sampling_rate(), None);
        assert!(session.drain_samples().is_empty());
        assert_ne!(session.local_addr().port(), 0);
    }

    #[test]
    fn test_start_stop_idempotent_without_device() {
        let device = quiet_device();
        let mut session = DeviceSession::new(fast_config(device.local_addr().unwrap())).unwrap();

        session.start().unwrap();
        session.start().unwrap();
        assert!(session.is_running());
        thread::sleep(Duration::from_millis(150));
        assert_eq!(session.connection(), ConnectionState::Connecting);
        assert!(session.drain_samples().is_empty());

        let begin = Instant::now();
        session.stop();
        assert!(begin.elapsed() < Duration::from_millis(500));
        session.stop();

        assert!(!session.is_running());
        assert_eq!(session.connection(), ConnectionState::Disconnected);
        assert!(session.stats().join_packets >= 1);

        // The device saw JOIN packets from the session.
        let mut buf = [0u8; 16];
        device
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();
        let (len, _) = device.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], &[0x80, 0, 0, 0]);
    }

    #[test]
    fn test_restart_after_stop() {
        let device = quiet_device();
        let mut session = DeviceSession::new(fast_config(device.local_addr().unwrap())).unwrap();

        session.start().unwrap();
        session.stop();
        session.start().unwrap();
        assert!(session.is_running());
        session.stop();
    }

    #[test]
    fn test_is_timeout() {
        assert!(is_timeout(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(is_timeout(&io::Error::from(io::ErrorKind::TimedOut)));
        assert!(!is_timeout(&io::Error::from(io::ErrorKind::ConnectionReset)));
    }
}
