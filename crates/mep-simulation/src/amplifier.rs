//! Simulated amplifier speaking the device side of the UDP protocol
//!
//! The simulator waits for a JOIN packet, acknowledges it with an empty
//! datagram sent to the configured target, then streams Samples frames at
//! the configured rate. Stimulus triggers are emitted periodically (or on
//! command) and followed by an evoked response in the signal.

use crate::frames;
use crate::mep_patterns::MepPattern;
use mep_core::frame::{FrameType, TriggerRecord};
use mep_core::{config_error, MeasurementStartInfo, MepError, MepResult, TriggerKind};
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Configuration for the simulated amplifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmplifierConfig {
    /// Sampling rate in Hz
    pub sampling_rate_hz: u32,
    /// Number of channels to simulate
    pub num_channels: u16,
    /// Bundles carried by each Samples frame
    pub bundles_per_frame: u16,
    /// Gaussian noise standard deviation in microvolts
    pub noise_std_uv: f64,
    /// DC offset of channel 0; channel `n` gets `(n + 1)` times this
    pub dc_offset_uv: f64,
    /// Automatic stimulus interval; `None` triggers only on command
    pub trigger_interval_ms: Option<u64>,
    /// Begin a measurement as soon as a JOIN arrives
    pub auto_start: bool,
    /// Random seed for reproducibility
    pub seed: Option<u64>,
    /// Evoked response after each trigger
    pub pattern: MepPattern,
}

impl Default for AmplifierConfig {
    fn default() -> Self {
        Self {
            sampling_rate_hz: 1000,
            num_channels: 2,
            bundles_per_frame: 10,
            noise_std_uv: 5.0,
            dc_offset_uv: 20.0,
            trigger_interval_ms: Some(1000),
            auto_start: true,
            seed: None,
            pattern: MepPattern::default(),
        }
    }
}

impl AmplifierConfig {
    /// Validate configuration values
    pub fn validate(&self) -> MepResult<()> {
        if self.sampling_rate_hz == 0 {
            return Err(config_error!("sampling_rate_hz must be greater than 0"));
        }
        if self.num_channels == 0 {
            return Err(config_error!("num_channels must be greater than 0"));
        }
        if self.bundles_per_frame == 0 {
            return Err(config_error!("bundles_per_frame must be greater than 0"));
        }
        if self.noise_std_uv.is_nan() || self.noise_std_uv < 0.0 {
            return Err(config_error!("noise_std_uv must be non-negative"));
        }
        Ok(())
    }

    pub fn measurement_info(&self) -> MeasurementStartInfo {
        MeasurementStartInfo::new(self.sampling_rate_hz, self.num_channels)
    }

    /// Wall-clock time covered by one Samples frame
    pub fn frame_period(&self) -> Duration {
        Duration::from_secs_f64(self.bundles_per_frame as f64 / self.sampling_rate_hz as f64)
    }
}

/// Raw EMG generator with triggered evoked responses
pub struct EmgGenerator {
    config: AmplifierConfig,
    rng: rand::rngs::StdRng,
    noise: Normal<f64>,
    next_index: u64,
    last_trigger: Option<u64>,
    next_auto_trigger: Option<u64>,
    pending_manual: bool,
}

/// One frame's worth of generated data
#[derive(Debug, Clone)]
pub struct GeneratedFrame {
    pub first_sample_index: u64,
    /// Raw device units, one vec per bundle
    pub bundles: Vec<Vec<i32>>,
    /// Sample indices of triggers inside this frame
    pub triggers: Vec<u64>,
}

impl EmgGenerator {
    /// Create new generator with configuration
    pub fn new(config: AmplifierConfig) -> MepResult<Self> {
        config.validate()?;

        let rng = match config.seed {
            Some(seed) => rand::rngs::StdRng::seed_from_u64(seed),
            None => rand::rngs::StdRng::from_entropy(),
        };
        let noise = Normal::new(0.0, config.noise_std_uv).map_err(|e| MepError::InvalidConfig {
            reason: format!("failed to create noise distribution: {}", e),
        })?;

        let mut generator = Self {
            config,
            rng,
            noise,
            next_index: 0,
            last_trigger: None,
            next_auto_trigger: None,
            pending_manual: false,
        };
        generator.reset();
        Ok(generator)
    }

    /// Restart at sample index 0
    pub fn reset(&mut self) {
        self.next_index = 0;
        self.last_trigger = None;
        self.pending_manual = false;
        self.next_auto_trigger = self.auto_trigger_step();
    }

    /// Trigger at the next generated sample
    pub fn trigger_now(&mut self) {
        self.pending_manual = true;
    }

    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    pub fn config(&self) -> &AmplifierConfig {
        &self.config
    }

    fn auto_trigger_step(&self) -> Option<u64> {
        self.config
            .trigger_interval_ms
            .map(|ms| (ms * self.config.sampling_rate_hz as u64 / 1000).max(1))
    }

    /// Generate the next `bundles_per_frame` bundles
    pub fn next_frame(&mut self) -> GeneratedFrame {
        let first_sample_index = self.next_index;
        let count = self.config.bundles_per_frame as usize;
        let mut bundles = Vec::with_capacity(count);
        let mut triggers = Vec::new();

        for _ in 0..count {
            let index = self.next_index;
            if self.is_trigger(index) {
                self.last_trigger = Some(index);
                triggers.push(index);
            }
            bundles.push(self.sample(index));
            self.next_index += 1;
        }

        GeneratedFrame {
            first_sample_index,
            bundles,
            triggers,
        }
    }

    fn is_trigger(&mut self, index: u64) -> bool {
        let mut fire = std::mem::take(&mut self.pending_manual);
        if let (Some(at), Some(step)) = (self.next_auto_trigger, self.auto_trigger_step()) {
            if index >= at {
                self.next_auto_trigger = Some(at + step);
                fire = true;
            }
        }
        fire
    }

    fn sample(&mut self, index: u64) -> Vec<i32> {
        let response_ms = self
            .last_trigger
            .map(|t| (index - t) as f64 * 1000.0 / self.config.sampling_rate_hz as f64);
        let response = response_ms.map_or(0.0, |ms| self.config.pattern.value_at(ms));

        (0..self.config.num_channels as usize)
            .map(|channel| {
                let gain = 1.0 / (channel + 1) as f64;
                let offset = self.config.dc_offset_uv * (channel + 1) as f64;
                let value = offset + response * gain + self.noise.sample(&mut self.rng);
                frames::microvolts_to_raw(value)
            })
            .collect()
    }
}

/// Commands for controlling the simulated amplifier
#[derive(Debug, Clone)]
pub enum AmplifierCommand {
    StartMeasurement,
    EndMeasurement,
    Trigger,
    Shutdown,
}

/// Simulated amplifier bound to its JOIN port, not yet streaming
pub struct SimulatedAmplifier {
    config: AmplifierConfig,
    socket: UdpSocket,
    join_addr: SocketAddr,
}

impl SimulatedAmplifier {
    /// Bind the device-side socket that receives JOIN packets
    pub async fn bind(config: AmplifierConfig, join_addr: SocketAddr) -> MepResult<Self> {
        config.validate()?;
        let socket = UdpSocket::bind(join_addr)
            .await
            .map_err(|source| MepError::Setup { addr: join_addr, source })?;
        let join_addr = socket.local_addr()?;
        info!(%join_addr, "simulated amplifier bound");

        Ok(Self {
            config,
            socket,
            join_addr,
        })
    }

    /// Address the session should send JOIN packets to
    pub fn join_addr(&self) -> SocketAddr {
        self.join_addr
    }

    /// Run the simulator in a background task, streaming to `target`
    pub fn spawn(self, target: SocketAddr) -> MepResult<AmplifierHandle> {
        let generator = EmgGenerator::new(self.config.clone())?;
        let (commands, command_receiver) = mpsc::channel(32);

        let task = tokio::spawn(async move {
            let mut device = DeviceLoop {
                config: self.config,
                socket: self.socket,
                target,
                generator,
                commands: command_receiver,
                joined: false,
                measuring: false,
                sequence_no: 0,
                trigger_sequence_no: 0,
            };
            device.run().await
        });

        Ok(AmplifierHandle { commands, task })
    }
}

/// Control handle for a running simulated amplifier
pub struct AmplifierHandle {
    commands: mpsc::Sender<AmplifierCommand>,
    task: JoinHandle<MepResult<()>>,
}

impl AmplifierHandle {
    pub async fn start_measurement(&self) {
        self.send(AmplifierCommand::StartMeasurement).await;
    }

    pub async fn end_measurement(&self) {
        self.send(AmplifierCommand::EndMeasurement).await;
    }

    pub async fn trigger(&self) {
        self.send(AmplifierCommand::Trigger).await;
    }

    /// Stop the simulator and wait for its task
    pub async fn shutdown(self) -> MepResult<()> {
        self.send(AmplifierCommand::Shutdown).await;
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(MepError::Io(std::io::Error::other(e))),
        }
    }

    async fn send(&self, command: AmplifierCommand) {
        if self.commands.send(command).await.is_err() {
            warn!("simulated amplifier already stopped");
        }
    }
}

struct DeviceLoop {
    config: AmplifierConfig,
    socket: UdpSocket,
    target: SocketAddr,
    generator: EmgGenerator,
    commands: mpsc::Receiver<AmplifierCommand>,
    joined: bool,
    measuring: bool,
    sequence_no: u32,
    trigger_sequence_no: u32,
}

impl DeviceLoop {
    async fn run(&mut self) -> MepResult<()> {
        let mut ticker = interval(self.config.frame_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut buf = [0u8; 64];

        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => {
                    match received {
                        Ok((len, from)) => self.handle_datagram(&buf[..len], from).await?,
                        Err(e) => debug!(error = %e, "simulator receive failed"),
                    }
                }

                _ = ticker.tick() => {
                    if self.measuring {
                        self.stream_frame().await?;
                    }
                }

                command = self.commands.recv() => {
                    match command {
                        Some(AmplifierCommand::StartMeasurement) => self.start_measurement().await?,
                        Some(AmplifierCommand::EndMeasurement) => self.end_measurement().await?,
                        Some(AmplifierCommand::Trigger) => self.generator.trigger_now(),
                        Some(AmplifierCommand::Shutdown) | None => {
                            if self.measuring {
                                self.end_measurement().await?;
                            }
                            info!("simulated amplifier stopped");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    async fn handle_datagram(&mut self, datagram: &[u8], from: SocketAddr) -> MepResult<()> {
        if datagram.first() != Some(&(FrameType::Join as u8)) {
            debug!(%from, len = datagram.len(), "simulator ignoring datagram");
            return Ok(());
        }

        // Every JOIN is acknowledged; the client keeps sending until it hears back.
        self.socket.send_to(&[], self.target).await?;
        if !self.joined {
            self.joined = true;
            info!(%from, target = %self.target, "JOIN received, streaming unlocked");
            if self.config.auto_start {
                self.start_measurement().await?;
            }
        }
        Ok(())
    }

    async fn start_measurement(&mut self) -> MepResult<()> {
        if self.measuring {
            return Ok(());
        }
        let info = self.config.measurement_info();
        self.socket
            .send_to(&frames::measurement_start(info), self.target)
            .await?;
        self.generator.reset();
        self.measuring = true;
        info!(
            sampling_rate_hz = info.sampling_rate_hz,
            num_channels = info.num_channels,
            pattern = self.config.pattern.description(),
            "simulated measurement started"
        );
        Ok(())
    }

    async fn end_measurement(&mut self) -> MepResult<()> {
        if !self.measuring {
            return Ok(());
        }
        self.socket
            .send_to(&frames::measurement_end(), self.target)
            .await?;
        self.measuring = false;
        info!("simulated measurement ended");
        Ok(())
    }

    async fn stream_frame(&mut self) -> MepResult<()> {
        let frame = self.generator.next_frame();
        let bytes = frames::samples(self.sequence_no, frame.first_sample_index, &frame.bundles);
        self.sequence_no = self.sequence_no.wrapping_add(1);
        self.socket.send_to(&bytes, self.target).await?;

        if !frame.triggers.is_empty() {
            let micros_per_sample = 1_000_000 / self.config.sampling_rate_hz as u64;
            let records: Vec<TriggerRecord> = frame
                .triggers
                .iter()
                .map(|&index| TriggerRecord {
                    microtime: index * micros_per_sample,
                    sample_index: index,
                    kind: TriggerKind::Stimulus,
                    code: 1,
                })
                .collect();
            let bytes = frames::trigger(self.trigger_sequence_no, &records);
            self.trigger_sequence_no = self.trigger_sequence_no.wrapping_add(1);
            self.socket.send_to(&bytes, self.target).await?;
            debug!(triggers = records.len(), "trigger sent");
        }
        Ok(())
    }
}
