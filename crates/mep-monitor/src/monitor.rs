//! Foreground consumer: drains the session and keeps the MEP summary current

use mep_acquisition::DeviceSession;
use mep_core::{
    ConnectionState, Epoch, MeasurementStartInfo, MepResult, SampleBundle, TriggerEvent,
};
use mep_processing::{summarize, AnalysisConfig, EpochConfig, EpochExtractor, MepSummary};
use serde::Serialize;
use tracing::{info, warn};

/// Where the monitor gets its data from
pub trait AcquisitionSource {
    fn connection(&self) -> ConnectionState;
    fn measurement_active(&self) -> bool;
    fn measurement_info(&self) -> Option<MeasurementStartInfo>;
    fn drain_samples(&self) -> Vec<SampleBundle>;
    fn drain_triggers(&self) -> Vec<TriggerEvent>;
}

impl AcquisitionSource for DeviceSession {
    fn connection(&self) -> ConnectionState {
        DeviceSession::connection(self)
    }

    fn measurement_active(&self) -> bool {
        DeviceSession::measurement_active(self)
    }

    fn measurement_info(&self) -> Option<MeasurementStartInfo> {
        DeviceSession::measurement_info(self)
    }

    fn drain_samples(&self) -> Vec<SampleBundle> {
        DeviceSession::drain_samples(self)
    }

    fn drain_triggers(&self) -> Vec<TriggerEvent> {
        DeviceSession::drain_triggers(self)
    }
}

/// State handed to whatever displays the data
#[derive(Debug, Clone, Serialize)]
pub struct MonitorSnapshot {
    pub connection: ConnectionState,
    pub measuring: bool,
    pub sampling_rate: Option<u32>,
    /// Epochs accepted during this poll
    pub new_epochs: usize,
    /// Most recent epochs, oldest first
    pub recent: Vec<Epoch>,
    pub summary: Option<MepSummary>,
}

pub struct MepMonitor {
    extractor: EpochExtractor,
    analysis: AnalysisConfig,
    was_measuring: bool,
    summary: Option<MepSummary>,
}

impl MepMonitor {
    pub fn new(epoch: EpochConfig, analysis: AnalysisConfig) -> MepResult<Self> {
        analysis.validate()?;
        Ok(Self {
            extractor: EpochExtractor::new(epoch)?,
            analysis,
            was_measuring: false,
            summary: None,
        })
    }

    pub fn extractor(&self) -> &EpochExtractor {
        &self.extractor
    }

    /// Drain `source` once and update epochs and summary
    pub fn poll_once(&mut self, source: &impl AcquisitionSource) -> MonitorSnapshot {
        let measuring = source.measurement_active();
        let info = source.measurement_info();

        if measuring && !self.was_measuring {
            info!("measurement started, clearing epoch history");
            self.extractor.reset();
            self.summary = None;
        }
        self.was_measuring = measuring;

        if let Some(info) = info.filter(MeasurementStartInfo::is_configured) {
            self.extractor
                .configure(info.sampling_rate_hz, info.num_channels as usize);
        }

        self.extractor.ingest(&source.drain_samples());
        for trigger in source.drain_triggers() {
            self.extractor.push_trigger(trigger);
        }

        let new_epochs = self.extractor.process();
        if !new_epochs.is_empty() {
            self.summary = match summarize(self.extractor.recent(), &self.analysis) {
                Ok(summary) => Some(summary),
                Err(e) => {
                    warn!(error = %e, "failed to summarize epochs");
                    None
                }
            };
        }

        MonitorSnapshot {
            connection: source.connection(),
            measuring,
            sampling_rate: info.map(|i| i.sampling_rate_hz),
            new_epochs: new_epochs.len(),
            recent: self.extractor.recent().iter().cloned().collect(),
            summary: self.summary.clone(),
        }
    }
}
