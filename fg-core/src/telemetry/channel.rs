//! Telemetry channel
//!
//! Attaches to the sensor region published by the monitoring application and
//! turns its fixed binary records into named sensor groups. The channel never
//! reconnects on its own; the sensor job calls `connect()` on its own cadence.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::layout::{self, TelemetryHeader, HEADER_SIZE, READING_RECORD_SIZE, SENSOR_RECORD_SIZE};
use super::region::{RegionOpener, SharedRegion};
use crate::data::SensorGroup;
use crate::error::{FramegovError, Result};

/// Connection status surfaced to the rest of the governor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Connected,
    Disconnected,
}

/// Events emitted on connection changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Connected,
    Disconnected(String),
}

/// Result of a successful `connect()`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connection {
    Established,
    AlreadyConnected,
}

pub struct TelemetryChannel {
    opener: Arc<dyn RegionOpener>,
    name: String,
    region: Option<Box<dyn SharedRegion>>,
    header: Option<TelemetryHeader>,
    /// Group shells (names only) from the last layout refresh
    shells: Vec<SensorGroup>,
    /// Groups with readings from the last successful poll
    groups: Vec<SensorGroup>,
    layout_stale: bool,
    subscribers: Vec<Sender<ChannelEvent>>,
    /// Status last announced to subscribers
    announced: Option<ChannelStatus>,
}

impl TelemetryChannel {
    pub fn new(opener: Arc<dyn RegionOpener>, name: impl Into<String>) -> Self {
        Self {
            opener,
            name: name.into(),
            region: None,
            header: None,
            shells: Vec::new(),
            groups: Vec::new(),
            layout_stale: true,
            subscribers: Vec::new(),
            announced: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_connected(&self) -> bool {
        self.region.is_some()
    }

    pub fn status(&self) -> ChannelStatus {
        if self.is_connected() {
            ChannelStatus::Connected
        } else {
            ChannelStatus::Disconnected
        }
    }

    /// Receive connection events; dropped receivers are pruned on the next emit
    pub fn subscribe(&mut self) -> Receiver<ChannelEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    /// Send `event` only when it changes the announced status
    fn emit(&mut self, event: ChannelEvent) {
        let status = match event {
            ChannelEvent::Connected => ChannelStatus::Connected,
            ChannelEvent::Disconnected(_) => ChannelStatus::Disconnected,
        };
        if self.announced == Some(status) {
            return;
        }
        self.announced = Some(status);
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Check that the region is still published and attach to it if needed
    ///
    /// A failed check drops the handle; `Disconnected` is emitted once per
    /// loss, not on every retry. The last snapshot stays readable.
    pub fn connect(&mut self) -> Result<Connection> {
        if !self.opener.exists(&self.name) {
            let reason = format!("{} is not published", self.name);
            self.disconnect(&reason);
            return Err(FramegovError::TelemetryUnavailable(reason));
        }
        if self.region.is_some() {
            return Ok(Connection::AlreadyConnected);
        }

        match self.opener.open(&self.name) {
            Ok(region) => self.region = Some(region),
            Err(e) => {
                self.disconnect(&e.to_string());
                return Err(e);
            }
        }

        if let Err(e) = self.refresh_layout() {
            let reason = e.to_string();
            self.disconnect(&reason);
            return Err(e);
        }

        info!(
            "Telemetry connected to {} ({} sensor groups)",
            self.name,
            self.shells.len()
        );
        self.emit(ChannelEvent::Connected);
        Ok(Connection::Established)
    }

    /// Drop the region handle and announce `Disconnected` if not already known
    pub fn disconnect(&mut self, reason: &str) {
        if self.region.take().is_some() {
            warn!("Telemetry disconnected from {}: {}", self.name, reason);
        } else {
            debug!("Telemetry still unavailable: {}", reason);
        }
        self.header = None;
        self.layout_stale = true;
        self.emit(ChannelEvent::Disconnected(reason.to_string()));
    }

    fn region(&self) -> Result<&dyn SharedRegion> {
        self.region
            .as_deref()
            .ok_or_else(|| FramegovError::disconnected("not connected"))
    }

    fn read_header(&self) -> Result<TelemetryHeader> {
        let region = self.region()?;
        let mut buf = [0u8; HEADER_SIZE];
        region.read_at(0, &mut buf)?;
        let header = layout::parse_header(&buf)?;
        header.validate(region.len())?;
        Ok(header)
    }

    /// Re-read the header and rebuild the group shells
    pub fn refresh_layout(&mut self) -> Result<()> {
        let header = self.read_header()?;
        let region = self.region()?;

        let mut shells = Vec::with_capacity(header.sensor_element_count as usize);
        let mut buf = [0u8; SENSOR_RECORD_SIZE];
        for index in 0..header.sensor_element_count {
            region.read_at(header.sensor_offset(index), &mut buf)?;
            let group = layout::parse_sensor(&buf)?;
            debug!("Sensor group available: {}", group.name_original);
            shells.push(group);
        }

        debug!(
            "Telemetry layout v{}.{}: {} groups, {} readings",
            header.version,
            header.revision,
            header.sensor_element_count,
            header.reading_element_count
        );
        self.shells = shells;
        self.header = Some(header);
        self.layout_stale = false;
        Ok(())
    }

    /// Scan all reading records into a fresh snapshot
    ///
    /// The snapshot is swapped in only after a complete scan. A read failure
    /// disconnects the channel and keeps the previous snapshot.
    pub fn poll_readings(&mut self) -> Result<()> {
        match self.scan() {
            Ok(groups) => {
                self.groups = groups;
                Ok(())
            }
            Err(e) if e.is_telemetry_loss() || matches!(e, FramegovError::TelemetryLayout(_)) => {
                let reason = e.to_string();
                self.disconnect(&reason);
                Err(FramegovError::disconnected(reason))
            }
            Err(e) => Err(e),
        }
    }

    fn scan(&mut self) -> Result<Vec<SensorGroup>> {
        let header = self.read_header()?;
        let layout_changed = self
            .header
            .as_ref()
            .map_or(true, |known| !known.same_layout(&header));
        if self.layout_stale || layout_changed {
            self.refresh_layout()?;
        }

        let region = self.region()?;
        let mut groups: Vec<SensorGroup> = self.shells.clone();
        let mut stale = false;
        let mut buf = [0u8; READING_RECORD_SIZE];
        for index in 0..header.reading_element_count {
            region.read_at(header.reading_offset(index), &mut buf)?;
            let reading = layout::parse_reading(&buf)?;
            match groups.get_mut(reading.sensor_index as usize) {
                Some(group) => group.readings.push(reading),
                None => {
                    let err = FramegovError::TelemetryParseOutOfRange(format!(
                        "reading '{}' references group {} of {}",
                        reading.label_original,
                        reading.sensor_index,
                        groups.len()
                    ));
                    warn!("{}", err);
                    stale = true;
                }
            }
        }
        self.layout_stale = stale;
        Ok(groups)
    }

    /// Groups from the last successful poll
    pub fn groups(&self) -> &[SensorGroup] {
        &self.groups
    }

    /// Exact, case-sensitive lookup of `label` inside group `group`
    pub fn lookup(&self, group: &str, label: &str) -> Option<f64> {
        self.groups
            .iter()
            .filter(|g| g.name_original == group)
            .find_map(|g| g.reading(label))
            .map(|r| r.value)
    }
}
