//! Shared-memory telemetry ingestion
//!
//! - `layout` - binary record format
//! - `region` - read-only region access (/dev/shm or in-memory)
//! - `channel` - connection lifecycle and snapshot parsing
//! - `signals` - the named values the controller consumes

mod channel;
pub mod layout;
mod region;
mod signals;

pub use channel::{ChannelEvent, ChannelStatus, Connection, TelemetryChannel};
pub use region::{FileRegion, MemoryOpener, MemoryRegion, RegionOpener, SharedRegion, ShmOpener};
pub use signals::{SignalSnapshot, SignalSources, TelemetrySignals};
