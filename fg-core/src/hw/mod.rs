//! Hardware collaborators
//!
//! Processor power limit sink and OS power scheme control.

mod power;
mod processor;

pub use power::{MemoryPowerScheme, PlatformProfileControl, PowerScheme, PowerSchemeControl};
pub use processor::{DryRunProcessor, HardwareReadback, Processor, ProcessorKind};
