//! KNX bus collaborator interface
//!
//! The core does not speak the KNX wire layer; it produces and consumes
//! telegram payload bytes through this seam. A link-layer driver implements
//! [`KnxBus`]; the object model publishes group writes through it when a
//! local mutation changes an addressed object, and issues group reads for
//! objects initialised with `init="request"`.

use crate::addr::GroupAddress;

/// Outbound half of the KNX link layer.
pub trait KnxBus {
    /// Sends a group-write telegram carrying the given APDU payload.
    fn group_write(&self, dest: GroupAddress, payload: &[u8]);

    /// Sends a group-read request.
    fn group_read(&self, dest: GroupAddress);
}

/// Bus stub used when no driver is attached; telegrams are traced and
/// dropped.
#[derive(Debug, Default)]
pub struct NullBus;

impl KnxBus for NullBus {
    fn group_write(&self, dest: GroupAddress, payload: &[u8]) {
        tracing::debug!("no bus driver, dropping group write to {dest}: {payload:02x?}");
    }

    fn group_read(&self, dest: GroupAddress) {
        tracing::debug!("no bus driver, dropping group read for {dest}");
    }
}
