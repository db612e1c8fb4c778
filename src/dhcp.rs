//! DHCP bootstrap hook (component L).
//!
//! This crate does not speak DHCP itself; it only decides *when* a lease
//! should be requested or released and calls through to whatever client
//! a host wires up.

use crate::error::Result;

/// A host-provided DHCP client. [`crate::service::InetService`] calls
/// `link_add` once for each newly discovered ethernet-class link that has
/// no persisted non-`temp` addresses, and `link_remove` when the last
/// non-temp address on such a link is deleted (§4.L).
pub trait DhcpHook {
    fn link_add(&self, link_id: u64) -> Result<()>;
    fn link_remove(&self, link_id: u64) -> Result<()>;
}

/// No-op hook for hosts that do not run DHCP.
#[derive(Default)]
pub struct NullDhcpHook;

impl DhcpHook for NullDhcpHook {
    fn link_add(&self, _link_id: u64) -> Result<()> {
        Ok(())
    }

    fn link_remove(&self, _link_id: u64) -> Result<()> {
        Ok(())
    }
}
