//! Typed service tunables (ambient; §4.P). A host constructs one of these
//! (from its own CLI/environment parsing, out of scope here) and passes it
//! to [`crate::service::InetService::new`].

use alloc::string::String;
use alloc::string::ToString;

/// One tick equals one millisecond by convention.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// How long an incomplete reassembly group may live before `sweep`
    /// drops it (§4.F.5). The reference has no timeout; this is this
    /// crate's resolution of that open question.
    pub reassembly_lifetime_millis: u64,
    /// Neighbour-solicitation wait window (§5: "≈3 seconds").
    pub ndp_timeout_millis: u64,
    /// Prefix length for the auto-configured IPv4 loopback address.
    pub loopback_prefix_v4: u8,
    /// Prefix length for the auto-configured IPv6 loopback address.
    pub loopback_prefix_v6: u8,
    /// Prefix length for auto-configured link-local IPv6 addresses.
    pub link_local_prefix_v6: u8,
    /// Default path of the persisted configuration document.
    pub default_config_path: String,
}

impl Default for ServiceConfig {
    fn default() -> ServiceConfig {
        ServiceConfig {
            reassembly_lifetime_millis: 60_000,
            ndp_timeout_millis: 3_000,
            loopback_prefix_v4: 24,
            loopback_prefix_v6: 128,
            link_local_prefix_v6: 64,
            default_config_path: "/w/cfg/inetsrv.sif".to_string(),
        }
    }
}
