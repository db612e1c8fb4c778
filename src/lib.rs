//! # S-INET: Splax OS Internet Protocol Service
//!
//! S-INET is the userspace service that owns IPv4/IPv6 addressing,
//! fragmentation/reassembly, static routing, and ICMP/NDP. It sits below
//! the transport-layer services (TCP, UDP) and above the per-device link
//! drivers, matching the rest of Splax OS's microkernel split between
//! userspace protocol logic and kernel packet DMA.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      USERSPACE                              │
//! │ ┌─────────────────────────────────────────────────────────┐ │
//! │ │                    S-INET Service                        │ │
//! │ │  ┌──────────────┐ ┌──────────────┐ ┌──────────────────┐ │ │
//! │ │  │  Client/Ping │ │   Router     │ │  ICMP / ICMPv6    │ │ │
//! │ │  │   Registry   │ │  (component  │ │  + NDP dispatch   │ │ │
//! │ │  │              │ │      G)      │ │                    │ │ │
//! │ │  └──────────────┘ └──────────────┘ └──────────────────┘ │ │
//! │ │  ┌──────────────┐ ┌──────────────┐ ┌──────────────────┐ │ │
//! │ │  │  Addr-obj /  │ │ Reassembly   │ │  Neighbour cache  │ │ │
//! │ │  │ static-route │ │   engine     │ │   (IPv6 NDP)      │ │ │
//! │ │  │    tables    │ │              │ │                    │ │ │
//! │ │  └──────────────┘ └──────────────┘ └──────────────────┘ │ │
//! │ │  ┌─────────────────────────────────────────────────┐     │ │
//! │ │  │              Link registry (IPLink)              │     │ │
//! │ │  └─────────────────────────────────────────────────┘     │ │
//! │ └─────────────────────────────────────────────────────────┘ │
//! ├─────────────────────────────────────────────────────────────┤
//! │                         S-LINK IPC                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │                      KERNEL (S-CORE)                        │
//! │ ┌─────────────────────────────────────────────────────────┐ │
//! │ │              Packet DMA / Ring Buffers                  │ │
//! │ └─────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! This crate does not speak S-LINK itself: [`service::InetService`] is a
//! plain dispatch surface a host binds to whatever transport it runs.
//!
//! ## Locking discipline
//!
//! Every table (link, address object, static route, neighbour, reassembly,
//! client, ping) guards only its own internal state. No method ever holds
//! two tables' locks at once; cross-table orchestration (DHCP retrigger on
//! address delete, auto-configuration on link discovery) lives one layer up
//! in [`service::InetService`], which calls one table, inspects the plain
//! data it returns, and only then calls the next.

#![no_std]

extern crate alloc;

pub mod addr;
pub mod addrobj;
pub mod clock;
pub mod config;
pub mod dhcp;
pub mod error;
pub mod icmp;
pub mod link;
pub mod ntrans;
pub mod pdu;
pub mod reassembly;
pub mod registry;
pub mod router;
pub mod service;
pub mod service_config;
pub mod sroute;

/// Service version, taken from the crate manifest.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Service name used when registering with the host's IPC/service locator.
pub const SERVICE_NAME: &str = "inet";

pub use error::{InetError, Result};
pub use service::InetService;
