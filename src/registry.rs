//! Client and ping registries (component J).

use alloc::boxed::Box;
use alloc::collections::BTreeMap;

use spin::Mutex;

use crate::addr::InetAddr;
use crate::error::{InetError, Result};

/// What gets delivered to a registered callback. Modeled as an owned
/// capability (§9: "Shared callback sinks across fibrils") rather than a
/// raw session handle: the registry entry owns it exclusively.
pub enum SinkEvent<'a> {
    ClientRecv {
        tos: u8,
        iplink_id: u64,
        src: InetAddr,
        dest: InetAddr,
        data: &'a [u8],
    },
    PingRecv {
        seq_no: u16,
        src: InetAddr,
        dest: InetAddr,
        data: &'a [u8],
    },
}

pub trait EventSink {
    fn send_event(&self, event: SinkEvent<'_>) -> Result<()>;
}

/// Per-protocol client subscriptions. One registration per protocol; a new
/// registration for an already-bound protocol replaces the old one (§4.J,
/// the resolved policy for duplicate registration).
#[derive(Default)]
pub struct ClientRegistry {
    clients: Mutex<BTreeMap<u8, Box<dyn EventSink + Send>>>,
}

impl ClientRegistry {
    pub fn new() -> ClientRegistry {
        ClientRegistry {
            clients: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn register(&self, protocol: u8, sink: Box<dyn EventSink + Send>) {
        self.clients.lock().insert(protocol, sink);
    }

    pub fn unregister(&self, protocol: u8) {
        self.clients.lock().remove(&protocol);
    }

    pub fn is_registered(&self, protocol: u8) -> bool {
        self.clients.lock().contains_key(&protocol)
    }

    pub fn deliver(
        &self,
        protocol: u8,
        tos: u8,
        iplink_id: u64,
        src: InetAddr,
        dest: InetAddr,
        data: &[u8],
    ) -> Result<()> {
        let clients = self.clients.lock();
        let sink = clients.get(&protocol).ok_or(InetError::NotFound)?;
        sink.send_event(SinkEvent::ClientRecv {
            tos,
            iplink_id,
            src,
            dest,
            data,
        })
    }
}

/// Ping sessions, identified by a 16-bit ident allocated monotonically
/// (wrapping after 65535).
#[derive(Default)]
pub struct PingRegistry {
    sessions: Mutex<BTreeMap<u16, Box<dyn EventSink + Send>>>,
    next_ident: Mutex<u16>,
}

impl PingRegistry {
    pub fn new() -> PingRegistry {
        PingRegistry {
            sessions: Mutex::new(BTreeMap::new()),
            next_ident: Mutex::new(0),
        }
    }

    pub fn register(&self, sink: Box<dyn EventSink + Send>) -> u16 {
        let mut next = self.next_ident.lock();
        let ident = *next;
        *next = next.wrapping_add(1);
        drop(next);

        self.sessions.lock().insert(ident, sink);
        ident
    }

    pub fn unregister(&self, ident: u16) {
        self.sessions.lock().remove(&ident);
    }

    pub fn deliver(&self, ident: u16, seq_no: u16, src: InetAddr, dest: InetAddr, data: &[u8]) -> Result<()> {
        let sessions = self.sessions.lock();
        let sink = sessions.get(&ident).ok_or(InetError::NotFound)?;
        sink.send_event(SinkEvent::PingRecv {
            seq_no,
            src,
            dest,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::sync::Arc;
    use alloc::vec::Vec;
    use core::cell::RefCell;

    struct RecordingSink {
        received: Arc<RefCell<Vec<(InetAddr, InetAddr, alloc::vec::Vec<u8>)>>>,
    }

    // SAFETY: tests are single-threaded; this crate otherwise never assumes
    // Send/Sync for non-atomic state.
    unsafe impl Send for RecordingSink {}

    impl EventSink for RecordingSink {
        fn send_event(&self, event: SinkEvent<'_>) -> Result<()> {
            let (src, dest, data) = match event {
                SinkEvent::ClientRecv { src, dest, data, .. } => (src, dest, data),
                SinkEvent::PingRecv { src, dest, data, .. } => (src, dest, data),
            };
            self.received.borrow_mut().push((src, dest, data.to_vec()));
            Ok(())
        }
    }

    #[test]
    fn later_registration_replaces_earlier_for_same_protocol() {
        let reg = ClientRegistry::new();
        let log1 = Arc::new(RefCell::new(Vec::new()));
        let log2 = Arc::new(RefCell::new(Vec::new()));

        reg.register(254, Box::new(RecordingSink { received: log1.clone() }));
        reg.register(254, Box::new(RecordingSink { received: log2.clone() }));

        let a = InetAddr::parse("10.0.0.1").unwrap();
        let b = InetAddr::parse("10.0.0.2").unwrap();
        reg.deliver(254, 0, 0, a, b, b"hi").unwrap();

        assert!(log1.borrow().is_empty());
        assert_eq!(log2.borrow().len(), 1);
    }

    #[test]
    fn ping_idents_allocate_monotonically() {
        let reg = PingRegistry::new();
        let a = reg.register(Box::new(RecordingSink { received: Arc::new(RefCell::new(Vec::new())) }));
        let b = reg.register(Box::new(RecordingSink { received: Arc::new(RefCell::new(Vec::new())) }));
        assert_eq!(b, a.wrapping_add(1));
    }

    #[test]
    fn deliver_to_unknown_ident_fails_not_found() {
        let reg = PingRegistry::new();
        let a = InetAddr::parse("10.0.0.1").unwrap();
        assert_eq!(reg.deliver(9999, 1, a, a, b"x").unwrap_err(), InetError::NotFound);
    }
}
