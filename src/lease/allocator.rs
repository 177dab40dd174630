//! In-memory lease table.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Mutex, MutexGuard};

use macaddr::MacAddr6;
use tracing::debug;

use crate::error::LeaseError;

/// A hardware address bound to an IPv4 address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub mac: MacAddr6,
    pub ip: Ipv4Addr,
}

struct LeaseTable {
    leases: HashMap<MacAddr6, Ipv4Addr>,
    /// Next address to hand out. Held as u64 so `end = 255.255.255.255`
    /// can still be stepped past without wrapping.
    cursor: u64,
}

/// Sequential allocator over `[start, end]`.
///
/// Leases never expire and are never released. Lookup, allocation and the
/// cursor advance run under one lock, so concurrent requests from the same
/// client always observe the same address.
pub struct LeaseAllocator {
    start: Ipv4Addr,
    end: Ipv4Addr,
    table: Mutex<LeaseTable>,
}

impl LeaseAllocator {
    pub fn new(start: Ipv4Addr, end: Ipv4Addr) -> Result<Self, LeaseError> {
        if u32::from(start) > u32::from(end) {
            return Err(LeaseError::InvalidRange { start, end });
        }

        Ok(Self {
            start,
            end,
            table: Mutex::new(LeaseTable {
                leases: HashMap::new(),
                cursor: u64::from(u32::from(start)),
            }),
        })
    }

    /// Return the address leased to `mac`, assigning the next free one on
    /// first contact.
    pub fn allocate(&self, mac: MacAddr6) -> Result<Ipv4Addr, LeaseError> {
        let mut table = self.lock();

        if let Some(&ip) = table.leases.get(&mac) {
            return Ok(ip);
        }

        if table.cursor > u64::from(u32::from(self.end)) {
            return Err(LeaseError::RangeExhausted {
                start: self.start,
                end: self.end,
            });
        }

        let ip = Ipv4Addr::from(table.cursor as u32);
        table.leases.insert(mac, ip);
        table.cursor += 1;

        debug!("Leased {} to {}", ip, mac);
        Ok(ip)
    }

    /// Number of leases handed out so far.
    pub fn len(&self) -> usize {
        self.lock().leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of addresses in the configured range.
    pub fn capacity(&self) -> u64 {
        u64::from(u32::from(self.end)) - u64::from(u32::from(self.start)) + 1
    }

    /// Snapshot of all leases, ordered by address.
    pub fn leases(&self) -> Vec<Lease> {
        let mut leases: Vec<Lease> = self
            .lock()
            .leases
            .iter()
            .map(|(&mac, &ip)| Lease { mac, ip })
            .collect();
        leases.sort_by_key(|lease| lease.ip);
        leases
    }

    pub fn range(&self) -> (Ipv4Addr, Ipv4Addr) {
        (self.start, self.end)
    }

    fn lock(&self) -> MutexGuard<'_, LeaseTable> {
        // No fallible step sits between the insert and the cursor advance.
        self.table
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
