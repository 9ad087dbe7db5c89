//! DHCP lease table and allocation state machine.
//!
//! Every address that has ever been offered gets a [`Lease`] entry keyed by
//! the address. Entries are never removed; a FREE entry is simply
//! overwritten the next time the address is handed out.
//!
//! ```text
//!            DISCOVER             REQUEST
//!   FREE ─────────────► OFFERED ─────────► ACTIVE
//!    ▲                    │  │               │
//!    │   hold expires     │  │ DECLINE       │ RELEASE / expiry
//!    └────────────────────┘  ▼               │
//!    ▲                 ACTIVE (declined)     │
//!    └───────────────────────────────────────┘
//! ```
//!
//! Time is never read inside this module. Every operation takes `now`, and
//! the caller is expected to [`sweep`](LeaseTable::sweep) before handling a
//! message so that expired entries are freed lazily.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info};

use crate::config::ServerConfig;

/// How long an OFFERED address is held for the client (60 seconds).
///
/// After DISCOVER, the server reserves an IP for this duration waiting for
/// the client's REQUEST. If no REQUEST arrives, the IP returns to the pool.
pub const OFFER_HOLD_SECONDS: i64 = 60;

/// Allocation state of a single address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    Free,
    Offered,
    Active,
}

/// A binding between an address and a client hardware address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub address: Ipv4Addr,

    /// Client hardware address (the meaningful `hlen` bytes of chaddr).
    pub chaddr: Vec<u8>,

    pub state: LeaseState,

    /// Transaction id of the exchange that produced the current OFFERED or
    /// ACTIVE state. Cleared when the lease becomes FREE.
    pub xid: Option<u32>,

    /// End of the offer hold (OFFERED only).
    pub offer_expires_at: Option<DateTime<Utc>>,

    /// End of the lease (ACTIVE only).
    pub expires_at: Option<DateTime<Utc>>,

    /// Set by DECLINE. A declined lease stays ACTIVE with no deadline and is
    /// never offered again.
    pub declined: bool,
}

impl Lease {
    fn offered(address: Ipv4Addr, chaddr: &[u8], xid: u32, now: DateTime<Utc>) -> Self {
        Self {
            address,
            chaddr: chaddr.to_vec(),
            state: LeaseState::Offered,
            xid: Some(xid),
            offer_expires_at: Some(now + TimeDelta::seconds(OFFER_HOLD_SECONDS)),
            expires_at: None,
            declined: false,
        }
    }

    /// The instant after which the lease falls back to FREE, if any.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        match self.state {
            LeaseState::Free => None,
            LeaseState::Offered => self.offer_expires_at,
            LeaseState::Active if self.declined => None,
            LeaseState::Active => self.expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.deadline().is_some_and(|deadline| now > deadline)
    }

    /// Seconds remaining until the deadline, or 0 if there is none or it has
    /// passed.
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> i64 {
        self.deadline()
            .map(|deadline| (deadline - now).num_seconds().max(0))
            .unwrap_or(0)
    }

    pub fn format_chaddr(&self) -> String {
        format_hw(&self.chaddr)
    }

    fn free(&mut self) {
        self.state = LeaseState::Free;
        self.xid = None;
        self.offer_expires_at = None;
        self.expires_at = None;
        self.declined = false;
    }
}

/// Address pool and lease table for one server configuration.
///
/// The table is not synchronized itself; the server keeps it behind a
/// single async mutex for the duration of each message.
#[derive(Debug)]
pub struct LeaseTable {
    config: Arc<ServerConfig>,
    leases: BTreeMap<Ipv4Addr, Lease>,
}

impl LeaseTable {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self {
            config,
            leases: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Frees every lease whose deadline is before `now`.
    ///
    /// Returns the number of leases that changed state. Sweeping twice with
    /// the same `now` changes nothing the second time.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let mut freed = 0;
        for lease in self.leases.values_mut() {
            if lease.is_expired(now) {
                debug!(
                    "Lease for {} ({}) expired in state {:?}",
                    lease.address,
                    lease.format_chaddr(),
                    lease.state
                );
                lease.free();
                freed += 1;
            }
        }
        freed
    }

    /// Handles the allocation half of DISCOVER.
    ///
    /// Scans the range in ascending order and offers the first address that
    /// has no lease, is FREE, or is already bound to `chaddr`. Declined and
    /// reserved addresses are skipped. Returns `None` when the pool is
    /// exhausted.
    pub fn offer(&mut self, chaddr: &[u8], xid: u32, now: DateTime<Utc>) -> Option<Ipv4Addr> {
        for address in self.config.range_addresses() {
            if !self.config.is_allocatable(address) {
                continue;
            }

            let available = match self.leases.get(&address) {
                None => true,
                Some(lease) if lease.declined => false,
                Some(lease) => lease.state == LeaseState::Free || lease.chaddr == chaddr,
            };

            if available {
                self.leases
                    .insert(address, Lease::offered(address, chaddr, xid, now));
                debug!("Offering {} to {} (xid {:#010x})", address, format_hw(chaddr), xid);
                return Some(address);
            }
        }

        info!("Address pool exhausted, no offer for {}", format_hw(chaddr));
        None
    }

    /// Handles the binding half of REQUEST.
    ///
    /// The lease for `address` must exist, must not be declined, and must
    /// carry the same transaction id and hardware address. On success the
    /// lease becomes ACTIVE until `now` plus the configured lease time.
    pub fn commit(
        &mut self,
        address: Ipv4Addr,
        chaddr: &[u8],
        xid: u32,
        now: DateTime<Utc>,
    ) -> Option<&Lease> {
        let lease_time = TimeDelta::seconds(i64::from(self.config.lease_time()));
        let lease = self.leases.get_mut(&address)?;

        if lease.declined {
            debug!("Refusing to commit declined address {}", address);
            return None;
        }
        if lease.xid != Some(xid) {
            debug!(
                "Transaction id mismatch for {}: lease {:?}, request {:#010x}",
                address, lease.xid, xid
            );
            return None;
        }
        if lease.chaddr != chaddr {
            debug!(
                "Hardware address mismatch for {}: lease {}, request {}",
                address,
                lease.format_chaddr(),
                format_hw(chaddr)
            );
            return None;
        }

        lease.state = LeaseState::Active;
        lease.offer_expires_at = None;
        lease.expires_at = Some(now + lease_time);

        info!(
            "Leased {} to {} for {}s",
            address,
            lease.format_chaddr(),
            self.config.lease_time()
        );
        Some(lease)
    }

    /// Handles RELEASE. The lease is keyed by the client's own address and
    /// must belong to `chaddr`; the transaction id is not checked.
    pub fn release(&mut self, address: Ipv4Addr, chaddr: &[u8]) -> bool {
        match self.leases.get_mut(&address) {
            Some(lease) if lease.chaddr == chaddr => {
                lease.free();
                info!("Released {} from {}", address, format_hw(chaddr));
                true
            }
            _ => {
                debug!("Ignoring RELEASE of {} from {}", address, format_hw(chaddr));
                false
            }
        }
    }

    /// Handles DECLINE. The lease must belong to `chaddr`; the transaction id
    /// is not checked. The address is forced ACTIVE and marked declined.
    pub fn decline(&mut self, address: Ipv4Addr, chaddr: &[u8]) -> bool {
        match self.leases.get_mut(&address) {
            Some(lease) if lease.chaddr == chaddr => {
                lease.state = LeaseState::Active;
                lease.declined = true;
                lease.offer_expires_at = None;
                lease.expires_at = None;
                info!("Address {} declined by {}", address, format_hw(chaddr));
                true
            }
            _ => {
                debug!("Ignoring DECLINE of {} from {}", address, format_hw(chaddr));
                false
            }
        }
    }

    pub fn lease(&self, address: Ipv4Addr) -> Option<&Lease> {
        self.leases.get(&address)
    }

    /// All known leases in ascending address order.
    pub fn leases(&self) -> impl Iterator<Item = &Lease> {
        self.leases.values()
    }

    pub fn active_count(&self) -> usize {
        self.leases
            .values()
            .filter(|lease| lease.state == LeaseState::Active)
            .count()
    }
}

fn format_hw(chaddr: &[u8]) -> String {
    chaddr
        .iter()
        .map(|byte| format!("{:02X}", byte))
        .collect::<Vec<_>>()
        .join(":")
}
