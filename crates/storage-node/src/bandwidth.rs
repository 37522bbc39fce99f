//! Bandwidth accounting — reservation, not rate limiting.
//!
//! Every in-flight transfer reserves a slice of the node's declared
//! link capacity up front and releases it on completion or failure.
//! The reservation is 0.8x whatever was available at reservation time,
//! so a burst of small transfers doesn't starve a single large one.
//! Three independent pieces of state (storage, bandwidth, transfers)
//! are never protected by one coarse lock — this ledger only ever
//! touches its own map.

use dashmap::DashMap;

/// Key identifying one in-flight transfer: (file_id, chunk_id, direction).
pub type TransferKey = (String, u64, Direction);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Inbound,
    Outbound,
}

pub struct BandwidthLedger {
    total_bps: u64,
    reservations: DashMap<TransferKey, u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("no bandwidth available")]
pub struct NoBandwidth;

/// RAII guard releasing a reservation when dropped — covers every exit
/// path (success, error, early return, panic-unwind) with one release.
pub struct Reservation<'a> {
    ledger: &'a BandwidthLedger,
    key: TransferKey,
    released: bool,
}

impl Reservation<'_> {
    pub fn bps(&self) -> u64 {
        self.ledger.reservations.get(&self.key).map(|v| *v).unwrap_or(0)
    }

    pub fn release(mut self) {
        self.do_release();
    }

    fn do_release(&mut self) {
        if !self.released {
            self.ledger.reservations.remove(&self.key);
            self.released = true;
        }
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.do_release();
    }
}

impl BandwidthLedger {
    pub fn new(total_bps: u64) -> Self {
        Self {
            total_bps,
            reservations: DashMap::new(),
        }
    }

    pub fn total_bps(&self) -> u64 {
        self.total_bps
    }

    pub fn in_use_bps(&self) -> u64 {
        self.reservations.iter().map(|r| *r.value()).sum()
    }

    pub fn available_bps(&self) -> u64 {
        self.total_bps.saturating_sub(self.in_use_bps())
    }

    /// Reserve bandwidth for one transfer. Fails fast — never blocks —
    /// when no capacity remains at the moment of the call.
    pub fn reserve(&self, key: TransferKey) -> Result<Reservation<'_>, NoBandwidth> {
        let available = self.available_bps();
        if available == 0 {
            return Err(NoBandwidth);
        }
        let reserved = (available as f64 * 0.8) as u64;
        let reserved = reserved.max(1);
        self.reservations.insert(key.clone(), reserved);
        Ok(Reservation {
            ledger: self,
            key,
            released: false,
        })
    }
}
