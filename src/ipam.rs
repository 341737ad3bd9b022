//! IP address management for pod sandboxes.
//!
//! Every pod sandbox leases exactly one IPv4 address from a CIDR-described
//! pool for its lifetime. The allocator probes uniformly at random first,
//! which minimizes churn-induced reuse, then falls back to an ascending
//! sweep so progress is guaranteed when the pool is dense. Leases are
//! move-only values that return their address to the pool on drop.

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use rand::Rng;
use thiserror::Error;

/// How many random probes to attempt before sweeping the range.
const RANDOM_PROBE_ATTEMPTS: u32 = 100;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Failed to parse IP range {0:?}")]
pub struct CidrError(pub String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AllocateError {
    #[error("No IP address range configured")]
    NotConfigured,
    #[error("No unused IP addresses available")]
    Exhausted,
}

/// Allocates pod IP addresses out of a configured CIDR range.
///
/// This is a cheap, clonable handle; clones share the same pool.
#[derive(Clone, Default)]
pub struct IpAddressAllocator {
    state: Arc<Mutex<AllocatorState>>,
}

#[derive(Debug)]
struct AllocatorState {
    /// First allocatable address. The range is empty when `first > last`,
    /// which is the initial, unconfigured state.
    first: u32,
    /// Last allocatable address.
    last: u32,
    /// Addresses currently leased out.
    used: BTreeSet<u32>,
}

impl Default for AllocatorState {
    fn default() -> Self {
        Self {
            first: 1,
            last: 0,
            used: BTreeSet::new(),
        }
    }
}

impl IpAddressAllocator {
    /// Configure the allocatable range from `A.B.C.D/P` notation.
    ///
    /// Prefix lengths of 31 and 32 have no network and broadcast addresses,
    /// so the full masked block is usable; shorter prefixes reserve both.
    /// On failure the previous range is left untouched.
    pub fn set_range(&self, range: &str) -> Result<(), CidrError> {
        let (first, last) = parse_cidr(range).ok_or_else(|| CidrError(String::from(range)))?;
        let mut state = self.state.lock().unwrap();
        state.first = first;
        state.last = last;
        Ok(())
    }

    /// Lease an unused address from the range.
    pub fn allocate(&self) -> Result<IpAddressLease, AllocateError> {
        let mut state = self.state.lock().unwrap();
        if state.first > state.last {
            return Err(AllocateError::NotConfigured);
        }

        // First try to allocate an address at random.
        let mut rng = rand::thread_rng();
        let (first, last) = (state.first, state.last);
        for _ in 0..RANDOM_PROBE_ATTEMPTS {
            let address = rng.gen_range(first..=last);
            if state.used.insert(address) {
                return Ok(self.lease(address));
            }
        }

        // Fall back to doing a full sweep of the address range.
        for address in first..=last {
            if state.used.insert(address) {
                return Ok(self.lease(address));
            }
        }
        Err(AllocateError::Exhausted)
    }

    /// Return an address to the pool. No-op if it was not leased.
    pub fn deallocate(&self, address: u32) {
        self.state.lock().unwrap().used.remove(&address);
    }

    fn lease(&self, address: u32) -> IpAddressLease {
        IpAddressLease {
            state: Some(self.state.clone()),
            address,
        }
    }
}

/// A leased address. Move-only; dropping the lease returns the address to
/// the allocator it came from.
#[derive(Debug)]
pub struct IpAddressLease {
    state: Option<Arc<Mutex<AllocatorState>>>,
    address: u32,
}

impl IpAddressLease {
    pub fn address(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.address)
    }
}

impl Display for IpAddressLease {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> FmtResult {
        self.address().fmt(formatter)
    }
}

impl Drop for IpAddressLease {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            state.lock().unwrap().used.remove(&self.address);
        }
    }
}

/// Parse `A.B.C.D/P` into the inclusive `(first, last)` allocatable bounds.
fn parse_cidr(range: &str) -> Option<(u32, u32)> {
    let (address, prefix) = range.split_once('/')?;

    let mut octets = [0u8; 4];
    let mut parts = address.split('.');
    for octet in octets.iter_mut() {
        let part = parts.next()?;
        if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        *octet = part.parse().ok()?;
    }
    if parts.next().is_some() {
        return None;
    }

    if prefix.is_empty() || prefix.len() > 2 || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let prefix_length: u32 = prefix.parse().ok()?;
    if prefix_length > 32 {
        return None;
    }

    let address = u32::from(Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]));
    if prefix_length > 30 {
        // Prefix length of 31 or 32, meaning there are no network and
        // broadcast addresses.
        let mask = !0u32 << (32 - prefix_length);
        let base = address & mask;
        Some((base, base | !mask))
    } else {
        // Prefix length of 30 or less, meaning the network and broadcast
        // addresses must stay free.
        let mask = !(!0u32 >> prefix_length);
        let base = address & mask;
        Some((base | 1, base | (0xFFFF_FFFE & !mask)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds(allocator: &IpAddressAllocator) -> (u32, u32) {
        let state = allocator.state.lock().unwrap();
        (state.first, state.last)
    }

    fn used(allocator: &IpAddressAllocator) -> usize {
        allocator.state.lock().unwrap().used.len()
    }

    #[test]
    fn set_range_boundaries() {
        let allocator = IpAddressAllocator::default();

        allocator.set_range("10.0.0.0/31").unwrap();
        assert_eq!(bounds(&allocator), (0x0A00_0000, 0x0A00_0001));

        allocator.set_range("10.0.0.0/32").unwrap();
        assert_eq!(bounds(&allocator), (0x0A00_0000, 0x0A00_0000));

        allocator.set_range("10.0.0.0/30").unwrap();
        assert_eq!(bounds(&allocator), (0x0A00_0001, 0x0A00_0002));

        allocator.set_range("10.0.0.0/24").unwrap();
        assert_eq!(bounds(&allocator), (0x0A00_0001, 0x0A00_00FE));
    }

    #[test]
    fn set_range_masks_host_bits() {
        let allocator = IpAddressAllocator::default();
        allocator.set_range("10.1.2.3/24").unwrap();
        assert_eq!(bounds(&allocator), (0x0A01_0201, 0x0A01_02FE));
    }

    #[test]
    fn set_range_zero_prefix_spans_everything() {
        let allocator = IpAddressAllocator::default();
        allocator.set_range("10.0.0.0/0").unwrap();
        assert_eq!(bounds(&allocator), (0x0000_0001, 0xFFFF_FFFE));
    }

    #[test]
    fn set_range_rejects_malformed_input() {
        let allocator = IpAddressAllocator::default();
        allocator.set_range("192.168.0.0/16").unwrap();
        let before = bounds(&allocator);

        for range in [
            "256.0.0.0/8",
            "10.0.0.0/33",
            "10.0.0.0",
            "10.0.0/8",
            "10.0.0.0.0/8",
            "10.0.0.0/",
            "10.0.0.0/+8",
            "10.0.-1.0/8",
            "",
        ] {
            assert!(allocator.set_range(range).is_err(), "accepted {range:?}");
            // A failed parse leaves the previous range in place.
            assert_eq!(bounds(&allocator), before);
        }
    }

    #[test]
    fn allocate_without_range_fails() {
        let allocator = IpAddressAllocator::default();
        assert_eq!(
            allocator.allocate().unwrap_err(),
            AllocateError::NotConfigured
        );
    }

    #[test]
    fn allocate_stays_within_range() {
        let allocator = IpAddressAllocator::default();
        allocator.set_range("10.0.0.0/24").unwrap();
        for _ in 0..64 {
            let lease = allocator.allocate().unwrap();
            let address = u32::from(lease.address());
            assert!((0x0A00_0001..=0x0A00_00FE).contains(&address));
        }
    }

    #[test]
    fn exhaustion_and_lease_release() {
        let allocator = IpAddressAllocator::default();
        allocator.set_range("10.0.0.0/30").unwrap();

        // A /30 keeps the network and broadcast addresses free: two usable.
        let first = allocator.allocate().unwrap();
        let second = allocator.allocate().unwrap();
        assert_ne!(first.address(), second.address());
        assert_eq!(allocator.allocate().unwrap_err(), AllocateError::Exhausted);

        // Dropping a lease returns its address to the pool.
        let released = first.address();
        drop(first);
        let third = allocator.allocate().unwrap();
        assert_eq!(third.address(), released);
    }

    #[test]
    fn single_address_range() {
        let allocator = IpAddressAllocator::default();
        allocator.set_range("10.0.0.0/32").unwrap();
        let lease = allocator.allocate().unwrap();
        assert_eq!(lease.to_string(), "10.0.0.0");
        assert_eq!(allocator.allocate().unwrap_err(), AllocateError::Exhausted);
    }

    #[test]
    fn formats_most_significant_octet_first() {
        let allocator = IpAddressAllocator::default();
        allocator.set_range("172.16.254.1/32").unwrap();
        let lease = allocator.allocate().unwrap();
        assert_eq!(lease.to_string(), "172.16.254.1");
    }

    #[test]
    fn deallocate_is_idempotent() {
        let allocator = IpAddressAllocator::default();
        allocator.set_range("10.0.0.0/32").unwrap();
        let lease = allocator.allocate().unwrap();
        assert_eq!(used(&allocator), 1);
        drop(lease);
        assert_eq!(used(&allocator), 0);
        // Releasing an address that is not leased is a no-op.
        allocator.deallocate(0x0A00_0000);
        assert_eq!(used(&allocator), 0);
    }
}
