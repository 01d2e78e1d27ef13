//! # Subnet Allocator
//!
//! Concurrent test runs must never share a network. Each run leases a
//! non-negative subnet index from the allocator and derives its complete
//! IPv4/IPv6 address plan from that index alone. The allocator always hands
//! out the lowest free index, so a released index becomes reusable
//! immediately and the address space stays dense no matter how many runs
//! come and go.
//!
//! ## Address plan
//!
//! For index `i` the derived networks are:
//!
//! - IPv4: subnet `10.<i>.0.0/16`, client net `10.<i>.10.0/24` with address
//!   `10.<i>.10.10`, server net `10.<i>.222.0/24` with address
//!   `10.<i>.222.222`
//! - IPv6: subnet `fd00:cafe:<i:04x>::/48`, client net
//!   `fd00:cafe:<i:04x>:10::/64` with address `fd00:cafe:<i:04x>:10::10`,
//!   server net `fd00:cafe:<i:04x>:222::/64` with address
//!   `fd00:cafe:<i:04x>:222::222`
//!
//! The bundle is a pure function of the index; two leases of the same index
//! always yield identical addresses.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Complete address plan derived from one subnet index.
///
/// All values are plain strings because they are only ever consumed as
/// environment variables for the container group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressBundle {
    pub index: usize,
    pub subnet_v4: String,
    pub client_net_v4: String,
    pub server_net_v4: String,
    pub client_addr_v4: String,
    pub server_addr_v4: String,
    pub subnet_v6: String,
    pub client_net_v6: String,
    pub server_net_v6: String,
    pub client_addr_v6: String,
    pub server_addr_v6: String,
}

impl AddressBundle {
    /// Derive the address plan for `index`.
    pub fn new(index: usize) -> Self {
        let v6_prefix = format!("fd00:cafe:{:04x}", index);
        Self {
            index,
            subnet_v4: format!("10.{}", index),
            client_net_v4: format!("10.{}.10", index),
            server_net_v4: format!("10.{}.222", index),
            client_addr_v4: format!("10.{}.10.10", index),
            server_addr_v4: format!("10.{}.222.222", index),
            client_net_v6: format!("{}:10", v6_prefix),
            server_net_v6: format!("{}:222", v6_prefix),
            client_addr_v6: format!("{}:10::10", v6_prefix),
            server_addr_v6: format!("{}:222::222", v6_prefix),
            subnet_v6: v6_prefix,
        }
    }

    /// Environment entries handed to the container group.
    ///
    /// Prefix lengths are fixed by the address plan: /16 and /24 for IPv4,
    /// /48 and /64 for IPv6.
    pub fn env(&self) -> Vec<(String, String)> {
        vec![
            ("SUBNET_V4".into(), self.subnet_v4.clone()),
            ("SUBNET_V4_PREFIX".into(), "16".into()),
            ("CLIENT_V4_NET".into(), self.client_net_v4.clone()),
            ("SERVER_V4_NET".into(), self.server_net_v4.clone()),
            ("CLIENT_V4_ADDR".into(), self.client_addr_v4.clone()),
            ("SERVER_V4_ADDR".into(), self.server_addr_v4.clone()),
            ("V4_NET_PREFIX".into(), "24".into()),
            ("SUBNET_V6".into(), self.subnet_v6.clone()),
            ("SUBNET_V6_PREFIX".into(), "48".into()),
            ("CLIENT_V6_NET".into(), self.client_net_v6.clone()),
            ("SERVER_V6_NET".into(), self.server_net_v6.clone()),
            ("CLIENT_V6_ADDR".into(), self.client_addr_v6.clone()),
            ("SERVER_V6_ADDR".into(), self.server_addr_v6.clone()),
            ("V6_NET_PREFIX".into(), "64".into()),
        ]
    }
}

/// Process-wide subnet index allocator.
///
/// One instance is shared by all concurrent test executions. The critical
/// section is a handful of set operations, so a plain [`std::sync::Mutex`]
/// is sufficient even under the async scheduler.
#[derive(Debug, Default)]
pub struct SubnetAllocator {
    allocated: Mutex<HashSet<usize>>,
}

impl SubnetAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the lowest free index and return a lease for it.
    ///
    /// The lease releases the index when dropped, so an executor that bails
    /// out early on any path still returns the index to the pool.
    pub fn allocate(self: &Arc<Self>) -> SubnetLease {
        let index = {
            let mut allocated = self.allocated.lock().unwrap();
            let mut candidate = 0;
            while allocated.contains(&candidate) {
                candidate += 1;
            }
            allocated.insert(candidate);
            candidate
        };
        SubnetLease {
            bundle: AddressBundle::new(index),
            allocator: Arc::clone(self),
        }
    }

    /// Return `index` to the pool.
    ///
    /// Idempotent: releasing an index that is not currently allocated is a
    /// no-op.
    pub fn release(&self, index: usize) {
        self.allocated.lock().unwrap().remove(&index);
    }

    /// Number of indices currently on loan.
    pub fn allocated_count(&self) -> usize {
        self.allocated.lock().unwrap().len()
    }
}

/// An allocated subnet index plus its derived address plan.
///
/// Dropping the lease releases the index.
#[derive(Debug)]
pub struct SubnetLease {
    bundle: AddressBundle,
    allocator: Arc<SubnetAllocator>,
}

impl SubnetLease {
    pub fn index(&self) -> usize {
        self.bundle.index
    }

    pub fn bundle(&self) -> &AddressBundle {
        &self.bundle
    }
}

impl Drop for SubnetLease {
    fn drop(&mut self) {
        self.allocator.release(self.bundle.index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_lowest_free_index() {
        let allocator = Arc::new(SubnetAllocator::new());
        let a = allocator.allocate();
        let b = allocator.allocate();
        let c = allocator.allocate();
        assert_eq!((a.index(), b.index(), c.index()), (0, 1, 2));

        // Releasing the middle index makes it the next candidate again.
        drop(b);
        let d = allocator.allocate();
        assert_eq!(d.index(), 1);
    }

    #[test]
    fn release_is_idempotent() {
        let allocator = Arc::new(SubnetAllocator::new());
        let lease = allocator.allocate();
        let index = lease.index();
        drop(lease);
        allocator.release(index);
        allocator.release(index);
        assert_eq!(allocator.allocated_count(), 0);
        assert_eq!(allocator.allocate().index(), index);
    }

    #[test]
    fn bundle_is_a_pure_function_of_the_index() {
        assert_eq!(AddressBundle::new(7), AddressBundle::new(7));

        let bundle = AddressBundle::new(3);
        assert_eq!(bundle.subnet_v4, "10.3");
        assert_eq!(bundle.client_addr_v4, "10.3.10.10");
        assert_eq!(bundle.server_addr_v4, "10.3.222.222");
        assert_eq!(bundle.subnet_v6, "fd00:cafe:0003");
        assert_eq!(bundle.client_addr_v6, "fd00:cafe:0003:10::10");
        assert_eq!(bundle.server_addr_v6, "fd00:cafe:0003:222::222");
    }

    #[test]
    fn v6_prefix_is_zero_padded_hex() {
        let bundle = AddressBundle::new(255);
        assert_eq!(bundle.subnet_v6, "fd00:cafe:00ff");
    }

    #[test]
    fn env_carries_prefix_lengths() {
        let env = AddressBundle::new(0).env();
        let lookup = |key: &str| {
            env.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
                .unwrap()
        };
        assert_eq!(lookup("SUBNET_V4_PREFIX"), "16");
        assert_eq!(lookup("V4_NET_PREFIX"), "24");
        assert_eq!(lookup("SUBNET_V6_PREFIX"), "48");
        assert_eq!(lookup("V6_NET_PREFIX"), "64");
    }
}
