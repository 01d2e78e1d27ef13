use quic_interop_runner::subnet::{AddressBundle, SubnetAllocator};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Hammer the allocator from eight concurrent workers and verify that no
/// index is ever held by two runs at the same time and that everything is
/// returned to the pool at the end.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_leases_never_overlap() {
    let allocator = Arc::new(SubnetAllocator::new());
    let held: Arc<Mutex<HashSet<usize>>> = Arc::new(Mutex::new(HashSet::new()));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let allocator = Arc::clone(&allocator);
        let held = Arc::clone(&held);
        tasks.push(tokio::spawn(async move {
            for _ in 0..125 {
                let lease = allocator.allocate();
                {
                    let mut held = held.lock().unwrap();
                    // A second holder of the same index would be a
                    // collision between concurrent runs.
                    assert!(held.insert(lease.index()), "index {} double-allocated", lease.index());
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
                held.lock().unwrap().remove(&lease.index());
                drop(lease);
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(allocator.allocated_count(), 0);
}

/// Simultaneously held indices stay inside the worker count, since the
/// allocator always reuses the lowest free index.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn indices_stay_dense_under_reuse() {
    let allocator = Arc::new(SubnetAllocator::new());

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let allocator = Arc::clone(&allocator);
        tasks.push(tokio::spawn(async move {
            for _ in 0..50 {
                let lease = allocator.allocate();
                assert!(lease.index() < 4, "index {} outside the dense range", lease.index());
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
}

#[test]
fn allocate_release_allocate_is_stable() {
    let allocator = Arc::new(SubnetAllocator::new());
    let first = allocator.allocate();
    let index = first.index();
    drop(first);
    let second = allocator.allocate();
    assert_eq!(second.index(), index);
}

#[test]
fn bundles_are_derived_deterministically() {
    let allocator = Arc::new(SubnetAllocator::new());
    let lease = allocator.allocate();
    assert_eq!(lease.bundle(), &AddressBundle::new(lease.index()));
}
