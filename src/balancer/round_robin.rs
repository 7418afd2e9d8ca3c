use super::{Balancer, SelectError};
use crate::pool::Backend;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Round robin over the membership, skipping dead backends.
///
/// Every candidate inspected advances the shared cursor, so fairness holds
/// over time rather than per call when liveness changes between calls.
#[derive(Debug, Default)]
pub struct RoundRobinBalancer {
    cursor: AtomicU64,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Balancer for RoundRobinBalancer {
    fn next_server(&self, backends: &[Arc<Backend>]) -> Result<Arc<Backend>, SelectError> {
        let len = backends.len() as u64;
        if len == 0 {
            return Err(SelectError::EmptyPool);
        }

        for _ in 0..len {
            let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % len;
            let backend = &backends[idx as usize];
            if backend.is_alive() {
                return Ok(Arc::clone(backend));
            }
        }

        Err(SelectError::NoHealthyBackend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn make_backends(count: usize) -> Vec<Arc<Backend>> {
        (0..count)
            .map(|i| Arc::new(Backend::parse(&format!("http://server{}:8080", i)).unwrap()))
            .collect()
    }

    #[test]
    fn test_round_robin() {
        let balancer = RoundRobinBalancer::new();
        let backends = make_backends(2);

        let s1 = balancer.next_server(&backends).unwrap();
        let s2 = balancer.next_server(&backends).unwrap();
        let s3 = balancer.next_server(&backends).unwrap();

        assert!(Arc::ptr_eq(&s1, &backends[0]));
        assert!(Arc::ptr_eq(&s2, &backends[1]));
        assert!(Arc::ptr_eq(&s3, &backends[0]));
    }

    #[test]
    fn test_each_backend_served_k_times() {
        let balancer = RoundRobinBalancer::new();
        let backends = make_backends(5);
        let k = 7;

        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..k * backends.len() {
            let peer = balancer.next_server(&backends).unwrap();
            *counts.entry(peer.origin()).or_default() += 1;
        }

        assert_eq!(counts.len(), 5);
        assert!(counts.values().all(|&c| c == k));
    }

    #[test]
    fn test_skip_dead() {
        let balancer = RoundRobinBalancer::new();
        let backends = make_backends(3);
        backends[1].set_alive(false);

        // Cursor advances once per candidate inspected: 0, (1 dead) 2, 0, (1 dead) 2
        let picks: Vec<_> = (0..4)
            .map(|_| balancer.next_server(&backends).unwrap().origin())
            .collect();
        assert_eq!(
            picks,
            vec![
                "http://server0:8080",
                "http://server2:8080",
                "http://server0:8080",
                "http://server2:8080",
            ]
        );
    }

    #[test]
    fn test_errors() {
        let balancer = RoundRobinBalancer::new();
        assert_eq!(balancer.next_server(&[]).unwrap_err(), SelectError::EmptyPool);

        let backends = make_backends(3);
        for b in &backends {
            b.set_alive(false);
        }
        assert_eq!(
            balancer.next_server(&backends).unwrap_err(),
            SelectError::NoHealthyBackend
        );
    }

    #[test]
    fn test_cursor_wraps() {
        let balancer = RoundRobinBalancer {
            cursor: AtomicU64::new(u64::MAX),
        };
        let backends = make_backends(3);

        // u64::MAX % 3 == 0, then the cursor wraps to 0.
        let first = balancer.next_server(&backends).unwrap();
        let second = balancer.next_server(&backends).unwrap();
        assert!(Arc::ptr_eq(&first, &backends[0]));
        assert!(Arc::ptr_eq(&second, &backends[0]));
    }
}
