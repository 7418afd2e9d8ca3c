use super::{Balancer, SelectError};
use crate::pool::Backend;
use std::sync::Arc;

/// Least connections load balancer
/// Selects the alive backend with the fewest in-flight requests; ties go to
/// the earliest one in pool order.
#[derive(Debug, Default)]
pub struct LeastConnBalancer;

impl LeastConnBalancer {
    pub fn new() -> Self {
        Self
    }
}

impl Balancer for LeastConnBalancer {
    fn next_server(&self, backends: &[Arc<Backend>]) -> Result<Arc<Backend>, SelectError> {
        if backends.is_empty() {
            return Err(SelectError::EmptyPool);
        }

        let mut best: Option<&Arc<Backend>> = None;
        let mut min_conns = usize::MAX;

        for backend in backends {
            if !backend.is_alive() {
                continue;
            }

            let conns = backend.active_connections();
            if best.is_none() || conns < min_conns {
                min_conns = conns;
                best = Some(backend);
            }
        }

        best.cloned().ok_or(SelectError::NoHealthyBackend)
    }
}
