use std::collections::HashSet;

/// A configured JSON-RPC endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcEndpoint {
    /// Stable identifier carried on price points and logs.
    pub id: String,
    pub url: String,
}

impl RpcEndpoint {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
        }
    }
}

/// Round-robin endpoint selection with per-tick degradation tracking.
///
/// An endpoint that fails is marked degraded and skipped until the next
/// tick-level reset. The rotation sticks with the last endpoint that
/// answered, so a healthy primary keeps serving every request instead of
/// spraying load across the list.
#[derive(Debug)]
pub struct EndpointRotation {
    endpoints: Vec<RpcEndpoint>,
    active: usize,
    degraded: HashSet<usize>,
}

impl EndpointRotation {
    /// Panics if `endpoints` is empty; a bot with no RPC endpoints is a
    /// configuration error caught before this is built.
    pub fn new(endpoints: Vec<RpcEndpoint>) -> Self {
        assert!(!endpoints.is_empty(), "endpoint list must not be empty");
        Self {
            endpoints,
            active: 0,
            degraded: HashSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// The endpoint the next request should use, skipping degraded entries.
    /// Returns None once every endpoint is degraded.
    pub fn current(&self) -> Option<&RpcEndpoint> {
        if self.degraded.len() >= self.endpoints.len() {
            return None;
        }
        let mut idx = self.active;
        for _ in 0..self.endpoints.len() {
            if !self.degraded.contains(&idx) {
                return Some(&self.endpoints[idx]);
            }
            idx = (idx + 1) % self.endpoints.len();
        }
        None
    }

    /// Mark the active endpoint degraded and advance to the next healthy one.
    pub fn mark_degraded(&mut self) {
        if let Some(ep) = self.current() {
            tracing::warn!(endpoint = %ep.id, "marking RPC endpoint degraded");
        }
        let mut idx = self.active;
        for _ in 0..self.endpoints.len() {
            if !self.degraded.contains(&idx) {
                self.degraded.insert(idx);
                break;
            }
            idx = (idx + 1) % self.endpoints.len();
        }
        self.active = (idx + 1) % self.endpoints.len();
    }

    /// Pin the rotation to the endpoint that just answered.
    pub fn mark_healthy(&mut self, id: &str) {
        if let Some(idx) = self.endpoints.iter().position(|e| e.id == id) {
            self.active = idx;
            self.degraded.remove(&idx);
        }
    }

    /// Forget degradations from the previous tick. A provider that was
    /// rate-limiting a minute ago deserves another chance.
    pub fn reset_degraded(&mut self) {
        self.degraded.clear();
    }

    pub fn degraded_count(&self) -> usize {
        self.degraded.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rotation() -> EndpointRotation {
        EndpointRotation::new(vec![
            RpcEndpoint::new("a", "http://a.example"),
            RpcEndpoint::new("b", "http://b.example"),
            RpcEndpoint::new("c", "http://c.example"),
        ])
    }

    #[test]
    fn test_starts_at_first_endpoint() {
        let rot = rotation();
        assert_eq!(rot.current().unwrap().id, "a");
    }

    #[test]
    fn test_degradation_advances_in_order() {
        let mut rot = rotation();
        rot.mark_degraded();
        assert_eq!(rot.current().unwrap().id, "b");
        rot.mark_degraded();
        assert_eq!(rot.current().unwrap().id, "c");
    }

    #[test]
    fn test_all_degraded_yields_none() {
        let mut rot = rotation();
        rot.mark_degraded();
        rot.mark_degraded();
        rot.mark_degraded();
        assert!(rot.current().is_none());
        assert_eq!(rot.degraded_count(), 3);
    }

    #[test]
    fn test_reset_restores_all() {
        let mut rot = rotation();
        rot.mark_degraded();
        rot.mark_degraded();
        rot.reset_degraded();
        assert_eq!(rot.degraded_count(), 0);
        assert!(rot.current().is_some());
    }

    #[test]
    fn test_sticks_with_last_good_endpoint() {
        let mut rot = rotation();
        rot.mark_degraded(); // a out, active b
        rot.mark_healthy("b");
        rot.reset_degraded();
        // a is healthy again but b answered last, so b stays active
        assert_eq!(rot.current().unwrap().id, "b");
    }
}
