use super::traits::HostingService;

/// Ordered set of hosting-service adapters.
///
/// Adapters are consulted in registration order and the first claim wins,
/// so more specific services must be registered before broader ones.
pub struct HostRegistry {
    hosts: Vec<Box<dyn HostingService>>,
}

impl HostRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self { hosts: Vec::new() }
    }

    /// Register an adapter at the end of the priority order.
    pub fn register(&mut self, host: Box<dyn HostingService>) {
        self.hosts.push(host);
    }

    /// Find the adapter claiming a URL, if any.
    ///
    /// A URL that fails netloc parsing stops matching entirely: nothing can
    /// claim a URL we cannot read a host out of.
    #[must_use]
    pub fn find_host(&self, url: &str) -> Option<&dyn HostingService> {
        for host in &self.hosts {
            match host.is_host_for(url) {
                Ok(true) => return Some(host.as_ref()),
                Ok(false) => {}
                Err(_) => return None,
            }
        }
        None
    }

    /// All registered adapters in priority order.
    #[must_use]
    pub fn hosts(&self) -> &[Box<dyn HostingService>] {
        &self.hosts
    }
}

impl Default for HostRegistry {
    fn default() -> Self {
        Self::new()
    }
}
