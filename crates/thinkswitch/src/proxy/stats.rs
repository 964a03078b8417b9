use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide request counters, shared by handle
#[derive(Debug, Default)]
pub struct ProxyStats {
    modified: AtomicU64,
    proxied: AtomicU64,
}

impl ProxyStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// A request body was rewritten for the backend
    pub fn record_modified(&self) {
        self.modified.fetch_add(1, Ordering::Relaxed);
    }

    /// The backend answered a forwarded request, rewritten or not
    pub fn record_proxied(&self) {
        self.proxied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn modified_requests(&self) -> u64 {
        self.modified.load(Ordering::Relaxed)
    }

    pub fn proxied_requests(&self) -> u64 {
        self.proxied.load(Ordering::Relaxed)
    }
}
