//! Reconnect throttling keyed by remote address.
//!
//! A [`ConnectionGuard`] remembers when each address was last admitted. A new
//! connection from the same address is refused until the quiet window has
//! elapsed. The ports of the two connections do not matter.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// Default quiet window between two admissions from one address.
pub const DEFAULT_QUIET_WINDOW: Duration = Duration::from_secs(5);

/// Per-address admission record.
#[derive(Debug)]
pub struct ConnectionGuard {
    quiet_window: Duration,
    entries: DashMap<IpAddr, Instant>,
}

impl ConnectionGuard {
    /// Create a guard. A zero window disables throttling entirely.
    pub fn new(quiet_window: Duration) -> Self {
        Self {
            quiet_window,
            entries: DashMap::new(),
        }
    }

    /// The configured quiet window.
    pub fn quiet_window(&self) -> Duration {
        self.quiet_window
    }

    /// Decide whether `addr` may connect at `now`, recording the admission.
    ///
    /// An expired entry is replaced, a fresh one refuses the attempt. The
    /// whole decision runs under the map shard's write lock, so two racing
    /// accepts from one address cannot both be admitted.
    pub fn is_allowed(&self, addr: IpAddr, now: Instant) -> bool {
        if self.quiet_window.is_zero() {
            return true;
        }
        match self.entries.entry(canonical(addr)) {
            Entry::Occupied(mut entry) => {
                if now.saturating_duration_since(*entry.get()) > self.quiet_window {
                    entry.insert(now);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                true
            }
        }
    }

    /// Undo the admission recorded at `admitted_at`, if it is still the
    /// latest one for `addr`.
    pub fn revoke(&self, addr: IpAddr, admitted_at: Instant) {
        self.entries
            .remove_if(&canonical(addr), |_, stamped| *stamped == admitted_at);
    }

    /// Drop every entry that can no longer block anyone. Returns the number
    /// of entries removed.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, stamped| now.saturating_duration_since(*stamped) <= self.quiet_window);
        before.saturating_sub(self.entries.len())
    }

    /// Number of remembered addresses.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no address is remembered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ConnectionGuard {
    fn default() -> Self {
        Self::new(DEFAULT_QUIET_WINDOW)
    }
}

/// IPv4 peers on a dual-stack listener show up as IPv4-mapped IPv6.
fn canonical(addr: IpAddr) -> IpAddr {
    addr.to_canonical()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const A: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
    const B: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));

    #[test]
    fn test_first_connection_allowed() {
        let guard = ConnectionGuard::default();
        assert!(guard.is_allowed(A, Instant::now()));
        assert_eq!(guard.len(), 1);
    }

    #[test]
    fn test_reconnect_inside_window_rejected() {
        let guard = ConnectionGuard::default();
        let t0 = Instant::now();
        assert!(guard.is_allowed(A, t0));
        assert!(!guard.is_allowed(A, t0 + Duration::from_millis(10)));
        assert!(!guard.is_allowed(A, t0 + Duration::from_secs(4)));
    }

    #[test]
    fn test_reconnect_exactly_at_window_rejected() {
        let guard = ConnectionGuard::default();
        let t0 = Instant::now();
        assert!(guard.is_allowed(A, t0));
        assert!(!guard.is_allowed(A, t0 + DEFAULT_QUIET_WINDOW));
    }

    #[test]
    fn test_reconnect_after_window_allowed() {
        let guard = ConnectionGuard::default();
        let t0 = Instant::now();
        assert!(guard.is_allowed(A, t0));
        assert!(guard.is_allowed(A, t0 + Duration::from_secs(6)));
        // The successful attempt refreshes the record.
        assert!(!guard.is_allowed(A, t0 + Duration::from_secs(7)));
    }

    #[test]
    fn test_rejection_does_not_extend_window() {
        let guard = ConnectionGuard::default();
        let t0 = Instant::now();
        assert!(guard.is_allowed(A, t0));
        assert!(!guard.is_allowed(A, t0 + Duration::from_secs(4)));
        assert!(guard.is_allowed(A, t0 + Duration::from_secs(6)));
    }

    #[test]
    fn test_addresses_are_independent() {
        let guard = ConnectionGuard::default();
        let t0 = Instant::now();
        assert!(guard.is_allowed(A, t0));
        assert!(guard.is_allowed(B, t0));
        assert!(!guard.is_allowed(A, t0));
        assert_eq!(guard.len(), 2);
    }

    #[test]
    fn test_ipv4_mapped_address_shares_entry() {
        let guard = ConnectionGuard::default();
        let t0 = Instant::now();
        let mapped = IpAddr::V6(Ipv4Addr::new(10, 0, 0, 1).to_ipv6_mapped());
        assert!(guard.is_allowed(A, t0));
        assert!(!guard.is_allowed(mapped, t0));
    }

    #[test]
    fn test_zero_window_disables_guard() {
        let guard = ConnectionGuard::new(Duration::ZERO);
        let t0 = Instant::now();
        assert!(guard.is_allowed(A, t0));
        assert!(guard.is_allowed(A, t0));
        assert!(guard.is_empty());
    }

    #[test]
    fn test_revoke_only_removes_matching_stamp() {
        let guard = ConnectionGuard::default();
        let t0 = Instant::now();
        assert!(guard.is_allowed(A, t0));

        guard.revoke(A, t0 + Duration::from_millis(1));
        assert_eq!(guard.len(), 1);

        guard.revoke(A, t0);
        assert!(guard.is_empty());
        assert!(guard.is_allowed(A, t0));
    }

    #[test]
    fn test_purge_expired_keeps_fresh_entries() {
        let guard = ConnectionGuard::default();
        let t0 = Instant::now();
        assert!(guard.is_allowed(A, t0));
        assert!(guard.is_allowed(B, t0 + Duration::from_secs(4)));

        let removed = guard.purge_expired(t0 + Duration::from_secs(6));
        assert_eq!(removed, 1);
        assert_eq!(guard.len(), 1);
        assert!(!guard.is_allowed(B, t0 + Duration::from_secs(6)));
    }

    #[test]
    fn test_concurrent_attempts_admit_exactly_one() {
        let guard = ConnectionGuard::default();
        let admitted = AtomicUsize::new(0);
        let now = Instant::now();

        std::thread::scope(|scope| {
            for _ in 0..16 {
                scope.spawn(|| {
                    if guard.is_allowed(A, now) {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(admitted.load(Ordering::SeqCst), 1);
    }
}
