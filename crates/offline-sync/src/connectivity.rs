//! Connectivity Monitor: "can we reach the backend right now".

use std::sync::{Arc, RwLock};

use plaasjapie_core::ports::{NetworkState, ReachabilityProbe};

/// Wraps the platform reachability signal into a fail-closed predicate.
///
/// Nothing is cached: every call re-reads the probe.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    probe: Arc<dyn ReachabilityProbe>,
}

impl ConnectivityMonitor {
    pub fn new(probe: Arc<dyn ReachabilityProbe>) -> Self {
        Self { probe }
    }

    /// True only when the device has a network interface and that interface reaches the
    /// internet. Unknown values count as offline.
    pub fn is_online(&self) -> bool {
        Self::is_state_online(&self.probe.current())
    }

    pub fn state(&self) -> NetworkState {
        self.probe.current()
    }

    pub fn is_state_online(state: &NetworkState) -> bool {
        state.is_connected == Some(true) && state.is_internet_reachable == Some(true)
    }
}

/// Probe holding the last state pushed by the platform's network listener.
#[derive(Debug, Default)]
pub struct SharedNetworkState {
    state: RwLock<NetworkState>,
}

impl SharedNetworkState {
    pub fn new(initial: NetworkState) -> Self {
        Self {
            state: RwLock::new(initial),
        }
    }

    pub fn update(&self, next: NetworkState) {
        match self.state.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    pub fn set_online(&self, online: bool) {
        self.update(if online {
            NetworkState::online()
        } else {
            NetworkState::offline()
        });
    }
}

impl ReachabilityProbe for SharedNetworkState {
    fn current(&self) -> NetworkState {
        match self.state.read() {
            Ok(guard) => *guard,
            // A writer panicked mid-update; report unknown.
            Err(_) => NetworkState::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor_for(state: NetworkState) -> ConnectivityMonitor {
        ConnectivityMonitor::new(Arc::new(SharedNetworkState::new(state)))
    }

    #[test]
    fn online_requires_both_signals() {
        assert!(monitor_for(NetworkState::online()).is_online());
        assert!(!monitor_for(NetworkState::offline()).is_online());
        assert!(!monitor_for(NetworkState {
            is_connected: Some(true),
            is_internet_reachable: Some(false),
        })
        .is_online());
    }

    #[test]
    fn unknown_reachability_is_offline() {
        assert!(!monitor_for(NetworkState::default()).is_online());
        assert!(!monitor_for(NetworkState {
            is_connected: Some(true),
            is_internet_reachable: None,
        })
        .is_online());
    }

    #[test]
    fn every_call_rereads_the_probe() {
        let shared = Arc::new(SharedNetworkState::new(NetworkState::offline()));
        let monitor = ConnectivityMonitor::new(shared.clone());
        assert!(!monitor.is_online());
        shared.set_online(true);
        assert!(monitor.is_online());
        shared.set_online(false);
        assert!(!monitor.is_online());
    }
}
