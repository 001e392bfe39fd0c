//! Connectivity tracking.
//!
//! `NetworkMonitor` owns the process's single `ConnectivityState`. It polls
//! a `ConnectivityProbe` on a fixed interval, which debounces the flapping
//! signals mobile platforms report, and also accepts pushed updates from
//! platform callbacks. Watchers are notified only when the status changes.

pub mod monitor;
pub mod probe;

pub use monitor::{ConnectivityState, ConnectivityStatus, NetworkMonitor};
pub use probe::{ConnectivityProbe, TcpProbe};
