//! thermo-device library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does thermo-device do? (for beginners)
//!
//! It pretends to be a network-attached thermometer.  A *collector* (some
//! home-automation hub) listens on a TCP port; the device connects to it and
//! then:
//!
//! 1. Announces itself with `Device: Thermometer;` and its update interval.
//! 2. Every few seconds perturbs its reading by a small random amount and
//!    sends `Temperature: 21.37;`.
//! 3. Obeys commands from the collector: change the interval, take a reading
//!    now, report status, or disconnect.
//!
//! A shell (the terminal loop in `main.rs`, or a GUI) drives the device via
//! [`infrastructure::shell_bridge::ShellBridge`] and receives
//! [`infrastructure::shell_bridge::ShellEvent`]s back.

/// Application layer: the thermometer and inbound message handling.
pub mod application;

/// Infrastructure layer: collector connection and shell bridge.
pub mod infrastructure;
