//! Application layer use cases for the thermometer device.
//!
//! - **`simulate_device`** – the `Thermometer`: current reading, update
//!   interval, and the background generator that perturbs the reading on a
//!   timer.
//!
//! - **`dispatch_message`** – turns frames received from the collector into
//!   state changes on the thermometer plus a list of actions (replies,
//!   teardown, log lines) that the network layer executes.
//!
//! - **`log_line`** – category prefixes for shell log lines.
//!
//! Nothing in this layer performs network I/O.

pub mod dispatch_message;
pub mod log_line;
pub mod simulate_device;
