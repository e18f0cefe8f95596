//! Infrastructure layer for the thermometer device.
//!
//! Contains the adapters that touch the outside world: the TCP link to the
//! collector and the event/command bridge to the shell.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `thermo_core`, but MUST NOT be imported by the `application` layer.
//!
//! # Sub-modules
//!
//! - **`network`** – `ConnectionManager`: connect, handshake, receive loop,
//!   serialized writes, and the Disconnected/Connecting/Connected/Error state
//!   machine.
//!
//! - **`shell_bridge`** – string-level operations for a UI or terminal shell,
//!   plus the events and status snapshot the shell displays.

pub mod network;
pub mod shell_bridge;
