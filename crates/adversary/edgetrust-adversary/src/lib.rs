//! Adversary harness for exercising the mesh under interference.
//!
//! Two attacks are provided:
//!
//! - **Eavesdrop**: an HTTP endpoint that accepts intercepted trust-gossip
//!   payloads and logs what an observer can see, without verifying anything.
//! - **Radio off**: forces the local radio off on a fixed duty cycle and
//!   busy-waits while it is off.

pub mod eavesdrop;
pub mod radio_off;

pub use eavesdrop::{bind, serve, GossipError, GossipInspector, InterceptedGossip};
pub use radio_off::{
    AttackConfigError, NoWatchdog, RadioControl, RadioOffAttack, RadioOffSchedule, Watchdog,
};
