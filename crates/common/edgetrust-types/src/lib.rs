//! Shared types for edgetrust crates: node addresses and the error
//! classification every subsystem reports against.

pub mod addr;
pub mod error;

pub use addr::{NodeAddr, NodeAddrError};
pub use error::ErrorClass;
