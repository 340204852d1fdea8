//! Transfer descriptor agent and the descriptor list construction benchmark.

#![deny(unsafe_code)]
#![warn(missing_docs, missing_debug_implementations)]

/// Transfer agent
pub mod agent;

/// Agent configuration
pub mod config;

/// Constants
pub mod constants;

/// Descriptors and descriptor lists
pub mod desc;

/// Error types
pub mod error;

/// Host memory
pub mod mem;

/// Descriptor list benchmark driver
pub mod perf;

/// Registered memory bookkeeping
mod registry;

pub use agent::{Agent, DescBuilder};
pub use config::{AgentConfig, ConfigLoader};
pub use desc::{BlobDesc, Desc, DescList, RegDescList, XferDescList};
pub use error::{Result, XferError};
pub use mem::MemType;
