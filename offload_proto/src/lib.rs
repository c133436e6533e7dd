//! Wire layer shared by the analyzer server and pipeline instances.

mod error;
mod timeout;

pub mod framing;

pub use error::{ProtocolError, TransportError, WireError};
pub use timeout::{with_timeout, Timeouts};
