//! Skyport relay proxy
//!
//! Forwards TCP connections arriving on the tunnel-local interface to the
//! real local service, one worker per exposed port.

pub mod error;
pub mod proxy;
pub mod session;

pub use error::RelayError;
pub use proxy::{RelayHandle, RelayProxy, SessionMode, WorkerHandle};
pub use session::{ProxySession, SessionState, SessionStats, CHUNK_SIZE};
