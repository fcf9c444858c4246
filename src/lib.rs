//! `reqshot` performs one HTTP(S) request per call and hands back a fully
//! buffered, transparently decompressed response.
//!
//! Each call can record connection-phase timings and is guarded by two
//! independent timeouts: an idle-socket timeout that resets on every byte of
//! traffic, and an absolute deadline that does not.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use reqshot::prelude::{Agent, Protocol, Query, RequestOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let agent = Agent::new();
//!     let options = RequestOptions::new()
//!         .with_protocol(Protocol::Https)
//!         .with_host("api.example.com")
//!         .with_pathname("/search")
//!         .with_query(Query::new().set("q", "a b"))
//!         .with_timeout(Duration::from_secs(2))
//!         .with_drop_request_after(Duration::from_secs(5))
//!         .with_timing(true)
//!         .with_agent(agent.clone());
//!
//!     let response = reqshot::request(options).await?;
//!     println!("{} {}", response.status(), response.body());
//!     if let Some(phases) = response.timing_phases() {
//!         println!("dns={:?} first_byte={:?}", phases.dns, phases.first_byte);
//!     }
//!     Ok(())
//! }
//! ```

#[cfg(all(
    not(feature = "tls-rustls-ring"),
    not(feature = "tls-rustls-aws-lc-rs")
))]
compile_error!(
    "reqshot requires one TLS backend feature: enable `tls-rustls-ring` or `tls-rustls-aws-lc-rs`"
);

mod agent;
mod body;
mod connect;
mod content_encoding;
mod error;
mod execute;
mod options;
mod response;
mod socket;
mod timing;
mod tls;
mod util;

pub use crate::agent::{Agent, AgentConfig, AgentStats};
pub use crate::error::{Error, ErrorCode, TransportErrorKind};
pub use crate::execute::request;
pub use crate::options::{Protocol, Query, RequestOptions};
pub use crate::response::{Response, SocketInfo};
pub use crate::timing::{TimingPhases, Timings};
pub use crate::tls::TlsBackend;

pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        Agent, AgentConfig, AgentStats, Error, ErrorCode, Protocol, Query, RequestOptions,
        Response, Result, SocketInfo, TimingPhases, Timings, TlsBackend, TransportErrorKind,
        request,
    };
}
