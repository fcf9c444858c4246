use std::net::SocketAddr;

use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;

use crate::Result;
use crate::error::Error;
use crate::options::RequestOptions;
use crate::timing::{TimingPhases, Timings};
use crate::util::truncate_body;

/// Snapshot of the socket that carried a request, taken when it completed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SocketInfo {
    pub connection_id: u64,
    pub reused: bool,
    pub local_addr: Option<SocketAddr>,
    pub remote_addr: Option<SocketAddr>,
    pub idle_timeout_listeners: usize,
}

#[derive(Clone, Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: String,
    request: RequestOptions,
    socket: SocketInfo,
    timings: Option<Timings>,
}

impl Response {
    pub(crate) fn new(
        status: StatusCode,
        headers: HeaderMap,
        body: String,
        request: RequestOptions,
        socket: SocketInfo,
        timings: Option<Timings>,
    ) -> Self {
        Self {
            status,
            headers,
            body,
            request,
            socket,
            timings,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Decoded body text; invalid UTF-8 sequences are replaced.
    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn into_body(self) -> String {
        self.body
    }

    /// The options this response was produced from, with the derived path filled in.
    pub fn request(&self) -> &RequestOptions {
        &self.request
    }

    pub fn socket(&self) -> &SocketInfo {
        &self.socket
    }

    /// Present only when timing was requested.
    pub fn timings(&self) -> Option<&Timings> {
        self.timings.as_ref()
    }

    pub fn timing_phases(&self) -> Option<TimingPhases> {
        self.timings.as_ref().map(Timings::phases)
    }

    pub fn json<T>(&self) -> Result<T>
    where
        T: DeserializeOwned,
    {
        serde_json::from_str(&self.body).map_err(|source| Error::Deserialize {
            source,
            body: truncate_body(&self.body),
        })
    }
}
