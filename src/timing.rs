use std::time::{Duration, Instant};

use tracing::trace;

use crate::connect::ConnectObserver;

/// Checkpoints of one request, each measured from the start of the call.
///
/// `socket <= lookup <= connect <= response <= end` always holds. A socket
/// taken from a pool has no lookup or connect phase, so both equal `socket`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timings {
    pub socket: Duration,
    pub lookup: Duration,
    pub connect: Duration,
    pub response: Duration,
    pub end: Duration,
}

impl Timings {
    pub fn phases(&self) -> TimingPhases {
        TimingPhases {
            wait: self.socket,
            dns: self.lookup.saturating_sub(self.socket),
            tcp: self.connect.saturating_sub(self.lookup),
            first_byte: self.response.saturating_sub(self.connect),
            download: self.end.saturating_sub(self.response),
            total: self.end,
        }
    }
}

/// Per-stage durations derived from [`Timings`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimingPhases {
    pub wait: Duration,
    pub dns: Duration,
    pub tcp: Duration,
    pub first_byte: Duration,
    pub download: Duration,
    pub total: Duration,
}

#[derive(Debug)]
pub(crate) struct TimingRecorder {
    started_at: Instant,
    socket: Option<Duration>,
    lookup: Option<Duration>,
    connect: Option<Duration>,
    response: Option<Duration>,
}

impl TimingRecorder {
    pub(crate) fn new(started_at: Instant) -> Self {
        Self {
            started_at,
            socket: None,
            lookup: None,
            connect: None,
            response: None,
        }
    }

    fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub(crate) fn mark_socket(&mut self) {
        let socket = self.elapsed();
        trace!(socket_us = socket.as_micros() as u64, "socket assigned");
        self.socket = Some(socket);
    }

    pub(crate) fn mark_reused(&mut self) {
        self.lookup = self.socket;
        self.connect = self.socket;
    }

    pub(crate) fn mark_response(&mut self) {
        if self.lookup.is_none() {
            self.lookup = self.socket;
        }
        if self.connect.is_none() {
            self.connect = self.socket;
        }
        let response = self.elapsed();
        trace!(response_us = response.as_micros() as u64, "response headers received");
        self.response = Some(response);
    }

    pub(crate) fn finish(self) -> Timings {
        let end = self.elapsed();
        trace!(end_us = end.as_micros() as u64, "response body consumed");
        let socket = self.socket.unwrap_or_default();
        let lookup = self.lookup.unwrap_or(socket);
        let connect = self.connect.unwrap_or(lookup);
        Timings {
            socket,
            lookup,
            connect,
            response: self.response.unwrap_or(connect),
            end,
        }
    }
}

impl ConnectObserver for TimingRecorder {
    fn on_lookup(&mut self) {
        let lookup = self.elapsed();
        trace!(lookup_us = lookup.as_micros() as u64, "address resolved");
        self.lookup = Some(lookup);
    }

    fn on_connect(&mut self) {
        let connect = self.elapsed();
        trace!(connect_us = connect.as_micros() as u64, "transport connected");
        self.connect = Some(connect);
    }
}
