use std::io;
use std::sync::Mutex;

use http::header::{HeaderName, HeaderValue};

use crate::error::{Error, TransportErrorKind};
use crate::options::Protocol;

const MAX_ERROR_BODY_LEN: usize = 2048;

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) fn parse_header_name(name: &str) -> Result<HeaderName, Error> {
    name.parse().map_err(|source| Error::InvalidHeaderName {
        name: name.to_owned(),
        source,
    })
}

pub(crate) fn parse_header_value(name: &str, value: &str) -> Result<HeaderValue, Error> {
    value.parse().map_err(|source| Error::InvalidHeaderValue {
        name: name.to_owned(),
        source,
    })
}

/// `Host` header text; the port is omitted when it is the protocol default.
pub(crate) fn host_header_text(protocol: Protocol, host: &str, port: u16) -> String {
    let host = if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]")
    } else {
        host.to_owned()
    };
    if port == protocol.default_port() {
        host
    } else {
        format!("{host}:{port}")
    }
}

pub(crate) fn classify_connect_error(error: &io::Error) -> TransportErrorKind {
    match error.kind() {
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::AddrNotAvailable
        | io::ErrorKind::TimedOut => TransportErrorKind::Connect,
        _ => TransportErrorKind::Other,
    }
}

pub(crate) fn classify_hyper_error(error: &hyper::Error) -> TransportErrorKind {
    if error.is_incomplete_message() || error.is_closed() || error.is_body_write_aborted() {
        return TransportErrorKind::Read;
    }
    let text = error.to_string().to_ascii_lowercase();
    if text.contains("read")
        || text.contains("connection reset")
        || text.contains("broken pipe")
        || text.contains("unexpected eof")
    {
        return TransportErrorKind::Read;
    }
    TransportErrorKind::Other
}

pub(crate) fn truncate_body(body: &str) -> String {
    if body.chars().count() <= MAX_ERROR_BODY_LEN {
        return body.to_owned();
    }

    let truncated: String = body.chars().take(MAX_ERROR_BODY_LEN).collect();
    format!("{truncated}...(truncated)")
}
