//! Execution of a single request.
//!
//! A call moves through `Connecting -> HeadersReceived -> BodyReceiving ->
//! Completed`, or ends in a failure from any of those states. Completion and
//! both timeouts race for one [`CompletionLatch`]; whichever settles it first
//! decides the outcome and the others become inert.

use std::future::pending;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::{HeaderMap, Request, StatusCode};
use tokio::time::sleep_until;
use tracing::{Instrument, debug, debug_span};

use crate::Result;
use crate::body::{
    ReadBodyError, ReqBody, buffered_req_body, build_http_request, empty_req_body, read_all_body,
};
use crate::connect::{self, Connection, Target};
use crate::content_encoding::{BodyDecoder, ContentEncoding};
use crate::error::{Error, TransportErrorKind};
use crate::options::RequestOptions;
use crate::response::{Response, SocketInfo};
use crate::socket::{IdleTimeout, SocketState};
use crate::timing::{TimingRecorder, Timings};
use crate::util::{classify_hyper_error, host_header_text};

#[derive(Debug, Default)]
pub(crate) struct CompletionLatch {
    settled: AtomicBool,
}

impl CompletionLatch {
    /// Returns `true` for the first caller only.
    pub(crate) fn settle(&self) -> bool {
        self.settled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

struct Transferred {
    connection: Connection,
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    socket: SocketInfo,
    timings: Option<Timings>,
}

/// Performs one HTTP(S) request and buffers the decoded response body.
///
/// When `options` has no explicit path, it is derived from `pathname` and
/// `query` before any I/O starts. The call fails with
/// [`Error::SocketTimeout`] when the socket stays idle past the configured
/// timeout and with [`Error::RequestTimeout`] when the absolute deadline
/// passes first; any transport or decompression error is returned as is.
pub async fn request(mut options: RequestOptions) -> Result<Response> {
    let started_at = Instant::now();
    options.derive_path();
    let span = debug_span!(
        "reqshot.request",
        method = %options.method(),
        protocol = %options.protocol(),
        host = options.host(),
        port = options.port(),
        path = options.path(),
    );
    execute(options, started_at).instrument(span).await
}

async fn execute(options: RequestOptions, started_at: Instant) -> Result<Response> {
    let latch = CompletionLatch::default();
    let deadline = options.drop_request_after();

    let transferred = tokio::select! {
        biased;
        outcome = exchange(&options, started_at, &latch) => outcome?,
        () = expire_at_deadline(&latch, started_at, deadline) => {
            let timeout_ms = deadline.map_or(0, |deadline| deadline.as_millis());
            debug!(timeout_ms, "request deadline passed; aborting request");
            return Err(Error::RequestTimeout { timeout_ms });
        }
    };

    let Transferred {
        connection,
        status,
        headers,
        body,
        socket,
        timings,
    } = transferred;
    match options.agent() {
        Some(agent) => agent.release(connection),
        None => drop(connection),
    }
    debug!(
        status = status.as_u16(),
        body_bytes = body.len(),
        elapsed_ms = started_at.elapsed().as_millis() as u64,
        "request completed"
    );

    let body = String::from_utf8_lossy(&body).into_owned();
    Ok(Response::new(status, headers, body, options, socket, timings))
}

async fn expire_at_deadline(
    latch: &CompletionLatch,
    started_at: Instant,
    deadline: Option<Duration>,
) {
    let Some(deadline) = deadline else {
        return pending().await;
    };
    sleep_until((started_at + deadline).into()).await;
    if !latch.settle() {
        pending::<()>().await;
    }
}

async fn expire_when_idle(latch: &CompletionLatch, idle_timeout: &IdleTimeout) {
    idle_timeout.expired().await;
    if !latch.settle() {
        pending::<()>().await;
    }
}

fn request_body(options: &RequestOptions) -> ReqBody {
    match options.body() {
        Some(body) => buffered_req_body(body.clone()),
        None => empty_req_body(),
    }
}

async fn checkout_ready(options: &RequestOptions, target: &Target) -> Option<Connection> {
    let agent = options.agent()?;
    while let Some(mut connection) = agent.checkout(target) {
        match connection.ready().await {
            Ok(()) => return Some(connection),
            Err(error) => {
                debug!(
                    connection_id = connection.id(),
                    error = %error,
                    "pooled connection is no longer usable"
                );
            }
        }
    }
    None
}

async fn exchange(
    options: &RequestOptions,
    started_at: Instant,
    latch: &CompletionLatch,
) -> Result<Transferred> {
    let target = Target::from_options(options);
    let host = host_header_text(target.protocol, &target.host, target.port);
    let http_request = build_http_request(
        options.method().clone(),
        options.path(),
        &host,
        options.headers(),
        request_body(options),
    )?;

    let mut timer = options.timing().then(|| TimingRecorder::new(started_at));
    let pooled = checkout_ready(options, &target).await;
    let socket = match &pooled {
        Some(connection) => Arc::clone(connection.socket()),
        None => SocketState::new(),
    };
    if let Some(timer) = timer.as_mut() {
        timer.mark_socket();
        if pooled.is_some() {
            timer.mark_reused();
        }
    }

    // Set on the socket itself so the watchdog sees every byte, including
    // those moved while connecting.
    let idle_timeout = options.timeout().map(|timeout| socket.set_timeout(timeout));
    let transfer = transfer(options, &target, socket, pooled, timer, latch, http_request);

    let Some(idle_timeout) = idle_timeout else {
        return transfer.await;
    };
    tokio::select! {
        biased;
        outcome = transfer => outcome,
        () = expire_when_idle(latch, &idle_timeout) => {
            let timeout_ms = idle_timeout.timeout().as_millis();
            debug!(timeout_ms, "socket idle timeout; aborting request");
            Err(Error::SocketTimeout { timeout_ms })
        }
    }
}

async fn transfer(
    options: &RequestOptions,
    target: &Target,
    socket: Arc<SocketState>,
    pooled: Option<Connection>,
    mut timer: Option<TimingRecorder>,
    latch: &CompletionLatch,
    http_request: Request<ReqBody>,
) -> Result<Transferred> {
    let reused = pooled.is_some();
    let mut connection = match pooled {
        Some(connection) => connection,
        None => {
            let connection =
                connect::open(target, socket, options.tls_config().cloned(), &mut timer).await?;
            if let Some(agent) = options.agent() {
                agent.record_created();
            }
            connection
        }
    };

    let response = connection
        .send(http_request)
        .await
        .map_err(|source| Error::transport(classify_hyper_error(&source), source))?;
    if let Some(timer) = timer.as_mut() {
        timer.mark_response();
    }
    let (parts, body) = response.into_parts();
    debug!(status = parts.status.as_u16(), "response headers received");

    let encoding = ContentEncoding::from_headers(&parts.headers);
    let decoder = BodyDecoder::for_response(options.method(), parts.status, encoding);
    let body = read_all_body(body, decoder)
        .await
        .map_err(|error| match error {
            ReadBodyError::Read(source) => {
                let kind = match classify_hyper_error(&source) {
                    TransportErrorKind::Other => TransportErrorKind::Read,
                    kind => kind,
                };
                Error::transport(kind, source)
            }
            ReadBodyError::Decode(source) => Error::Decompress {
                encoding: encoding.map_or("identity", ContentEncoding::as_str).to_owned(),
                source,
            },
        })?;

    if !latch.settle() {
        return pending().await;
    }

    let socket = SocketInfo {
        connection_id: connection.id(),
        reused,
        local_addr: connection.local_addr(),
        remote_addr: connection.remote_addr(),
        idle_timeout_listeners: connection.socket().idle_timeout_listeners(),
    };
    Ok(Transferred {
        connection,
        status: parts.status,
        headers: parts.headers,
        body,
        socket,
        timings: timer.map(TimingRecorder::finish),
    })
}
