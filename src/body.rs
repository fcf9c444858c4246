use std::convert::Infallible;
use std::error::Error as StdError;

use bytes::Bytes;
use http::header::{HOST, HeaderValue};
use http::{HeaderMap, Method, Request};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;

use crate::content_encoding::BodyDecoder;
use crate::error::Error;

type BoxBodyError = Box<dyn StdError + Send + Sync>;
pub(crate) type ReqBody = BoxBody<Bytes, BoxBodyError>;

fn map_infallible_to_box_error(never: Infallible) -> BoxBodyError {
    match never {}
}

pub(crate) fn empty_req_body() -> ReqBody {
    Full::new(Bytes::new())
        .map_err(map_infallible_to_box_error)
        .boxed()
}

pub(crate) fn buffered_req_body(body: Bytes) -> ReqBody {
    Full::new(body).map_err(map_infallible_to_box_error).boxed()
}

/// Builds the request sent on the wire; `Host` is added unless the caller set one.
pub(crate) fn build_http_request(
    method: Method,
    path: &str,
    host: &str,
    headers: &HeaderMap,
    body: ReqBody,
) -> Result<Request<ReqBody>, Error> {
    let uri = path.parse::<http::Uri>().map_err(|_| Error::InvalidUri {
        uri: path.to_owned(),
    })?;
    let mut request_builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        request_builder = request_builder.header(name, value);
    }
    if !headers.contains_key(HOST) {
        let host = HeaderValue::from_str(host).map_err(|source| Error::InvalidHeaderValue {
            name: HOST.as_str().to_owned(),
            source,
        })?;
        request_builder = request_builder.header(HOST, host);
    }
    request_builder
        .body(body)
        .map_err(|source| Error::RequestBuild { source })
}

pub(crate) enum ReadBodyError {
    Read(hyper::Error),
    Decode(std::io::Error),
}

/// Drains `body` frame by frame through `decoder`, in arrival order.
pub(crate) async fn read_all_body(
    mut body: Incoming,
    mut decoder: BodyDecoder,
) -> Result<Bytes, ReadBodyError> {
    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(ReadBodyError::Read)?;
        if let Some(data) = frame.data_ref() {
            decoder.push(data).map_err(ReadBodyError::Decode)?;
        }
    }

    decoder.finish().map_err(ReadBodyError::Decode)
}
