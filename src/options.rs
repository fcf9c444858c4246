use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

use crate::Result;
use crate::agent::Agent;
use crate::util::{parse_header_name, parse_header_value};

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PATH: &str = "/";

// Unreserved set of `encodeURIComponent`; everything else is escaped.
const QUERY_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Protocol {
    Http,
    #[default]
    Https,
}

impl Protocol {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }

    pub const fn default_port(self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Ordered query parameters; a name may carry several values.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Query {
    pairs: Vec<(String, Vec<String>)>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `name` to a single value, replacing earlier values.
    pub fn set(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_all(name, [value])
    }

    /// Sets `name` to a list of values, replacing earlier values.
    pub fn set_all<I, V>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let name = name.into();
        let values = values.into_iter().map(Into::into).collect::<Vec<_>>();
        match self.pairs.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, existing)) => *existing = values,
            None => self.pairs.push((name, values)),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.pairs
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, values)| values.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Encodes as `name=value&name=value`, one pair per value.
    pub fn encode(&self) -> String {
        let mut encoded = String::new();
        for (name, values) in &self.pairs {
            for value in values {
                if !encoded.is_empty() {
                    encoded.push('&');
                }
                encoded.extend(utf8_percent_encode(name, QUERY_COMPONENT));
                encoded.push('=');
                encoded.extend(utf8_percent_encode(value, QUERY_COMPONENT));
            }
        }
        encoded
    }
}

impl<K, V> FromIterator<(K, V)> for Query
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::new(), |query, (name, value)| query.set(name, value))
    }
}

/// Everything needed to perform one request.
///
/// Built with the `with_*` methods; the executor takes it by value and hands
/// it back on the response so callers can see which options produced it.
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    protocol: Protocol,
    host: Option<String>,
    port: Option<u16>,
    method: Method,
    headers: HeaderMap,
    path: Option<String>,
    pathname: Option<String>,
    query: Option<Query>,
    body: Option<Bytes>,
    timeout: Option<Duration>,
    drop_request_after: Option<Duration>,
    timing: bool,
    agent: Option<Agent>,
    tls_config: Option<Arc<rustls::ClientConfig>>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn try_with_header(self, name: &str, value: &str) -> Result<Self> {
        let name = parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        Ok(self.with_header(name, value))
    }

    /// Explicit request target; takes precedence over `pathname` + `query`.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_pathname(mut self, pathname: impl Into<String>) -> Self {
        self.pathname = Some(pathname.into());
        self
    }

    pub fn with_query(mut self, query: Query) -> Self {
        self.query = Some(query);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Idle-socket timeout: fires when no byte moves on the socket for this long.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Absolute deadline measured from the start of the call.
    pub fn with_drop_request_after(mut self, drop_request_after: Duration) -> Self {
        self.drop_request_after = Some(drop_request_after);
        self
    }

    pub fn with_timing(mut self, timing: bool) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_agent(mut self, agent: Agent) -> Self {
        self.agent = Some(agent);
        self
    }

    pub fn with_tls_config(mut self, tls_config: Arc<rustls::ClientConfig>) -> Self {
        self.tls_config = Some(tls_config);
        self
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn host(&self) -> &str {
        self.host.as_deref().unwrap_or(DEFAULT_HOST)
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.protocol.default_port())
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Request target sent on the wire.
    ///
    /// Before [`derive_path`](Self::derive_path) has run this reflects only an
    /// explicitly set path.
    pub fn path(&self) -> &str {
        self.path.as_deref().unwrap_or(DEFAULT_PATH)
    }

    pub fn pathname(&self) -> Option<&str> {
        self.pathname.as_deref()
    }

    pub fn query(&self) -> Option<&Query> {
        self.query.as_ref()
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn drop_request_after(&self) -> Option<Duration> {
        self.drop_request_after
    }

    pub fn timing(&self) -> bool {
        self.timing
    }

    pub fn agent(&self) -> Option<&Agent> {
        self.agent.as_ref()
    }

    pub(crate) fn tls_config(&self) -> Option<&Arc<rustls::ClientConfig>> {
        self.tls_config.as_ref()
    }

    /// Fills `path` from `pathname` and `query` when no explicit path was set.
    ///
    /// A present query is always appended with `?`, even when it encodes to an
    /// empty string.
    pub fn derive_path(&mut self) {
        if self.path.is_some() {
            return;
        }
        let Some(pathname) = &self.pathname else {
            return;
        };
        self.path = Some(match &self.query {
            Some(query) => format!("{pathname}?{}", query.encode()),
            None => pathname.clone(),
        });
    }
}
