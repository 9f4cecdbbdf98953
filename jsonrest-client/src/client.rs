//! JSON REST client and per-exchange request builder.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{ACCEPT, CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode, Uri};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{Instrument, debug, debug_span};
use url::Url;

use crate::ClientError;
use crate::builder::ClientBuilder;
use crate::context::{CallContext, TraceHandle};
use crate::error::ApiError;
use crate::interceptor::{Layer, RoundTripFn};
use crate::transport::{HttpRequest, HttpResponse};

/// Value forced onto `Accept` and `Content-Type` of every request.
pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// A JSON REST client bound to one base address.
///
/// The client is immutable once built: every exchange starts from a fresh
/// [`RequestBuilder`] which the exchange consumes, so a client can be shared
/// across tasks and reused for unrelated calls. Cloning is cheap.
///
/// # Example
///
/// ```ignore
/// use jsonrest_client::{CallContext, Client};
///
/// let client = Client::builder("example.com").debug().build()?;
///
/// let user: User = client
///     .get("/api/v1/users/42")
///     .send_json(&CallContext::new())
///     .await?;
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    base_url: String,
    default_headers: HeaderMap,
    timeout: Duration,
    layers: Vec<Layer>,
    round_trip: RoundTripFn,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.inner.base_url)
            .field("default_headers", &self.inner.default_headers)
            .field("timeout", &self.inner.timeout)
            .field("layers", &self.inner.layers)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Create a builder for a client of `base_url`.
    pub fn builder<S: Into<String>>(base_url: S) -> ClientBuilder {
        ClientBuilder::new(base_url)
    }

    pub(crate) fn from_parts(
        base_url: String,
        default_headers: HeaderMap,
        timeout: Duration,
        layers: Vec<Layer>,
        round_trip: RoundTripFn,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                base_url,
                default_headers,
                timeout,
                layers,
                round_trip,
            }),
        }
    }

    /// The base address as configured.
    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// Headers sent with every exchange.
    pub fn default_headers(&self) -> &HeaderMap {
        &self.inner.default_headers
    }

    /// The client-wide request timeout.
    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// The interceptor layers in effect, outermost first.
    pub fn layers(&self) -> &[Layer] {
        &self.inner.layers
    }

    /// Start an exchange with the given method.
    ///
    /// The method is only validated when the exchange runs.
    pub fn verb<M: AsRef<str>>(&self, method: M) -> RequestBuilder<'_> {
        RequestBuilder::new(self, method.as_ref())
    }

    pub fn get<P: Into<String>>(&self, path: P) -> RequestBuilder<'_> {
        self.verb(Method::GET).path(path)
    }

    pub fn post<P: Into<String>>(&self, path: P) -> RequestBuilder<'_> {
        self.verb(Method::POST).path(path)
    }

    pub fn put<P: Into<String>>(&self, path: P) -> RequestBuilder<'_> {
        self.verb(Method::PUT).path(path)
    }

    pub fn patch<P: Into<String>>(&self, path: P) -> RequestBuilder<'_> {
        self.verb(Method::PATCH).path(path)
    }

    pub fn delete<P: Into<String>>(&self, path: P) -> RequestBuilder<'_> {
        self.verb(Method::DELETE).path(path)
    }
}

/// Pending state of one exchange.
///
/// Setters never fail. A header that cannot be parsed or a body that cannot
/// be encoded is reported when the exchange runs, before any I/O.
#[derive(Debug)]
pub struct RequestBuilder<'a> {
    client: &'a Client,
    method: String,
    path: String,
    query: String,
    headers: HeaderMap,
    body: Result<Bytes, ClientError>,
    invalid_header: Option<ClientError>,
}

impl<'a> RequestBuilder<'a> {
    fn new(client: &'a Client, method: &str) -> Self {
        Self {
            client,
            method: method.to_owned(),
            path: String::new(),
            query: String::new(),
            headers: HeaderMap::new(),
            body: Ok(Bytes::new()),
            invalid_header: None,
        }
    }

    /// Set the method.
    pub fn method<M: AsRef<str>>(mut self, method: M) -> Self {
        self.method = method.as_ref().to_owned();
        self
    }

    /// Set the path, resolved against the client's base address.
    pub fn path<P: Into<String>>(mut self, path: P) -> Self {
        self.path = path.into();
        self
    }

    /// Set the query string from keys mapped to one or more values.
    ///
    /// Keys are sorted and repeated values are emitted as `k=v1&k=v2`.
    /// Replaces any query set earlier.
    ///
    /// ```ignore
    /// client.get("/search").query([("q", vec!["rust"]), ("page", vec!["2"])]);
    /// ```
    pub fn query<I, K, V, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut sorted: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (key, values) in params {
            sorted
                .entry(key.into())
                .or_default()
                .extend(values.into_iter().map(Into::into));
        }
        self.query = encode_query(&sorted);
        self
    }

    /// Merge `headers` into the pending headers.
    ///
    /// Every key present in `headers` replaces all values previously held
    /// under that key. Other keys are kept.
    ///
    /// Names are case-insensitive: `HeaderMap` stores them lowercased, so
    /// `X-Id` and `x-id` are the same key.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        merge_headers(&mut self.headers, headers);
        self
    }

    /// Set a single header, replacing previous values under the same name.
    pub fn header<K, V>(mut self, key: K, value: V) -> Self
    where
        HeaderName: TryFrom<K>,
        <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
        HeaderValue: TryFrom<V>,
        <HeaderValue as TryFrom<V>>::Error: Into<http::Error>,
    {
        if self.invalid_header.is_some() {
            return self;
        }
        let name: Result<HeaderName, http::Error> = HeaderName::try_from(key).map_err(Into::into);
        let value: Result<HeaderValue, http::Error> = HeaderValue::try_from(value).map_err(Into::into);
        match name.and_then(|name| value.map(|value| (name, value))) {
            Ok((name, value)) => {
                self.headers.insert(name, value);
            }
            Err(err) => {
                self.invalid_header = Some(ClientError::InvalidRequest(format!("invalid header: {err}")));
            }
        }
        self
    }

    /// Encode `body` as the JSON request body.
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Self {
        self.body = serde_json::to_vec(body)
            .map(Bytes::from)
            .map_err(|e| ClientError::Encode(e.to_string()));
        self
    }

    /// Clear every pending field, including the method.
    pub fn reset(mut self) -> Self {
        self.method.clear();
        self.path.clear();
        self.query.clear();
        self.headers.clear();
        self.body = Ok(Bytes::new());
        self.invalid_header = None;
        self
    }

    /// Run the exchange, decoding the response into the supplied targets.
    ///
    /// A status in `[200, 400)` is a success: the first JSON value of the
    /// body is decoded into `success` when given, and the body is discarded
    /// otherwise. Any other status returns [`ClientError::Api`] carrying the
    /// status and raw body. When `failure` is given, the whole body is
    /// decoded into it first; if that decode fails the target is left as it
    /// was and the error message is attached to the `ApiError`.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let mut created = Order::default();
    /// let mut problem = Problem::default();
    /// client
    ///     .post("/api/v1/orders")
    ///     .json(&new_order)
    ///     .execute(&ctx, Some(&mut created), Some(&mut problem))
    ///     .await?;
    /// ```
    pub async fn execute<S, F>(
        self,
        ctx: &CallContext,
        success: Option<&mut S>,
        failure: Option<&mut F>,
    ) -> Result<(), ClientError>
    where
        S: DeserializeOwned,
        F: DeserializeOwned,
    {
        let response = self.round_trip(ctx).await?;
        let status = response.status();
        let body = response.into_body();

        if is_success(status) {
            if let Some(target) = success {
                *target = decode_first(&body)?;
            }
            return Ok(());
        }

        let mut api = ApiError::new(status, body);
        if let Some(target) = failure {
            match serde_json::from_slice::<F>(api.body()) {
                Ok(value) => *target = value,
                Err(err) => api = api.with_message(err.to_string()),
            }
        }
        Err(ClientError::Api(api))
    }

    /// Run the exchange and discard any success body.
    pub async fn send(self, ctx: &CallContext) -> Result<(), ClientError> {
        self.execute::<serde::de::IgnoredAny, serde::de::IgnoredAny>(ctx, None, None)
            .await
    }

    /// Run the exchange and decode the success body.
    pub async fn send_json<T: DeserializeOwned>(self, ctx: &CallContext) -> Result<T, ClientError> {
        let response = self.round_trip(ctx).await?;
        let status = response.status();
        if !is_success(status) {
            return Err(ClientError::Api(ApiError::new(status, response.into_body())));
        }
        decode_first(response.body())
    }

    async fn round_trip(self, ctx: &CallContext) -> Result<HttpResponse, ClientError> {
        let client = self.client;
        let request = self.into_http_request(ctx)?;

        let span = debug_span!(
            "http.exchange",
            method = %request.method(),
            url = %request.uri(),
        );
        let timeout = client.inner.timeout;
        let round_trip = client.inner.round_trip.clone();

        ctx.run(async move {
            let response = tokio::time::timeout(timeout, round_trip(request))
                .await
                .map_err(|_| ClientError::Timeout(timeout))??;
            debug!(status = response.status().as_u16(), "exchange completed");
            Ok::<_, ClientError>(response)
        })
        .instrument(span)
        .await
    }

    fn into_http_request(self, ctx: &CallContext) -> Result<HttpRequest, ClientError> {
        let body = self.body?;
        if let Some(err) = self.invalid_header {
            return Err(err);
        }

        let url = resolve_url(&self.client.inner.base_url, &self.path, &self.query)?;
        let uri: Uri = url
            .as_str()
            .parse()
            .map_err(|e| ClientError::InvalidRequest(format!("invalid url {url}: {e}")))?;
        let method = Method::from_bytes(self.method.as_bytes())
            .map_err(|_| ClientError::InvalidRequest(format!("invalid method {:?}", self.method)))?;

        let mut headers = self.client.inner.default_headers.clone();
        merge_headers(&mut headers, self.headers);
        headers.insert(ACCEPT, HeaderValue::from_static(JSON_CONTENT_TYPE));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));

        let mut request = HttpRequest::new(body);
        *request.method_mut() = method;
        *request.uri_mut() = uri;
        *request.headers_mut() = headers;
        if let Some(span) = ctx.span() {
            request.extensions_mut().insert(TraceHandle(span.clone()));
        }
        Ok(request)
    }
}

fn is_success(status: StatusCode) -> bool {
    (200..400).contains(&status.as_u16())
}

/// Decode the first JSON value of `body`; anything after it is ignored.
fn decode_first<T: DeserializeOwned>(body: &[u8]) -> Result<T, ClientError> {
    match serde_json::Deserializer::from_slice(body).into_iter::<T>().next() {
        Some(Ok(value)) => Ok(value),
        Some(Err(err)) => Err(ClientError::Decode(err.to_string())),
        None => Err(ClientError::Decode("empty response body".into())),
    }
}

fn encode_query(params: &BTreeMap<String, Vec<String>>) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, values) in params {
        for value in values {
            serializer.append_pair(key, value);
        }
    }
    serializer.finish()
}

/// Every key in `src` replaces all values held under it in `dst`.
fn merge_headers(dst: &mut HeaderMap, src: HeaderMap) {
    let mut current: Option<HeaderName> = None;
    for (name, value) in src {
        match name {
            Some(name) => {
                dst.insert(name.clone(), value);
                current = Some(name);
            }
            // further values of the previous name
            None => {
                if let Some(name) = &current {
                    dst.append(name.clone(), value);
                }
            }
        }
    }
}

/// Combine the scheme and authority of `base` with `path` and `query`.
fn resolve_url(base: &str, path: &str, query: &str) -> Result<Url, ClientError> {
    let base = if base.contains("://") {
        base.to_owned()
    } else {
        format!("http://{base}")
    };
    let mut url =
        Url::parse(&base).map_err(|e| ClientError::InvalidRequest(format!("invalid base url {base:?}: {e}")))?;
    if url.cannot_be_a_base() || url.host().is_none() {
        return Err(ClientError::InvalidRequest(format!("base url {base:?} has no host")));
    }

    // credentials of the base address are not part of scheme + authority.
    // Both setters only fail for a cannot-be-a-base url, rejected above.
    let _ = url.set_username("");
    let _ = url.set_password(None);
    url.set_fragment(None);
    url.set_path(path);
    url.set_query((!query.is_empty()).then_some(query));
    Ok(url)
}
