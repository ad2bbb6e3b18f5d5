//! hudsucker handler driving the interceptor chain.
//!
//! Each intercepted request becomes a [`Flow`] that is run through the
//! request phase of the chain. What the chain leaves in the response slot
//! decides what happens next:
//!
//! ```text
//! response slot        action
//! ─────────────        ──────────────────────────────────────────────
//! empty                forward the request upstream
//! set, not streaming   answer the client directly (e.g. a 403 block)
//! set, streaming       forward upstream, pass the body through unbuffered
//! ```
//!
//! The flow is kept on the handler until the upstream response arrives, then
//! the response phase of the chain runs with the real status and headers.
//! hudsucker clones the handler for every request, so the stored flow never
//! crosses between requests.

use std::sync::Arc;

use http_body_util::{BodyExt, Full};
use hudsucker::{
    hyper::{header, HeaderMap, Method, Request, Response, StatusCode},
    Body, HttpContext, HttpHandler, RequestOrResponse,
};
use hyper::body::Bytes;

use warpgateway_core::{Flow, FlowRequest, FlowResponse, Headers, InterceptorChain};

/// Helper to convert bytes to Body
fn bytes_to_body(bytes: Bytes) -> Body {
    Body::from(Full::new(bytes))
}

/// Per-request hudsucker handler backed by a shared interceptor chain.
#[derive(Clone)]
pub struct GatewayHandler {
    chain: Arc<InterceptorChain>,
    flow: Option<Flow>,
}

impl std::fmt::Debug for GatewayHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayHandler")
            .field("chain", &self.chain)
            .field("pending_flow", &self.flow.as_ref().map(|f| &f.request.url))
            .finish()
    }
}

impl GatewayHandler {
    /// Creates a handler dispatching to `chain`.
    pub fn new(chain: Arc<InterceptorChain>) -> Self {
        Self { chain, flow: None }
    }

    /// Returns the shared chain.
    pub fn chain(&self) -> &Arc<InterceptorChain> {
        &self.chain
    }

    /// Runs the request phase and decides whether to answer or forward.
    pub async fn process_request(&mut self, req: Request<Body>) -> RequestOrResponse {
        self.flow = None;

        if req.method() == Method::CONNECT {
            return RequestOrResponse::Request(req);
        }

        let url = request_url(&req);
        let (parts, body) = req.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                tracing::warn!("Failed to read request body for {}: {}", url, e);
                return RequestOrResponse::Request(Request::from_parts(parts, Body::empty()));
            }
        };

        let mut request = FlowRequest::new(parts.method.as_str(), url).with_body(body.clone());
        request.headers = headers_to_map(&parts.headers);
        let mut flow = Flow::new(request);

        self.chain.dispatch_request(&mut flow);

        // hudsucker never calls handle_response for an answer we return here,
        // so the response phase runs now.
        if matches!(&flow.response, Some(r) if !r.streaming) {
            self.chain.dispatch_response(&mut flow);
            if let Some(response) = &flow.response {
                return RequestOrResponse::Response(to_hyper_response(response));
            }
        }

        self.flow = Some(flow);
        RequestOrResponse::Request(Request::from_parts(parts, bytes_to_body(body)))
    }

    /// Runs the response phase with the upstream response.
    pub async fn process_response(&mut self, res: Response<Body>) -> Response<Body> {
        let Some(mut flow) = self.flow.take() else {
            return res;
        };

        let streaming = flow.is_streaming();
        let (parts, body) = res.into_parts();

        let mut observed = FlowResponse::new(parts.status.as_u16());
        observed.headers = headers_to_map(&parts.headers);

        let body = if streaming {
            observed.streaming = true;
            observed.declared_length = declared_length(&parts.headers);
            body
        } else {
            match body.collect().await {
                Ok(collected) => {
                    let bytes = collected.to_bytes();
                    observed.body = bytes.clone();
                    bytes_to_body(bytes)
                }
                Err(e) => {
                    tracing::warn!("Failed to read response body for {}: {}", flow.request.url, e);
                    Body::empty()
                }
            }
        };

        flow.response = Some(observed);
        self.chain.dispatch_response(&mut flow);

        Response::from_parts(parts, body)
    }
}

impl HttpHandler for GatewayHandler {
    async fn handle_request(&mut self, _ctx: &HttpContext, req: Request<Body>) -> RequestOrResponse {
        self.process_request(req).await
    }

    async fn handle_response(&mut self, _ctx: &HttpContext, res: Response<Body>) -> Response<Body> {
        self.process_response(res).await
    }
}

/// Reconstructs the absolute URL of a request.
///
/// Origin-form URIs (`/path`) are completed from the `Host` header.
pub fn request_url(req: &Request<Body>) -> String {
    let uri = req.uri();
    if uri.scheme().is_some() && uri.authority().is_some() {
        return uri.to_string();
    }

    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| uri.authority().map(|a| a.as_str()))
        .unwrap_or("localhost");
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    let scheme = uri.scheme_str().unwrap_or("http");

    format!("{scheme}://{host}{path}")
}

/// Copies a header map into the flow representation.
pub fn headers_to_map(headers: &HeaderMap) -> Headers {
    let mut map = Headers::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes());
        warpgateway_core::flow::insert_header(&mut map, name.as_str(), &value);
    }
    map
}

fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Builds the HTTP response for a response synthesized by the chain.
pub fn to_hyper_response(response: &FlowResponse) -> Response<Body> {
    let mut builder = Response::builder().status(response.status);
    for (name, value) in &response.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    match builder.body(bytes_to_body(response.body.clone())) {
        Ok(res) => res,
        Err(e) => {
            tracing::error!("Failed to build synthesized response: {}", e);
            let mut res = Response::new(Body::empty());
            *res.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            res
        }
    }
}
