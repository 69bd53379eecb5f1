//! HTTP surface of the mesh: registration, lookup and proxied requests

use crate::error::json_response;
use crate::{AuthorizedForwarder, MeshError, ProxyRequest, CALLER_ID_HEADER};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Bytes};
use hyper::{Method, Request, Response, StatusCode};
use mesh_core::ServiceRegistry;
use percent_encoding::percent_decode_str;
use serde::Deserialize;
use serde_json::json;
use std::error::Error as StdError;
use std::sync::Arc;
use tracing::{debug, info};

type BoxError = Box<dyn StdError + Send + Sync>;

/// Registration payload; fields are optional so missing ones map to a 400
#[derive(Deserialize)]
struct RegisterRequest {
    id: Option<String>,
    url: Option<String>,
    scopes: Option<Vec<String>>,
}

/// Request handler shared by every connection
pub struct MeshService {
    forwarder: Arc<AuthorizedForwarder>,
}

impl MeshService {
    pub fn new(forwarder: Arc<AuthorizedForwarder>) -> Self {
        Self { forwarder }
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        self.forwarder.registry()
    }

    /// Route a request and always produce a response
    pub async fn handle<B>(&self, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<BoxError>,
    {
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        debug!("{} {}", method, path);

        let result = if let Some(rest) = path.strip_prefix("/request/") {
            self.handle_forward(req, rest).await
        } else if let Some(id) = path.strip_prefix("/get/") {
            match method {
                Method::GET => match decode_id(id) {
                    Ok(id) => self.handle_lookup(&id).await,
                    Err(e) => Err(e),
                },
                _ => Ok(method_not_allowed()),
            }
        } else {
            match path.as_str() {
                "/register" => match method {
                    Method::POST => self.handle_register(req).await,
                    _ => Ok(method_not_allowed()),
                },
                "/" if method == Method::GET => Ok(json_response(
                    StatusCode::OK,
                    &json!({ "message": "hello world" }),
                )),
                "/healthz" => Ok(Response::new(Full::new(Bytes::from("OK\n")))),
                _ => Err(MeshError::NotFound(path.clone())),
            }
        };

        let response = result.unwrap_or_else(MeshError::into_response);
        debug!("{} {} -> {}", method, path, response.status());
        response
    }

    async fn handle_register<B>(
        &self,
        req: Request<B>,
    ) -> Result<Response<Full<Bytes>>, MeshError>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<BoxError>,
    {
        let body = collect_body(req.into_body(), self.max_body_bytes()).await?;
        let payload: RegisterRequest = serde_json::from_slice(&body)
            .map_err(|e| MeshError::Validation(format!("invalid JSON body: {}", e)))?;

        let id = payload
            .id
            .ok_or_else(|| MeshError::Validation("missing field: id".to_string()))?;
        let url = payload
            .url
            .ok_or_else(|| MeshError::Validation("missing field: url".to_string()))?;
        let scopes = payload
            .scopes
            .ok_or_else(|| MeshError::Validation("missing field: scopes".to_string()))?;

        let id = self.registry().register_raw(&id, &url, &scopes).await?;
        info!(service_id = %id, url = %url, scopes = ?scopes, "Service registered");

        Ok(json_response(
            StatusCode::CREATED,
            &json!({ "message": "Service registered successfully", "id": id }),
        ))
    }

    async fn handle_lookup(&self, id: &str) -> Result<Response<Full<Bytes>>, MeshError> {
        let record = self.registry().lookup(id).await?;
        Ok(json_response(StatusCode::OK, &record))
    }

    async fn handle_forward<B>(
        &self,
        req: Request<B>,
        rest: &str,
    ) -> Result<Response<Full<Bytes>>, MeshError>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<BoxError>,
    {
        if !is_forwardable(req.method()) {
            return Ok(method_not_allowed());
        }

        let (target_id, relative_path) = rest.split_once('/').unwrap_or((rest, ""));
        if target_id.is_empty() {
            return Err(MeshError::NotFound("missing target service id".to_string()));
        }
        let target_id = decode_id(target_id)?;

        let caller_id = req
            .headers()
            .get(CALLER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let query = req.uri().query().map(str::to_string);

        // Reject unknown or unscoped callers before reading any of the body
        let target = self
            .forwarder
            .authorize(caller_id.as_deref(), &target_id)
            .await?;

        let (parts, body) = req.into_parts();
        let body = collect_body(body, self.max_body_bytes()).await?;

        let response = self
            .forwarder
            .relay(
                &target,
                ProxyRequest {
                    caller_id,
                    target_id,
                    relative_path: relative_path.to_string(),
                    query,
                    method: parts.method,
                    headers: parts.headers,
                    body,
                },
            )
            .await?;

        Ok(response.map(Full::new))
    }

    fn max_body_bytes(&self) -> usize {
        self.forwarder.policy().max_body_bytes
    }
}

/// Percent-decode a service id taken from a path segment
fn decode_id(raw: &str) -> Result<String, MeshError> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|id| id.into_owned())
        .map_err(|_| MeshError::Validation(format!("service id is not valid UTF-8: {}", raw)))
}

fn is_forwardable(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET
            | Method::POST
            | Method::PUT
            | Method::DELETE
            | Method::PATCH
            | Method::HEAD
            | Method::OPTIONS
    )
}

fn method_not_allowed() -> Response<Full<Bytes>> {
    json_response(
        StatusCode::METHOD_NOT_ALLOWED,
        &json!({ "error": "method_not_allowed", "message": "Method not allowed" }),
    )
}

/// Collect the entire request body into Bytes, refusing more than `limit` bytes
async fn collect_body<B>(body: B, limit: usize) -> Result<Bytes, MeshError>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            Err(MeshError::PayloadTooLarge(limit))
        }
        Err(e) => Err(MeshError::Validation(format!(
            "failed to read request body: {}",
            e
        ))),
    }
}
