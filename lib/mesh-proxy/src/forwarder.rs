//! Scope-checked forwarding of caller requests to registered services

use crate::path::join_upstream;
use crate::upstream::{RequestForwarder, Upstream};
use crate::{ForwardPolicy, MeshError};
use http_body_util::Full;
use hyper::{body::Bytes, HeaderMap, Method, Request, Response};
use mesh_core::{Scope, ServiceRecord, ServiceRegistry};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Header carrying the calling service's id
pub const CALLER_ID_HEADER: &str = "x-service-id";

/// An inbound request to be proxied to a target service
#[derive(Clone, Debug)]
pub struct ProxyRequest {
    /// Value of the caller-identity header, if one was sent
    pub caller_id: Option<String>,
    pub target_id: String,
    /// Path relative to the target's base url
    pub relative_path: String,
    pub query: Option<String>,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Authorizes caller/target pairs by scope and relays requests between them
pub struct AuthorizedForwarder {
    registry: Arc<ServiceRegistry>,
    upstream: Arc<dyn Upstream>,
    policy: ForwardPolicy,
}

impl AuthorizedForwarder {
    /// Create a forwarder dispatching through a pooled HTTP client
    pub fn new(registry: Arc<ServiceRegistry>, policy: ForwardPolicy) -> Self {
        let upstream = Arc::new(RequestForwarder::new(&policy));
        Self::with_upstream(registry, upstream, policy)
    }

    pub fn with_upstream(
        registry: Arc<ServiceRegistry>,
        upstream: Arc<dyn Upstream>,
        policy: ForwardPolicy,
    ) -> Self {
        Self {
            registry,
            upstream,
            policy,
        }
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn policy(&self) -> &ForwardPolicy {
        &self.policy
    }

    /// Resolve and scope-check the caller and the target.
    ///
    /// Returns a snapshot of the target record on success. Scopes are read
    /// fresh from the registry on every call.
    pub async fn authorize(
        &self,
        caller_id: Option<&str>,
        target_id: &str,
    ) -> Result<ServiceRecord, MeshError> {
        let result = self.resolve(caller_id, target_id).await;
        if let Err(e) = &result {
            info!(
                caller = caller_id.unwrap_or("-"),
                target = %target_id,
                reason = e.reason(),
                "Rejected proxied request"
            );
        }
        result
    }

    async fn resolve(
        &self,
        caller_id: Option<&str>,
        target_id: &str,
    ) -> Result<ServiceRecord, MeshError> {
        let caller_id = caller_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| MeshError::Unauthorized("missing caller identity".to_string()))?;

        let caller = self.registry.lookup(caller_id).await.map_err(|_| {
            MeshError::Unauthorized(format!("unknown caller identity: {}", caller_id))
        })?;
        debug!(caller = %caller.id, "Caller resolved");

        if !caller.has_scope(Scope::Request) {
            return Err(MeshError::Forbidden {
                id: caller.id,
                missing: Scope::Request,
            });
        }

        let target = self
            .registry
            .lookup(target_id)
            .await
            .map_err(|_| MeshError::NotFound(target_id.to_string()))?;
        debug!(caller = %caller.id, target = %target.id, "Target resolved");

        if !target.has_scope(Scope::Receive) {
            return Err(MeshError::Forbidden {
                id: target.id,
                missing: Scope::Receive,
            });
        }

        Ok(target)
    }

    /// Authorize, dispatch to the target and relay its response.
    ///
    /// Any upstream status is a successful relay. Only a failure to get a
    /// response at all becomes `MeshError::BadGateway`.
    pub async fn forward(&self, request: ProxyRequest) -> Result<Response<Bytes>, MeshError> {
        let target = self
            .authorize(request.caller_id.as_deref(), &request.target_id)
            .await?;
        self.relay(&target, request).await
    }

    /// Dispatch `request` to an already authorized target
    pub async fn relay(
        &self,
        target: &ServiceRecord,
        request: ProxyRequest,
    ) -> Result<Response<Bytes>, MeshError> {
        let ProxyRequest {
            relative_path,
            query,
            method,
            mut headers,
            body,
            ..
        } = request;

        let uri = join_upstream(&target.url, &relative_path, query.as_deref())?;

        if !self.policy.forward_caller_header {
            headers.remove(CALLER_ID_HEADER);
        }

        let mut upstream_request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Full::new(body))
            .map_err(|e| MeshError::Validation(e.to_string()))?;
        *upstream_request.headers_mut() = headers;

        debug!(
            target = %target.id,
            "Forwarding {} {}",
            upstream_request.method(),
            upstream_request.uri()
        );

        match self.upstream.dispatch(upstream_request).await {
            Ok(response) => {
                debug!(
                    target = %target.id,
                    status = %response.status(),
                    "Relaying upstream response"
                );
                Ok(response)
            }
            Err(e) => {
                warn!(target = %target.id, "Upstream dispatch failed: {}", e);
                Err(MeshError::BadGateway(e.to_string()))
            }
        }
    }
}
