use std::{
    collections::BTreeMap,
    fmt::Display,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use axum::body::Body;
use config::ApiKeyConfig;
use context::ApiKeyContext;
use http::{Request, Response, StatusCode};
use secrecy::ExposeSecret;
use serde_json::json;
use tower::Layer;

use crate::auth::error::AuthError;

/// Validates the downstream `Authorization: Bearer <key>` header against
/// `[llm.api_keys]` and attaches the matched grants to the request
/// extensions (spec.md §6: "an upstream middleware which attaches apiKey
/// metadata (id, permissions, model restrictions)").
#[derive(Clone)]
pub struct AuthLayer {
    api_keys: Arc<BTreeMap<String, ApiKeyConfig>>,
}

impl AuthLayer {
    pub fn new(api_keys: BTreeMap<String, ApiKeyConfig>) -> Self {
        Self {
            api_keys: Arc::new(api_keys),
        }
    }
}

impl<Service> Layer<Service> for AuthLayer
where
    Service: Send + Clone,
{
    type Service = AuthService<Service>;

    fn layer(&self, next: Service) -> Self::Service {
        AuthService {
            next,
            api_keys: self.api_keys.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AuthService<Service> {
    next: Service,
    api_keys: Arc<BTreeMap<String, ApiKeyConfig>>,
}

impl<Service, ReqBody> tower::Service<Request<ReqBody>> for AuthService<Service>
where
    Service: tower::Service<Request<ReqBody>, Response = Response<Body>> + Send + Clone + 'static,
    Service::Future: Send,
    Service::Error: Display + 'static,
    ReqBody: http_body::Body + Send + 'static,
{
    type Response = Response<Body>;
    type Error = Service::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response<Body>, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.next.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let mut next = self.next.clone();
        let api_keys = self.api_keys.clone();

        Box::pin(async move {
            let (mut parts, body) = req.into_parts();

            let token = parts
                .headers
                .get(http::header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.strip_prefix("Bearer "));

            let Some(token) = token else {
                return Ok(error_response(AuthError::MissingToken));
            };

            let matched = api_keys.iter().find(|(_, key)| key.key.expose_secret() == token);

            let Some((key_id, key_config)) = matched else {
                return Ok(error_response(AuthError::InvalidToken));
            };

            parts.extensions.insert(ApiKeyContext {
                key_id: key_id.clone(),
                permissions: key_config.permissions.clone(),
                model_restrictions: key_config.model_restrictions.clone(),
            });

            next.call(Request::from_parts(parts, body)).await
        })
    }
}

fn error_response(err: AuthError) -> Response<Body> {
    let body = json!({
        "type": "error",
        "error": {
            "type": "authentication_error",
            "message": err.to_string(),
        }
    })
    .to_string();

    Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .header("Content-Type", "application/json")
        .body(Body::from(body))
        .unwrap()
}
