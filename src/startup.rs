use axum::{
    http::HeaderValue,
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use color_eyre::eyre::Context;
use hyper::Method;
use tokio::net::TcpListener;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    config::Config,
    utils::state::AppState,
    web::{
        auth::auth,
        handlers::{confirm_unlock, issue_token, token_status, unlock_page},
    },
};

async fn welcome() -> impl IntoResponse {
    "Focus unlock server"
}

async fn health_check() -> impl IntoResponse {
    "OK"
}

pub struct HttpServer {
    listener: TcpListener,
    router: Router,
}

impl HttpServer {
    pub async fn new(config: &Config, state: AppState) -> color_eyre::Result<Self> {
        let router = build_router(state, &config.server.allowed_origins);

        let listener = TcpListener::bind(format!("{}:{}", config.server.host, config.server.port))
            .await
            .wrap_err_with(|| format!("Failed to bind to port {}", config.server.port))?;

        Ok(Self { router, listener })
    }

    pub async fn run(self) -> color_eyre::Result<()> {
        tracing::info!("listening on {}", self.listener.local_addr()?);
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .wrap_err("Failed to start HTTP server")?;
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

/// Full application router. An empty `allowed_origins` allows any origin.
pub fn build_router(state: AppState, allowed_origins: &[String]) -> Router {
    let origins = if allowed_origins.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            allowed_origins
                .iter()
                .filter_map(|origin| HeaderValue::from_str(origin).ok()),
        )
    };
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_origin(origins)
        .allow_headers(Any);

    Router::new()
        .route("/", get(welcome))
        .route("/health", get(health_check))
        .route("/unlock", get(unlock_page).post(confirm_unlock))
        .nest("/tokens", token_routes(state.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
        .layer(cors)
        .with_state(state)
}

fn token_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", post(issue_token))
        .route("/{token}", get(token_status))
        .route_layer(from_fn_with_state(state, auth))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        database::queries::SeaOrmStore,
        models::{ConsumeResponse, IssuedToken, TokenStatus, UnlockToken},
        test_utils::{memory_database, test_app_state, TEST_API_KEY},
        tokens::SystemClock,
        web::auth::API_KEY_HEADER,
    };
    use axum::{
        body::{Body, Bytes},
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use serde::de::DeserializeOwned;
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn router() -> Router {
        let db = memory_database().await.unwrap();
        let state = test_app_state(
            Arc::new(SeaOrmStore::<UnlockToken>::new(db)),
            Arc::new(SystemClock),
            chrono::Duration::minutes(5),
        );
        build_router(state, &[])
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Bytes) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        (status, response.into_body().collect().await.unwrap().to_bytes())
    }

    fn json<T: DeserializeOwned>(body: &[u8]) -> T {
        serde_json::from_slice(body).unwrap()
    }

    #[tokio::test]
    async fn health_check_is_public() {
        let router = router().await;
        let request = Request::get("/health").body(Body::empty()).unwrap();
        let (status, body) = send(&router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"OK");
    }

    #[tokio::test]
    async fn token_routes_require_the_api_key() {
        let router = router().await;
        let request = Request::post("/tokens").body(Body::empty()).unwrap();
        let (status, _) = send(&router, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn issue_poll_and_confirm_over_http() {
        let router = router().await;

        let request = Request::post("/tokens")
            .header(API_KEY_HEADER, TEST_API_KEY)
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&router, request).await;
        assert_eq!(status, StatusCode::CREATED);
        let issued: IssuedToken = json(&body);

        let poll = || {
            Request::get(format!("/tokens/{}", issued.token))
                .header(API_KEY_HEADER, TEST_API_KEY)
                .body(Body::empty())
                .unwrap()
        };
        let (status, body) = send(&router, poll()).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!json::<TokenStatus>(&body).consumed);

        // The second device only holds the link, no key
        let request = Request::post(format!("/unlock?token={}", issued.token))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert!(json::<ConsumeResponse>(&body).outcome.is_success());

        let (_, body) = send(&router, poll()).await;
        assert!(json::<TokenStatus>(&body).consumed);
    }
}
