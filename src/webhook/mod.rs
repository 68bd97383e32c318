//! HTTP boundary — webhook intake, subscription verification, health.
//!
//! The POST handler acknowledges verified deliveries immediately and
//! dispatches in a spawned task: the transport retries slow or non-2xx
//! acks, and the dedupe ledger (not the HTTP status) is what makes
//! redelivery safe.

pub mod event;
pub mod signature;

use std::collections::HashMap;
use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::router::EventRouter;
use crate::store::Database;
use crate::webhook::event::parse_payload;
use crate::webhook::signature::{SIGNATURE_HEADER, verify_signature};

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Arc<dyn Database>,
    pub router: Arc<EventRouter>,
}

/// Build the HTTP router.
pub fn build_router(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/webhook", get(verify_subscription).post(receive_event))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Subscription verification handshake: echo the challenge when the mode
/// and token match, 403 otherwise.
async fn verify_subscription(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let mode_ok = params.get("hub.mode").map(String::as_str) == Some("subscribe");
    let token_ok = params.get("hub.verify_token") == Some(&state.config.verify_token);

    if mode_ok && token_ok {
        info!("Webhook subscription verified");
        params
            .get("hub.challenge")
            .cloned()
            .unwrap_or_default()
            .into_response()
    } else {
        warn!("Webhook subscription verification failed");
        StatusCode::FORBIDDEN.into_response()
    }
}

async fn receive_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let header = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    if let Err(e) = verify_signature(&state.config.app_secret, header, &body) {
        warn!("Webhook delivery rejected: {e}");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    match parse_payload(&body) {
        Ok(Some(event)) => {
            let router = state.router.clone();
            tokio::spawn(async move {
                router.dispatch(event).await;
            });
        }
        Ok(None) => {}
        Err(e) => warn!("Unparsable webhook payload: {e}"),
    }

    (StatusCode::OK, Json(json!({ "status": "received" }))).into_response()
}

async fn health(State(state): State<AppState>) -> Response {
    match state.db.list_active_clients().await {
        Ok(clients) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "active_clients": clients.len() })),
        )
            .into_response(),
        Err(e) => {
            warn!("Health check database query failed: {e}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "degraded" })),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Deps;
    use crate::error::{GeneratorError, ListingError, SiteError, TransportError};
    use crate::services::generator::BusinessContext;
    use crate::services::listing::{RemoteReview, WeeklyMetrics};
    use crate::services::transport::{Button, ListSection};
    use crate::services::{ChatTransport, DraftGenerator, ListingClient, SitePublisher};
    use crate::store::LibSqlBackend;
    use crate::store::model::{Client, ItemKind};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::{DateTime, Utc};
    use hmac::Mac;
    use secrecy::SecretString;
    use tower::ServiceExt;

    struct NullChat;

    #[async_trait]
    impl ChatTransport for NullChat {
        async fn send_text(&self, _: &str, _: &str) -> Result<(), TransportError> {
            Ok(())
        }
        async fn send_buttons(&self, _: &str, _: &str, _: &[Button]) -> Result<(), TransportError> {
            Ok(())
        }
        async fn send_list(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: &[ListSection],
        ) -> Result<(), TransportError> {
            Ok(())
        }
        async fn send_template(&self, _: &str, _: &str, _: &[String]) -> Result<(), TransportError> {
            Ok(())
        }
        async fn download_media(&self, _: &str) -> Result<Vec<u8>, TransportError> {
            Err(TransportError::Media("not available".to_string()))
        }
    }

    struct NullListing;

    #[async_trait]
    impl ListingClient for NullListing {
        async fn publish_text(&self, _: &Client, _: &str) -> Result<String, ListingError> {
            Ok("localPosts/1".to_string())
        }
        async fn publish_offer(
            &self,
            _: &Client,
            _: &str,
            _: DateTime<Utc>,
            _: &str,
        ) -> Result<String, ListingError> {
            Ok("localPosts/2".to_string())
        }
        async fn publish_photo(
            &self,
            _: &Client,
            _: Vec<u8>,
            _: &str,
        ) -> Result<String, ListingError> {
            Ok("media/1".to_string())
        }
        async fn fetch_reviews(
            &self,
            _: &Client,
            _: DateTime<Utc>,
        ) -> Result<Vec<RemoteReview>, ListingError> {
            Ok(vec![])
        }
        async fn reply_to_review(&self, _: &Client, _: &str, _: &str) -> Result<(), ListingError> {
            Ok(())
        }
        async fn fetch_metrics(
            &self,
            _: &Client,
            _: DateTime<Utc>,
            _: DateTime<Utc>,
        ) -> Result<WeeklyMetrics, ListingError> {
            Ok(WeeklyMetrics::default())
        }
    }

    struct NullGenerator;

    #[async_trait]
    impl DraftGenerator for NullGenerator {
        async fn draft_post(&self, _: &BusinessContext, _: &str) -> Result<String, GeneratorError> {
            Ok("draft".to_string())
        }
        async fn draft_offer(&self, _: &BusinessContext, _: &str) -> Result<String, GeneratorError> {
            Ok("offer draft".to_string())
        }
        async fn revise_draft(
            &self,
            _: &BusinessContext,
            _: ItemKind,
            _: &str,
            _: &str,
        ) -> Result<String, GeneratorError> {
            Ok("revised".to_string())
        }
        async fn suggest_review_reply(
            &self,
            _: &BusinessContext,
            _: &str,
            _: u8,
            _: &str,
        ) -> Result<String, GeneratorError> {
            Ok("thanks".to_string())
        }
        async fn polish_caption(
            &self,
            _: &BusinessContext,
            _: &str,
        ) -> Result<String, GeneratorError> {
            Ok("caption".to_string())
        }
    }

    struct NullSite;

    #[async_trait]
    impl SitePublisher for NullSite {
        async fn commit_file(
            &self,
            client: &Client,
            _: &str,
            _: &[u8],
            _: &str,
        ) -> Result<String, SiteError> {
            Err(SiteError::NotConfigured {
                client_id: client.id,
            })
        }
    }

    fn test_config() -> Config {
        Config {
            port: 0,
            db_path: ":memory:".to_string(),
            verify_token: "verify-me".to_string(),
            app_secret: SecretString::from("app-secret"),
            access_token: SecretString::from("token"),
            phone_id: "123".to_string(),
            anthropic_api_key: SecretString::from("key"),
            model: "claude-sonnet-4-20250514".to_string(),
            chat_api_base: "http://127.0.0.1:1".to_string(),
            listing_api_base: "http://127.0.0.1:1".to_string(),
            metrics_api_base: "http://127.0.0.1:1".to_string(),
            listing_token: SecretString::from("token"),
            site_api_base: "http://127.0.0.1:1".to_string(),
            site_token: None,
            review_expiry_hours: 48,
            review_lookback_minutes: 30,
            offer_duration_days: 14,
            digest_utc_offset_hours: 0,
            image_max_width: 1920,
            image_jpeg_quality: 80,
            image_max_bytes: 20 * 1024 * 1024,
        }
    }

    async fn test_state() -> AppState {
        let config = Arc::new(test_config());
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let deps = Deps {
            db: db.clone(),
            chat: Arc::new(NullChat),
            listing: Arc::new(NullListing),
            generator: Arc::new(NullGenerator),
            site: Arc::new(NullSite),
            config: config.clone(),
        };
        AppState {
            config,
            db,
            router: Arc::new(EventRouter::new(deps)),
        }
    }

    fn sign(body: &[u8]) -> String {
        let mut mac =
            hmac::Hmac::<sha2::Sha256>::new_from_slice(b"app-secret").unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[tokio::test]
    async fn subscription_verification_echoes_challenge() {
        let app = build_router(test_state().await);
        let response = app
            .oneshot(
                Request::get(
                    "/webhook?hub.mode=subscribe&hub.verify_token=verify-me&hub.challenge=1234",
                )
                .body(Body::empty())
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"1234");
    }

    #[tokio::test]
    async fn subscription_verification_rejects_bad_token() {
        let app = build_router(test_state().await);
        let response = app
            .oneshot(
                Request::get("/webhook?hub.mode=subscribe&hub.verify_token=wrong&hub.challenge=1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn unsigned_delivery_is_unauthorized() {
        let app = build_router(test_state().await);
        let response = app
            .oneshot(
                Request::post("/webhook")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"entry":[]}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn signed_delivery_is_acknowledged() {
        let app = build_router(test_state().await);
        let body = br#"{"entry":[{"changes":[{"value":{"statuses":[{"id":"wamid.1"}]}}]}]}"#;
        let response = app
            .oneshot(
                Request::post("/webhook")
                    .header("content-type", "application/json")
                    .header(SIGNATURE_HEADER, sign(body))
                    .body(Body::from(&body[..]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let app = build_router(test_state().await);
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
