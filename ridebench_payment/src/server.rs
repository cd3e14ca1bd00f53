//! HTTP surface of the payment gateway.
//!
//! ```text
//! POST /payments   Authorization: Bearer <token>, Idempotency-Key: <key>?, {"amount": int}
//!   204                        accepted
//!   400 {"message": ...}       invalid amount, invalid token, bad request
//!   409                        same key still in flight
//!   422                        same key, different payload
//!   500 | 502 | 504            saturated (flaky mode only)
//! GET /payments    Authorization: Bearer <token>
//!   200 [{"amount": int, "status": ...}]
//! ```

use crate::gateway::{PaymentGateway, PaymentOutcome};
use crate::payment::PaymentStatus;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::info;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("server io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Deserialize)]
struct PostPaymentBody {
    amount: i64,
}

#[derive(Debug, Serialize)]
struct PaymentView {
    amount: i64,
    status: PaymentStatus,
}

/// Builds the router over a shared gateway.
pub fn router(gateway: Arc<PaymentGateway>) -> Router {
    Router::new()
        .route("/payments", post(post_payment).get(get_payments))
        .with_state(gateway)
}

/// Serves the gateway on `listener` until `shutdown` resolves.
pub async fn serve<F>(
    listener: TcpListener,
    gateway: Arc<PaymentGateway>,
    shutdown: F,
) -> Result<(), GatewayError>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!(addr = ?listener.local_addr()?, "Payment gateway listening");
    axum::serve(listener, router(gateway))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .filter(|token| !token.is_empty())
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "message": message }))).into_response()
}

async fn post_payment(
    State(gateway): State<Arc<PaymentGateway>>,
    headers: HeaderMap,
    body: Result<Json<PostPaymentBody>, JsonRejection>,
) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return bad_request("missing or malformed authorization header");
    };
    let Ok(Json(body)) = body else {
        return bad_request("request body must be {\"amount\": int}");
    };
    let key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    match gateway.post_payment(key, token, body.amount).await {
        PaymentOutcome::Settled(PaymentStatus::Initial | PaymentStatus::Success) => {
            StatusCode::NO_CONTENT.into_response()
        }
        PaymentOutcome::Settled(PaymentStatus::InvalidAmount) => bad_request("invalid amount"),
        PaymentOutcome::Settled(PaymentStatus::InvalidToken) => bad_request("invalid token"),
        PaymentOutcome::Processing => StatusCode::CONFLICT.into_response(),
        PaymentOutcome::PayloadMismatch => StatusCode::UNPROCESSABLE_ENTITY.into_response(),
        PaymentOutcome::Unavailable(status) => StatusCode::from_u16(status)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            .into_response(),
    }
}

async fn get_payments(
    State(gateway): State<Arc<PaymentGateway>>,
    headers: HeaderMap,
) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return bad_request("missing or malformed authorization header");
    };
    let payments: Vec<PaymentView> = gateway
        .payments_for(token)
        .into_iter()
        .map(|(amount, status)| PaymentView { amount, status })
        .collect();
    Json(payments).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::GatewayConfig;
    use crate::payment::Payment;
    use crate::queue::Verifier;
    use std::time::Duration;
    use tokio::sync::oneshot;

    struct AmountLimit;

    impl Verifier for AmountLimit {
        fn verify(&self, payment: &Payment) -> PaymentStatus {
            match payment.token.as_str() {
                "alice" if payment.amount <= 10_000 => PaymentStatus::Success,
                "alice" => PaymentStatus::InvalidAmount,
                _ => PaymentStatus::InvalidToken,
            }
        }
    }

    async fn start() -> (String, oneshot::Sender<()>) {
        let config = GatewayConfig {
            process_time: Duration::from_millis(1),
            ..Default::default()
        };
        let gateway = Arc::new(PaymentGateway::new(config, Arc::new(AmountLimit)));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(serve(listener, gateway, async {
            let _ = rx.await;
        }));
        (format!("http://{addr}/payments"), tx)
    }

    #[tokio::test]
    async fn test_post_and_list_payments() {
        let (url, _shutdown) = start().await;
        let client = reqwest::Client::new();

        let ok = client
            .post(&url)
            .bearer_auth("alice")
            .header(IDEMPOTENCY_KEY_HEADER, "ride-1")
            .json(&json!({ "amount": 1200 }))
            .send()
            .await
            .unwrap();
        assert_eq!(ok.status(), reqwest::StatusCode::NO_CONTENT);

        let too_much = client
            .post(&url)
            .bearer_auth("alice")
            .json(&json!({ "amount": 20_000 }))
            .send()
            .await
            .unwrap();
        assert_eq!(too_much.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: serde_json::Value = too_much.json().await.unwrap();
        assert_eq!(body["message"], "invalid amount");

        let listed: serde_json::Value = client
            .get(&url)
            .bearer_auth("alice")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(
            listed,
            json!([
                { "amount": 1200, "status": "success" },
                { "amount": 20000, "status": "invalid_amount" },
            ])
        );
    }

    #[tokio::test]
    async fn test_idempotency_key_replay_and_mismatch() {
        let (url, _shutdown) = start().await;
        let client = reqwest::Client::new();
        let send = |amount: i64| {
            client
                .post(&url)
                .bearer_auth("alice")
                .header(IDEMPOTENCY_KEY_HEADER, "ride-7")
                .json(&json!({ "amount": amount }))
                .send()
        };

        assert_eq!(send(800).await.unwrap().status(), reqwest::StatusCode::NO_CONTENT);
        assert_eq!(send(800).await.unwrap().status(), reqwest::StatusCode::NO_CONTENT);
        assert_eq!(
            send(900).await.unwrap().status(),
            reqwest::StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[tokio::test]
    async fn test_rejects_missing_bearer_token() {
        let (url, _shutdown) = start().await;
        let response = reqwest::Client::new()
            .post(&url)
            .json(&json!({ "amount": 100 }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

        let unknown = reqwest::Client::new()
            .post(&url)
            .bearer_auth("mallory")
            .json(&json!({ "amount": 100 }))
            .send()
            .await
            .unwrap();
        let body: serde_json::Value = unknown.json().await.unwrap();
        assert_eq!(body["message"], "invalid token");
    }
}
