// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! PayHero adapter tests against an in-process upstream.

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
};
use course_enrollment_rs::config::GatewayConfig;
use course_enrollment_rs::{GatewayError, PayHeroGateway, PaymentGateway, StkPushRequest};
use parking_lot::Mutex;
use rust_decimal_macros::dec;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::net::TcpListener;

// === Mock Upstream ===

#[derive(Clone)]
struct Upstream {
    reply: (StatusCode, Value),
    seen: Arc<Mutex<Vec<(Option<String>, Value)>>>,
}

async fn stk_push(
    State(upstream): State<Upstream>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    upstream.seen.lock().push((auth, body));
    let (status, reply) = upstream.reply.clone();
    (status, Json(reply)).into_response()
}

/// Starts a mock PayHero endpoint and returns a gateway pointed at it.
async fn start(status: StatusCode, reply: Value) -> (PayHeroGateway, Upstream) {
    let upstream = Upstream {
        reply: (status, reply),
        seen: Arc::new(Mutex::new(Vec::new())),
    };
    let app = Router::new()
        .route("/payments", post(stk_push))
        .with_state(upstream.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let gateway = PayHeroGateway::new(GatewayConfig {
        base_url: format!("http://{addr}/payments"),
        api_username: Some("merchant".into()),
        api_password: Some("s3cret".into()),
        channel_id: Some(911),
        callback_url: Some("https://example.test/api/v1/payments/callback".into()),
        timeout_seconds: 5,
        ..GatewayConfig::default()
    })
    .unwrap();
    (gateway, upstream)
}

fn request(amount: rust_decimal::Decimal) -> StkPushRequest {
    StkPushRequest {
        amount,
        phone_number: "254712345678".into(),
        reference: "MWZ-1A2B3C4D".into(),
    }
}

// === Tests ===

#[tokio::test]
async fn accepted_push_returns_checkout_reference() {
    let (gateway, upstream) = start(
        StatusCode::CREATED,
        json!({ "success": true, "status": "QUEUED", "reference": "E8UWT7CLUW", "CheckoutRequestID": "ws_CO_1234" }),
    )
    .await;

    let acceptance = gateway.initiate(request(dec!(2999.40))).await.unwrap();
    assert_eq!(acceptance.checkout_request_id, "ws_CO_1234");

    let seen = upstream.seen.lock();
    assert_eq!(seen.len(), 1);
    let (auth, body) = &seen[0];
    // base64("merchant:s3cret")
    assert_eq!(auth.as_deref(), Some("Basic bWVyY2hhbnQ6czNjcmV0"));
    assert_eq!(body["amount"], 3000);
    assert_eq!(body["phone_number"], "254712345678");
    assert_eq!(body["channel_id"], 911);
    assert_eq!(body["provider"], "m-pesa");
    assert_eq!(body["external_reference"], "MWZ-1A2B3C4D");
    assert_eq!(
        body["callback_url"],
        "https://example.test/api/v1/payments/callback"
    );
}

#[tokio::test]
async fn unauthorized_is_reported_as_credentials_error() {
    let (gateway, _) = start(StatusCode::UNAUTHORIZED, json!({ "error": "bad auth" })).await;

    assert_eq!(
        gateway.initiate(request(dec!(100))).await.unwrap_err(),
        GatewayError::Unauthorized
    );
}

#[tokio::test]
async fn upstream_error_carries_status_and_body() {
    let (gateway, _) = start(
        StatusCode::BAD_REQUEST,
        json!({ "error_message": "insufficient wallet balance" }),
    )
    .await;

    match gateway.initiate(request(dec!(100))).await.unwrap_err() {
        GatewayError::Rejected(message) => {
            assert!(message.starts_with("400"));
            assert!(message.contains("insufficient wallet balance"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn missing_checkout_reference_is_invalid() {
    let (gateway, _) = start(StatusCode::OK, json!({ "success": true })).await;

    assert!(matches!(
        gateway.initiate(request(dec!(100))).await.unwrap_err(),
        GatewayError::InvalidResponse(_)
    ));
}

#[tokio::test]
async fn zero_amount_never_reaches_upstream() {
    let (gateway, upstream) = start(StatusCode::OK, json!({ "CheckoutRequestID": "x" })).await;

    assert!(matches!(
        gateway.initiate(request(dec!(0))).await.unwrap_err(),
        GatewayError::Rejected(_)
    ));
    assert!(upstream.seen.lock().is_empty());
}

#[test]
fn incomplete_config_is_rejected() {
    assert!(matches!(
        PayHeroGateway::new(GatewayConfig::default()),
        Err(GatewayError::NotConfigured)
    ));
}
