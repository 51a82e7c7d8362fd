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

//! Mobile-money gateway contract.
//!
//! The engine talks to the gateway through [`PaymentGateway`] for initiation
//! and receives outcomes as [`CallbackPayload`]s. [`SimulatedGateway`] stands
//! in for the real provider in tests, replays and unconfigured deployments.

use crate::{EnrollmentError, GatewayError};
use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

/// Gateway result code that means the payer authorized the charge.
pub const RESULT_CODE_SUCCESS: i64 = 0;

/// STK push initiation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StkPushRequest {
    pub amount: Decimal,
    /// Normalized `254XXXXXXXXX`.
    pub phone_number: String,
    /// Our transaction reference, echoed back in the callback.
    pub reference: String,
}

/// Gateway accepted the request and sent the prompt to the phone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayAcceptance {
    pub checkout_request_id: String,
    pub message: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initiate(&self, request: StkPushRequest) -> Result<GatewayAcceptance, GatewayError>;
}

/// Outcome fields reported by the gateway.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CallbackPayload {
    #[serde(rename = "ExternalReference", default)]
    pub external_reference: Option<String>,
    #[serde(rename = "CheckoutRequestID", default)]
    pub checkout_request_id: Option<String>,
    #[serde(rename = "ResultCode", default)]
    pub result_code: Option<i64>,
    #[serde(rename = "ResultDesc", default)]
    pub result_desc: Option<String>,
    #[serde(rename = "Amount", default)]
    pub amount: Option<f64>,
    #[serde(rename = "MpesaReceiptNumber", default)]
    pub mpesa_receipt_number: Option<String>,
    #[serde(rename = "Phone", default)]
    pub phone: Option<String>,
    #[serde(rename = "Status", default)]
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CallbackEnvelope {
    Wrapped { response: CallbackPayload },
    Flat(CallbackPayload),
}

impl CallbackPayload {
    /// Parses a raw callback body, wrapped in `{status, response}` or flat.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        let envelope: CallbackEnvelope = serde_json::from_str(raw)?;
        Ok(match envelope {
            CallbackEnvelope::Wrapped { response } => response,
            CallbackEnvelope::Flat(payload) => payload,
        })
    }

    pub fn is_success(&self) -> bool {
        self.result_code == Some(RESULT_CODE_SUCCESS)
    }

    /// Reported amount, if present and representable.
    pub fn amount(&self) -> Option<Decimal> {
        self.amount.and_then(|amount| Decimal::try_from(amount).ok())
    }

    /// A callback must identify its payment somehow.
    pub fn has_reference(&self) -> bool {
        self.checkout_request_id.is_some() || self.external_reference.is_some()
    }
}

/// Normalizes a Kenyan MSISDN to `254XXXXXXXXX`.
///
/// Accepts `07…`/`01…`, `254…` and `+254…`, ignoring spaces and punctuation.
pub fn normalize_phone(raw: &str) -> Result<String, EnrollmentError> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();

    let normalized = if let Some(rest) = digits.strip_prefix('0') {
        format!("254{rest}")
    } else if digits.starts_with("254") {
        digits
    } else {
        return Err(EnrollmentError::InvalidPhoneNumber);
    };

    if normalized.len() != 12 {
        return Err(EnrollmentError::InvalidPhoneNumber);
    }
    Ok(normalized)
}

/// In-process gateway that accepts (or rejects) every request immediately.
#[derive(Debug, Default)]
pub struct SimulatedGateway {
    rejection: Option<GatewayError>,
    requests: Mutex<Vec<StkPushRequest>>,
}

impl SimulatedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// A gateway that fails every initiation with `error`.
    pub fn failing(error: GatewayError) -> Self {
        Self {
            rejection: Some(error),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Requests seen so far.
    pub fn requests(&self) -> Vec<StkPushRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    async fn initiate(&self, request: StkPushRequest) -> Result<GatewayAcceptance, GatewayError> {
        self.requests.lock().push(request);
        if let Some(error) = &self.rejection {
            return Err(error.clone());
        }
        Ok(GatewayAcceptance {
            checkout_request_id: format!("ws_CO_{}", Uuid::new_v4().simple()),
            message: Some("Success. Request accepted for processing".to_string()),
        })
    }
}
