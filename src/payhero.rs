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

//! PayHero STK-push adapter.

use crate::GatewayError;
use crate::config::GatewayConfig;
use crate::gateway::{GatewayAcceptance, PaymentGateway, StkPushRequest};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

#[derive(Debug, Serialize)]
struct StkPushPayload<'a> {
    /// Whole shillings.
    amount: u64,
    phone_number: &'a str,
    channel_id: u64,
    provider: &'a str,
    external_reference: &'a str,
    callback_url: &'a str,
}

#[derive(Debug, Deserialize)]
struct StkPushResponse {
    #[serde(rename = "CheckoutRequestID", alias = "checkout_request_id", default)]
    checkout_request_id: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// HTTP client for the PayHero payments API.
pub struct PayHeroGateway {
    client: Client,
    config: GatewayConfig,
    username: String,
    password: String,
    channel_id: u64,
    callback_url: String,
}

impl PayHeroGateway {
    /// Builds the adapter.
    ///
    /// # Errors
    ///
    /// [`GatewayError::NotConfigured`] when credentials, channel or callback
    /// URL are missing.
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let (Some(username), Some(password), Some(channel_id), Some(callback_url)) = (
            config.api_username.clone(),
            config.api_password.clone(),
            config.channel_id,
            config.callback_url.clone(),
        ) else {
            return Err(GatewayError::NotConfigured);
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            config,
            username,
            password,
            channel_id,
            callback_url,
        })
    }
}

#[async_trait]
impl PaymentGateway for PayHeroGateway {
    async fn initiate(&self, request: StkPushRequest) -> Result<GatewayAcceptance, GatewayError> {
        // M-Pesa only charges whole shillings; round up so we never undercharge.
        let amount = request
            .amount
            .ceil()
            .to_u64()
            .filter(|amount| *amount > 0)
            .ok_or_else(|| GatewayError::Rejected("amount must be greater than zero".into()))?;

        let payload = StkPushPayload {
            amount,
            phone_number: &request.phone_number,
            channel_id: self.channel_id,
            provider: &self.config.provider,
            external_reference: &request.reference,
            callback_url: &self.callback_url,
        };
        debug!(reference = %request.reference, amount, "Sending STK push");

        let response = self
            .client
            .post(&self.config.base_url)
            .basic_auth(&self.username, Some(&self.password))
            .json(&payload)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            error!(reference = %request.reference, "PayHero rejected credentials");
            return Err(GatewayError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(reference = %request.reference, %status, body = %body, "PayHero API error");
            return Err(GatewayError::Rejected(format!("{status}: {body}")));
        }

        let body: StkPushResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        let checkout_request_id = body
            .checkout_request_id
            .ok_or_else(|| GatewayError::InvalidResponse("missing CheckoutRequestID".into()))?;

        info!(reference = %request.reference, %checkout_request_id, "STK push accepted");
        Ok(GatewayAcceptance {
            checkout_request_id,
            message: body.message,
        })
    }
}
