//! Signed REST connector for a perpetuals venue.
//!
//! Request signing is HMAC-SHA256 over the canonical request body; the
//! venue's JSON shapes are decoded into the connector types at this
//! boundary so the rest of the system never sees raw payloads.

use crate::domain::trading::{Order, OrderStatus, Position};
use crate::infrastructure::exchange::{
    Balance, ExchangeConnector, ExchangeOrder, OrderRequest, Ticker,
};
use crate::infrastructure::http_client_factory::HttpClientFactory;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RestExchangeConfig {
    pub exchange_id: String,
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
}

pub struct RestExchange {
    config: RestExchangeConfig,
    /// Retrying client for idempotent reads.
    client: ClientWithMiddleware,
    /// Plain client for order creation, which must be sent exactly once.
    submit_client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct VenueOrder {
    id: String,
    symbol: String,
    status: String,
    #[serde(default)]
    filled_size: Option<Decimal>,
    #[serde(default)]
    average_fill_price: Option<Decimal>,
    #[serde(default)]
    fee: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct VenueTicker {
    symbol: String,
    last: Decimal,
}

#[derive(Debug, Deserialize)]
struct VenueBalance {
    totals: HashMap<String, Decimal>,
}

fn map_status(status: &str) -> OrderStatus {
    match status {
        "open" | "new" | "resting" => OrderStatus::Open,
        "filled" => OrderStatus::Filled,
        "cancelled" | "canceled" => OrderStatus::Cancelled,
        "rejected" => OrderStatus::Rejected,
        _ => OrderStatus::Failed,
    }
}

impl From<VenueOrder> for ExchangeOrder {
    fn from(venue: VenueOrder) -> Self {
        ExchangeOrder {
            id: venue.id,
            symbol: venue.symbol,
            status: map_status(&venue.status),
            filled_size: venue.filled_size.unwrap_or_default(),
            average_fill_price: venue.average_fill_price,
            fee: venue.fee.unwrap_or_default(),
        }
    }
}

impl RestExchange {
    pub fn new(config: RestExchangeConfig) -> Self {
        Self {
            client: HttpClientFactory::create_client(),
            submit_client: HttpClientFactory::create_plain_client(),
            config,
        }
    }

    /// HMAC-SHA256 over the request body, hex encoded.
    fn sign(&self, body: &str) -> String {
        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(self.config.api_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(body.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    async fn signed_get(&self, path: &str) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.config.base_url, path);
        let signature = self.sign(path);
        self.client
            .get(&url)
            .header("X-API-KEY", &self.config.api_key)
            .header("X-SIGNATURE", signature)
            .send()
            .await
            .with_context(|| format!("GET {} failed", path))
    }
}

#[async_trait]
impl ExchangeConnector for RestExchange {
    fn id(&self) -> &str {
        &self.config.exchange_id
    }

    async fn initialize(&self) -> Result<()> {
        let response = self.signed_get("/info/meta").await?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "exchange handshake failed with status {}",
                response.status()
            ));
        }
        info!("Exchange connector initialized: {}", self.config.exchange_id);
        Ok(())
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<ExchangeOrder> {
        let body = json!({
            "symbol": request.symbol,
            "type": request.order_type,
            "side": request.side,
            "amount": request.amount,
            "price": request.price,
            "timeInForce": request.params.time_in_force,
            "stopLoss": request.params.stop_loss,
            "takeProfit": request.params.take_profit,
            "leverage": request.params.leverage,
            "reduceOnly": request.params.reduce_only,
            "clientId": request.params.signal_id,
            "timestamp": chrono::Utc::now().timestamp_millis(),
        })
        .to_string();

        let signature = self.sign(&body);
        let url = format!("{}/orders", self.config.base_url);

        // No retry here: a timed-out create may still have been accepted.
        let response = self
            .submit_client
            .post(&url)
            .header("X-API-KEY", &self.config.api_key)
            .header("X-SIGNATURE", signature)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .context("order submission failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("order rejected ({}): {}", status, text));
        }

        let venue: VenueOrder = response.json().await.context("invalid order response")?;
        Ok(venue.into())
    }

    async fn cancel_order(&self, id: &str, symbol: Option<&str>) -> Result<ExchangeOrder> {
        let body = json!({
            "orderId": id,
            "symbol": symbol,
            "timestamp": chrono::Utc::now().timestamp_millis(),
        })
        .to_string();

        let signature = self.sign(&body);
        let url = format!("{}/orders/cancel", self.config.base_url);
        let response = self
            .submit_client
            .post(&url)
            .header("X-API-KEY", &self.config.api_key)
            .header("X-SIGNATURE", signature)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .context("order cancellation failed")?;

        if !response.status().is_success() {
            return Err(anyhow!("cancel rejected: {}", response.status()));
        }

        let venue: VenueOrder = response.json().await.context("invalid cancel response")?;
        Ok(venue.into())
    }

    async fn fetch_order(&self, id: &str, symbol: Option<&str>) -> Result<ExchangeOrder> {
        let path = match symbol {
            Some(symbol) => format!("/orders/{}?symbol={}", id, symbol),
            None => format!("/orders/{}", id),
        };
        let response = self.signed_get(&path).await?;
        let venue: VenueOrder = response.json().await.context("invalid order response")?;
        Ok(venue.into())
    }

    async fn fetch_open_orders(&self, symbol: Option<&str>) -> Result<Vec<Order>> {
        let path = match symbol {
            Some(symbol) => format!("/orders/open?symbol={}", symbol),
            None => "/orders/open".to_string(),
        };
        let response = self.signed_get(&path).await?;
        response.json().await.context("invalid open-orders response")
    }

    async fn fetch_positions(&self, symbols: Option<&[String]>) -> Result<Vec<Position>> {
        let path = match symbols {
            Some(symbols) if !symbols.is_empty() => {
                format!("/positions?symbols={}", symbols.join(","))
            }
            _ => "/positions".to_string(),
        };
        let response = self.signed_get(&path).await?;
        response.json().await.context("invalid positions response")
    }

    async fn fetch_balance(&self) -> Result<Balance> {
        let response = self.signed_get("/account/balance").await?;
        let venue: VenueBalance = response.json().await.context("invalid balance response")?;
        Ok(Balance {
            totals: venue.totals,
        })
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Option<Ticker>> {
        let path = format!("/info/ticker?symbol={}", symbol);
        let response = self.signed_get(&path).await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            warn!("No ticker for symbol {}", symbol);
            return Ok(None);
        }
        let venue: VenueTicker = response.json().await.context("invalid ticker response")?;
        Ok(Some(Ticker {
            symbol: venue.symbol,
            last: venue.last,
        }))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
