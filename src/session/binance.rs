use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

use crate::order::{Order, OrderStatus};
use crate::primitives::RateLimiter;

use super::{CancelResult, FetchBalancesResult, FetchPairResult, FetchStatusResult, PlaceResult, VenueSession};

type HmacSha256 = Hmac<Sha256>;

/// HTTP/HMAC venue adapter grounded on the original bot's
/// `BitfinexHttpTransport` (request signing, custom auth headers, a
/// `post`-then-`handle_response` shape), generalized to Binance's REST
/// conventions (HMAC-SHA256 query-string signing via `X-MBX-APIKEY` +
/// `signature` query param, rather than a base64 JSON payload).
pub struct BinanceSession {
    name: String,
    base_url: String,
    api_key: String,
    api_secret: String,
    http: reqwest::Client,
    limiter: RateLimiter,
}

impl BinanceSession {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        rate_limit: u32,
        rate_limit_period: std::time::Duration,
    ) -> Self {
        BinanceSession {
            name: name.into(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            http: reqwest::Client::new(),
            limiter: RateLimiter::new(rate_limit as usize, rate_limit_period),
        }
    }

    fn sign(&self, query: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC accepts a key of any length");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn timestamp_ms() -> u128 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before epoch")
            .as_millis()
    }

    /// Build a signed query string for a private endpoint, following the
    /// same "serialize params, sign, append signature" shape as
    /// `BitfinexHttpTransport.request`.
    fn signed_query(&self, mut params: Vec<(String, String)>) -> String {
        params.push(("timestamp".into(), Self::timestamp_ms().to_string()));
        let query = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        let signature = self.sign(&query);
        format!("{query}&signature={signature}")
    }

    async fn post_signed(&self, path: &str, params: Vec<(String, String)>) -> Result<Value, String> {
        self.limiter.acquire().await;
        let query = self.signed_query(params);
        let url = format!("{}{}?{}", self.base_url, path, query);
        let response = self
            .http
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        response.json::<Value>().await.map_err(|e| e.to_string())
    }
}

#[async_trait]
impl VenueSession for BinanceSession {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_balances(&self) -> FetchBalancesResult {
        match self.post_signed("/api/v3/account", vec![]).await {
            Ok(response) => {
                let balances = response["balances"]
                    .as_array()
                    .map(|entries| {
                        entries
                            .iter()
                            .filter_map(|entry| {
                                let asset = entry["asset"].as_str()?.to_uppercase();
                                let free: f64 = entry["free"].as_str()?.parse().ok()?;
                                Some((asset, free))
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                FetchBalancesResult {
                    success: true,
                    balances,
                    response: response.to_string(),
                }
            }
            Err(err) => FetchBalancesResult {
                success: false,
                balances: Default::default(),
                response: err,
            },
        }
    }

    async fn fetch_pair(&self, pair: &str, pair_limit: f64) -> FetchPairResult {
        self.limiter.acquire().await;
        let url = format!("{}/api/v3/ticker/bookTicker?symbol={}", self.base_url, pair);
        let response = match self.http.get(&url).send().await {
            Ok(response) => response,
            Err(err) => {
                return FetchPairResult {
                    success: false,
                    response: err.to_string(),
                    ..Default::default()
                }
            }
        };
        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(err) => {
                return FetchPairResult {
                    success: false,
                    response: err.to_string(),
                    ..Default::default()
                }
            }
        };
        let parse = |key: &str| body[key].as_str().and_then(|v| v.parse::<f64>().ok()).unwrap_or(0.0);
        let bid_size = parse("bidQty");
        let ask_size = parse("askQty");
        if bid_size < pair_limit || ask_size < pair_limit {
            return FetchPairResult {
                success: false,
                response: body.to_string(),
                ..Default::default()
            };
        }
        FetchPairResult {
            success: true,
            bid: parse("bidPrice"),
            ask: parse("askPrice"),
            bid_size,
            ask_size,
            response: body.to_string(),
        }
    }

    async fn place(&self, order: &Order) -> PlaceResult {
        let side = match order.side() {
            crate::offer::OrderSide::Buy => "BUY",
            crate::offer::OrderSide::Sell => "SELL",
        };
        let order_type = match order.kind {
            crate::order::OrderKind::Market => "MARKET",
            crate::order::OrderKind::Limit => "LIMIT",
        };
        let params = vec![
            ("symbol".into(), order.offer.pair.to_string()),
            ("side".into(), side.into()),
            ("type".into(), order_type.into()),
            ("quantity".into(), order.offer.quote.amount.to_string()),
            ("price".into(), order.offer.price.to_string()),
        ];
        match self.post_signed("/api/v3/order", params).await {
            Ok(response) => {
                let order_id = response["orderId"].to_string();
                let status = match response["status"].as_str() {
                    Some("FILLED") => OrderStatus::Fulfilled,
                    Some("NEW") | Some("PARTIALLY_FILLED") => OrderStatus::Placed,
                    Some("CANCELED") | Some("EXPIRED") => OrderStatus::Cancelled,
                    _ => OrderStatus::Rejected,
                };
                PlaceResult {
                    success: !order_id.is_empty() && status != OrderStatus::Rejected,
                    order_id,
                    order_status: status,
                    response: response.to_string(),
                }
            }
            Err(err) => PlaceResult::rejected(err),
        }
    }

    async fn cancel(&self, order: &Order) -> CancelResult {
        let Some(id) = order.id_on_venue.as_deref() else {
            return CancelResult {
                success: false,
                response: "order has no venue id".into(),
            };
        };
        let params = vec![
            ("symbol".into(), order.offer.pair.to_string()),
            ("orderId".into(), id.to_string()),
        ];
        match self.post_signed("/api/v3/order", params).await {
            Ok(response) => CancelResult {
                success: response["status"].as_str() == Some("CANCELED"),
                response: response.to_string(),
            },
            Err(err) => CancelResult {
                success: false,
                response: err,
            },
        }
    }

    async fn fetch_status(&self, order: &Order) -> FetchStatusResult {
        let Some(id) = order.id_on_venue.as_deref() else {
            return FetchStatusResult {
                success: false,
                status: None,
                response: "order has no venue id".into(),
            };
        };
        let params = vec![
            ("symbol".into(), order.offer.pair.to_string()),
            ("orderId".into(), id.to_string()),
        ];
        match self.post_signed("/api/v3/order", params).await {
            Ok(response) => {
                let status = match response["status"].as_str() {
                    Some("FILLED") => Some(OrderStatus::Fulfilled),
                    Some("NEW") | Some("PARTIALLY_FILLED") => Some(OrderStatus::Placed),
                    Some("CANCELED") | Some("EXPIRED") => Some(OrderStatus::Cancelled),
                    _ => None,
                };
                FetchStatusResult {
                    success: status.is_some(),
                    status,
                    response: response.to_string(),
                }
            }
            Err(err) => FetchStatusResult {
                success: false,
                status: None,
                response: err,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_query_appends_timestamp_and_signature() {
        let session = BinanceSession::new("binance", "https://api.binance.com", "key", "secret", 10, std::time::Duration::from_secs(1));
        let query = session.signed_query(vec![("symbol".into(), "ETCUSD".into())]);
        assert!(query.contains("symbol=ETCUSD"));
        assert!(query.contains("timestamp="));
        assert!(query.contains("signature="));
    }

    #[test]
    fn signing_is_deterministic_for_the_same_input() {
        let session = BinanceSession::new("binance", "https://api.binance.com", "key", "secret", 10, std::time::Duration::from_secs(1));
        assert_eq!(session.sign("a=1"), session.sign("a=1"));
        assert_ne!(session.sign("a=1"), session.sign("a=2"));
    }
}
