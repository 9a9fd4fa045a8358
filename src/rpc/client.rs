use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::error::BotError;
use crate::execution::{Broadcaster, ChainReader};
use crate::rpc::abi;
use crate::rpc::rotation::{EndpointRotation, RpcEndpoint};
use crate::Result;

const DEFAULT_TIMEOUT_SECS: u64 = 10;
const RATE_LIMIT_RPM: u32 = 120;

// Type alias for the rate limiter to simplify signatures
type RpcRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

// `result` defaults to Null rather than using Option: a `"result": null`
// reply is a valid answer (eth_getTransactionReceipt for a pending
// transaction), not a degraded endpoint.
#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Value,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// A mined transaction receipt, reduced to the fields verification needs.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    pub status: String,
    pub gas_used: String,
    #[serde(default)]
    pub logs: Vec<TxLog>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
}

impl TxReceipt {
    pub fn succeeded(&self) -> bool {
        self.status == "0x1"
    }
}

/// JSON-RPC client over a rotating endpoint list.
///
/// Every call walks the rotation: the active endpoint is tried first, a
/// failure degrades it and moves on, and only a full sweep of failures
/// surfaces as `NoEndpointAvailable`. All clones share the rotation and the
/// rate limiter.
#[derive(Clone)]
pub struct RpcClient {
    client: Client,
    rotation: Arc<Mutex<EndpointRotation>>,
    rate_limiter: Arc<RpcRateLimiter>,
    request_id: Arc<AtomicU64>,
    request_timeout: Duration,
}

impl RpcClient {
    pub fn new(endpoints: Vec<RpcEndpoint>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;

        let quota = Quota::per_minute(NonZeroU32::new(RATE_LIMIT_RPM).expect("nonzero quota"));

        Ok(Self {
            client,
            rotation: Arc::new(Mutex::new(EndpointRotation::new(endpoints))),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
            request_id: Arc::new(AtomicU64::new(1)),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        })
    }

    /// Give degraded endpoints another chance. Called once per loop tick.
    pub async fn begin_tick(&self) {
        self.rotation.lock().await.reset_degraded();
    }

    /// Issue one JSON-RPC call, rotating through endpoints until one
    /// answers. Returns the id of the endpoint that served the request so
    /// callers can attribute the data.
    pub async fn call(&self, method: &str, params: Value) -> Result<(String, Value)> {
        self.rate_limiter.until_ready().await;

        let attempts = self.rotation.lock().await.len();
        for _ in 0..attempts {
            let endpoint = match self.rotation.lock().await.current() {
                Some(ep) => ep.clone(),
                None => break,
            };

            match self.call_endpoint(&endpoint, method, &params).await {
                Ok(result) => {
                    self.rotation.lock().await.mark_healthy(&endpoint.id);
                    return Ok((endpoint.id, result));
                }
                Err(e) => {
                    tracing::warn!(
                        endpoint = %endpoint.id,
                        method,
                        error = %e,
                        "RPC call failed, rotating"
                    );
                    self.rotation.lock().await.mark_degraded();
                }
            }
        }

        Err(BotError::NoEndpointAvailable { attempts })
    }

    async fn call_endpoint(
        &self,
        endpoint: &RpcEndpoint,
        method: &str,
        params: &Value,
    ) -> Result<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.request_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });

        let send = self.client.post(&endpoint.url).json(&body).send();
        let response = tokio::time::timeout(self.request_timeout, send)
            .await
            .map_err(|_| BotError::Rpc {
                endpoint: endpoint.id.clone(),
                message: format!("timed out after {:?}", self.request_timeout),
            })??;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(BotError::Rpc {
                endpoint: endpoint.id.clone(),
                message: "rate limited (429)".to_string(),
            });
        }
        if !status.is_success() {
            return Err(BotError::Rpc {
                endpoint: endpoint.id.clone(),
                message: format!("http status {status}"),
            });
        }

        let parsed: JsonRpcResponse = response.json().await?;
        if let Some(err) = parsed.error {
            return Err(BotError::Rpc {
                endpoint: endpoint.id.clone(),
                message: format!("rpc error {}: {}", err.code, err.message),
            });
        }
        Ok(parsed.result)
    }

    /// `eth_call` against a contract, returning the raw hex payload.
    async fn eth_call(&self, to: &str, data: &str) -> Result<(String, String)> {
        let (endpoint_id, result) = self
            .call("eth_call", json!([{ "to": to, "data": data }, "latest"]))
            .await?;
        let payload = result
            .as_str()
            .ok_or_else(|| BotError::Decode("eth_call result is not a string".to_string()))?
            .to_string();
        Ok((endpoint_id, payload))
    }

    /// Pool price from `slot0().sqrtPriceX96`, tagged with the endpoint
    /// that served it.
    pub async fn pool_price(&self, pool: &str) -> Result<(String, Decimal)> {
        let (endpoint_id, payload) = self.eth_call(pool, abi::SLOT0_SELECTOR).await?;
        let words = abi::decode_words(&payload)?;
        let sqrt_word = words
            .first()
            .ok_or_else(|| BotError::Decode("empty slot0 payload".to_string()))?;
        Ok((endpoint_id, abi::sqrt_price_x96_to_price(sqrt_word)?))
    }

    /// ERC-20 balance of `owner`, in whole token units.
    pub async fn token_balance_of(
        &self,
        token: &str,
        owner: &str,
        decimals: u32,
    ) -> Result<Decimal> {
        let data = abi::encode_balance_of(owner)?;
        let (_, payload) = self.eth_call(token, &data).await?;
        let words = abi::decode_words(&payload)?;
        let word = words
            .first()
            .ok_or_else(|| BotError::Decode("empty balanceOf payload".to_string()))?;
        abi::raw_to_decimal(abi::word_to_u128(word)?, decimals)
    }

    /// Native-asset balance of `owner`, in whole units.
    pub async fn native_balance_of(&self, owner: &str) -> Result<Decimal> {
        let (_, result) = self.call("eth_getBalance", json!([owner, "latest"])).await?;
        let quantity = result
            .as_str()
            .ok_or_else(|| BotError::Decode("eth_getBalance result is not a string".to_string()))?;
        abi::raw_to_decimal(abi::parse_quantity(quantity)?, 18)
    }

    /// Current gas price in gwei.
    pub async fn gas_price(&self) -> Result<Decimal> {
        let (_, result) = self.call("eth_gasPrice", json!([])).await?;
        let quantity = result
            .as_str()
            .ok_or_else(|| BotError::Decode("eth_gasPrice result is not a string".to_string()))?;
        abi::raw_to_decimal(abi::parse_quantity(quantity)?, 9)
    }

    /// Receipt for a broadcast transaction, None while still pending.
    pub async fn receipt(&self, tx_hash: &str) -> Result<Option<TxReceipt>> {
        let (_, result) = self
            .call("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(result)?))
    }
}

#[async_trait]
impl ChainReader for RpcClient {
    async fn gas_price_gwei(&self) -> Result<Decimal> {
        self.gas_price().await
    }

    async fn token_balance(&self, token: &str, owner: &str, decimals: u32) -> Result<Decimal> {
        self.token_balance_of(token, owner, decimals).await
    }

    async fn native_balance(&self, owner: &str) -> Result<Decimal> {
        self.native_balance_of(owner).await
    }

    async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<TxReceipt>> {
        self.receipt(tx_hash).await
    }
}

#[async_trait]
impl Broadcaster for RpcClient {
    async fn broadcast(&self, signed_tx: &str) -> Result<String> {
        let (endpoint_id, result) = self
            .call("eth_sendRawTransaction", json!([signed_tx]))
            .await?;
        let tx_hash = result
            .as_str()
            .ok_or_else(|| BotError::Decode("transaction hash is not a string".to_string()))?
            .to_string();
        tracing::info!(%tx_hash, endpoint = %endpoint_id, "transaction broadcast");
        Ok(tx_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tokio_test::assert_ok;

    fn rpc_result(value: &str) -> String {
        format!(r#"{{"jsonrpc":"2.0","id":1,"result":"{value}"}}"#)
    }

    #[tokio::test]
    async fn test_gas_price_decodes_gwei() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            // 20 gwei in wei
            .with_body(rpc_result("0x4a817c800"))
            .create_async()
            .await;

        let client =
            RpcClient::new(vec![RpcEndpoint::new("primary", server.url())]).unwrap();
        assert_eq!(client.gas_price().await.unwrap(), dec!(20));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rotation_fails_over_to_second_endpoint() {
        let mut bad = mockito::Server::new_async().await;
        let bad_mock = bad
            .mock("POST", "/")
            .with_status(500)
            .create_async()
            .await;

        let mut good = mockito::Server::new_async().await;
        let good_mock = good
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(rpc_result("0x1"))
            .create_async()
            .await;

        let client = RpcClient::new(vec![
            RpcEndpoint::new("bad", bad.url()),
            RpcEndpoint::new("good", good.url()),
        ])
        .unwrap();

        let (endpoint_id, _) = client.call("eth_gasPrice", json!([])).await.unwrap();
        assert_eq!(endpoint_id, "good");
        bad_mock.assert_async().await;
        good_mock.assert_async().await;

        // The rotation now sticks with the endpoint that answered
        let (endpoint_id, _) = client.call("eth_gasPrice", json!([])).await.unwrap();
        assert_eq!(endpoint_id, "good");
    }

    #[tokio::test]
    async fn test_pool_price_survives_three_failing_endpoints() {
        let mut dead = mockito::Server::new_async().await;
        dead.mock("POST", "/")
            .with_status(503)
            .expect_at_least(3)
            .create_async()
            .await;

        let mut live = mockito::Server::new_async().await;
        // sqrtPriceX96 = 2^96, price exactly 1
        live.mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(rpc_result(&format!("0x{:064x}", 1u128 << 96)))
            .create_async()
            .await;

        let client = RpcClient::new(vec![
            RpcEndpoint::new("dead-1", dead.url()),
            RpcEndpoint::new("dead-2", dead.url()),
            RpcEndpoint::new("dead-3", dead.url()),
            RpcEndpoint::new("live", live.url()),
        ])
        .unwrap();

        let (endpoint_id, price) = client.pool_price("0xpool").await.unwrap();
        assert_eq!(endpoint_id, "live");
        assert_eq!(price, dec!(1));
    }

    #[tokio::test]
    async fn test_all_endpoints_failing_is_no_endpoint_available() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(429)
            .expect_at_least(1)
            .create_async()
            .await;

        let client = RpcClient::new(vec![
            RpcEndpoint::new("a", server.url()),
            RpcEndpoint::new("b", server.url()),
        ])
        .unwrap();

        let err = client.call("eth_gasPrice", json!([])).await.unwrap_err();
        assert!(matches!(
            err,
            BotError::NoEndpointAvailable { attempts: 2 }
        ));

        // begin_tick restores the degraded endpoints for the next sweep
        client.begin_tick().await;
        assert!(client.rotation.lock().await.current().is_some());
    }

    #[tokio::test]
    async fn test_rpc_error_body_is_surfaced() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"header not found"}}"#,
            )
            .expect_at_least(1)
            .create_async()
            .await;

        let client =
            RpcClient::new(vec![RpcEndpoint::new("only", server.url())]).unwrap();
        let err = client.call("eth_call", json!([])).await.unwrap_err();
        assert!(matches!(err, BotError::NoEndpointAvailable { attempts: 1 }));
    }

    #[tokio::test]
    async fn test_pending_receipt_is_none() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":null}"#)
            .expect_at_least(1)
            .create_async()
            .await;

        let client =
            RpcClient::new(vec![RpcEndpoint::new("only", server.url())]).unwrap();
        let receipt = assert_ok!(client.receipt("0xdead").await);
        assert!(receipt.is_none());

        // A null result is a valid answer, not an endpoint failure: the
        // endpoint stays in rotation and the next poll still reaches it.
        assert_eq!(client.rotation.lock().await.degraded_count(), 0);
        let receipt = assert_ok!(client.receipt("0xdead").await);
        assert!(receipt.is_none());
    }

    #[tokio::test]
    async fn test_receipt_parses_status_and_logs() {
        let body = r#"{"jsonrpc":"2.0","id":1,"result":{
            "status":"0x1",
            "gasUsed":"0x5208",
            "logs":[{
                "address":"0xpool",
                "topics":["0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"],
                "data":"0x01"
            }]
        }}"#;
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await;

        let client =
            RpcClient::new(vec![RpcEndpoint::new("only", server.url())]).unwrap();
        let receipt = client.receipt("0xbeef").await.unwrap().unwrap();
        assert!(receipt.succeeded());
        assert_eq!(receipt.logs.len(), 1);
    }
}
