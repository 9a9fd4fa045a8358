use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::BotError;
use crate::execution::executor::{SwapRequest, TxSigner};
use crate::Result;

const SIGN_TIMEOUT_SECS: u64 = 15;

/// Client for the external signing service.
///
/// Private keys never enter this process. The bot sends swap parameters,
/// the service returns a signed raw transaction, and any refusal maps to
/// `SubmissionRejected` so the risk counters get released.
#[derive(Clone)]
pub struct SignerGateway {
    client: Client,
    base_url: String,
    wallet_address: String,
}

#[derive(Debug, Serialize)]
struct SignRequest<'a> {
    wallet: &'a str,
    side: &'a str,
    amount: Decimal,
    min_amount_out: Decimal,
    gas_price_gwei: Decimal,
    gas_limit: u64,
    deadline: i64,
}

#[derive(Debug, Deserialize)]
struct SignResponse {
    signed_tx: String,
}

impl SignerGateway {
    pub fn new(base_url: impl Into<String>, wallet_address: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(SIGN_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            wallet_address: wallet_address.into(),
        })
    }
}

#[async_trait]
impl TxSigner for SignerGateway {
    async fn sign_swap(&self, request: &SwapRequest) -> Result<String> {
        let url = format!("{}/sign", self.base_url);
        let body = SignRequest {
            wallet: &self.wallet_address,
            side: request.side.as_str(),
            amount: request.amount,
            min_amount_out: request.min_amount_out,
            gas_price_gwei: request.gas_price_gwei,
            gas_limit: request.gas_limit,
            deadline: request.deadline.timestamp(),
        };

        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response
                .text()
                .await
                .unwrap_or_else(|_| "no detail".to_string());
            return Err(BotError::SubmissionRejected(format!(
                "signer returned {status}: {detail}"
            )));
        }

        let parsed: SignResponse = response.json().await?;
        if parsed.signed_tx.is_empty() {
            return Err(BotError::SubmissionRejected(
                "signer returned an empty transaction".to_string(),
            ));
        }
        Ok(parsed.signed_tx)
    }
}
