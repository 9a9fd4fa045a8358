use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

use crate::error::BotError;
use crate::models::{TradeRecord, TradeSide};
use crate::rpc::{abi, TxReceipt};
use crate::Result;

/// Chain reads the executor and loop need. Behind a trait so tests run
/// against an in-memory chain.
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn gas_price_gwei(&self) -> Result<Decimal>;
    async fn token_balance(&self, token: &str, owner: &str, decimals: u32) -> Result<Decimal>;
    async fn native_balance(&self, owner: &str) -> Result<Decimal>;
    async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<TxReceipt>>;
}

/// Pushes a signed transaction to the network, returning its hash.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn broadcast(&self, signed_tx: &str) -> Result<String>;
}

/// Produces a signed raw transaction for a swap. Keys never enter this
/// process; the production impl defers to an external signing service.
#[async_trait]
pub trait TxSigner: Send + Sync {
    async fn sign_swap(&self, request: &SwapRequest) -> Result<String>;
}

/// One swap the loop has decided and risk has authorized.
#[derive(Debug, Clone, PartialEq)]
pub struct SwapRequest {
    pub side: TradeSide,
    /// Base-asset units.
    pub amount: Decimal,
    /// Slippage floor on the swap output, in the output asset's units.
    pub min_amount_out: Decimal,
    pub gas_price_gwei: Decimal,
    pub gas_limit: u64,
    /// Router deadline; the pool rejects inclusion after this.
    pub deadline: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub wallet_address: String,
    /// The asset trades are denominated in (e.g. WETH).
    pub base_token_address: String,
    pub base_token_decimals: u32,
    /// The asset being traded.
    pub quote_token_address: String,
    pub quote_token_decimals: u32,
    /// How long to poll for inclusion before declaring the outcome
    /// ambiguous.
    pub inclusion_timeout: Duration,
    pub poll_interval: Duration,
}

/// Submits swaps and verifies what actually happened on chain.
///
/// "Broadcast succeeded" is never treated as "trade succeeded": a record
/// only becomes Confirmed once the receipt carries status 1 *and* economic
/// evidence that the expected asset moved into the wallet. A successful
/// status with no movement is recorded as Reverted.
pub struct TradeExecutor {
    reader: Arc<dyn ChainReader>,
    broadcaster: Arc<dyn Broadcaster>,
    signer: Arc<dyn TxSigner>,
    config: ExecutorConfig,
}

impl TradeExecutor {
    pub fn new(
        reader: Arc<dyn ChainReader>,
        broadcaster: Arc<dyn Broadcaster>,
        signer: Arc<dyn TxSigner>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            reader,
            broadcaster,
            signer,
            config,
        }
    }

    /// The asset a successful swap must deliver to the wallet.
    fn inbound_token(&self, side: TradeSide) -> (&str, u32) {
        match side {
            TradeSide::Buy => (
                self.config.quote_token_address.as_str(),
                self.config.quote_token_decimals,
            ),
            TradeSide::Sell => (
                self.config.base_token_address.as_str(),
                self.config.base_token_decimals,
            ),
        }
    }

    /// Run a swap end to end and return its ledger record.
    ///
    /// The record's final state tells the caller what to do with the risk
    /// counters: Failed with no tx hash means the transaction never reached
    /// the network and the charge can be released. Every other outcome,
    /// including the inclusion timeout, keeps the charge.
    ///
    /// `cancel` cuts the inclusion poll short on shutdown. Signing and
    /// broadcast always run to completion; interrupting a broadcast in
    /// flight would leave the outcome unknowable.
    pub async fn execute(&self, request: &SwapRequest, cancel: &CancellationToken) -> TradeRecord {
        let mut record = TradeRecord::new(
            request.side,
            request.amount,
            request.gas_price_gwei,
            request.gas_limit,
        );

        let (inbound_token, inbound_decimals) = self.inbound_token(request.side);
        let pre_balance = self
            .reader
            .token_balance(inbound_token, &self.config.wallet_address, inbound_decimals)
            .await
            .ok();

        let signed = match self.signer.sign_swap(request).await {
            Ok(signed) => signed,
            Err(e) => {
                tracing::error!(trade_id = %record.id, error = %e, "signing failed");
                record.fail();
                return record;
            }
        };

        let tx_hash = match self.broadcaster.broadcast(&signed).await {
            Ok(hash) => hash,
            Err(e) => {
                tracing::error!(trade_id = %record.id, error = %e, "broadcast failed");
                record.fail();
                return record;
            }
        };
        record.tx_hash = Some(tx_hash.clone());

        match self.await_receipt(&tx_hash, cancel).await {
            Ok(receipt) => self.verify(&mut record, &receipt, inbound_token, inbound_decimals, pre_balance).await,
            Err(e) => {
                // Not mined within the window. The outcome is ambiguous:
                // accounting assumes no execution, but the nonce is burned.
                tracing::error!(trade_id = %record.id, %tx_hash, error = %e, "inclusion timed out");
                record.fail();
            }
        }

        record
    }

    async fn await_receipt(&self, tx_hash: &str, cancel: &CancellationToken) -> Result<TxReceipt> {
        let deadline = tokio::time::Instant::now() + self.config.inclusion_timeout;
        let timeout = || BotError::InclusionTimeout {
            tx_hash: tx_hash.to_string(),
            timeout_secs: self.config.inclusion_timeout.as_secs(),
        };

        loop {
            let polled = tokio::select! {
                _ = cancel.cancelled() => {
                    // Shutdown mid-poll: same ambiguity as a timeout, the
                    // transaction may still mine after we exit.
                    tracing::warn!(%tx_hash, "shutdown requested, abandoning receipt poll");
                    return Err(timeout());
                }
                polled = self.reader.transaction_receipt(tx_hash) => polled,
            };
            match polled {
                Ok(Some(receipt)) => return Ok(receipt),
                Ok(None) => {}
                // A failed poll is not a failed trade; keep polling until
                // the deadline.
                Err(e) => tracing::warn!(%tx_hash, error = %e, "receipt poll failed"),
            }

            if tokio::time::Instant::now() + self.config.poll_interval > deadline {
                return Err(timeout());
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::warn!(%tx_hash, "shutdown requested, abandoning receipt poll");
                    return Err(timeout());
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    async fn verify(
        &self,
        record: &mut TradeRecord,
        receipt: &TxReceipt,
        inbound_token: &str,
        inbound_decimals: u32,
        pre_balance: Option<Decimal>,
    ) {
        let now = Utc::now();

        if !receipt.succeeded() {
            tracing::warn!(trade_id = %record.id, "transaction reverted on chain");
            record.revert(now);
            return;
        }

        // Primary evidence: a Transfer of the expected asset into the wallet,
        // straight from the receipt logs.
        if let Some(amount) = self.transfer_into_wallet(receipt, inbound_token, inbound_decimals) {
            tracing::info!(trade_id = %record.id, executed = %amount, "trade confirmed via transfer log");
            record.confirm(amount, now);
            return;
        }

        // Fallback: compare balances. Covers pools that emit nonstandard
        // events.
        if let Some(pre) = pre_balance {
            if let Ok(post) = self
                .reader
                .token_balance(inbound_token, &self.config.wallet_address, inbound_decimals)
                .await
            {
                if post > pre {
                    tracing::info!(trade_id = %record.id, executed = %(post - pre), "trade confirmed via balance delta");
                    record.confirm(post - pre, now);
                    return;
                }
            }
        }

        // Status 1 with no asset movement. Not a success.
        tracing::warn!(trade_id = %record.id, "mined with success status but no asset movement");
        record.revert(now);
    }

    fn transfer_into_wallet(
        &self,
        receipt: &TxReceipt,
        inbound_token: &str,
        inbound_decimals: u32,
    ) -> Option<Decimal> {
        let wallet_topic = abi::address_topic(&self.config.wallet_address).ok()?;

        for log in &receipt.logs {
            if !log.address.eq_ignore_ascii_case(inbound_token) {
                continue;
            }
            let [topic0, _, to] = log.topics.as_slice() else {
                continue;
            };
            if !topic0.eq_ignore_ascii_case(abi::TRANSFER_TOPIC)
                || !to.eq_ignore_ascii_case(&wallet_topic)
            {
                continue;
            }
            let words = abi::decode_words(&log.data).ok()?;
            let raw = abi::word_to_u128(words.first()?).ok()?;
            return abi::raw_to_decimal(raw, inbound_decimals).ok();
        }
        None
    }
}
