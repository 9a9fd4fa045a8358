// Trade execution: submission with verification, the external signer
// client, and the tick loop that drives everything
pub mod executor;
pub mod signer;
pub mod trading_loop;

pub use executor::{Broadcaster, ChainReader, ExecutorConfig, SwapRequest, TradeExecutor, TxSigner};
pub use signer::SignerGateway;
pub use trading_loop::{LoopSettings, TradingLoop};
