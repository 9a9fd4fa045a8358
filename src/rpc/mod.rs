// JSON-RPC access: endpoint rotation, the client, and the small ABI codec
pub mod abi;
pub mod client;
pub mod rotation;

pub use client::{RpcClient, TxLog, TxReceipt};
pub use rotation::{EndpointRotation, RpcEndpoint};
