//! Starknet JSON-RPC client, covering the handful of methods needed to submit
//! and confirm invoke transactions.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use batchbench_common::{
    Call, ChainId, ContractAddress, Felt, InvokeTransactionV3, TransactionHash,
    TransactionNonce,
};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub mod endpoint;
pub mod error;
pub mod reply;
mod request;

pub use endpoint::{EndpointPool, Selection};
pub use error::{ErrorKind, RpcError};
pub use reply::Receipt;

/// The capabilities the submitter needs from a ledger.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait::async_trait]
pub trait LedgerClient: Send + Sync {
    async fn chain_id(&self) -> Result<ChainId, RpcError>;

    async fn nonce(&self, address: ContractAddress) -> Result<TransactionNonce, RpcError>;

    /// Read-only call against the configured block tag.
    async fn call(&self, call: Call) -> Result<Vec<Felt>, RpcError>;

    /// Submits a signed transaction, returning the hash the node assigned.
    async fn add_invoke_transaction(
        &self,
        transaction: InvokeTransactionV3,
    ) -> Result<TransactionHash, RpcError>;

    /// `None` while the node does not know the transaction yet.
    async fn receipt(&self, hash: TransactionHash) -> Result<Option<Receipt>, RpcError>;
}

/// Block used for nonce and call requests. Not all nodes accept all tags.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockTag {
    #[default]
    Latest,
    PreConfirmed,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown block tag {0:?}, expected one of latest, pre_confirmed, pending")]
pub struct ParseBlockTagError(String);

impl std::str::FromStr for BlockTag {
    type Err = ParseBlockTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "latest" => Ok(BlockTag::Latest),
            "pre_confirmed" => Ok(BlockTag::PreConfirmed),
            "pending" => Ok(BlockTag::Pending),
            other => Err(ParseBlockTagError(other.to_owned())),
        }
    }
}

impl std::fmt::Display for BlockTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            BlockTag::Latest => "latest",
            BlockTag::PreConfirmed => "pre_confirmed",
            BlockTag::Pending => "pending",
        })
    }
}

/// JSON-RPC client spreading requests over an [EndpointPool].
///
/// No retries are performed here; callers decide based on
/// [RpcError::kind].
#[derive(Debug, Clone)]
pub struct Client {
    /// This client is internally refcounted
    inner: reqwest::Client,
    endpoints: Arc<EndpointPool>,
    block_tag: BlockTag,
    next_id: Arc<AtomicU64>,
}

impl Client {
    pub fn new(endpoints: EndpointPool, request_timeout: Duration) -> Result<Self, RpcError> {
        Ok(Self {
            inner: reqwest::Client::builder()
                .timeout(request_timeout)
                .user_agent(batchbench_common::consts::USER_AGENT)
                .build()?,
            endpoints: Arc::new(endpoints),
            block_tag: BlockTag::default(),
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn with_block_tag(mut self, block_tag: BlockTag) -> Self {
        self.block_tag = block_tag;
        self
    }

    pub fn endpoints(&self) -> &EndpointPool {
        &self.endpoints
    }

    async fn request<P, T>(&self, method: &str, params: P) -> Result<T, RpcError>
    where
        P: Serialize + Send,
        T: DeserializeOwned,
    {
        let index = self.endpoints.select();
        let url = self.endpoints.url(index);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let result = self.send(url, id, method, params).await;

        // Only transport level problems count against an endpoint.
        match &result {
            Err(e) if e.kind().is_transient() => self.endpoints.report_failure(index),
            _ => self.endpoints.report_success(index),
        }

        result
    }

    async fn send<P, T>(&self, url: &url::Url, id: u64, method: &str, params: P) -> Result<T, RpcError>
    where
        P: Serialize,
        T: DeserializeOwned,
    {
        let request = request::RpcRequest::new(id, method, params);
        let response = self.inner.post(url.clone()).json(&request).send().await?;

        let status = response.status();
        let body = response.bytes().await?;

        let reply = serde_json::from_slice::<reply::RpcResponse<T>>(&body);

        if !status.is_success() {
            // Some nodes send JSON-RPC errors with a non-success status.
            if let Ok(reply::RpcResponse {
                error: Some(error), ..
            }) = reply
            {
                return Err(RpcError::Starknet {
                    code: error.code,
                    message: error.message,
                    data: error.data,
                });
            }

            return Err(RpcError::HttpStatus {
                status,
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        match reply? {
            reply::RpcResponse {
                error: Some(error), ..
            } => Err(RpcError::Starknet {
                code: error.code,
                message: error.message,
                data: error.data,
            }),
            reply::RpcResponse {
                result: Some(result),
                ..
            } => Ok(result),
            _ => Err(RpcError::EmptyReply),
        }
    }
}

#[async_trait::async_trait]
impl LedgerClient for Client {
    #[tracing::instrument(skip(self))]
    async fn chain_id(&self) -> Result<ChainId, RpcError> {
        self.request("starknet_chainId", [(); 0]).await
    }

    #[tracing::instrument(skip(self))]
    async fn nonce(&self, address: ContractAddress) -> Result<TransactionNonce, RpcError> {
        self.request(
            "starknet_getNonce",
            request::GetNonce {
                block_id: self.block_tag,
                contract_address: address,
            },
        )
        .await
    }

    #[tracing::instrument(skip(self, call), fields(to = %call.to, selector = %call.selector))]
    async fn call(&self, call: Call) -> Result<Vec<Felt>, RpcError> {
        self.request(
            "starknet_call",
            request::CallParams {
                request: (&call).into(),
                block_id: self.block_tag,
            },
        )
        .await
    }

    #[tracing::instrument(skip(self, transaction), fields(sender = %transaction.sender_address, nonce = %transaction.nonce))]
    async fn add_invoke_transaction(
        &self,
        transaction: InvokeTransactionV3,
    ) -> Result<TransactionHash, RpcError> {
        let reply: reply::AddInvokeTransactionResult = self
            .request(
                "starknet_addInvokeTransaction",
                request::AddInvokeTransaction {
                    invoke_transaction: (&transaction).into(),
                },
            )
            .await?;

        Ok(reply.transaction_hash)
    }

    #[tracing::instrument(skip(self))]
    async fn receipt(&self, hash: TransactionHash) -> Result<Option<Receipt>, RpcError> {
        let result = self
            .request(
                "starknet_getTransactionReceipt",
                request::GetTransactionReceipt {
                    transaction_hash: hash,
                },
            )
            .await;

        match result {
            Ok(receipt) => Ok(Some(receipt)),
            Err(RpcError::Starknet { code, .. }) if code == error::code::TXN_HASH_NOT_FOUND => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
