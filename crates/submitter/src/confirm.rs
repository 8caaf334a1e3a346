//! Waiting for submitted transactions to reach a terminal status.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use batchbench_common::TransactionHash;
use starknet_rpc_client::{LedgerClient, Receipt};

use crate::config::ConfirmationSettings;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Confirmation {
    Accepted(Receipt),
    Reverted(Receipt),
    /// No terminal receipt within the confirmation timeout.
    TimedOut,
    /// The node rejected the receipt query itself.
    Failed(String),
}

impl Confirmation {
    fn from_receipt(receipt: Receipt) -> Self {
        if receipt.is_reverted() {
            Self::Reverted(receipt)
        } else {
            Self::Accepted(receipt)
        }
    }

    pub fn receipt(&self) -> Option<&Receipt> {
        match self {
            Self::Accepted(receipt) | Self::Reverted(receipt) => Some(receipt),
            Self::TimedOut | Self::Failed(_) => None,
        }
    }
}

/// Polls for receipts, remembering terminal ones.
///
/// Confirming a hash a second time returns the remembered outcome without
/// touching the node.
#[derive(Debug)]
pub struct Confirmer<C: ?Sized> {
    client: Arc<C>,
    settings: ConfirmationSettings,
    terminal: Mutex<HashMap<TransactionHash, Receipt>>,
}

impl<C: LedgerClient + ?Sized> Confirmer<C> {
    pub fn new(client: Arc<C>, settings: ConfirmationSettings) -> Self {
        Self {
            client,
            settings,
            terminal: Mutex::default(),
        }
    }

    fn cached(&self, hash: TransactionHash) -> Option<Receipt> {
        self.terminal
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&hash)
            .cloned()
    }

    #[tracing::instrument(skip(self))]
    pub async fn confirm(&self, hash: TransactionHash) -> Confirmation {
        if let Some(receipt) = self.cached(hash) {
            return Confirmation::from_receipt(receipt);
        }

        match tokio::time::timeout(self.settings.timeout, self.poll(hash)).await {
            Ok(confirmation) => confirmation,
            Err(_) => {
                tracing::warn!(timeout=?self.settings.timeout, "Transaction not confirmed in time");
                Confirmation::TimedOut
            }
        }
    }

    async fn poll(&self, hash: TransactionHash) -> Confirmation {
        loop {
            match self.client.receipt(hash).await {
                Ok(Some(receipt)) if receipt.is_terminal() => {
                    tracing::debug!(status=?receipt.finality_status, block=?receipt.block_number, "Transaction confirmed");
                    self.terminal
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .insert(hash, receipt.clone());
                    return Confirmation::from_receipt(receipt);
                }
                Ok(_) => {}
                Err(error) if error.kind().is_transient() => {
                    tracing::debug!(%error, "Receipt poll failed, polling again");
                }
                Err(error) => {
                    tracing::warn!(%error, kind=%error.kind(), "Receipt query rejected");
                    return Confirmation::Failed(error.to_string());
                }
            }

            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }
}
