//! # Contract Bindings
//!
//! Each external contract is exposed through a narrow, statically-typed wrapper
//! carrying only the capabilities this layer uses:
//!
//! - [`Erc20Token`]: `balanceOf`, `approve`
//! - [`DealVault`]: `maxRedeem`, `maxWithdraw`, `totalAssets`, `deposit`, `redeem`
//! - [`DealsManager`]: `status`
//!
//! Reads go through [`ChainProvider::call`]; writes go through a [`Signer`] and
//! return only once the transaction is mined.

use crate::provider::{ChainProvider, RpcError, Signer};
use alloy_primitives::{Address, Bytes, TxHash, U256};
use alloy_sol_types::{sol, SolCall};

sol! {
    interface IERC20 {
        function balanceOf(address owner) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
    }

    interface IDealVault {
        function deposit(uint256 assets, address receiver) external returns (uint256);
        function redeem(uint256 shares, address receiver, address owner) external returns (uint256);
        function maxRedeem(address owner) external view returns (uint256);
        function maxWithdraw(address owner) external view returns (uint256);
        function totalAssets() external view returns (uint256);
    }

    interface IDealsManager {
        function status(uint256 positionId) external view returns (uint256);
    }
}

/// Issue a read-only call and decode its single `uint256` return value.
async fn call_uint<C>(provider: &ChainProvider, to: Address, call: C) -> Result<U256, RpcError>
where
    C: SolCall<Return = U256>,
{
    let output = provider.call(to, Bytes::from(call.abi_encode())).await?;
    C::abi_decode_returns(&output)
        .map_err(|e| RpcError::decoding(format!("{} returned {} bytes: {}", C::SIGNATURE, output.len(), e)))
}

/// ERC-20 token contract.
#[derive(Clone, Debug)]
pub struct Erc20Token {
    provider: ChainProvider,
    address: Address,
}

impl Erc20Token {
    pub fn new(provider: ChainProvider, address: Address) -> Self {
        Self { provider, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub async fn balance_of(&self, owner: Address) -> Result<U256, RpcError> {
        call_uint(&self.provider, self.address, IERC20::balanceOfCall { owner }).await
    }

    /// Authorize `spender` to pull `amount` from the signer and wait for it to be mined.
    pub async fn approve(&self, signer: &Signer, spender: Address, amount: U256) -> Result<TxHash, RpcError> {
        let data = IERC20::approveCall { spender, amount }.abi_encode();
        signer.send_and_confirm(self.address, Bytes::from(data)).await
    }
}

/// Share-based deal vault.
#[derive(Clone, Debug)]
pub struct DealVault {
    provider: ChainProvider,
    address: Address,
}

impl DealVault {
    pub fn new(provider: ChainProvider, address: Address) -> Self {
        Self { provider, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub async fn max_redeem(&self, owner: Address) -> Result<U256, RpcError> {
        call_uint(&self.provider, self.address, IDealVault::maxRedeemCall { owner }).await
    }

    pub async fn max_withdraw(&self, owner: Address) -> Result<U256, RpcError> {
        call_uint(&self.provider, self.address, IDealVault::maxWithdrawCall { owner }).await
    }

    pub async fn total_assets(&self) -> Result<U256, RpcError> {
        call_uint(&self.provider, self.address, IDealVault::totalAssetsCall {}).await
    }

    pub async fn deposit(&self, signer: &Signer, assets: U256, receiver: Address) -> Result<TxHash, RpcError> {
        let data = IDealVault::depositCall { assets, receiver }.abi_encode();
        signer.send_and_confirm(self.address, Bytes::from(data)).await
    }

    pub async fn redeem(
        &self,
        signer: &Signer,
        shares: U256,
        receiver: Address,
        owner: Address,
    ) -> Result<TxHash, RpcError> {
        let data = IDealVault::redeemCall { shares, receiver, owner }.abi_encode();
        signer.send_and_confirm(self.address, Bytes::from(data)).await
    }
}

/// Deals-manager contract tracking each deal's lifecycle status.
#[derive(Clone, Debug)]
pub struct DealsManager {
    provider: ChainProvider,
    address: Address,
}

impl DealsManager {
    pub fn new(provider: ChainProvider, address: Address) -> Self {
        Self { provider, address }
    }

    pub async fn status(&self, position_id: u64) -> Result<u64, RpcError> {
        let call = IDealsManager::statusCall { positionId: U256::from(position_id) };
        let code = call_uint(&self.provider, self.address, call).await?;
        u64::try_from(code).map_err(|_| RpcError::decoding(format!("status code {} out of range", code)))
    }
}
