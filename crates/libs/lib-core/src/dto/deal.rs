//! # Deal Record
//!
//! The subset of the deal API record the wallet layer needs: which vault holds
//! the deal's funds and which position id the deals-manager tracks it under.
//! Everything else in the record (milestones, documents, shipment details) is
//! display data and is carried through untouched in `extra`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealRecord {
    #[serde(rename = "_id", default)]
    pub id: String,

    #[serde(default)]
    pub name: String,

    /// Position id of the deal in the deals-manager contract.
    #[serde(rename = "nftID", default)]
    pub nft_id: u64,

    /// Vault holding the deal's pooled funds; empty until the vault is deployed.
    #[serde(default)]
    pub vault_address: String,

    /// Off-chain workflow status as reported by the deal API.
    #[serde(default)]
    pub status: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DealRecord {
    /// Whether the deal has a vault to invest into.
    pub fn has_vault(&self) -> bool {
        !self.vault_address.trim().is_empty()
    }
}
