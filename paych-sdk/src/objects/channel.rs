//! Channel state as exchanged with clients.
//!
//! These are plain data carriers. Their meaning (signature validity, balance
//! conservation, version ordering) is owned by the channel-protocol engine.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ids::{ChannelId, HexBytes};

/// Fixed parameters of a channel, agreed on at opening.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Params {
    /// Challenge duration in seconds.
    pub challenge_duration: u64,
    /// Participant addresses.
    pub parts: Vec<HexBytes>,
    /// App address; `None` for a plain payment channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<HexBytes>,
    /// Nonce as a decimal string.
    pub nonce: String,
    #[serde(default)]
    pub ledger_channel: bool,
    #[serde(default)]
    pub virtual_channel: bool,
}

/// Funds locked in a sub-channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubAlloc {
    pub id: ChannelId,
    pub bals: Vec<Decimal>,
    #[serde(default)]
    pub index_map: Vec<u16>,
}

/// Distribution of assets among participants.
///
/// `balances[asset][participant]`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Allocation {
    pub assets: Vec<HexBytes>,
    pub balances: Vec<Vec<Decimal>>,
    #[serde(default)]
    pub locked: Vec<SubAlloc>,
}

/// A versioned channel state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub id: ChannelId,
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<HexBytes>,
    pub allocation: Allocation,
    #[serde(default)]
    pub data: HexBytes,
    #[serde(default)]
    pub is_final: bool,
}

/// A state together with the participants' signatures on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub state: State,
    pub sigs: Vec<HexBytes>,
}

/// A transaction together with the parameters of its channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedState {
    pub params: Params,
    pub state: State,
    pub sigs: Vec<HexBytes>,
}

impl SignedState {
    pub fn channel_id(&self) -> ChannelId {
        self.state.id
    }

    pub fn transaction(&self) -> Transaction {
        Transaction {
            state: self.state.clone(),
            sigs: self.sigs.clone(),
        }
    }
}

/// Balance snapshot in display form: `bals[currency][participant]`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BalInfo {
    pub currencies: Vec<String>,
    pub parts: Vec<String>,
    pub bals: Vec<Vec<String>>,
}

/// Summary of a payment channel as shown to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayChInfo {
    pub ch_id: ChannelId,
    pub bal_info: BalInfo,
    pub version: String,
}

/// Request to the adjudicator for a single channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjudicatorReq {
    pub params: Params,
    pub tx: Transaction,
    /// Index of the requesting participant.
    pub idx: u16,
    #[serde(default)]
    pub secondary: bool,
}

/// One entry of a withdrawal's sub-channel state map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMapEntry {
    pub id: ChannelId,
    pub state: State,
}
