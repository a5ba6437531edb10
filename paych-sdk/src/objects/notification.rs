//! Notifications pushed to subscribers.
//!
//! Every subscription, on either transport, produces a sequence of
//! [`Notification`] values serialized as internally-tagged JSON:
//!
//! ```json
//! {"type":"proposal","proposal_id":"…","opening_bal_info":{…},"challenge_dur_secs":60,"expiry":1700000000}
//! {"type":"update","update_id":"…","proposed_ch_info":{…},"kind":"closed","expiry":0}
//! {"type":"adjudicator","event":{"event":"concluded","ch_id":"0x…","timeout":0,"version":4}}
//! {"type":"error","category":"internal","code":"unknown_internal","message":"…"}
//! ```
//!
//! A subscription ends after a terminal notification (see
//! [`Notification::is_terminal`]); clients resubscribe if they want more.

use serde::{Deserialize, Serialize};

use super::channel::{BalInfo, PayChInfo, State};
use super::error::ApiError;
use super::ids::ChannelId;

/// An incoming channel proposal awaiting the user's answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalNotif {
    pub proposal_id: String,
    pub opening_bal_info: BalInfo,
    pub challenge_dur_secs: u64,
    /// Unix timestamp after which the proposal can no longer be accepted.
    pub expiry: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    /// A regular off-chain update.
    Open,
    /// An update that finalizes the channel.
    Final,
    /// The channel was closed; no further updates follow.
    Closed,
}

/// An incoming channel update awaiting the user's answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateNotif {
    pub update_id: String,
    pub proposed_ch_info: PayChInfo,
    pub kind: UpdateKind,
    pub expiry: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

/// An on-chain adjudicator event for a watched channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AdjudicatorNotif {
    Registered {
        ch_id: ChannelId,
        /// Unix timestamp at which the challenge period elapses; `0` if it
        /// already has.
        timeout: i64,
        version: u64,
        state: State,
    },
    Progressed {
        ch_id: ChannelId,
        timeout: i64,
        version: u64,
        state: State,
        idx: u16,
    },
    Concluded {
        ch_id: ChannelId,
        timeout: i64,
        version: u64,
    },
}

impl AdjudicatorNotif {
    pub fn channel_id(&self) -> ChannelId {
        match self {
            AdjudicatorNotif::Registered { ch_id, .. }
            | AdjudicatorNotif::Progressed { ch_id, .. }
            | AdjudicatorNotif::Concluded { ch_id, .. } => *ch_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    Proposal(ProposalNotif),
    Update(UpdateNotif),
    Adjudicator { event: AdjudicatorNotif },
    Error(ApiError),
}

impl Notification {
    /// Whether this notification is the last one its source will produce.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Notification::Update(UpdateNotif {
                kind: UpdateKind::Closed,
                ..
            }) | Notification::Adjudicator {
                event: AdjudicatorNotif::Concluded { .. }
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn concluded() -> Notification {
        Notification::Adjudicator {
            event: AdjudicatorNotif::Concluded {
                ch_id: ChannelId([0xab; 32]),
                timeout: 0,
                version: 4,
            },
        }
    }

    #[test]
    fn concluded_and_closed_are_terminal() {
        assert!(concluded().is_terminal());

        let update = |kind| {
            Notification::Update(UpdateNotif {
                update_id: "u1".into(),
                proposed_ch_info: PayChInfo {
                    ch_id: ChannelId::default(),
                    bal_info: BalInfo::default(),
                    version: "1".into(),
                },
                kind,
                expiry: 0,
                error: None,
            })
        };
        assert!(update(UpdateKind::Closed).is_terminal());
        assert!(!update(UpdateKind::Open).is_terminal());
        assert!(!update(UpdateKind::Final).is_terminal());
    }

    #[test]
    fn adjudicator_notification_json_shape() {
        let json = serde_json::to_value(concluded()).unwrap();
        assert_eq!(json["type"], "adjudicator");
        assert_eq!(json["event"]["event"], "concluded");
        assert_eq!(json["event"]["version"], 4);
    }

    #[test]
    fn error_notification_flattens_api_error() {
        let json = serde_json::to_value(Notification::Error(ApiError::internal("gone"))).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "unknown_internal");
    }
}
