//! Engine event → wire notification translation.

use paych_sdk::objects::{AdjudicatorNotif, Notification, ProposalNotif, UpdateKind, UpdateNotif};

use super::types::{AdjudicatorEvent, ProposalEvent, Timeout, UpdateEvent, UpdatePhase};

impl From<UpdatePhase> for UpdateKind {
    fn from(value: UpdatePhase) -> Self {
        match value {
            UpdatePhase::Open => UpdateKind::Open,
            UpdatePhase::Final => UpdateKind::Final,
            UpdatePhase::Closed => UpdateKind::Closed,
        }
    }
}

impl Timeout {
    /// Unix timestamp of the timeout; `0` once elapsed.
    pub fn unix_timestamp(self) -> i64 {
        match self {
            Timeout::Elapsed => 0,
            Timeout::At(at) => at.unix_timestamp(),
        }
    }
}

impl From<ProposalEvent> for Notification {
    fn from(event: ProposalEvent) -> Self {
        Notification::Proposal(ProposalNotif {
            proposal_id: event.proposal_id,
            opening_bal_info: event.opening_balances,
            challenge_dur_secs: event.challenge_duration.as_secs(),
            expiry: event.expiry.unix_timestamp(),
        })
    }
}

impl From<UpdateEvent> for Notification {
    fn from(event: UpdateEvent) -> Self {
        Notification::Update(UpdateNotif {
            update_id: event.update_id,
            proposed_ch_info: event.proposed,
            kind: event.phase.into(),
            expiry: event.expiry.unix_timestamp(),
            error: event.error.map(|e| e.0),
        })
    }
}

impl From<AdjudicatorEvent> for AdjudicatorNotif {
    fn from(event: AdjudicatorEvent) -> Self {
        match event {
            AdjudicatorEvent::Registered { base, state } => AdjudicatorNotif::Registered {
                ch_id: base.channel_id,
                timeout: base.timeout.unix_timestamp(),
                version: base.version,
                state,
            },
            AdjudicatorEvent::Progressed { base, state, idx } => AdjudicatorNotif::Progressed {
                ch_id: base.channel_id,
                timeout: base.timeout.unix_timestamp(),
                version: base.version,
                state,
                idx,
            },
            AdjudicatorEvent::Concluded { base } => AdjudicatorNotif::Concluded {
                ch_id: base.channel_id,
                timeout: base.timeout.unix_timestamp(),
                version: base.version,
            },
        }
    }
}

impl From<AdjudicatorEvent> for Notification {
    fn from(event: AdjudicatorEvent) -> Self {
        Notification::Adjudicator {
            event: event.into(),
        }
    }
}
