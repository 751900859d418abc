//! Room participants and their capabilities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::token::VideoGrant;
use crate::types::ParticipantId;

/// What a participant is allowed to do, derived from its join token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub can_publish: bool,
    pub can_subscribe: bool,
    pub can_publish_data: bool,
    /// Hidden participants are omitted from listings.
    pub hidden: bool,
}

impl From<&VideoGrant> for Capabilities {
    fn from(grant: &VideoGrant) -> Self {
        Self {
            can_publish: grant.can_publish,
            can_subscribe: grant.can_subscribe,
            can_publish_data: grant.can_publish_data,
            hidden: grant.hidden,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantState {
    Joined,
    Active,
    Disconnected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub username: String,
    pub capabilities: Capabilities,
    pub state: ParticipantState,
    pub joined_at: DateTime<Utc>,
}

impl Participant {
    pub fn new(
        id: impl Into<ParticipantId>,
        username: impl Into<String>,
        capabilities: Capabilities,
    ) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            capabilities,
            state: ParticipantState::Joined,
            joined_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities_mirror_grant() {
        let grant = VideoGrant {
            can_publish: true,
            can_subscribe: true,
            hidden: true,
            ..Default::default()
        };
        let caps = Capabilities::from(&grant);
        assert!(caps.can_publish);
        assert!(caps.can_subscribe);
        assert!(!caps.can_publish_data);
        assert!(caps.hidden);
    }
}
