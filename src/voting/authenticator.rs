use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{model::common::voter::VoterHandle, store::DynStore};

use super::{
    credentials::TokenCredentialStore,
    phase::ElectionPhaseController,
    registry::{registries, VoterRegistry},
    VoteError,
};

/// Turns a claimed identity and token into a [`VoterHandle`].
///
/// Authentication is read-only and may be retried freely.
#[derive(Clone)]
pub struct VoterAuthenticator {
    phase: ElectionPhaseController,
    credentials: TokenCredentialStore,
    registries: Arc<[Box<dyn VoterRegistry>]>,
}

impl VoterAuthenticator {
    pub fn new(
        store: &DynStore,
        phase: ElectionPhaseController,
        credentials: TokenCredentialStore,
    ) -> Self {
        Self {
            phase,
            credentials,
            registries: registries(store).into(),
        }
    }

    pub async fn authenticate(
        &self,
        identity: &str,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<VoterHandle, VoteError> {
        if !self.phase.is_open(now).await? {
            debug!("Rejected authentication: election closed");
            return Err(VoteError::ElectionClosed);
        }

        for registry in self.registries.iter() {
            let Some(voter) = registry.find_by_key(identity).await? else {
                continue;
            };
            // First match wins, even if its token is wrong: identities in
            // later categories are shadowed.
            let verified = voter
                .credential
                .as_ref()
                .map_or(false, |credential| self.credentials.matches(credential, token));
            if !verified {
                debug!("Rejected authentication: bad token for {}", voter.id);
                return Err(VoteError::Unauthorized);
            }
            if !registry.status_allows_voting(&voter) {
                debug!("Rejected authentication: {} is inactive", voter.id);
                return Err(VoteError::Inactive);
            }
            return Ok(VoterHandle {
                voter_id: voter.id,
                category: registry.category(),
                has_voted: registry.has_voted(&voter),
            });
        }

        debug!("Rejected authentication: unknown identity");
        Err(VoteError::Unauthorized)
    }
}
