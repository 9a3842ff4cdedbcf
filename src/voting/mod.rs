//! The vote-casting core.
//!
//! Everything here works against an injected [`DynStore`]; there is no
//! global state, so any number of independent cores can coexist (one per
//! test, for instance).

use chrono::{DateTime, Utc};

use crate::{
    model::{
        api::admin::VoterSpec,
        common::role::OperatorRole,
        db::{
            candidate::Candidate,
            voter::{NewVoter, Voter},
        },
    },
    store::DynStore,
};

mod authenticator;
mod credentials;
mod error;
mod ledger;
mod phase;
mod registry;
mod tally;
mod visibility;

pub use authenticator::VoterAuthenticator;
pub use credentials::{normalize_token, TokenCredentialStore, MIN_TOKEN_LENGTH, TOKEN_ALPHABET};
pub use error::VoteError;
pub use ledger::VoteLedger;
pub use phase::ElectionPhaseController;
pub use registry::{registries, registry_for, VoterRegistry};
pub use tally::TallyQueryService;
pub use visibility::can_view_results;

/// Tunables for the core, normally taken from the application config.
#[derive(Debug, Clone)]
pub struct CoreSettings {
    /// HMAC key for token hashes.
    pub token_key: Vec<u8>,
    pub token_length: usize,
    pub segregate_slates: bool,
}

/// All voting services, sharing one store.
#[derive(Clone)]
pub struct VotingCore {
    store: DynStore,
    credentials: TokenCredentialStore,
    phase: ElectionPhaseController,
    authenticator: VoterAuthenticator,
    ledger: VoteLedger,
    tallies: TallyQueryService,
}

impl VotingCore {
    pub fn new(store: DynStore, settings: &CoreSettings) -> Self {
        let credentials =
            TokenCredentialStore::new(store.clone(), &settings.token_key, settings.token_length);
        let phase = ElectionPhaseController::new(store.clone());
        let authenticator = VoterAuthenticator::new(&store, phase.clone(), credentials.clone());
        Self {
            credentials,
            authenticator,
            ledger: VoteLedger::new(store.clone(), settings.segregate_slates),
            tallies: TallyQueryService::new(store.clone()),
            phase,
            store,
        }
    }

    pub fn store(&self) -> &DynStore {
        &self.store
    }

    pub fn credentials(&self) -> &TokenCredentialStore {
        &self.credentials
    }

    pub fn phase(&self) -> &ElectionPhaseController {
        &self.phase
    }

    pub fn authenticator(&self) -> &VoterAuthenticator {
        &self.authenticator
    }

    pub fn ledger(&self) -> &VoteLedger {
        &self.ledger
    }

    pub fn tallies(&self) -> &TallyQueryService {
        &self.tallies
    }

    /// Add a voter to its category's registry and issue its first token.
    pub async fn register_voter(
        &self,
        spec: VoterSpec,
        now: DateTime<Utc>,
    ) -> Result<(Voter, String), VoteError> {
        let profile = registry::profile_for(spec.category, &spec.key, spec.active).ok_or_else(
            || VoteError::InvalidRecord(format!("'{}' is not a valid {} key", spec.key, spec.category)),
        )?;
        if spec.name.trim().is_empty() {
            return Err(VoteError::InvalidRecord("voter name is empty".to_string()));
        }
        let (credential, token) = self.credentials.new_credential(now);
        let voter = NewVoter {
            profile,
            name: spec.name.trim().to_string(),
            cohort: spec.cohort.map(|cohort| cohort.trim().to_string()),
            slate: spec.slate,
            has_voted: false,
            credential: Some(credential),
        };
        let id = self.store.insert_voter(&voter).await?;
        info!("Registered {} voter {id}", voter.category());
        Ok((Voter { id, voter }, token))
    }

    pub async fn add_candidate(&self, candidate: Candidate) -> Result<Candidate, VoteError> {
        if candidate.vote_count != 0 {
            return Err(VoteError::InvalidRecord(
                "new candidates start with no votes".to_string(),
            ));
        }
        self.store.insert_candidate(&candidate).await?;
        info!("Added candidate {} on the {} slate", candidate.id, candidate.slate);
        Ok(candidate)
    }

    /// Apply [`can_view_results`] to the election's current phase.
    pub async fn results_visible_to(
        &self,
        role: OperatorRole,
        now: DateTime<Utc>,
    ) -> Result<bool, VoteError> {
        Ok(can_view_results(role, self.phase.is_open(now).await?))
    }
}

#[cfg(test)]
impl CoreSettings {
    pub fn example() -> Self {
        Self {
            token_key: b"example token key".to_vec(),
            token_length: 8,
            segregate_slates: true,
        }
    }
}
