use std::sync::Arc;

use chrono::{DateTime, Utc};
use data_encoding::HEXLOWER;
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;

use crate::{
    model::{db::voter::Credential, mongodb::Id},
    store::DynStore,
};

use super::VoteError;

type HmacSha256 = Hmac<Sha256>;

/// Characters a token is drawn from. Upper-case only, so tokens can be read
/// out loud and typed in either case.
pub const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Shortest token length we accept in configuration.
pub const MIN_TOKEN_LENGTH: usize = 6;

/// Canonical form of a token as typed by a voter.
pub fn normalize_token(token: &str) -> String {
    token.trim().to_ascii_uppercase()
}

/// Issues, rotates and verifies voter tokens.
///
/// Only an HMAC of each token is stored, keyed from configuration.
#[derive(Clone)]
pub struct TokenCredentialStore {
    store: DynStore,
    key: Arc<[u8]>,
    length: usize,
}

impl TokenCredentialStore {
    pub fn new(store: DynStore, key: &[u8], length: usize) -> Self {
        Self {
            store,
            key: key.into(),
            length: length.max(MIN_TOKEN_LENGTH),
        }
    }

    fn mac(&self, token: &str) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("HMAC can take key of any size");
        mac.update(normalize_token(token).as_bytes());
        mac
    }

    fn generate(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..self.length)
            .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
            .collect()
    }

    /// Build a fresh credential, returning it along with its plaintext token.
    pub fn new_credential(&self, now: DateTime<Utc>) -> (Credential, String) {
        let token = self.generate();
        let credential = self.credential_for(&token, now);
        (credential, token)
    }

    /// Build the credential for a known token.
    pub fn credential_for(&self, token: &str, now: DateTime<Utc>) -> Credential {
        Credential {
            secret_hash: HEXLOWER.encode(&self.mac(token).finalize().into_bytes()),
            last_issued: normalize_token(token),
            issued_at: now,
        }
    }

    /// Give the voter a new token, replacing any previous one outright.
    pub async fn issue(&self, voter: Id, now: DateTime<Utc>) -> Result<String, VoteError> {
        let (credential, token) = self.new_credential(now);
        if !self.store.replace_credential(voter, &credential).await? {
            return Err(VoteError::VoterNotFound(voter));
        }
        info!("Issued a new token for voter {voter}");
        Ok(token)
    }

    /// Same as [`Self::issue`]; the old token stops working immediately.
    pub async fn rotate(&self, voter: Id, now: DateTime<Utc>) -> Result<String, VoteError> {
        self.issue(voter, now).await
    }

    /// Check a token against a stored credential in constant time.
    pub fn matches(&self, credential: &Credential, token: &str) -> bool {
        match HEXLOWER.decode(credential.secret_hash.as_bytes()) {
            Ok(expected) => self.mac(token).verify_slice(&expected).is_ok(),
            Err(e) => {
                error!("Stored token hash is not valid hex: {e}");
                false
            }
        }
    }

    /// Check a token for the given voter. A voter who was never issued a
    /// token matches nothing.
    pub async fn verify(&self, voter: Id, token: &str) -> Result<bool, VoteError> {
        let voter = self
            .store
            .voter(voter)
            .await?
            .ok_or(VoteError::VoterNotFound(voter))?;
        Ok(voter
            .credential
            .as_ref()
            .map_or(false, |credential| self.matches(credential, token)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::{
        model::{common::candidate::Slate, db::voter::VoterCore},
        store::MemoryStore,
    };

    use super::*;

    fn credentials() -> (DynStore, TokenCredentialStore) {
        let store: DynStore = Arc::new(MemoryStore::new());
        let credentials = TokenCredentialStore::new(store.clone(), b"test key", 8);
        (store, credentials)
    }

    #[test]
    fn generated_tokens_use_alphabet() {
        let (_, credentials) = credentials();
        let token = credentials.generate();
        assert_eq!(token.len(), 8);
        assert!(token.bytes().all(|b| TOKEN_ALPHABET.contains(&b)));
    }

    #[test]
    fn length_has_a_floor() {
        let store: DynStore = Arc::new(MemoryStore::new());
        let credentials = TokenCredentialStore::new(store, b"k", 2);
        assert_eq!(credentials.generate().len(), MIN_TOKEN_LENGTH);
    }

    #[test]
    fn matching_ignores_case_and_whitespace() {
        let (_, credentials) = credentials();
        let credential = credentials.credential_for("A1B2C3", Utc::now());
        assert!(credentials.matches(&credential, "A1B2C3"));
        assert!(credentials.matches(&credential, " a1b2c3\n"));
        assert!(!credentials.matches(&credential, "A1B2C4"));
        assert!(!credentials.matches(&credential, ""));
        assert_ne!(credential.secret_hash, "A1B2C3");
    }

    #[test]
    fn hash_depends_on_key() {
        let (_, credentials) = credentials();
        let store: DynStore = Arc::new(MemoryStore::new());
        let other = TokenCredentialStore::new(store, b"another key", 8);
        let credential = credentials.credential_for("A1B2C3", Utc::now());
        assert!(!other.matches(&credential, "A1B2C3"));
    }

    #[test]
    fn corrupt_hash_never_matches() {
        let (_, credentials) = credentials();
        let mut credential = credentials.credential_for("A1B2C3", Utc::now());
        credential.secret_hash = "not hex".to_string();
        assert!(!credentials.matches(&credential, "A1B2C3"));
    }

    #[rocket::async_test]
    async fn rotation_invalidates_old_token() {
        let (store, credentials) = credentials();
        let voter = store
            .insert_voter(&VoterCore::student_example("S-1", "7A", Slate::Junior))
            .await
            .unwrap();
        assert!(!credentials.verify(voter, "ANYTHING").await.unwrap());

        let first = credentials.issue(voter, Utc::now()).await.unwrap();
        assert!(credentials.verify(voter, &first).await.unwrap());

        let second = credentials.rotate(voter, Utc::now()).await.unwrap();
        assert!(credentials.verify(voter, &second).await.unwrap());
        if first != second {
            assert!(!credentials.verify(voter, &first).await.unwrap());
        }
        let stored = store.voter(voter).await.unwrap().unwrap();
        assert_eq!(stored.credential.as_ref().unwrap().last_issued, second);
    }

    #[rocket::async_test]
    async fn unknown_voter() {
        let (_, credentials) = credentials();
        let missing = Id::new();
        assert!(matches!(
            credentials.issue(missing, Utc::now()).await,
            Err(VoteError::VoterNotFound(id)) if id == missing
        ));
        assert!(matches!(
            credentials.verify(missing, "A1B2C3").await,
            Err(VoteError::VoterNotFound(_))
        ));
    }
}
