use std::sync::Arc;

use chrono::Duration;
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::{
    model::{
        api::admin::{AdminCredentials, OperatorSpec},
        common::role::OperatorRole,
        db::admin::NewOperator,
    },
    store::{DynStore, MemoryStore, MongoStore, StoreError},
    voting::{CoreSettings, VotingCore, MIN_TOKEN_LENGTH},
};

fn default_token_length() -> usize {
    8
}

fn default_segregate_slates() -> bool {
    true
}

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Deserialize)]
pub struct Config {
    // non-secrets
    auth_ttl: u32,
    #[serde(default = "default_token_length")]
    token_length: usize,
    #[serde(default = "default_segregate_slates")]
    segregate_slates: bool,
    bootstrap_username: String,
    // secrets
    jwt_secret: String,
    token_secret: String,
    bootstrap_password: String,
}

impl Config {
    /// Valid lifetime of auth token cookies in seconds.
    pub fn auth_ttl(&self) -> Duration {
        Duration::seconds(self.auth_ttl.into())
    }

    /// Secret key used to encrypt JWTs.
    pub fn jwt_secret(&self) -> &[u8] {
        self.jwt_secret.as_bytes()
    }

    /// Settings for the voting core.
    pub fn core_settings(&self) -> CoreSettings {
        CoreSettings {
            token_key: self.token_secret.as_bytes().to_vec(),
            token_length: self.token_length,
            segregate_slates: self.segregate_slates,
        }
    }

    /// The superadmin to create if there are no operators at all.
    fn bootstrap_operator(&self) -> Option<NewOperator> {
        let spec = OperatorSpec {
            credentials: AdminCredentials {
                username: self.bootstrap_username.clone(),
                password: self.bootstrap_password.clone(),
            },
            role: OperatorRole::SuperAdmin,
        };
        NewOperator::try_from(spec).ok()
    }
}

/// A fairing that loads the application config and puts it in managed state.
/// This could easily be achieved using `AdHoc::config`, but is written out
/// explicitly for symmetry with the other fairings and control over error
/// messages.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        if config.token_length < MIN_TOKEN_LENGTH {
            error!("`token_length` must be at least {MIN_TOKEN_LENGTH}");
            return Err(rocket);
        }

        // Manage the state.
        rocket = rocket.manage(config);
        Ok(rocket)
    }
}

/// Which storage backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Mongodb,
    Memory,
}

/// Configuration for the store.
#[derive(Deserialize)]
struct StoreConfig {
    store: StoreKind,
    #[serde(default)]
    db_name: Option<String>,
    // secrets
    #[serde(default)]
    db_uri: Option<String>,
}

/// A fairing that connects to the configured store, performs any setup
/// necessary, and places the store and a [`VotingCore`] built on it into
/// managed state. Must be attached after [`ConfigFairing`].
pub struct StoreFairing;

#[rocket::async_trait]
impl Fairing for StoreFairing {
    fn info(&self) -> Info {
        Info {
            name: "Store",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<StoreConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load store config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };

        let store: DynStore = match config.store {
            StoreKind::Memory => {
                warn!("Using the in-memory store: nothing will be persisted, and only one instance may run");
                Arc::new(MemoryStore::new())
            }
            StoreKind::Mongodb => {
                let Some(db_uri) = config.db_uri else {
                    error!("`db_uri` must be set when `store` is \"mongodb\"");
                    return Err(rocket);
                };
                let db_name = config.db_name.unwrap_or_else(|| "ballotbox".to_string());
                info!("Loaded database config, connecting...");
                match MongoStore::connect(&db_uri, &db_name).await {
                    Ok(store) => Arc::new(store),
                    Err(e) => {
                        error!("Failed to connect to database: {e}");
                        return Err(rocket);
                    }
                }
            }
        };

        attach_store(rocket, store).await
    }
}

/// Put the given store and a core built on it into managed state.
pub(crate) async fn attach_store(rocket: Rocket<Build>, store: DynStore) -> rocket::fairing::Result {
    let Some(config) = rocket.state::<Config>() else {
        error!("Application config must be loaded before the store");
        return Err(rocket);
    };

    if let Err(e) = ensure_operator_exists(&store, config).await {
        error!("Failed to create the bootstrap operator: {e}");
        return Err(rocket);
    }
    info!("...store online!");

    let core = VotingCore::new(store.clone(), &config.core_settings());
    Ok(rocket.manage(store).manage(core))
}

/// Ensure there is at least one operator, so that somebody can log in.
async fn ensure_operator_exists(store: &DynStore, config: &Config) -> Result<(), StoreError> {
    if !store.operators().await?.is_empty() {
        return Ok(());
    }
    let Some(operator) = config.bootstrap_operator() else {
        warn!("No operators exist and the bootstrap credentials are unusable");
        return Ok(());
    };
    match store.insert_operator(&operator).await {
        Ok(_) => {
            info!("Created bootstrap superadmin '{}'", operator.username);
            Ok(())
        }
        // Another instance got there first.
        Err(StoreError::Duplicate) => Ok(()),
        Err(e) => Err(e),
    }
}
