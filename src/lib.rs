#[macro_use]
extern crate rocket;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use rocket::{Build, Rocket};

use crate::config::{ConfigFairing, StoreFairing};
use crate::logging::LoggerFairing;

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod store;
pub mod voting;

pub use config::Config;

/// Build the server, with the store chosen by configuration.
pub fn build() -> Rocket<Build> {
    rocket::build()
        .mount("/", api::routes())
        .register("/", api::catchers())
        .attach(LoggerFairing)
        .attach(ConfigFairing)
        .attach(StoreFairing)
}

/// Build a server over an existing store, with fixed test configuration.
#[cfg(test)]
pub(crate) fn rocket_for_store(store: store::DynStore) -> Rocket<Build> {
    use rocket::fairing::AdHoc;

    let figment = rocket::Config::figment()
        .merge(("log_level", "off"))
        .merge(("auth_ttl", 3600))
        .merge(("token_length", 8))
        .merge(("segregate_slates", true))
        .merge(("jwt_secret", "test jwt secret"))
        .merge(("token_secret", "test token secret"))
        .merge(("bootstrap_username", "returning-officer"))
        .merge(("bootstrap_password", "totallysecurepassword"));

    rocket::custom(figment)
        .mount("/", api::routes())
        .register("/", api::catchers())
        .attach(ConfigFairing)
        .attach(AdHoc::try_on_ignite("Test store", move |rocket| {
            config::attach_store(rocket, store)
        }))
}
