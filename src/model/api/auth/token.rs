use std::marker::PhantomData;

use chrono::{serde::ts_seconds, DateTime, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, TokenData, Validation};
use rocket::{
    http::{Cookie, SameSite, Status},
    outcome::{try_outcome, IntoOutcome},
    request::{FromRequest, Outcome},
    time::Duration,
    Request, State,
};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::Error;
use crate::model::{common::role::OperatorRole, db::admin::Operator, mongodb::Id};
use crate::voting::VotingCore;

use super::user::Clearance;

pub const AUTH_TOKEN_COOKIE: &str = "auth_token";

/// An authentication token representing a specific operator, valid for
/// endpoints demanding clearance `C`.
#[derive(Serialize, Deserialize)]
pub struct AuthToken<C> {
    pub id: Id,
    #[serde(rename = "rol")]
    pub role: OperatorRole,
    #[serde(skip)]
    phantom: PhantomData<C>,
}

impl<C> AuthToken<C> {
    /// Create a new [`AuthToken`] for the given operator.
    pub fn new(operator: &Operator) -> Self {
        Self {
            id: operator.id,
            role: operator.role,
            phantom: PhantomData,
        }
    }

    #[allow(clippy::missing_panics_doc)]
    /// Serialize this token into a cookie.
    pub fn into_cookie(self, config: &Config) -> Cookie<'static> {
        let claims = Claims {
            token: self,
            expire_at: Utc::now() + config.auth_ttl(),
        };

        let token = jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(config.jwt_secret()),
        )
        .expect("JWT encoding is infallible with default settings");

        Cookie::build(AUTH_TOKEN_COOKIE, token)
            .max_age(Duration::seconds(config.auth_ttl().num_seconds()))
            .http_only(true)
            .same_site(SameSite::Strict)
            .finish()
    }

    /// Deserialize a token from a cookie.
    pub fn from_cookie(cookie: &Cookie<'static>, config: &Config) -> Result<Self, Error> {
        let token = jsonwebtoken::decode(
            cookie.value(),
            &DecodingKey::from_secret(config.jwt_secret()),
            &Validation::default(),
        )
        .map(|claims: TokenData<Claims<C>>| claims.claims.token)?;
        Ok(token)
    }
}

/// Cookie claims: the token itself plus an expiry datetime.
#[derive(Serialize, Deserialize)]
struct Claims<C> {
    #[serde(flatten, bound = "")]
    token: AuthToken<C>,
    #[serde(rename = "exp", with = "ts_seconds")]
    expire_at: DateTime<Utc>,
}

#[rocket::async_trait]
impl<'r, C> FromRequest<'r> for AuthToken<C>
where
    C: Clearance + Send,
{
    type Error = Error;

    /// Get an [`AuthToken`] from the cookie and check that the operator it
    /// names still exists and has sufficient clearance. The role is re-read
    /// from storage, so demotions take effect immediately.
    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        // Unwrap is safe as `Config` and `VotingCore` are always managed.
        let config = req.guard::<&State<Config>>().await.unwrap();
        let core = req.guard::<&State<VotingCore>>().await.unwrap();

        // Forward to any routes that do not require an authentication token.
        let cookie = try_outcome!(req.cookies().get(AUTH_TOKEN_COOKIE).or_forward(()));

        // Decode the token.
        let mut token: Self = try_outcome!(Self::from_cookie(cookie, config).or_forward(()));

        // Check the operator actually exists.
        match core.store().operator(token.id).await {
            Ok(Some(operator)) => {
                token.role = operator.role;
                if C::permits(token.role) {
                    Outcome::Success(token)
                } else {
                    Outcome::Forward(())
                }
            }
            Ok(None) => Outcome::Forward(()),
            Err(e) => Outcome::Failure((Status::InternalServerError, e.into())),
        }
    }
}
