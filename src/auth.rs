use futures::{future, Future};
use hyper::{Body, Method};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use url::{form_urlencoded, Url};

use crate::client::Client;
use crate::error::Error;
use crate::session::{Session, SessionEvent};
use crate::store::BoxFuture;
use crate::user::User;

use std::collections::HashMap;
use std::fmt;

#[derive(Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignUpOutcome {
    /// Email confirmation is off; the user is signed in right away.
    SignedIn(Session),
    /// A confirmation link was mailed. The user can sign in once it is
    /// followed.
    ConfirmationPending(User),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthProvider {
    Google,
}

impl OAuthProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            OAuthProvider::Google => "google",
        }
    }
}

/// First half of an OAuth sign-in: the browser has to visit
/// `authorize_url`, and the provider eventually sends it back to the
/// redirect URL, which is handed to `complete`.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOAuth {
    provider: OAuthProvider,
    authorize_url: Url,
    redirect_url: Url,
}

struct CallbackTokens {
    access_token: String,
    token_type: Option<String>,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
}

impl fmt::Debug for CallbackTokens {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CallbackTokens")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

impl PendingOAuth {
    pub fn provider(&self) -> OAuthProvider {
        self.provider
    }

    pub fn authorize_url(&self) -> &Url {
        &self.authorize_url
    }

    /// Second half: exchanges the tokens carried by the callback URL for a
    /// session and publishes it.
    pub fn complete(self, client: &Client, callback: &Url) -> BoxFuture<Session> {
        let tokens = match parse_callback(&self.redirect_url, callback) {
            Ok(tokens) => tokens,
            Err(err) => {
                warn!(provider = self.provider.as_str(), "OAuth callback rejected: {}", err);
                return Box::new(future::err(err));
            }
        };

        let hub = client.session().clone();
        let session = fetch_user(client, tokens.access_token.clone()).map(move |user| {
            let session = Session {
                access_token: tokens.access_token,
                token_type: tokens.token_type,
                expires_in: tokens.expires_in,
                refresh_token: tokens.refresh_token,
                user,
            };
            hub.publish(SessionEvent::SignedIn(session.clone()));
            session
        });
        Box::new(session)
    }
}

impl Client {
    pub fn sign_in(&self, email: &str, password: &str) -> BoxFuture<Session> {
        let body = json!(Credentials { email, password });
        let hub = self.session().clone();
        let session = self
            .http()
            .send_json(Method::POST, "auth/v1/token?grant_type=password", None, Vec::new(), &body)
            .and_then(|reply| reply.json::<Session>())
            .map(move |session| {
                hub.publish(SessionEvent::SignedIn(session.clone()));
                session
            });
        Box::new(session)
    }

    pub fn sign_up(&self, email: &str, password: &str) -> BoxFuture<SignUpOutcome> {
        let body = json!(Credentials { email, password });
        let path = format!("auth/v1/signup?{}", redirect_query(self.redirect_url()));
        let hub = self.session().clone();
        let outcome = self
            .http()
            .send_json(Method::POST, &path, None, Vec::new(), &body)
            .and_then(|reply| reply.json::<Value>())
            .and_then(decode_sign_up)
            .map(move |outcome| {
                match &outcome {
                    SignUpOutcome::SignedIn(session) => {
                        hub.publish(SessionEvent::SignedIn(session.clone()))
                    }
                    SignUpOutcome::ConfirmationPending(user) => {
                        info!(user = %user.id, "sign-up awaiting email confirmation")
                    }
                }
                outcome
            });
        Box::new(outcome)
    }

    /// Ends the session. The local session is cleared even when the backend
    /// call fails, since the token is unusable either way.
    pub fn sign_out(&self) -> BoxFuture<()> {
        let hub = self.session().clone();
        let token = match hub.access_token() {
            Some(token) => token,
            None => {
                hub.publish(SessionEvent::SignedOut);
                return Box::new(future::ok(()));
            }
        };
        let result = self
            .http()
            .send(Method::POST, "auth/v1/logout", Some(token), Vec::new(), Body::empty())
            .then(move |result| {
                hub.publish(SessionEvent::SignedOut);
                result.map(|_| ())
            });
        Box::new(result)
    }

    pub fn request_password_reset(&self, email: &str) -> BoxFuture<()> {
        let body = json!({ "email": email });
        let path = format!("auth/v1/recover?{}", redirect_query(self.redirect_url()));
        Box::new(
            self.http()
                .send_json(Method::POST, &path, None, Vec::new(), &body)
                .map(|_| ()),
        )
    }

    /// Re-validates the current session against the backend. An expired or
    /// revoked token ends the session.
    pub fn refresh_user(&self) -> BoxFuture<Option<User>> {
        let hub = self.session().clone();
        let token = match hub.access_token() {
            Some(token) => token,
            None => return Box::new(future::ok(None)),
        };
        let user = fetch_user(self, token).then(move |result| match result {
            Ok(user) => Ok(Some(user)),
            Err(ref err) if err.requires_login() => {
                hub.publish(SessionEvent::SignedOut);
                Ok(None)
            }
            Err(err) => Err(err),
        });
        Box::new(user)
    }

    pub fn begin_oauth(&self, provider: OAuthProvider) -> Result<PendingOAuth, Error> {
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("provider", provider.as_str())
            .append_pair("redirect_to", self.redirect_url().as_str())
            .finish();
        let authorize_url = self
            .http()
            .base_url()
            .join(&format!("auth/v1/authorize?{}", query))?;
        Ok(PendingOAuth {
            provider,
            authorize_url,
            redirect_url: self.redirect_url().clone(),
        })
    }
}

fn fetch_user(client: &Client, token: String) -> BoxFuture<User> {
    Box::new(
        client
            .http()
            .send(Method::GET, "auth/v1/user", Some(token), Vec::new(), Body::empty())
            .and_then(|reply| reply.json::<User>()),
    )
}

fn redirect_query(redirect_url: &Url) -> String {
    form_urlencoded::Serializer::new(String::new())
        .append_pair("redirect_to", redirect_url.as_str())
        .finish()
}

fn decode_sign_up(body: Value) -> Result<SignUpOutcome, Error> {
    if body.get("access_token").is_some() {
        return Ok(SignUpOutcome::SignedIn(serde_json::from_value(body)?));
    }
    // Some versions wrap the user, others return it bare.
    let user = match body.get("user") {
        Some(user) => serde_json::from_value(user.clone())?,
        None => serde_json::from_value(body)?,
    };
    Ok(SignUpOutcome::ConfirmationPending(user))
}

fn parse_callback(redirect_url: &Url, callback: &Url) -> Result<CallbackTokens, Error> {
    if callback.origin() != redirect_url.origin() || callback.path() != redirect_url.path() {
        return Err(Error::OAuth(format!("unexpected callback URL {}", callback)));
    }

    // Tokens come back in the fragment; errors may come in either part.
    let mut params: HashMap<String, String> = callback.query_pairs().into_owned().collect();
    if let Some(fragment) = callback.fragment() {
        params.extend(form_urlencoded::parse(fragment.as_bytes()).into_owned());
    }

    if let Some(error) = params.get("error") {
        let description = params.get("error_description").unwrap_or(error);
        return Err(Error::OAuth(description.clone()));
    }

    let access_token = params
        .remove("access_token")
        .ok_or_else(|| Error::OAuth("callback carried no access token".to_string()))?;
    Ok(CallbackTokens {
        access_token,
        token_type: params.remove("token_type"),
        expires_in: params.get("expires_in").and_then(|value| value.parse().ok()),
        refresh_token: params.remove("refresh_token"),
    })
}
