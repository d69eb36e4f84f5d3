use url::Url;

use crate::error::Error;

use std::env;

pub const BACKEND_URL: &str = "BLOG_BACKEND_URL";
pub const ANON_KEY: &str = "BLOG_ANON_KEY";
pub const SITE_URL: &str = "BLOG_SITE_URL";

const DEFAULT_SITE_URL: &str = "http://localhost:3000";
const CALLBACK_PATH: &str = "auth/callback";

#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the hosted backend, e.g. `https://abc.supabase.co`.
    pub backend_url: Url,
    /// Public (anonymous) API key sent with every request.
    pub anon_key: String,
    /// Where the auth service sends the browser after OAuth and email
    /// confirmation.
    pub redirect_url: Url,
}

impl Config {
    /// Reads the configuration from the process environment. Call
    /// `dotenv::dotenv()` first to pick up a `.env` file.
    pub fn from_env() -> Result<Self, Error> {
        Config::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| Error::Config(format!("{} must be set", key)))
        };

        let backend_url = required(BACKEND_URL)?
            .parse::<Url>()
            .map_err(|err| Error::Config(format!("{} is invalid: {}", BACKEND_URL, err)))?;
        let anon_key = required(ANON_KEY)?;

        let site = lookup(SITE_URL).unwrap_or_else(|| DEFAULT_SITE_URL.to_string());
        let site = site
            .parse::<Url>()
            .map_err(|err| Error::Config(format!("{} is invalid: {}", SITE_URL, err)))?;
        let redirect_url = site.join("/")?.join(CALLBACK_PATH)?;

        Ok(Config {
            backend_url,
            anon_key,
            redirect_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn builds_callback_from_site_url() {
        let config = Config::from_lookup(lookup(&[
            (BACKEND_URL, "https://abc.supabase.co"),
            (ANON_KEY, "public-anon-key"),
            (SITE_URL, "https://blog.example.com/some/page"),
        ]))
        .unwrap();
        assert_eq!(config.redirect_url.as_str(), "https://blog.example.com/auth/callback");
        assert_eq!(config.anon_key, "public-anon-key");
    }

    #[test]
    fn defaults_site_url() {
        let config = Config::from_lookup(lookup(&[
            (BACKEND_URL, "https://abc.supabase.co"),
            (ANON_KEY, "k"),
        ]))
        .unwrap();
        assert_eq!(config.redirect_url.as_str(), "http://localhost:3000/auth/callback");
    }

    #[test]
    fn missing_key_is_reported() {
        let vars = lookup(&[(BACKEND_URL, "https://abc.supabase.co")]);
        let err = Config::from_lookup(vars).unwrap_err();
        match err {
            Error::Config(message) => assert!(message.contains(ANON_KEY)),
            other => panic!("unexpected error {:?}", other),
        }
    }
}
