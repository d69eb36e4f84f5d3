use futures::{future, Future, Stream};
use hyper::header::AUTHORIZATION;
use hyper::{Body, Client as HyperClient, Method, Request, StatusCode};
use hyper_rustls::HttpsConnector;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use crate::config::Config;
use crate::error::{Error, ErrorBody};
use crate::rest::RestStore;
use crate::session::SessionHub;
use crate::storage::RestStorage;
use crate::store::BoxFuture;

use std::fmt;

const DNS_WORKER_THREADS: usize = 4;
const API_KEY: &str = "apikey";

pub(crate) type Headers = Vec<(&'static str, String)>;

/// Raw response from the backend after the status has been checked.
pub(crate) struct Reply {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        serde_json::from_slice(&self.body).map_err(Error::from)
    }
}

#[derive(Clone)]
pub(crate) struct HttpClient {
    base_url: Url,
    api_key: String,
    hyper: HyperClient<HttpsConnector<hyper::client::HttpConnector>, hyper::Body>,
}

impl HttpClient {
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Sends a request to `path` (relative to the backend root). Requests
    /// without a session token are authorized with the anonymous key.
    pub fn send(
        &self,
        method: Method,
        path: &str,
        bearer: Option<String>,
        headers: Headers,
        body: Body,
    ) -> BoxFuture<Reply> {
        let url = match self.base_url.join(path) {
            Ok(url) => url,
            Err(err) => return Box::new(future::err(Error::from(err))),
        };

        let token = bearer.unwrap_or_else(|| self.api_key.clone());
        let mut request = Request::builder();
        request
            .method(method.clone())
            .uri(url.as_str())
            .header(API_KEY, self.api_key.as_str())
            .header(AUTHORIZATION, format!("Bearer {}", token));
        for (name, value) in headers {
            request.header(name, value.as_str());
        }
        let request = match request.body(body) {
            Ok(request) => request,
            Err(err) => return Box::new(future::err(Error::from(err))),
        };

        debug!(method = %method, url = %url, "sending request");
        let response = self
            .hyper
            .request(request)
            .map_err(Error::from)
            .and_then(|res| {
                let status = res.status();
                res.into_body()
                    .concat2()
                    .map_err(Error::from)
                    .map(move |body| Reply {
                        status,
                        body: body.to_vec(),
                    })
            })
            .and_then(move |reply| {
                if reply.status.is_success() {
                    Ok(reply)
                } else {
                    let error = ErrorBody::from_response(reply.status, &reply.body);
                    warn!(
                        method = %method,
                        url = %url,
                        status = reply.status.as_u16(),
                        "request failed: {}",
                        error.message
                    );
                    Err(Error::Response(error))
                }
            });

        Box::new(response)
    }

    pub fn send_json(
        &self,
        method: Method,
        path: &str,
        bearer: Option<String>,
        mut headers: Headers,
        body: &serde_json::Value,
    ) -> BoxFuture<Reply> {
        let body = match serde_json::to_vec(body) {
            Ok(body) => body,
            Err(err) => return Box::new(future::err(Error::from(err))),
        };
        headers.push(("content-type", "application/json".to_string()));
        self.send(method, path, bearer, headers, Body::from(body))
    }
}

/// Entry point to the hosted backend.
///
/// The client itself holds no user state: the current session lives in the
/// `SessionHub` it was built with, and every request made through it picks
/// up the session's access token at send time.
#[derive(Clone)]
pub struct Client {
    http: HttpClient,
    session: SessionHub,
    redirect_url: Url,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "BlogClient({})", self.http.base_url)
    }
}

impl Client {
    pub fn new(config: &Config, session: SessionHub) -> Result<Self, Error> {
        let url = &config.backend_url;
        let loopback = match url.host_str() {
            Some("localhost") | Some("127.0.0.1") | Some("[::1]") => true,
            _ => false,
        };
        if url.scheme() != "https" && !(url.scheme() == "http" && loopback) {
            return Err(Error::InvalidUrl);
        }

        let https = HttpsConnector::new(DNS_WORKER_THREADS);
        let client: HyperClient<_, hyper::Body> = HyperClient::builder().build(https);

        Ok(Client {
            http: HttpClient {
                base_url: url.join("/")?,
                api_key: config.anon_key.clone(),
                hyper: client,
            },
            session,
            redirect_url: config.redirect_url.clone(),
        })
    }

    pub fn session(&self) -> &SessionHub {
        &self.session
    }

    pub fn store(&self) -> RestStore {
        RestStore::new(self.http.clone(), self.session.clone())
    }

    pub fn storage(&self) -> RestStorage {
        RestStorage::new(self.http.clone(), self.session.clone())
    }

    pub(crate) fn http(&self) -> &HttpClient {
        &self.http
    }

    pub(crate) fn redirect_url(&self) -> &Url {
        &self.redirect_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> Config {
        Config::from_lookup(|key| match key {
            "BLOG_BACKEND_URL" => Some(url.to_string()),
            "BLOG_ANON_KEY" => Some("anon".to_string()),
            _ => None,
        })
        .unwrap()
    }

    #[test]
    fn requires_https_outside_loopback() {
        match Client::new(&config("http://blog.example.com"), SessionHub::new()) {
            Err(Error::InvalidUrl) => {}
            other => panic!("expected InvalidUrl, got {:?}", other),
        }
        assert!(Client::new(&config("https://blog.example.com"), SessionHub::new()).is_ok());
        assert!(Client::new(&config("http://localhost:54321"), SessionHub::new()).is_ok());
    }
}
