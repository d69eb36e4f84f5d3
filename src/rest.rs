use futures::{future, Future};
use hyper::{Body, Method};
use serde_json::Value;

use crate::client::{Headers, HttpClient};
use crate::error::Error;
use crate::query::Query;
use crate::session::SessionHub;
use crate::store::{BoxFuture, Store};

const REST_PATH: &str = "rest/v1/";
const RETURN_ROWS: &str = "return=representation";
const MERGE_ROWS: &str = "resolution=merge-duplicates,return=representation";

/// `Store` backed by the hosted PostgREST endpoint.
#[derive(Clone)]
pub struct RestStore {
    http: HttpClient,
    session: SessionHub,
}

impl RestStore {
    pub(crate) fn new(http: HttpClient, session: SessionHub) -> Self {
        RestStore { http, session }
    }

    fn path(table: &str, query_string: &str) -> String {
        if query_string.is_empty() {
            format!("{}{}", REST_PATH, table)
        } else {
            format!("{}{}?{}", REST_PATH, table, query_string)
        }
    }

    fn rows(
        &self,
        method: Method,
        path: String,
        headers: Headers,
        body: Option<Value>,
    ) -> BoxFuture<Vec<Value>> {
        let token = self.session.access_token();
        let reply = match body {
            Some(body) => self.http.send_json(method, &path, token, headers, &body),
            None => self.http.send(method, &path, token, headers, Body::empty()),
        };
        Box::new(reply.and_then(|reply| reply.json::<Vec<Value>>()))
    }

    fn first_row(rows: BoxFuture<Vec<Value>>) -> BoxFuture<Value> {
        Box::new(rows.and_then(|rows| rows.into_iter().next().ok_or(Error::EmptyResponse)))
    }
}

impl Store for RestStore {
    fn select(&self, query: &Query) -> BoxFuture<Vec<Value>> {
        let path = RestStore::path(query.table_name(), &query.to_query_string());
        self.rows(Method::GET, path, Vec::new(), None)
    }

    fn insert(&self, table: &str, row: Value) -> BoxFuture<Value> {
        let headers = vec![("prefer", RETURN_ROWS.to_string())];
        let body = Some(Value::Array(vec![row]));
        let rows = self.rows(Method::POST, RestStore::path(table, ""), headers, body);
        RestStore::first_row(rows)
    }

    fn update(&self, query: &Query, patch: Value) -> BoxFuture<Vec<Value>> {
        if !query.is_filtered() {
            return Box::new(future::err(Error::UnfilteredMutation(
                "update",
                query.table_name().to_string(),
            )));
        }
        let path = RestStore::path(query.table_name(), &query.to_filter_string());
        let headers = vec![("prefer", RETURN_ROWS.to_string())];
        self.rows(Method::PATCH, path, headers, Some(patch))
    }

    fn upsert(&self, table: &str, row: Value, on_conflict: &[&str]) -> BoxFuture<Value> {
        let conflict = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("on_conflict", &on_conflict.join(","))
            .finish();
        let headers = vec![("prefer", MERGE_ROWS.to_string())];
        let rows = self.rows(
            Method::POST,
            RestStore::path(table, &conflict),
            headers,
            Some(Value::Array(vec![row])),
        );
        RestStore::first_row(rows)
    }

    fn delete(&self, query: &Query) -> BoxFuture<()> {
        if !query.is_filtered() {
            return Box::new(future::err(Error::UnfilteredMutation(
                "delete",
                query.table_name().to_string(),
            )));
        }
        let path = RestStore::path(query.table_name(), &query.to_filter_string());
        let token = self.session.access_token();
        Box::new(
            self.http
                .send(Method::DELETE, &path, token, Vec::new(), Body::empty())
                .map(|_| ()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_table_paths() {
        assert_eq!(RestStore::path("posts", ""), "rest/v1/posts");
        assert_eq!(
            RestStore::path("votes", "select=vote_type&post_id=eq.1"),
            "rest/v1/votes?select=vote_type&post_id=eq.1"
        );
    }
}
