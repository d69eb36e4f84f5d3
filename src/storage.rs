use chrono::{DateTime, Utc};
use futures::{future, Future};
use hyper::{Body, Method};
use url::Url;
use uuid::Uuid;

use crate::client::HttpClient;
use crate::error::{Error, ErrorBody};
use crate::session::SessionHub;
use crate::store::BoxFuture;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

const OBJECT_PATH: &str = "storage/v1/object/";
const CACHE_CONTROL: &str = "3600";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    Images,
    Videos,
}

impl Bucket {
    pub fn as_str(self) -> &'static str {
        match self {
            Bucket::Images => "images",
            Bucket::Videos => "videos",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file picked for upload.
#[derive(Clone, PartialEq)]
pub struct Upload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl fmt::Debug for Upload {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Upload")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl Upload {
    pub fn new<N: Into<String>>(file_name: N, bytes: Vec<u8>) -> Self {
        Upload {
            file_name: file_name.into(),
            content_type: None,
            bytes,
        }
    }

    pub fn with_content_type<C: Into<String>>(mut self, content_type: C) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Lower-cased text after the last dot, if any.
    pub fn extension(&self) -> Option<String> {
        let (stem, ext) = self.file_name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

/// Reference to an uploaded object inside its bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub bucket: Bucket,
    pub path: String,
}

/// Generates a fresh object name: upload time in milliseconds, a random
/// token, and the original extension.
pub fn object_name(upload: &Upload, now: DateTime<Utc>) -> String {
    let token = Uuid::new_v4().simple().to_string();
    let base = format!("{}_{}", now.timestamp_millis(), &token[..8]);
    match upload.extension() {
        Some(ext) => format!("{}.{}", base, ext),
        None => base,
    }
}

pub trait ObjectStorage: Clone + Send + 'static {
    fn upload(&self, bucket: Bucket, upload: Upload) -> BoxFuture<StoredObject>;

    fn public_url(&self, bucket: Bucket, path: &str) -> String;

    /// Turns a stored reference into something a browser can load. Values
    /// that are already absolute URLs pass through untouched.
    fn resolve(&self, bucket: Bucket, reference: &str) -> String {
        if Url::parse(reference).is_ok() {
            reference.to_string()
        } else {
            self.public_url(bucket, reference)
        }
    }
}

/// Object storage on the hosted backend.
#[derive(Clone)]
pub struct RestStorage {
    http: HttpClient,
    session: SessionHub,
}

impl RestStorage {
    pub(crate) fn new(http: HttpClient, session: SessionHub) -> Self {
        RestStorage { http, session }
    }
}

impl ObjectStorage for RestStorage {
    fn upload(&self, bucket: Bucket, upload: Upload) -> BoxFuture<StoredObject> {
        let name = object_name(&upload, Utc::now());
        let path = format!("{}{}/{}", OBJECT_PATH, bucket, name);
        let content_type = upload
            .content_type
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let headers = vec![
            ("content-type", content_type),
            ("cache-control", format!("max-age={}", CACHE_CONTROL)),
            ("x-upsert", "false".to_string()),
        ];

        let token = self.session.access_token();
        let response = self
            .http
            .send(Method::POST, &path, token, headers, Body::from(upload.bytes))
            .map(move |_| StoredObject { bucket, path: name })
            .map_err(|err| match err {
                Error::Response(body) => Error::Upload(body),
                other => other,
            });
        Box::new(response)
    }

    fn public_url(&self, bucket: Bucket, path: &str) -> String {
        format!("{}{}public/{}/{}", self.http.base_url(), OBJECT_PATH, bucket, path)
    }
}

/// In-process object storage for tests and offline runs.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    objects: Arc<Mutex<HashMap<(Bucket, String), Upload>>>,
    fail_next: Arc<Mutex<Option<ErrorBody>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        MemoryStorage::default()
    }

    pub fn get(&self, bucket: Bucket, path: &str) -> Option<Upload> {
        let objects = self.objects.lock().unwrap_or_else(PoisonError::into_inner);
        objects.get(&(bucket, path.to_string())).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fail_next(&self, error: ErrorBody) {
        *self.fail_next.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
    }
}

impl ObjectStorage for MemoryStorage {
    fn upload(&self, bucket: Bucket, upload: Upload) -> BoxFuture<StoredObject> {
        if let Some(error) = self.fail_next.lock().unwrap_or_else(PoisonError::into_inner).take() {
            return Box::new(future::err(Error::Upload(error)));
        }

        let name = object_name(&upload, Utc::now());
        let mut objects = self.objects.lock().unwrap_or_else(PoisonError::into_inner);
        let key = (bucket, name.clone());
        if objects.contains_key(&key) {
            let conflict = ErrorBody::new(409, "The resource already exists");
            return Box::new(future::err(Error::Upload(conflict)));
        }
        objects.insert(key, upload);
        Box::new(future::ok(StoredObject { bucket, path: name }))
    }

    fn public_url(&self, bucket: Bucket, path: &str) -> String {
        format!("memory://{}/{}", bucket, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn object_names_keep_extension() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let name = object_name(&Upload::new("Holiday.JPG", vec![1]), now);
        assert!(name.starts_with("1700000000123_"), "{}", name);
        assert!(name.ends_with(".jpg"), "{}", name);

        let name = object_name(&Upload::new("README", vec![]), now);
        assert!(!name.contains('.'), "{}", name);

        let name = object_name(&Upload::new(".bashrc", vec![]), now);
        assert!(!name.contains('.'), "{}", name);
    }

    #[test]
    fn each_upload_gets_a_fresh_name() {
        let storage = MemoryStorage::new();
        let upload = Upload::new("clip.mp4", vec![0, 1, 2]).with_content_type("video/mp4");
        let first = storage.upload(Bucket::Videos, upload.clone()).wait().unwrap();
        let second = storage.upload(Bucket::Videos, upload).wait().unwrap();
        assert_ne!(first.path, second.path);
        assert_eq!(storage.len(), 2);
        assert_eq!(storage.get(Bucket::Videos, &first.path).unwrap().bytes, vec![0, 1, 2]);
    }

    #[test]
    fn upload_failure_is_reported_as_upload_error() {
        let storage = MemoryStorage::new();
        storage.fail_next(ErrorBody::new(413, "Payload too large"));
        match storage.upload(Bucket::Images, Upload::new("big.png", vec![])).wait() {
            Err(Error::Upload(body)) => assert_eq!(body.status, 413),
            other => panic!("unexpected result {:?}", other),
        }
        assert!(storage.is_empty());
    }

    #[test]
    fn resolve_passes_absolute_urls_through() {
        let storage = MemoryStorage::new();
        assert_eq!(
            storage.resolve(Bucket::Images, "https://cdn.example.com/a.png"),
            "https://cdn.example.com/a.png"
        );
        assert_eq!(storage.resolve(Bucket::Images, "1700_abc.png"), "memory://images/1700_abc.png");
    }
}
