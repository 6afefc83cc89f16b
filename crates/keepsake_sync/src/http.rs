//! HTTP object store.
//!
//! Maps the object store operations onto plain HTTP calls against a
//! storage endpoint. The HTTP client itself is abstracted via a trait so
//! the host application can plug in whatever library it already uses.
//!
//! | Operation       | Request                                  |
//! |-----------------|------------------------------------------|
//! | `put`           | `PUT {base}/objects/{remoteName}`        |
//! | `delete`        | `DELETE {base}/objects/{remoteName}`     |
//! | `temporary_url` | `POST {base}/sign` with a JSON body      |
//! | `list`          | `GET {base}/objects?prefix={prefix}`     |
//!
//! Each remote name segment and the prefix query value are
//! percent-encoded.

use crate::auth::AuthSession;
use crate::error::{SyncError, SyncResult};
use crate::naming::RemoteNamespace;
use crate::remote::{AccessUrl, ObjectStore};
use bytes::Bytes;
use keepsake_core::{Clock, SystemClock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET
    Get,
    /// PUT
    Put,
    /// POST
    Post,
    /// DELETE
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Post => "POST",
            Self::Delete => "DELETE",
        })
    }
}

/// An outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Method.
    pub method: Method,
    /// Absolute URL.
    pub url: String,
    /// Header name/value pairs.
    pub headers: Vec<(String, String)>,
    /// Body; empty for GET and DELETE.
    pub body: Bytes,
}

impl HttpRequest {
    /// Returns the first header named `name`, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A received response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Body.
    pub body: Bytes,
}

impl HttpResponse {
    /// A response with an empty body.
    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: Bytes::new(),
        }
    }

    /// A 200 response carrying JSON.
    pub fn json(body: &serde_json::Value) -> Self {
        Self {
            status: 200,
            body: Bytes::from(body.to_string()),
        }
    }
}

/// HTTP client abstraction.
///
/// Returns `Err` only for transport failures; any status code counts as
/// a response.
pub trait HttpClient: Send + Sync {
    /// Sends a request.
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, String>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignRequest<'a> {
    name: &'a str,
    expires_in_secs: u64,
}

#[derive(Deserialize)]
struct SignResponse {
    url: String,
}

/// An [`ObjectStore`] over HTTP with bearer authentication.
pub struct HttpObjectStore<C: HttpClient> {
    base_url: String,
    client: C,
    auth: Arc<dyn AuthSession>,
    clock: Arc<dyn Clock>,
}

impl<C: HttpClient> HttpObjectStore<C> {
    /// Creates a store rooted at `base_url`.
    pub fn new(base_url: impl Into<String>, client: C, auth: Arc<dyn AuthSession>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            auth,
            clock: Arc::new(SystemClock),
        }
    }

    /// Uses `clock` to compute URL expiry.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Appends `segments` to the base URL, encoding each one.
    fn endpoint<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> SyncResult<Url> {
        let mut url = Url::parse(&self.base_url).map_err(|e| {
            SyncError::remote_fatal(format!("invalid base url {}: {e}", self.base_url))
        })?;
        url.path_segments_mut()
            .map_err(|()| {
                SyncError::remote_fatal(format!("base url {} cannot carry a path", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn object_url(&self, remote_name: &str) -> SyncResult<String> {
        let url = self.endpoint(std::iter::once("objects").chain(remote_name.split('/')))?;
        Ok(url.into())
    }

    fn send(&self, method: Method, url: String, body: Bytes, content_type: Option<&str>) -> SyncResult<HttpResponse> {
        let token = self.auth.bearer_token()?;
        let mut headers = vec![("Authorization".to_string(), format!("Bearer {token}"))];
        if let Some(content_type) = content_type {
            headers.push(("Content-Type".to_string(), content_type.to_string()));
        }
        debug!(method = %method, url = %url, "object store request");
        self.client
            .send(HttpRequest {
                method,
                url,
                headers,
                body,
            })
            .map_err(SyncError::remote_retryable)
    }
}

/// Maps a status code onto the error taxonomy.
fn check_status(method: Method, response: &HttpResponse) -> SyncResult<()> {
    let status = response.status;
    match status {
        200..=299 => Ok(()),
        401 | 403 => Err(SyncError::Unauthenticated(format!(
            "{method} rejected with status {status}"
        ))),
        408 | 429 | 500..=599 => Err(SyncError::remote_retryable(format!(
            "{method} failed with status {status}"
        ))),
        _ => Err(SyncError::remote_fatal(format!(
            "{method} failed with status {status}"
        ))),
    }
}

impl<C: HttpClient> ObjectStore for HttpObjectStore<C> {
    fn put(
        &self,
        namespace: &RemoteNamespace,
        object_name: &str,
        mime_type: &str,
        bytes: Bytes,
    ) -> SyncResult<String> {
        let remote_name = namespace.remote_name(object_name);
        let response = self.send(
            Method::Put,
            self.object_url(&remote_name)?,
            bytes,
            Some(mime_type),
        )?;
        check_status(Method::Put, &response)?;
        Ok(remote_name)
    }

    fn delete(&self, remote_name: &str) -> SyncResult<()> {
        let response = self.send(Method::Delete, self.object_url(remote_name)?, Bytes::new(), None)?;
        if response.status == 404 {
            debug!(remote_name, "object already gone");
            return Ok(());
        }
        check_status(Method::Delete, &response)
    }

    fn temporary_url(&self, remote_name: &str, ttl: Duration) -> SyncResult<AccessUrl> {
        let body = serde_json::to_vec(&SignRequest {
            name: remote_name,
            expires_in_secs: ttl.as_secs(),
        })?;
        let now = self.clock.now_millis();
        let response = self.send(
            Method::Post,
            self.endpoint(["sign"])?.into(),
            Bytes::from(body),
            Some("application/json"),
        )?;
        check_status(Method::Post, &response)?;
        let signed: SignResponse = serde_json::from_slice(&response.body)?;
        let ttl = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        Ok(AccessUrl {
            url: signed.url,
            expires_at: now.saturating_add(ttl),
        })
    }

    fn list(&self, namespace: &RemoteNamespace) -> SyncResult<Vec<String>> {
        let mut url = self.endpoint(["objects"])?;
        url.query_pairs_mut().append_pair("prefix", &namespace.prefix());
        let response = self.send(Method::Get, url.into(), Bytes::new(), None)?;
        check_status(Method::Get, &response)?;
        Ok(serde_json::from_slice(&response.body)?)
    }
}

impl<C: HttpClient> fmt::Debug for HttpObjectStore<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpObjectStore")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticAuth;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct ScriptedClient {
        responses: Mutex<Vec<Result<HttpResponse, String>>>,
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedClient {
        fn replying(responses: Vec<Result<HttpResponse, String>>) -> Self {
            let mut responses = responses;
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl HttpClient for ScriptedClient {
        fn send(&self, request: HttpRequest) -> Result<HttpResponse, String> {
            self.seen.lock().push(request);
            self.responses
                .lock()
                .pop()
                .unwrap_or_else(|| Err("no response scripted".into()))
        }
    }

    #[derive(Debug)]
    struct Fixed;

    impl Clock for Fixed {
        fn now_millis(&self) -> u64 {
            5_000
        }
    }

    fn store(responses: Vec<Result<HttpResponse, String>>) -> HttpObjectStore<ScriptedClient> {
        HttpObjectStore::new(
            "https://files.example.com/",
            ScriptedClient::replying(responses),
            Arc::new(StaticAuth::new("tok")),
        )
        .with_clock(Arc::new(Fixed))
    }

    fn ns() -> RemoteNamespace {
        RemoteNamespace::new("meals", "m1").unwrap()
    }

    #[test]
    fn put_sends_bearer_and_content_type() {
        let store = store(vec![Ok(HttpResponse::status(201))]);
        let name = store
            .put(&ns(), "abc-x.jpg", "image/jpeg", Bytes::from_static(b"jpg"))
            .unwrap();
        assert_eq!(name, "attachments/meals/m1/abc-x.jpg");

        let seen = store.client().seen.lock();
        assert_eq!(seen[0].method, Method::Put);
        assert_eq!(
            seen[0].url,
            "https://files.example.com/objects/attachments/meals/m1/abc-x.jpg"
        );
        assert_eq!(seen[0].header("authorization"), Some("Bearer tok"));
        assert_eq!(seen[0].header("Content-Type"), Some("image/jpeg"));
    }

    #[test]
    fn status_mapping() {
        let store = store(vec![
            Ok(HttpResponse::status(401)),
            Ok(HttpResponse::status(503)),
            Ok(HttpResponse::status(400)),
            Err("connection reset".into()),
        ]);
        let put = |s: &HttpObjectStore<ScriptedClient>| s.put(&ns(), "a", "text/plain", Bytes::new());

        assert!(matches!(put(&store), Err(SyncError::Unauthenticated(_))));
        assert!(put(&store).unwrap_err().is_retryable());
        let err = put(&store).unwrap_err();
        assert!(matches!(err, SyncError::Remote { retryable: false, .. }));
        assert!(put(&store).unwrap_err().is_retryable());
    }

    #[test]
    fn delete_treats_404_as_done() {
        let store = store(vec![Ok(HttpResponse::status(404)), Ok(HttpResponse::status(403))]);
        assert!(store.delete("attachments/meals/m1/a").is_ok());
        assert!(matches!(
            store.delete("attachments/meals/m1/a"),
            Err(SyncError::Unauthenticated(_))
        ));
    }

    #[test]
    fn temporary_url_reads_signed_url() {
        let store = store(vec![Ok(HttpResponse::json(
            &json!({ "url": "https://cdn.example.com/a?sig=1" }),
        ))]);
        let url = store
            .temporary_url("attachments/meals/m1/a", Duration::from_secs(60))
            .unwrap();
        assert_eq!(url.url, "https://cdn.example.com/a?sig=1");
        assert_eq!(url.expires_at, 65_000);

        let seen = store.client().seen.lock();
        assert_eq!(seen[0].url, "https://files.example.com/sign");
        let body: serde_json::Value = serde_json::from_slice(&seen[0].body).unwrap();
        assert_eq!(body["expiresInSecs"], 60);
    }

    #[test]
    fn list_decodes_names() {
        let store = store(vec![Ok(HttpResponse::json(&json!([
            "attachments/meals/m1/a",
            "attachments/meals/m1/b"
        ])))]);
        assert_eq!(store.list(&ns()).unwrap().len(), 2);
        assert!(store.client().seen.lock()[0]
            .url
            .ends_with("/objects?prefix=attachments%2Fmeals%2Fm1%2F"));
    }

    #[test]
    fn reserved_characters_in_ids_are_encoded() {
        let store = store(vec![
            Ok(HttpResponse::status(201)),
            Ok(HttpResponse::json(&json!([]))),
        ]);
        let ns = RemoteNamespace::new("meals", "m?1#x&y z").unwrap();
        let name = store
            .put(&ns, "abc-x.jpg", "image/jpeg", Bytes::from_static(b"jpg"))
            .unwrap();
        assert_eq!(name, "attachments/meals/m?1#x&y z/abc-x.jpg");
        store.list(&ns).unwrap();

        let seen = store.client().seen.lock();
        assert_eq!(
            seen[0].url,
            "https://files.example.com/objects/attachments/meals/m%3F1%23x&y%20z/abc-x.jpg"
        );
        assert_eq!(
            seen[1].url,
            "https://files.example.com/objects?prefix=attachments%2Fmeals%2Fm%3F1%23x%26y+z%2F"
        );
    }

    #[test]
    fn unusable_base_url_is_a_fatal_error() {
        let store = HttpObjectStore::new(
            "not a url",
            ScriptedClient::default(),
            Arc::new(StaticAuth::new("tok")),
        );
        let err = store.delete("attachments/meals/m1/a").unwrap_err();
        assert!(matches!(err, SyncError::Remote { retryable: false, .. }));
        assert!(store.client().seen.lock().is_empty());
    }

    #[test]
    fn expired_session_sends_nothing() {
        let auth = Arc::new(StaticAuth::signed_out());
        let store = HttpObjectStore::new("https://x", ScriptedClient::default(), auth);
        assert!(matches!(
            store.delete("attachments/a/b/c"),
            Err(SyncError::Unauthenticated(_))
        ));
        assert!(store.client().seen.lock().is_empty());
    }
}
