use std::time::Duration;

use n0_error::{e, stack_error};
use reqwest::StatusCode;
use tracing::debug;
use url::Url;

use crate::{
    config::Config,
    error::{Classify, ErrorClass},
    watch::WatchStream,
    website_apis::DerivedKind,
};

const JSON_CONTENT_TYPE: &str = "application/json";

#[stack_error(derive, add_meta)]
pub enum ControlPlaneError {
    #[error("invalid control plane url {url}")]
    InvalidUrl { url: String },
    #[error("failed to build http client")]
    Client {
        #[error(std_err)]
        source: reqwest::Error,
    },
    #[error("request to {url} failed")]
    Request {
        url: String,
        #[error(std_err)]
        source: reqwest::Error,
    },
    #[error("watch on {url} was answered with {status}")]
    WatchRejected { url: String, status: StatusCode },
    #[error("request cancelled")]
    Cancelled,
}

impl Classify for ControlPlaneError {
    fn class(&self) -> ErrorClass {
        match self {
            ControlPlaneError::InvalidUrl { .. } | ControlPlaneError::Client { .. } => {
                ErrorClass::Fatal
            }
            ControlPlaneError::Request { .. }
            | ControlPlaneError::WatchRejected { .. }
            | ControlPlaneError::Cancelled { .. } => ErrorClass::Transient,
        }
    }
}

/// Mutations the reconciler issues against the control plane.
///
/// Every call is attempted exactly once. The returned status is the raw
/// answer of the control plane; a non-success status is not an error.
#[async_trait::async_trait]
pub trait ControlPlane: Send + Sync {
    /// Submits `body` to the collection of `kind` in `namespace`.
    async fn create(
        &self,
        namespace: &str,
        kind: DerivedKind,
        body: Vec<u8>,
    ) -> Result<StatusCode, ControlPlaneError>;

    /// Deletes the object `name` of `kind` in `namespace`.
    async fn delete(
        &self,
        namespace: &str,
        kind: DerivedKind,
        name: &str,
    ) -> Result<StatusCode, ControlPlaneError>;
}

/// HTTP client for the control plane API.
#[derive(derive_more::Debug, Clone)]
pub struct ControlPlaneClient {
    base_url: Url,
    websites_url: Url,
    request_timeout: Duration,
    watch_idle_timeout: Option<Duration>,
    #[debug("reqwest::Client")]
    http: reqwest::Client,
}

impl ControlPlaneClient {
    pub fn new(config: &Config) -> Result<Self, ControlPlaneError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|source| e!(ControlPlaneError::Client { source }))?;
        let base_url = config.control_plane_url.clone();
        let websites_url = with_segments(
            &base_url,
            [
                "apis",
                config.website_group.as_str(),
                config.website_version.as_str(),
                config.website_plural.as_str(),
            ],
        )?;
        Ok(Self {
            base_url,
            websites_url,
            request_timeout: config.request_timeout,
            watch_idle_timeout: config.watch_idle_timeout,
            http,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Collection URL of the `Website` resource across all namespaces.
    pub fn websites_url(&self) -> &Url {
        &self.websites_url
    }

    /// URL objects of `kind` are created at. Ends with a slash.
    pub fn collection_url(&self, namespace: &str, kind: DerivedKind) -> Result<Url, ControlPlaneError> {
        let segments = kind
            .api_prefix()
            .split('/')
            .chain(["namespaces", namespace, kind.plural(), ""]);
        with_segments(&self.base_url, segments)
    }

    pub fn resource_url(
        &self,
        namespace: &str,
        kind: DerivedKind,
        name: &str,
    ) -> Result<Url, ControlPlaneError> {
        let segments = kind
            .api_prefix()
            .split('/')
            .chain(["namespaces", namespace, kind.plural(), name]);
        with_segments(&self.base_url, segments)
    }

    /// Opens a long lived watch on `collection` and returns the event stream
    /// bound to the response body.
    pub async fn open_watch(&self, collection: &Url) -> Result<WatchStream, ControlPlaneError> {
        let mut url = collection.clone();
        url.query_pairs_mut().append_pair("watch", "true");
        debug!(%url, "opening watch");
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|source| {
                e!(ControlPlaneError::Request {
                    url: url.to_string(),
                    source
                })
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(e!(ControlPlaneError::WatchRejected {
                url: url.to_string(),
                status
            }));
        }
        Ok(WatchStream::new(response, self.watch_idle_timeout))
    }

    /// Opens a watch on every `Website` in the cluster.
    pub async fn watch_websites(&self) -> Result<WatchStream, ControlPlaneError> {
        self.open_watch(&self.websites_url).await
    }
}

#[async_trait::async_trait]
impl ControlPlane for ControlPlaneClient {
    async fn create(
        &self,
        namespace: &str,
        kind: DerivedKind,
        body: Vec<u8>,
    ) -> Result<StatusCode, ControlPlaneError> {
        let url = self.collection_url(namespace, kind)?;
        debug!(%url, "POST");
        let response = self
            .http
            .post(url.clone())
            .timeout(self.request_timeout)
            .header(reqwest::header::CONTENT_TYPE, JSON_CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(|source| {
                e!(ControlPlaneError::Request {
                    url: url.to_string(),
                    source
                })
            })?;
        Ok(response.status())
    }

    async fn delete(
        &self,
        namespace: &str,
        kind: DerivedKind,
        name: &str,
    ) -> Result<StatusCode, ControlPlaneError> {
        let url = self.resource_url(namespace, kind, name)?;
        debug!(%url, "DELETE");
        let response = self
            .http
            .delete(url.clone())
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|source| {
                e!(ControlPlaneError::Request {
                    url: url.to_string(),
                    source
                })
            })?;
        Ok(response.status())
    }
}

/// Appends `segments` to the path of `base`, percent-encoding each one.
fn with_segments<'s>(
    base: &Url,
    segments: impl IntoIterator<Item = &'s str>,
) -> Result<Url, ControlPlaneError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| {
            e!(ControlPlaneError::InvalidUrl {
                url: base.to_string()
            })
        })?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> ControlPlaneClient {
        let config = Config {
            control_plane_url: Url::parse(base).unwrap(),
            ..Default::default()
        };
        ControlPlaneClient::new(&config).unwrap()
    }

    #[test]
    fn websites_collection_url() {
        let client = client("http://localhost:8001");
        assert_eq!(
            client.websites_url().as_str(),
            "http://localhost:8001/apis/extensions.example.com/v1/websites"
        );
    }

    #[test]
    fn collection_urls_end_with_slash() {
        let client = client("http://localhost:8001");
        assert_eq!(
            client
                .collection_url("default", DerivedKind::Service)
                .unwrap()
                .as_str(),
            "http://localhost:8001/api/v1/namespaces/default/services/"
        );
        assert_eq!(
            client
                .collection_url("default", DerivedKind::Deployment)
                .unwrap()
                .as_str(),
            "http://localhost:8001/apis/apps/v1/namespaces/default/deployments/"
        );
    }

    #[test]
    fn resource_url_addresses_derived_name() {
        let client = client("http://localhost:8001/proxy/");
        assert_eq!(
            client
                .resource_url("web", DerivedKind::Deployment, "blog-website")
                .unwrap()
                .as_str(),
            "http://localhost:8001/proxy/apis/apps/v1/namespaces/web/deployments/blog-website"
        );
    }

    #[test]
    fn path_segments_are_encoded() {
        let client = client("http://localhost:8001");
        let url = client
            .resource_url("default", DerivedKind::Service, "a/b")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8001/api/v1/namespaces/default/services/a%2Fb"
        );
    }

    #[test]
    fn non_base_url_is_fatal() {
        let config = Config {
            control_plane_url: Url::parse("mailto:ops@example.com").unwrap(),
            ..Default::default()
        };
        let err = ControlPlaneClient::new(&config).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Fatal);
    }
}
