use std::{collections::BTreeMap, fs, path::PathBuf, time::Duration};

use n0_error::{Result, StackResultExt, StdResultExt};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::website_apis::DerivedKind;

const DEFAULT_CONTROL_PLANE_URL: &str = "http://localhost:8001";
const DEFAULT_WEBSITE_GROUP: &str = "extensions.example.com";
const DEFAULT_WEBSITE_VERSION: &str = "v1";
const DEFAULT_WEBSITE_PLURAL: &str = "websites";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct Config {
    /// Base URL of the control plane API, e.g. a local `kubectl proxy`.
    pub control_plane_url: Url,

    /// API group of the `Website` custom resource.
    pub website_group: String,

    /// API version of the `Website` custom resource.
    pub website_version: String,

    /// Collection name of the `Website` custom resource.
    pub website_plural: String,

    /// Template file for every derived kind.
    ///
    /// Relative paths resolve against the working directory. Templates are
    /// read again on every creation, so they can be edited while the
    /// controller runs.
    pub templates: BTreeMap<DerivedKind, PathBuf>,

    /// First delay before reopening a failed watch. Doubles on every
    /// consecutive failure.
    #[serde(with = "humantime_serde")]
    pub reconnect_backoff: Duration,

    /// Upper bound for the reconnect delay.
    #[serde(with = "humantime_serde")]
    pub reconnect_backoff_max: Duration,

    /// Timeout for establishing a TCP connection to the control plane.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Timeout for a single create or delete request.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Reopen the watch if no bytes arrive for this long.
    ///
    /// If None, an idle watch is kept open for as long as the control plane
    /// keeps it open.
    #[serde(with = "humantime_serde")]
    pub watch_idle_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        let templates = DerivedKind::ALL
            .into_iter()
            .map(|kind| (kind, PathBuf::from(kind.default_template_file())))
            .collect();
        Self {
            control_plane_url: Url::parse(DEFAULT_CONTROL_PLANE_URL)
                .expect("default control plane url is valid"),
            website_group: DEFAULT_WEBSITE_GROUP.to_string(),
            website_version: DEFAULT_WEBSITE_VERSION.to_string(),
            website_plural: DEFAULT_WEBSITE_PLURAL.to_string(),
            templates,
            reconnect_backoff: Duration::from_secs(1),
            reconnect_backoff_max: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            watch_idle_timeout: None,
        }
    }
}

impl Config {
    pub async fn from_file(path: PathBuf) -> Result<Self> {
        let config = tokio::fs::read_to_string(path)
            .await
            .context("reading config file")?;
        let config: Self = serde_yml::from_str(&config).std_context("parsing config file")?;
        config.validate()?;
        Ok(config)
    }

    pub async fn write(&self, path: PathBuf) -> Result<()> {
        let data = serde_yml::to_string(self).anyerr()?;
        fs::write(path, data)?;
        Ok(())
    }

    /// Rejects configurations the controller cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.control_plane_url.cannot_be_a_base() {
            n0_error::bail_any!(
                "control plane url {} cannot be used as a base url",
                self.control_plane_url
            );
        }
        for kind in DerivedKind::ALL {
            if !self.templates.contains_key(&kind) {
                n0_error::bail_any!("no template configured for {kind}");
            }
        }
        if self.reconnect_backoff.is_zero() {
            n0_error::bail_any!("reconnect_backoff must be greater than zero");
        }
        if self.reconnect_backoff_max < self.reconnect_backoff {
            n0_error::bail_any!("reconnect_backoff_max must not be below reconnect_backoff");
        }
        Ok(())
    }

    pub fn template_path(&self, kind: DerivedKind) -> Option<&PathBuf> {
        self.templates.get(&kind)
    }

    /// Points every template at its default file name inside `dir`.
    pub fn with_template_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        for kind in DerivedKind::ALL {
            self.templates
                .insert(kind, dir.join(kind.default_template_file()));
        }
        self
    }
}
