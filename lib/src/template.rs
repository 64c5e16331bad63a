//! Rendering of derived resource bodies from templates.
//!
//! A template is a JSON document containing the placeholder tokens
//! [`NAME_PLACEHOLDER`], [`GIT_REPO_PLACEHOLDER`] and
//! [`DISPLAY_NAME_PLACEHOLDER`]. Substitution happens on the parsed document,
//! one string at a time, and the result is serialized again, so injected
//! values are always escaped for JSON.

use std::path::{Path, PathBuf};

use n0_error::{e, stack_error};
use serde_json::{Map, Value};

use crate::{
    error::{Classify, ErrorClass},
    website_apis::Website,
};

pub const NAME_PLACEHOLDER: &str = "[NAME]";
pub const GIT_REPO_PLACEHOLDER: &str = "[GIT-REPO]";
pub const DISPLAY_NAME_PLACEHOLDER: &str = "[NOMBRE]";

#[stack_error(derive, add_meta)]
pub enum TemplateError {
    #[error("failed to read template {path}")]
    Read {
        path: String,
        #[error(std_err)]
        source: std::io::Error,
    },
    #[error("template {path} is not valid JSON")]
    Parse {
        path: String,
        #[error(std_err)]
        source: serde_json::Error,
    },
    #[error("failed to encode rendered body")]
    Encode {
        #[error(std_err)]
        source: serde_json::Error,
    },
}

impl Classify for TemplateError {
    fn class(&self) -> ErrorClass {
        ErrorClass::Permanent
    }
}

/// Identity values substituted into a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substitutions<'a> {
    pub name: String,
    pub git_repo: &'a str,
    pub display_name: &'a str,
}

impl<'a> Substitutions<'a> {
    pub fn for_website(website: &'a Website) -> Self {
        Self {
            name: website.derived_name(),
            git_repo: &website.spec.git_repo,
            display_name: &website.spec.nombre,
        }
    }

    /// Replaces every occurrence of each placeholder in `input`.
    ///
    /// Works in a single pass, so a substituted value that itself contains a
    /// placeholder is left as is.
    pub fn apply(&self, input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        let mut rest = input;
        while let Some(start) = rest.find('[') {
            out.push_str(&rest[..start]);
            let tail = &rest[start..];
            match self.replacement(tail) {
                Some((token_len, value)) => {
                    out.push_str(value);
                    rest = &tail[token_len..];
                }
                None => {
                    out.push('[');
                    rest = &tail[1..];
                }
            }
        }
        out.push_str(rest);
        out
    }

    fn replacement(&self, tail: &str) -> Option<(usize, &str)> {
        [
            (NAME_PLACEHOLDER, self.name.as_str()),
            (GIT_REPO_PLACEHOLDER, self.git_repo),
            (DISPLAY_NAME_PLACEHOLDER, self.display_name),
        ]
        .into_iter()
        .find(|(token, _)| tail.starts_with(token))
        .map(|(token, value)| (token.len(), value))
    }
}

/// Plain text substitution of the website's identity into `template`.
///
/// No escaping is applied. Use [`render_json`] to build request bodies.
pub fn render_str(template: &str, website: &Website) -> String {
    Substitutions::for_website(website).apply(template)
}

/// Substitutes the website's identity into every string of a JSON template.
pub fn render_value(template: &Value, website: &Website) -> Value {
    let subs = Substitutions::for_website(website);
    substitute(template, &subs)
}

/// Parses `template` as JSON, renders it and returns the encoded body.
pub fn render_json(template: &str, website: &Website) -> Result<Vec<u8>, TemplateError> {
    let parsed: Value = serde_json::from_str(template)
        .map_err(|source| e!(TemplateError::Parse { path: "<inline>".to_string(), source }))?;
    encode(&render_value(&parsed, website))
}

fn encode(value: &Value) -> Result<Vec<u8>, TemplateError> {
    serde_json::to_vec(value).map_err(|source| e!(TemplateError::Encode { source }))
}

fn substitute(value: &Value, subs: &Substitutions<'_>) -> Value {
    match value {
        Value::String(s) => Value::String(subs.apply(s)),
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute(v, subs)).collect()),
        Value::Object(map) => {
            let rendered: Map<String, Value> = map
                .iter()
                .map(|(k, v)| (subs.apply(k), substitute(v, subs)))
                .collect();
            Value::Object(rendered)
        }
        other => other.clone(),
    }
}

/// Template loaded from disk.
#[derive(Debug, Clone)]
pub struct Template {
    path: PathBuf,
    document: Value,
}

impl Template {
    /// Reads and parses the template at `path`.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, TemplateError> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|source| {
            e!(TemplateError::Read {
                path: path.display().to_string(),
                source
            })
        })?;
        let document = serde_json::from_str(&raw).map_err(|source| {
            e!(TemplateError::Parse {
                path: path.display().to_string(),
                source
            })
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            document,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn render(&self, website: &Website) -> Result<Vec<u8>, TemplateError> {
        encode(&render_value(&self.document, website))
    }
}
