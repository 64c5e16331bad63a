use std::{collections::BTreeMap, future::Future, path::PathBuf};

use n0_error::{e, stack_error};
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    control_plane::{ControlPlane, ControlPlaneError},
    error::{Classify, ErrorClass},
    template::{Template, TemplateError},
    website_apis::{DerivedKind, WatchEvent, WatchEventType, Website},
};

/// What an event asks the reconciler to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Create every derived resource.
    Create,
    /// Delete every derived resource.
    Delete,
    /// Nothing to do for this event type.
    Ignore,
}

impl Action {
    pub fn classify(event_type: &WatchEventType) -> Self {
        match event_type {
            WatchEventType::Added => Action::Create,
            WatchEventType::Deleted => Action::Delete,
            WatchEventType::Other(_) => Action::Ignore,
        }
    }
}

#[stack_error(derive, add_meta)]
pub enum ReconcileError {
    #[error("website object has no {field}")]
    InvalidObject { field: &'static str },
    #[error("no template configured for {kind}")]
    MissingTemplate { kind: DerivedKind },
    #[error("failed to render {kind} template")]
    Template {
        kind: DerivedKind,
        source: TemplateError,
    },
    #[error("{kind} request for {name} failed")]
    Request {
        kind: DerivedKind,
        name: String,
        source: ControlPlaneError,
    },
}

impl Classify for ReconcileError {
    fn class(&self) -> ErrorClass {
        match self {
            ReconcileError::InvalidObject { .. }
            | ReconcileError::MissingTemplate { .. }
            | ReconcileError::Template { .. } => ErrorClass::Permanent,
            ReconcileError::Request { source, .. } => source.class(),
        }
    }
}

/// Maps website events onto create and delete calls for the derived
/// resources.
///
/// Holds no state between events. Kinds are handled in the order of
/// [`DerivedKind::ALL`] and the first failure stops the remaining kinds.
#[derive(Debug)]
pub struct Reconciler<C> {
    client: C,
    templates: BTreeMap<DerivedKind, PathBuf>,
}

impl<C: ControlPlane> Reconciler<C> {
    pub fn new(client: C, config: &Config) -> Self {
        Self {
            client,
            templates: config.templates.clone(),
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub async fn reconcile(
        &self,
        event: &WatchEvent,
        cancel: &CancellationToken,
    ) -> Result<Action, ReconcileError> {
        let action = Action::classify(&event.event_type);
        match action {
            Action::Create => {
                validate(&event.object)?;
                self.create_derived(&event.object, cancel).await?;
            }
            Action::Delete => {
                validate(&event.object)?;
                self.delete_derived(&event.object, cancel).await?;
            }
            Action::Ignore => {
                debug!(
                    event = %event.event_type,
                    name = %event.object.name(),
                    "ignoring watch event"
                );
            }
        }
        Ok(action)
    }

    async fn create_derived(
        &self,
        website: &Website,
        cancel: &CancellationToken,
    ) -> Result<(), ReconcileError> {
        let name = website.derived_name();
        let namespace = website.namespace();
        for kind in DerivedKind::ALL {
            info!(%kind, %name, %namespace, "creating");
            let path = self
                .templates
                .get(&kind)
                .ok_or_else(|| e!(ReconcileError::MissingTemplate { kind }))?;
            let body = Template::load(path)
                .await
                .and_then(|template| template.render(website))
                .map_err(|source| e!(ReconcileError::Template { kind, source }))?;
            let status = cancellable(cancel, self.client.create(namespace, kind, body))
                .await
                .map_err(|source| {
                    e!(ReconcileError::Request {
                        kind,
                        name: name.clone(),
                        source
                    })
                })?;
            log_status(kind, &name, status);
        }
        Ok(())
    }

    async fn delete_derived(
        &self,
        website: &Website,
        cancel: &CancellationToken,
    ) -> Result<(), ReconcileError> {
        let name = website.derived_name();
        let namespace = website.namespace();
        for kind in DerivedKind::ALL {
            info!(%kind, %name, %namespace, "deleting");
            let status = cancellable(cancel, self.client.delete(namespace, kind, &name))
                .await
                .map_err(|source| {
                    e!(ReconcileError::Request {
                        kind,
                        name: name.clone(),
                        source
                    })
                })?;
            log_status(kind, &name, status);
        }
        Ok(())
    }
}

fn validate(website: &Website) -> Result<(), ReconcileError> {
    if website.name().is_empty() {
        return Err(e!(ReconcileError::InvalidObject { field: "name" }));
    }
    if website.namespace().is_empty() {
        return Err(e!(ReconcileError::InvalidObject { field: "namespace" }));
    }
    Ok(())
}

fn log_status(kind: DerivedKind, name: &str, status: StatusCode) {
    if status.is_success() {
        info!(%kind, %name, %status, "response status");
    } else {
        warn!(%kind, %name, %status, "response status");
    }
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, ControlPlaneError>>,
) -> Result<T, ControlPlaneError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(e!(ControlPlaneError::Cancelled)),
        res = fut => res,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::Value;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Create {
            namespace: String,
            kind: DerivedKind,
            body: Value,
        },
        Delete {
            namespace: String,
            kind: DerivedKind,
            name: String,
        },
    }

    /// Records calls and answers with a fixed status, optionally failing one kind.
    #[derive(Debug, Default)]
    struct RecordingControlPlane {
        calls: Mutex<Vec<Call>>,
        fail_kind: Option<DerivedKind>,
        status: Option<StatusCode>,
    }

    impl RecordingControlPlane {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn answer(&self, kind: DerivedKind) -> Result<StatusCode, ControlPlaneError> {
            if self.fail_kind == Some(kind) {
                return Err(e!(ControlPlaneError::Cancelled));
            }
            Ok(self.status.unwrap_or(StatusCode::CREATED))
        }
    }

    #[async_trait::async_trait]
    impl ControlPlane for RecordingControlPlane {
        async fn create(
            &self,
            namespace: &str,
            kind: DerivedKind,
            body: Vec<u8>,
        ) -> Result<StatusCode, ControlPlaneError> {
            self.calls.lock().unwrap().push(Call::Create {
                namespace: namespace.to_string(),
                kind,
                body: serde_json::from_slice(&body).unwrap(),
            });
            self.answer(kind)
        }

        async fn delete(
            &self,
            namespace: &str,
            kind: DerivedKind,
            name: &str,
        ) -> Result<StatusCode, ControlPlaneError> {
            self.calls.lock().unwrap().push(Call::Delete {
                namespace: namespace.to_string(),
                kind,
                name: name.to_string(),
            });
            self.answer(kind)
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        config: Config,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(
            dir.path().join("service-template.json"),
            r#"{"kind": "Service", "metadata": {"name": "[NAME]"}, "spec": {"selector": {"app": "[NAME]"}}}"#,
        )
        .await
        .unwrap();
        tokio::fs::write(
            dir.path().join("deployment-template.json"),
            r#"{"kind": "Deployment", "metadata": {"name": "[NAME]"}, "env": {"repo": "[GIT-REPO]", "title": "[NOMBRE]"}}"#,
        )
        .await
        .unwrap();
        let config = Config::default().with_template_dir(dir.path());
        Fixture { _dir: dir, config }
    }

    fn blog_event(event_type: &str) -> WatchEvent {
        WatchEvent::new(
            WatchEventType::from(event_type.to_string()),
            Website::new("blog", "default", "git@example.com/blog.git", "My Blog"),
        )
    }

    #[test]
    fn classify_event_types() {
        assert_eq!(Action::classify(&WatchEventType::Added), Action::Create);
        assert_eq!(Action::classify(&WatchEventType::Deleted), Action::Delete);
        for other in ["MODIFIED", "BOOKMARK", "ERROR", "added"] {
            assert_eq!(
                Action::classify(&WatchEventType::from(other.to_string())),
                Action::Ignore
            );
        }
    }

    #[tokio::test]
    async fn added_creates_service_then_deployment() {
        let fixture = fixture().await;
        let reconciler = Reconciler::new(RecordingControlPlane::default(), &fixture.config);

        let action = reconciler
            .reconcile(&blog_event("ADDED"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(action, Action::Create);

        let calls = reconciler.client().calls();
        assert_eq!(calls.len(), 2);
        let Call::Create { namespace, kind, body } = &calls[0] else {
            panic!("expected create, got {:?}", calls[0]);
        };
        assert_eq!(namespace, "default");
        assert_eq!(*kind, DerivedKind::Service);
        assert_eq!(body["metadata"]["name"], "blog-website");
        assert_eq!(body["spec"]["selector"]["app"], "blog-website");

        let Call::Create { namespace, kind, body } = &calls[1] else {
            panic!("expected create, got {:?}", calls[1]);
        };
        assert_eq!(namespace, "default");
        assert_eq!(*kind, DerivedKind::Deployment);
        assert_eq!(body["metadata"]["name"], "blog-website");
        assert_eq!(body["env"]["repo"], "git@example.com/blog.git");
        assert_eq!(body["env"]["title"], "My Blog");
    }

    #[tokio::test]
    async fn deleted_deletes_derived_name() {
        let fixture = fixture().await;
        let reconciler = Reconciler::new(RecordingControlPlane::default(), &fixture.config);

        let action = reconciler
            .reconcile(&blog_event("DELETED"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(action, Action::Delete);
        assert_eq!(
            reconciler.client().calls(),
            vec![
                Call::Delete {
                    namespace: "default".into(),
                    kind: DerivedKind::Service,
                    name: "blog-website".into(),
                },
                Call::Delete {
                    namespace: "default".into(),
                    kind: DerivedKind::Deployment,
                    name: "blog-website".into(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn create_and_delete_target_same_names() {
        let fixture = fixture().await;
        let reconciler = Reconciler::new(RecordingControlPlane::default(), &fixture.config);
        let cancel = CancellationToken::new();
        reconciler.reconcile(&blog_event("ADDED"), &cancel).await.unwrap();
        reconciler.reconcile(&blog_event("DELETED"), &cancel).await.unwrap();

        let calls = reconciler.client().calls();
        let created: Vec<_> = calls
            .iter()
            .filter_map(|call| match call {
                Call::Create { kind, body, .. } => {
                    Some((*kind, body["metadata"]["name"].as_str().unwrap().to_string()))
                }
                _ => None,
            })
            .collect();
        let deleted: Vec<_> = calls
            .iter()
            .filter_map(|call| match call {
                Call::Delete { kind, name, .. } => Some((*kind, name.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(created, deleted);
    }

    #[tokio::test]
    async fn modified_issues_no_calls() {
        let fixture = fixture().await;
        let reconciler = Reconciler::new(RecordingControlPlane::default(), &fixture.config);
        let action = reconciler
            .reconcile(&blog_event("MODIFIED"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(action, Action::Ignore);
        assert!(reconciler.client().calls().is_empty());
    }

    #[tokio::test]
    async fn error_status_is_not_an_error() {
        let fixture = fixture().await;
        let client = RecordingControlPlane {
            status: Some(StatusCode::CONFLICT),
            ..Default::default()
        };
        let reconciler = Reconciler::new(client, &fixture.config);
        reconciler
            .reconcile(&blog_event("ADDED"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(reconciler.client().calls().len(), 2);
    }

    #[tokio::test]
    async fn failure_stops_remaining_kinds() {
        let fixture = fixture().await;
        let client = RecordingControlPlane {
            fail_kind: Some(DerivedKind::Service),
            ..Default::default()
        };
        let reconciler = Reconciler::new(client, &fixture.config);
        let err = reconciler
            .reconcile(&blog_event("DELETED"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::Request {
                kind: DerivedKind::Service,
                ..
            }
        ));
        assert_eq!(err.class(), ErrorClass::Transient);
        assert_eq!(reconciler.client().calls().len(), 1);
    }

    #[tokio::test]
    async fn missing_template_is_permanent() {
        let fixture = fixture().await;
        let config = fixture.config.clone().with_template_dir("/nonexistent/templates");
        let reconciler = Reconciler::new(RecordingControlPlane::default(), &config);
        let err = reconciler
            .reconcile(&blog_event("ADDED"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::Template {
                kind: DerivedKind::Service,
                ..
            }
        ));
        assert_eq!(err.class(), ErrorClass::Permanent);
        assert!(reconciler.client().calls().is_empty());
    }

    #[tokio::test]
    async fn nameless_object_is_rejected() {
        let fixture = fixture().await;
        let reconciler = Reconciler::new(RecordingControlPlane::default(), &fixture.config);
        let event = WatchEvent::new(WatchEventType::Added, Website::default());
        let err = reconciler
            .reconcile(&event, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Permanent);
        assert!(reconciler.client().calls().is_empty());
    }

    #[tokio::test]
    async fn cancelled_token_aborts_mutations() {
        let fixture = fixture().await;
        let reconciler = Reconciler::new(RecordingControlPlane::default(), &fixture.config);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = reconciler
            .reconcile(&blog_event("DELETED"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::Request {
                source: ControlPlaneError::Cancelled { .. },
                ..
            }
        ));
    }
}
