use std::time::Duration;

use n0_error::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    control_plane::{ControlPlaneClient, ControlPlaneError},
    error::{Classify, ErrorClass},
    reconciler::Reconciler,
    watch::WatchStream,
};

/// Watches websites and reconciles their derived resources until cancelled.
///
/// Events are handled strictly one after another: all calls for an event
/// complete before the next event is read off the connection.
#[derive(Debug)]
pub struct Controller {
    client: ControlPlaneClient,
    reconciler: Reconciler<ControlPlaneClient>,
    backoff_initial: Duration,
    backoff_max: Duration,
}

/// Why processing of one watch connection stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    Cancelled,
    Closed { events: u64 },
    Interrupted,
}

impl Controller {
    pub fn new(config: &Config) -> Result<Self, ControlPlaneError> {
        let client = ControlPlaneClient::new(config)?;
        let reconciler = Reconciler::new(client.clone(), config);
        Ok(Self {
            client,
            reconciler,
            backoff_initial: config.reconnect_backoff,
            backoff_max: config.reconnect_backoff_max,
        })
    }

    pub fn client(&self) -> &ControlPlaneClient {
        &self.client
    }

    /// Runs the watch loop.
    ///
    /// Returns `Ok(())` once `cancel` fires and an error only for failures
    /// classified as fatal. Every other failure reopens the watch after
    /// backing off.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!(url = %self.client.websites_url(), "website controller started");
        let mut backoff = Backoff::new(self.backoff_initial, self.backoff_max);

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                res = self.client.watch_websites() => res,
            };
            let mut stream = match opened {
                Ok(stream) => stream,
                Err(err) if err.class() == ErrorClass::Fatal => return Err(err.into()),
                Err(err) => {
                    let wait = backoff.next();
                    warn!(?wait, "failed to open watch: {err:#}");
                    sleep_with_cancel(wait, &cancel).await;
                    continue;
                }
            };

            match self.process(&mut stream, &mut backoff, &cancel).await? {
                StreamEnd::Cancelled => break,
                StreamEnd::Closed { events } if events > 0 => {
                    debug!(events, "watch stream closed, reopening");
                }
                end => {
                    let wait = backoff.next();
                    debug!(?end, ?wait, "reopening watch after delay");
                    sleep_with_cancel(wait, &cancel).await;
                }
            }
        }

        info!("website controller stopped");
        Ok(())
    }

    async fn process(
        &self,
        stream: &mut WatchStream,
        backoff: &mut Backoff,
        cancel: &CancellationToken,
    ) -> Result<StreamEnd> {
        let mut events = 0;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(StreamEnd::Cancelled),
                next = stream.next() => next,
            };
            let event = match next {
                None => return Ok(StreamEnd::Closed { events }),
                Some(Ok(event)) => event,
                Some(Err(err)) if err.class() == ErrorClass::Permanent => {
                    warn!("skipping watch event: {err:#}");
                    continue;
                }
                Some(Err(err)) => {
                    warn!("watch stream failed: {err:#}");
                    return Ok(StreamEnd::Interrupted);
                }
            };
            events += 1;
            backoff.reset();

            let website = &event.object;
            info!(
                event = %event.event_type,
                name = %website.name(),
                namespace = %website.namespace(),
                nombre = %website.spec.nombre,
                git_repo = %website.spec.git_repo,
                "received watch event"
            );

            let Err(err) = self.reconciler.reconcile(&event, cancel).await else {
                continue;
            };
            if cancel.is_cancelled() {
                return Ok(StreamEnd::Cancelled);
            }
            match err.class() {
                ErrorClass::Permanent => {
                    warn!(name = %website.name(), "skipping event: {err:#}");
                }
                ErrorClass::Transient => {
                    warn!(name = %website.name(), "reconcile failed, reopening watch: {err:#}");
                    return Ok(StreamEnd::Interrupted);
                }
                ErrorClass::Fatal => return Err(err.into()),
            }
        }
    }
}

async fn sleep_with_cancel(duration: Duration, cancel: &CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(duration) => {}
    }
}

struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    fn next(&mut self) -> Duration {
        let wait = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        wait
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }
}
