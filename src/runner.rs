//! Running every participant of a choreography at once.

use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::config::TransportConfig;
use crate::error::{ChoreographyError, Result};
use crate::location::Location;
use crate::op::Choreography;
use crate::projector::Projector;
use crate::transport::Transport;

/// Per-location results of one coordinated run.
#[derive(Debug)]
pub struct RunReport<T> {
    outcomes: BTreeMap<Location, Result<T>>,
    failed_sends: u64,
}

impl<T> RunReport<T> {
    pub fn outcome(&self, location: &Location) -> Option<&Result<T>> {
        self.outcomes.get(location)
    }

    pub fn outcomes(&self) -> &BTreeMap<Location, Result<T>> {
        &self.outcomes
    }

    pub fn into_outcomes(self) -> BTreeMap<Location, Result<T>> {
        self.outcomes
    }

    /// Sends the transport rejected, summed over every worker.
    pub fn failed_sends(&self) -> u64 {
        self.failed_sends
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.values().all(Result::is_ok)
    }
}

/// Spawns one worker per participant over a shared transport.
///
/// Workers are independent tokio tasks. A failed worker does not cancel its
/// siblings; those keep waiting on their receives until they finish, hit the
/// receive timeout, or the run deadline aborts them.
pub struct Coordinator {
    transport: Arc<dyn Transport>,
    receive_timeout: Option<Duration>,
    run_timeout: Option<Duration>,
}

impl Coordinator {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            receive_timeout: None,
            run_timeout: None,
        }
    }

    pub fn from_config(transport: Arc<dyn Transport>, config: &TransportConfig) -> Self {
        Self {
            receive_timeout: config.receive_timeout(),
            ..Self::new(transport)
        }
    }

    /// Bound every receive of every worker.
    #[must_use]
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = Some(timeout);
        self
    }

    /// Abort workers still running once `timeout` has passed since `run` began.
    #[must_use]
    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    fn projector(&self, target: Location) -> Projector {
        let projector = Projector::new(target, Arc::clone(&self.transport));
        match self.receive_timeout {
            Some(timeout) => projector.with_receive_timeout(timeout),
            None => projector,
        }
    }

    /// Run the same choreography at every location the transport knows.
    pub async fn run_everywhere<C>(&self, choreography: C) -> RunReport<C::Output>
    where
        C: Choreography + Clone + 'static,
        C::Output: 'static,
    {
        let participants: Vec<_> = self
            .transport
            .locations()
            .iter()
            .map(|location| (location.clone(), choreography.clone()))
            .collect();
        self.run(participants).await
    }

    /// Run each `(location, choreography)` pair as its own worker.
    ///
    /// Each choreography instance differs only in which located inputs it
    /// holds; the protocol body must be the same. A location listed twice is
    /// run once.
    #[instrument(skip_all)]
    pub async fn run<C, I>(&self, participants: I) -> RunReport<C::Output>
    where
        C: Choreography + 'static,
        C::Output: 'static,
        I: IntoIterator<Item = (Location, C)>,
    {
        let deadline = self.run_timeout.map(|timeout| (Instant::now() + timeout, timeout));
        let mut workers: Vec<(Location, JoinHandle<(Result<C::Output>, u64)>)> = Vec::new();
        for (location, choreography) in participants {
            if workers.iter().any(|(seen, _)| *seen == location) {
                warn!(%location, "duplicate participant ignored");
                continue;
            }
            let projector = self.projector(location.clone());
            let handle = tokio::spawn(async move {
                let result = projector.epp_and_run(&choreography).await;
                (result, projector.failed_sends())
            });
            workers.push((location, handle));
        }
        info!(workers = workers.len(), "coordinator: workers spawned");

        let joins = workers.into_iter().map(|(location, mut handle)| async move {
            let joined = match deadline {
                Some((at, timeout)) => match tokio::time::timeout_at(at, &mut handle).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        handle.abort();
                        warn!(%location, ?timeout, "worker aborted at run deadline");
                        return (location, Err(ChoreographyError::Timeout(timeout)), 0);
                    }
                },
                None => handle.await,
            };
            match joined {
                Ok((result, failed_sends)) => (location, result, failed_sends),
                Err(e) => {
                    warn!(%location, error = %e, "worker task failed");
                    let reason = e.to_string();
                    (
                        location.clone(),
                        Err(ChoreographyError::WorkerFailed { location, reason }),
                        0,
                    )
                }
            }
        });

        let mut report = RunReport {
            outcomes: BTreeMap::new(),
            failed_sends: 0,
        };
        for (location, result, failed_sends) in join_all(joins).await {
            debug!(%location, ok = result.is_ok(), "worker finished");
            report.failed_sends += failed_sends;
            report.outcomes.insert(location, result);
        }
        report
    }
}
