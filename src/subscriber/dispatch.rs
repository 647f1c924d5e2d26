//! DispatchPump (C3): batches ack/modify-ack intents into size-capped RPCs
//! with retry/backoff, grounded on the teacher ecosystem's free-standing
//! `ack`/`nack`/`modify_ack_deadline` helpers (which already chunk ack_ids
//! via `ack_ids.chunks(100)`) generalized into a standing background pump
//! that also serves the renewer's and auto-committer's fire-and-forget
//! intents.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::apiv1::SubscriberStub;
use crate::backoff::Backoff;
use crate::config::SubscriberConfig;
use crate::error::{Error, Kind};

/// One unit of work for the pump: ack, nack (modify to zero), or extend.
#[derive(Clone)]
pub enum Job {
    Ack(Vec<String>),
    Nack(Vec<String>),
    Modify(Vec<String>, i32),
}

impl Job {
    fn ack_ids(&self) -> &[String] {
        match self {
            Job::Ack(v) | Job::Nack(v) => v,
            Job::Modify(v, _) => v,
        }
    }

    fn is_empty(&self) -> bool {
        self.ack_ids().is_empty()
    }
}

pub struct DispatchPump {
    stub: Arc<dyn SubscriberStub>,
    subscription: String,
    config: Arc<SubscriberConfig>,
    semaphore: Arc<Semaphore>,
    tx: async_channel::Sender<Job>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for DispatchPump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchPump")
            .field("subscription", &self.subscription)
            .finish()
    }
}

impl DispatchPump {
    /// Spawns the background coalescing worker and returns the handle
    /// callers submit intents through.
    pub fn spawn(
        stub: Arc<dyn SubscriberStub>,
        subscription: String,
        config: Arc<SubscriberConfig>,
        cancel: CancellationToken,
    ) -> (Arc<Self>, tokio::task::JoinHandle<()>) {
        let (tx, rx) = async_channel::unbounded();
        let semaphore = Arc::new(Semaphore::new(crate::config::MAX_INFLIGHT_BATCHES));

        let pump = Arc::new(Self {
            stub: stub.clone(),
            subscription: subscription.clone(),
            config: config.clone(),
            semaphore: semaphore.clone(),
            tx,
            cancel: cancel.clone(),
        });

        let worker = tokio::spawn(Self::coalesce_loop(rx, stub, subscription, config, semaphore, cancel));
        (pump, worker)
    }

    /// Enqueues a job for best-effort, asynchronous dispatch (the path used
    /// by the lease renewer and the auto-committer). Never blocks the caller.
    pub fn enqueue(&self, job: Job) {
        if job.is_empty() {
            return;
        }
        if self.tx.send_blocking(job).is_err() {
            warn!("dispatch pump worker is gone, dropping intent");
        }
    }

    /// Dispatches a job immediately, chunked by `max_per_request_changes`,
    /// and waits for every chunk to either succeed or be deemed
    /// unrecoverable. This is the synchronous commit path (§4.3, §4.7):
    /// when it returns, every ack_id in `job` has had a corresponding RPC
    /// outcome observed.
    pub async fn flush_sync(&self, job: Job) {
        if job.is_empty() {
            return;
        }
        let chunks = chunk_job(job, self.config.max_per_request_changes);
        let mut tasks = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let stub = self.stub.clone();
            let subscription = self.subscription.clone();
            let config = self.config.clone();
            let semaphore = self.semaphore.clone();
            let cancel = self.cancel.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await;
                dispatch_with_retry(stub.as_ref(), &subscription, chunk, &config, &cancel).await;
            }));
        }
        for t in tasks {
            let _ = t.await;
        }
    }

    async fn coalesce_loop(
        rx: async_channel::Receiver<Job>,
        stub: Arc<dyn SubscriberStub>,
        subscription: String,
        config: Arc<SubscriberConfig>,
        semaphore: Arc<Semaphore>,
        cancel: CancellationToken,
    ) {
        loop {
            let first = tokio::select! {
                _ = cancel.cancelled() => break,
                job = rx.recv() => match job {
                    Ok(job) => job,
                    Err(_) => break,
                },
            };

            let mut batch = vec![first];
            let window = tokio::time::sleep(crate::config::DISPATCH_COALESCE_WINDOW);
            tokio::pin!(window);
            loop {
                tokio::select! {
                    _ = &mut window => break,
                    maybe = rx.recv() => match maybe {
                        Ok(job) => {
                            batch.push(job);
                            if batch.iter().map(|j| j.ack_ids().len()).sum::<usize>()
                                >= config.max_per_request_changes
                            {
                                break;
                            }
                        }
                        Err(_) => break,
                    },
                }
            }

            for job in batch {
                for chunk in chunk_job(job, config.max_per_request_changes) {
                    let permit = semaphore.clone().acquire_owned().await.ok();
                    let stub = stub.clone();
                    let subscription = subscription.clone();
                    let config = config.clone();
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        dispatch_with_retry(stub.as_ref(), &subscription, chunk, &config, &cancel).await;
                    });
                }
            }
        }
        debug!("dispatch pump worker stopped");
    }
}

fn chunk_job(job: Job, max_per_request: usize) -> Vec<Job> {
    match job {
        Job::Ack(ids) => ids
            .chunks(max_per_request)
            .map(|c| Job::Ack(c.to_vec()))
            .collect(),
        Job::Nack(ids) => ids
            .chunks(max_per_request)
            .map(|c| Job::Nack(c.to_vec()))
            .collect(),
        Job::Modify(ids, seconds) => ids
            .chunks(max_per_request)
            .map(|c| Job::Modify(c.to_vec(), seconds))
            .collect(),
    }
}

async fn dispatch_with_retry(
    stub: &dyn SubscriberStub,
    subscription: &str,
    job: Job,
    config: &SubscriberConfig,
    cancel: &CancellationToken,
) {
    let mut backoff = Backoff::new(config.retry_backoff);
    loop {
        let result = match &job {
            Job::Ack(ids) => stub.acknowledge(subscription, ids.clone(), config.ack_request_timeout).await,
            Job::Nack(ids) => {
                stub.modify_ack_deadline(subscription, ids.clone(), 0, config.ack_request_timeout)
                    .await
            }
            Job::Modify(ids, seconds) => {
                stub.modify_ack_deadline(subscription, ids.clone(), *seconds, config.ack_request_timeout)
                    .await
            }
        };

        match result {
            Ok(()) => return,
            Err(status) => {
                let kind = Kind::of_code(status.code());
                if kind != Kind::Retriable {
                    error!(error = %status, ?job, "dropping unrecoverable batch; server will redeliver on its own schedule");
                    return;
                }
                let delay = backoff.next_delay();
                warn!(error = %status, ?delay, "retriable dispatch failure, backing off");
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Job::Ack(v) => write!(f, "Ack({})", v.len()),
            Job::Nack(v) => write!(f, "Nack({})", v.len()),
            Job::Modify(v, s) => write!(f, "Modify({}, {}s)", v.len(), s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_job_respects_max_per_request() {
        let ids: Vec<String> = (0..10).map(|i| i.to_string()).collect();
        let job = Job::Ack(ids);
        let chunks = chunk_job(job, 3);
        assert_eq!(chunks.len(), 4);
        assert!(chunks.iter().all(|c| c.ack_ids().len() <= 3));
    }
}
