//! Retranslator service
//!
//! Wires the listener, store, queue, client and publisher together and owns
//! their tasks.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use cid_protocol::{create_upstream_encoder, Event, EventDictionary};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::{spawn_retranslation_client, ClientHandle};
use crate::config::RetranslatorConfig;
use crate::enrich::{enrich_events, enrich_latest, EnrichedEvent, EnrichedSubscription};
use crate::error::RelayError;
use crate::listener::{InboundListener, Ingest};
use crate::publisher::{Subscription, UpdatePublisher};
use crate::queue::retranslation_queue;
use crate::registry::EventStore;
use crate::state::{Device, QueueStats};

/// Outcome of [`Retranslator::shutdown`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Every task exited before the deadline
    pub clean: bool,
    /// Tasks that had to be aborted
    pub aborted_tasks: Vec<&'static str>,
}

/// A running retranslator
pub struct Retranslator {
    config: RetranslatorConfig,
    dictionary: Arc<EventDictionary>,
    store: Arc<EventStore>,
    publisher: Arc<UpdatePublisher>,
    client: ClientHandle,
    local_addr: SocketAddr,
    cancel: CancellationToken,
    listener_task: Option<JoinHandle<()>>,
    client_task: Option<JoinHandle<()>>,
}

impl Retranslator {
    /// Bind the panel listener and start the upstream client
    ///
    /// Fails without starting anything if the configuration is invalid or the
    /// listener cannot bind.
    pub async fn startup(
        config: RetranslatorConfig,
        dictionary: EventDictionary,
    ) -> Result<Self, RelayError> {
        config.validate()?;
        let encoder = create_upstream_encoder(&config.dialect)?;

        let store = Arc::new(EventStore::new(config.history_capacity, config.recent_limit));
        let publisher = Arc::new(UpdatePublisher::new(config.publisher_capacity));
        let (queue_tx, queue_rx) = retranslation_queue(config.queue_capacity);
        let ingest = Ingest::new(Arc::clone(&store), queue_tx, Arc::clone(&publisher));

        let listener = InboundListener::bind(&config.listen, ingest, &config).await?;
        let local_addr = listener.local_addr()?;

        let cancel = CancellationToken::new();
        let (client, client_task) =
            spawn_retranslation_client(&config, encoder, queue_rx, cancel.child_token());
        let listener_task = tokio::spawn(listener.run(cancel.child_token()));

        info!(
            "Retranslator started: panels on {}, upstream {} ({}), {} dictionary entries",
            local_addr,
            config.upstream,
            config.dialect.name(),
            dictionary.len()
        );

        Ok(Self {
            config,
            dictionary: Arc::new(dictionary),
            store,
            publisher,
            client,
            local_addr,
            cancel,
            listener_task: Some(listener_task),
            client_task: Some(client_task),
        })
    }

    /// Address the panel listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Active configuration
    pub fn config(&self) -> &RetranslatorConfig {
        &self.config
    }

    /// The event dictionary used for enrichment
    pub fn dictionary(&self) -> &EventDictionary {
        &self.dictionary
    }

    /// All known devices, sorted by id
    pub fn initial_devices(&self) -> Vec<Device> {
        self.store.devices()
    }

    /// The most recent events, oldest first
    pub fn initial_events(&self) -> Vec<Arc<Event>> {
        self.store.recent_events()
    }

    /// Devices and recent events as one consistent view
    pub fn snapshot(&self) -> (Vec<Device>, Vec<Arc<Event>>) {
        self.store.snapshot()
    }

    /// Every retained event for one device, oldest first
    pub fn device_events(&self, id: &str) -> Vec<Arc<Event>> {
        self.store.device_events(id)
    }

    /// Attach a live device-update subscriber
    pub fn subscribe_device_updates(&self) -> Subscription<Device> {
        self.publisher.subscribe_devices()
    }

    /// Attach a live event-update subscriber
    pub fn subscribe_event_updates(&self) -> Subscription<Arc<Event>> {
        self.publisher.subscribe_events()
    }

    /// Snapshot of the upstream delivery counters
    ///
    /// Fails with [`RelayError::StatsTimeout`] if the client does not answer within `bound`.
    pub async fn queue_stats(&self, bound: Duration) -> Result<QueueStats, RelayError> {
        self.client.queue_stats(bound).await
    }

    /// The most recent events that have a dictionary entry, oldest first
    ///
    /// Unknown codes are filtered out of the retained log before the
    /// `recent_limit` cut.
    pub fn enriched_events(&self) -> Vec<EnrichedEvent> {
        let events = self.store.retained_events();
        enrich_latest(
            events.iter().map(Arc::as_ref),
            &self.dictionary,
            self.config.recent_limit,
        )
    }

    /// One device's events that have a dictionary entry, oldest first
    pub fn enriched_device_events(&self, id: &str) -> Vec<EnrichedEvent> {
        let events = self.store.device_events(id);
        enrich_events(events.iter().map(Arc::as_ref), &self.dictionary)
    }

    /// Attach a live subscriber that only sees events with a dictionary entry
    pub fn subscribe_enriched_events(&self) -> EnrichedSubscription {
        EnrichedSubscription::new(self.publisher.subscribe_events(), Arc::clone(&self.dictionary))
    }

    /// Stop everything, waiting until `deadline` for tasks to exit
    ///
    /// Tasks still running at the deadline are aborted and named in the report.
    pub async fn shutdown(mut self, deadline: Duration) -> ShutdownReport {
        info!("Retranslator shutting down");
        let until = Instant::now() + deadline;

        self.cancel.cancel();
        self.publisher.close();

        let tasks = [
            ("listener", self.listener_task.take()),
            ("client", self.client_task.take()),
        ];
        let running = tasks
            .into_iter()
            .filter_map(|(name, task)| task.map(|task| (name, task)));
        let report = join_until(running, until).await;
        info!("Retranslator stopped (clean: {})", report.clean);
        report
    }
}

/// Wait for each task until `until`, aborting whatever is still running then
async fn join_until<I>(tasks: I, until: Instant) -> ShutdownReport
where
    I: IntoIterator<Item = (&'static str, JoinHandle<()>)>,
{
    let mut aborted_tasks = Vec::new();
    for (name, mut task) in tasks {
        if tokio::time::timeout_at(until, &mut task).await.is_err() {
            warn!("{} task did not stop before the deadline, aborting", name);
            task.abort();
            aborted_tasks.push(name);
        }
    }

    ShutdownReport {
        clean: aborted_tasks.is_empty(),
        aborted_tasks,
    }
}

impl Drop for Retranslator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Counts live clones so a test can tell when a task's future was dropped
    fn guard() -> Arc<()> {
        Arc::new(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_task_is_aborted_at_deadline() {
        let held = guard();
        let stalled = {
            let held = Arc::clone(&held);
            tokio::spawn(async move {
                let _held = held;
                std::future::pending::<()>().await;
            })
        };
        let finished = tokio::spawn(async {});

        let start = Instant::now();
        let report = join_until(
            [("finished", finished), ("stalled", stalled)],
            start + Duration::from_secs(1),
        )
        .await;

        assert!(!report.clean);
        assert_eq!(report.aborted_tasks, vec!["stalled"]);
        assert!(start.elapsed() >= Duration::from_secs(1));

        // The aborted future is dropped once the runtime gets to it
        for _ in 0..10 {
            if Arc::strong_count(&held) == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(Arc::strong_count(&held), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tasks_that_finish_in_time_are_clean() {
        let slow = tokio::spawn(tokio::time::sleep(Duration::from_millis(300)));
        let report = join_until([("slow", slow)], Instant::now() + Duration::from_secs(1)).await;

        assert!(report.clean);
        assert!(report.aborted_tasks.is_empty());
    }
}
