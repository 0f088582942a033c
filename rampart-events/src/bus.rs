use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use rampart_core::BoxFuture;
use tokio::sync::{RwLock, Semaphore};

use crate::{ChangeEvent, Notifier};

type Handler = Arc<dyn Fn(Arc<str>, Arc<ChangeEvent>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Default maximum concurrent handlers.
const DEFAULT_MAX_CONCURRENCY: usize = 1024;

/// Topic that receives every published event.
const ALL_TOPICS: &str = "*";

/// In-process, topic-keyed event bus with backpressure.
///
/// Handlers subscribe to a topic (an owner uid, an entity uid, ...) or to
/// every topic. A semaphore bounds the number of concurrently executing
/// handlers; `emit` waits for a slot when the limit is reached.
#[derive(Clone)]
pub struct EventBus {
    handlers: Arc<RwLock<HashMap<String, Vec<Handler>>>>,
    semaphore: Option<Arc<Semaphore>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_concurrency(DEFAULT_MAX_CONCURRENCY)
    }

    pub fn with_concurrency(max_concurrent: usize) -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
            semaphore: Some(Arc::new(Semaphore::new(max_concurrent))),
        }
    }

    /// No concurrency limit. Memory grows unbounded if handlers fall behind.
    pub fn unbounded() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
            semaphore: None,
        }
    }

    /// Subscribe to events published on `topic`.
    pub async fn subscribe<F, Fut>(&self, topic: &str, handler: F)
    where
        F: Fn(Arc<str>, Arc<ChangeEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: Handler =
            Arc::new(move |topic: Arc<str>, event: Arc<ChangeEvent>| Box::pin(handler(topic, event)) as BoxFuture<'static, ()>);
        let mut handlers = self.handlers.write().await;
        handlers.entry(topic.to_string()).or_default().push(handler);
    }

    /// Subscribe to every topic.
    pub async fn subscribe_all<F, Fut>(&self, handler: F)
    where
        F: Fn(Arc<str>, Arc<ChangeEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.subscribe(ALL_TOPICS, handler).await;
    }

    /// Spawn every matching handler and return once they are scheduled.
    pub async fn emit(&self, topic: &str, event: ChangeEvent) {
        self.dispatch(topic, event).await;
    }

    /// Spawn every matching handler and wait for all of them to finish.
    pub async fn emit_and_wait(&self, topic: &str, event: ChangeEvent) {
        for task in self.dispatch(topic, event).await {
            if let Err(err) = task.await {
                tracing::warn!(topic, error = %err, "event handler panicked");
            }
        }
    }

    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.handlers.read().await.get(topic).map_or(0, Vec::len)
    }

    async fn dispatch(&self, topic: &str, event: ChangeEvent) -> Vec<tokio::task::JoinHandle<()>> {
        let handlers = self.handlers.read().await;
        let matching: Vec<Handler> = [topic, ALL_TOPICS]
            .iter()
            .filter_map(|t| handlers.get(*t))
            .flatten()
            .cloned()
            .collect();
        drop(handlers);

        let topic: Arc<str> = Arc::from(topic);
        let event = Arc::new(event);
        let mut tasks = Vec::with_capacity(matching.len());
        for handler in matching {
            let (t, e) = (topic.clone(), event.clone());
            match &self.semaphore {
                Some(sem) => {
                    let Ok(permit) = sem.clone().acquire_owned().await else {
                        tracing::warn!(topic = %topic, "event bus closed, dropping event");
                        break;
                    };
                    tasks.push(tokio::spawn(async move {
                        handler(t, e).await;
                        drop(permit);
                    }));
                }
                None => tasks.push(tokio::spawn(async move { handler(t, e).await })),
            }
        }
        tasks
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for EventBus {
    fn publish<'a>(&'a self, topic: &'a str, event: ChangeEvent) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            tracing::trace!(topic, kind = %event.kind, uid = %event.uid, "publishing change");
            self.emit(topic, event).await;
        })
    }
}
