//! In-process fakes shared by engine and command tests.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use woltbot_core::{
    config::StorageConfig,
    error::{PlatformError, SendError, WoltbotError},
    message::InboundMessage,
    model::{Observation, VenueMatch},
    traits::{MessagingClient, PlatformClient},
};
use woltbot_store::Store;

static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Create a temporary on-disk store for testing (unique per call).
pub async fn test_store() -> Store {
    let id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!(
        "__woltbot_test_{}_{}__",
        std::process::id(),
        id
    ));
    let _ = std::fs::create_dir_all(&dir);
    let db_path = dir.join("test.db").to_string_lossy().to_string();
    let _ = std::fs::remove_file(&db_path);
    let config = StorageConfig {
        backend: "sqlite".to_string(),
        db_path,
        max_connections: 4,
    };
    Store::new(&config).await.unwrap()
}

/// Scripted delivery platform.
#[derive(Default)]
pub struct FakePlatform {
    /// slug → (display name, open) or a failure.
    venues: Mutex<HashMap<String, Result<(String, bool), PlatformError>>>,
    search_results: Mutex<Vec<VenueMatch>>,
    delay: Mutex<Option<Duration>>,
    fetches: AtomicUsize,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_open(&self, slug: &str, name: &str, open: bool) {
        self.venues
            .lock()
            .unwrap()
            .insert(slug.to_string(), Ok((name.to_string(), open)));
    }

    pub fn set_error(&self, slug: &str, err: PlatformError) {
        self.venues.lock().unwrap().insert(slug.to_string(), Err(err));
    }

    pub fn set_search(&self, results: Vec<VenueMatch>) {
        *self.search_results.lock().unwrap() = results;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformClient for FakePlatform {
    fn name(&self) -> &str {
        "fake"
    }

    async fn fetch_state(&self, slug: &str) -> Result<Observation, PlatformError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        let entry = self.venues.lock().unwrap().get(slug).cloned();
        match entry {
            Some(Ok((name, open))) => Ok(Observation {
                slug: slug.to_string(),
                name,
                online: open,
                delivery_enabled: true,
                estimate_minutes: None,
                observed_at: Utc::now(),
            }),
            Some(Err(e)) => Err(e),
            None => Err(PlatformError::NotFound(slug.to_string())),
        }
    }

    async fn search(&self, _query: &str) -> Result<Vec<VenueMatch>, PlatformError> {
        Ok(self.search_results.lock().unwrap().clone())
    }
}

/// Messaging client that records deliveries and replays scripted failures.
#[derive(Default)]
pub struct FakeMessenger {
    sent: Mutex<Vec<(String, String)>>,
    failures: Mutex<HashMap<String, VecDeque<SendError>>>,
    always_fail: Mutex<HashMap<String, SendError>>,
    attempts: AtomicUsize,
}

impl FakeMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next send to `chat_id` with `err`.
    pub fn fail_once(&self, chat_id: &str, err: SendError) {
        self.failures
            .lock()
            .unwrap()
            .entry(chat_id.to_string())
            .or_default()
            .push_back(err);
    }

    /// Fail every send to `chat_id` with `err`.
    pub fn fail_always(&self, chat_id: &str, err: SendError) {
        self.always_fail
            .lock()
            .unwrap()
            .insert(chat_id.to_string(), err);
    }

    /// Texts successfully sent to `chat_id`, in order.
    pub fn sent_to(&self, chat_id: &str) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(chat, _)| chat == chat_id)
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn total_sent(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessagingClient for FakeMessenger {
    fn name(&self) -> &str {
        "fake"
    }

    async fn start(&self) -> Result<mpsc::Receiver<InboundMessage>, WoltbotError> {
        let (_tx, rx) = mpsc::channel(1);
        Ok(rx)
    }

    async fn send(&self, chat_id: &str, text: &str) -> Result<(), SendError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.always_fail.lock().unwrap().get(chat_id) {
            return Err(err.clone());
        }
        if let Some(err) = self
            .failures
            .lock()
            .unwrap()
            .get_mut(chat_id)
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }
        self.sent
            .lock()
            .unwrap()
            .push((chat_id.to_string(), text.to_string()));
        Ok(())
    }
}
