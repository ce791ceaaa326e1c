//! Scripted transport shared by the unit tests.

use crate::transport::{RawResponse, Transport, TransportError};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Respond(RawResponse),
    Fail(String),
}

pub(crate) fn reply(status: u16, body: &str) -> Reply {
    Reply::Respond(RawResponse {
        status,
        headers: BTreeMap::new(),
        body: body.to_string(),
    })
}

pub(crate) fn reply_with_header(status: u16, name: &str, value: &str, body: &str) -> Reply {
    Reply::Respond(RawResponse {
        status,
        headers: BTreeMap::from([(name.to_ascii_lowercase(), value.to_string())]),
        body: body.to_string(),
    })
}

/// Replies are queued per URL. The last reply for a URL repeats forever;
/// URLs with no script get a `404`.
#[derive(Debug, Default)]
pub(crate) struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<(String, Instant)>>,
    latency: Duration,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    pub(crate) fn script(&self, url: &str, reply: Reply) {
        self.scripts
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(reply);
    }

    pub(crate) fn calls(&self, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(called, _)| called == url)
            .count()
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub(crate) fn call_times(&self, url: &str) -> Vec<Instant> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(called, _)| called == url)
            .map(|(_, at)| *at)
            .collect()
    }

    pub(crate) fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn next_reply(&self, url: &str) -> Reply {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue.front().cloned().unwrap(),
            None => reply(404, "not found"),
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(&self, url: &Url) -> Result<RawResponse, TransportError> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), Instant::now()));
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let reply = self.next_reply(url.as_str());
        self.active.fetch_sub(1, Ordering::SeqCst);

        match reply {
            Reply::Respond(raw) => Ok(raw),
            Reply::Fail(message) => Err(TransportError::Connection(message)),
        }
    }
}
