use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use scene_queue::{Artifact, GenerationError, ImageGenerator};

pub type Reply = Result<Artifact, GenerationError>;

/// Generator with per-prompt scripted replies and a fixed latency.
/// Prompts without a script (or with an exhausted one) succeed.
pub struct ScriptedService {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<HashMap<String, usize>>,
    latency: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedService {
    pub fn new(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            latency,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    pub fn script(&self, prompt: &str, replies: Vec<Reply>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(prompt.to_string(), replies.into());
    }

    pub fn calls(&self, prompt: &str) -> usize {
        self.calls.lock().unwrap().get(prompt).copied().unwrap_or(0)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageGenerator for ScriptedService {
    async fn generate(&self, prompt: &str) -> Result<Artifact, GenerationError> {
        *self.calls.lock().unwrap().entry(prompt.to_string()).or_default() += 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let reply = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(prompt)
            .and_then(VecDeque::pop_front);
        reply.unwrap_or_else(|| Ok(Artifact::new(format!("img://{prompt}"))))
    }
}

pub fn rate_limited(message: &str) -> Reply {
    Err(GenerationError::with_status(429, message))
}

pub fn overloaded() -> Reply {
    Err(GenerationError::with_status(503, "The model is overloaded. Please try again later."))
}

pub fn failed(status: u16, message: &str) -> Reply {
    Err(GenerationError::with_status(status, message))
}
