use super::PushQueue;
use anyhow::{Result, bail};
use async_trait::async_trait;
use courier_types::PushJob;
use std::collections::HashSet;
use std::sync::Mutex;

#[derive(Default)]
struct State {
    keys: HashSet<(String, String)>,
    jobs: Vec<PushJob>,
    failing_recipients: HashSet<String>,
}

#[derive(Default)]
pub struct InMemoryPushQueue {
    state: Mutex<State>,
}

impl InMemoryPushQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn jobs(&self) -> Vec<PushJob> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).jobs.clone()
    }

    pub fn jobs_for(&self, recipient_id: &str) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .jobs
            .iter()
            .filter(|j| j.recipient_id == recipient_id)
            .count()
    }

    pub fn fail_for(&self, recipient_id: &str) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.failing_recipients.insert(recipient_id.to_string());
    }

    pub fn heal(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.failing_recipients.clear();
    }
}

#[async_trait]
impl PushQueue for InMemoryPushQueue {
    async fn enqueue_push(&self, job: &PushJob) -> Result<bool> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.failing_recipients.contains(&job.recipient_id) {
            bail!("injected push gateway timeout");
        }
        let key = (job.message_id.clone(), job.recipient_id.clone());
        if !state.keys.insert(key) {
            return Ok(false);
        }
        state.jobs.push(job.clone());
        Ok(true)
    }
}
