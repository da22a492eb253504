//! Scriptable provider shared by unit tests

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::core::batcher::{join_segments, SEGMENT_MARKER};
use crate::core::errors::{Result, TranslationError};
use crate::core::provider::TranslationProvider;

/// Deterministic in-memory backend.
///
/// Each segment of the input is translated to `[target]segment` unless a
/// fixed translation was registered for it.
pub(crate) struct MockProvider {
    name: String,
    priority: u8,
    calls: AtomicUsize,
    health_checks: AtomicUsize,
    inputs: Mutex<Vec<String>>,
    queued_failures: Mutex<VecDeque<TranslationError>>,
    merged_failure: Mutex<Option<TranslationError>>,
    persistent_failure: Mutex<Option<TranslationError>>,
    fixed: Mutex<HashMap<String, String>>,
    healthy: AtomicBool,
}

impl MockProvider {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            priority: 0,
            calls: AtomicUsize::new(0),
            health_checks: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
            queued_failures: Mutex::new(VecDeque::new()),
            merged_failure: Mutex::new(None),
            persistent_failure: Mutex::new(None),
            fixed: Mutex::new(HashMap::new()),
            healthy: AtomicBool::new(true),
        }
    }

    pub(crate) fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub(crate) fn with_translation(self, text: &str, translation: &str) -> Self {
        self.fixed
            .lock()
            .unwrap()
            .insert(text.to_string(), translation.to_string());
        self
    }

    /// Fail the next `count` calls with `error`
    pub(crate) fn fail_next(&self, count: usize, error: TranslationError) {
        let mut queue = self.queued_failures.lock().unwrap();
        for _ in 0..count {
            queue.push_back(error.clone());
        }
    }

    /// Fail every call carrying more than one segment
    pub(crate) fn fail_merged(&self, error: TranslationError) {
        *self.merged_failure.lock().unwrap() = Some(error);
    }

    /// Fail every call
    pub(crate) fn fail_always(&self, error: TranslationError) {
        *self.persistent_failure.lock().unwrap() = Some(error);
    }

    pub(crate) fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn health_checks(&self) -> usize {
        self.health_checks.load(Ordering::SeqCst)
    }

    pub(crate) fn inputs(&self) -> Vec<String> {
        self.inputs.lock().unwrap().clone()
    }

    fn translate_segment(&self, segment: &str, target: &str) -> String {
        match self.fixed.lock().unwrap().get(segment) {
            Some(fixed) => fixed.clone(),
            None => format!("[{}]{}", target, segment),
        }
    }
}

#[async_trait]
impl TranslationProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    async fn translate(&self, text: &str, _source_lang: &str, target_lang: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inputs.lock().unwrap().push(text.to_string());

        if let Some(error) = self.queued_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        if let Some(error) = self.persistent_failure.lock().unwrap().clone() {
            return Err(error);
        }
        if text.contains(SEGMENT_MARKER) {
            if let Some(error) = self.merged_failure.lock().unwrap().clone() {
                return Err(error);
            }
        }

        let segments: Vec<String> = text
            .split(SEGMENT_MARKER)
            .map(|segment| self.translate_segment(segment.trim(), target_lang))
            .collect();
        Ok(join_segments(&segments))
    }

    async fn health_check(&self) -> Result<()> {
        self.health_checks.fetch_add(1, Ordering::SeqCst);
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TranslationError::ServiceUnavailable {
                message: format!("{} is down", self.name),
            })
        }
    }
}
