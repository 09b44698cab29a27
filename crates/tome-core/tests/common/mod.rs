#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use tome_core::reasoning::{ReasoningKind, ReasoningRequest, ReasoningResponse};
use tome_core::{
    AuditSpawner, CaptureRequest, Coordinator, DrainTrigger, ReasoningError, ReasoningFunction,
    RevisionProbe, Settings,
};

type Script = dyn Fn(&ReasoningRequest) -> Result<Value, ReasoningError> + Send + Sync;

/// Reasoning stub driven by a closure; records every request it sees.
pub struct Scripted {
    script: Box<Script>,
    pub calls: Mutex<Vec<ReasoningRequest>>,
}

impl Scripted {
    pub fn new(
        script: impl Fn(&ReasoningRequest) -> Result<Value, ReasoningError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls_of(&self, kind: ReasoningKind) -> usize {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .filter(|r| r.kind == kind)
            .count()
    }
}

#[async_trait]
impl ReasoningFunction for Scripted {
    async fn call(&self, request: ReasoningRequest) -> Result<ReasoningResponse, ReasoningError> {
        let out = (self.script)(&request);
        self.calls.lock().expect("calls lock").push(request);
        out.map(ReasoningResponse::new)
    }
}

/// Reconcile stub: `duplicate` when the details already appear in the store,
/// otherwise `new`.
pub fn dedup_reconciler() -> Arc<Scripted> {
    Scripted::new(|req| {
        let details = req.context["item"]["details"].as_str().unwrap_or_default();
        let knowledge = req.context["knowledge"].as_str().unwrap_or_default();
        let action = if !details.is_empty() && knowledge.contains(details) {
            "duplicate"
        } else {
            "new"
        };
        Ok(json!({"action": action, "ready_for_next": true}))
    })
}

#[derive(Default)]
pub struct Recorder {
    pub drains: AtomicUsize,
    pub audits: AtomicUsize,
}

impl Recorder {
    pub fn drains(&self) -> usize {
        self.drains.load(Ordering::SeqCst)
    }

    pub fn audits(&self) -> usize {
        self.audits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DrainTrigger for Recorder {
    async fn trigger_drain(&self) -> Result<()> {
        self.drains.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl AuditSpawner for Recorder {
    async fn spawn_audit(&self) -> Result<()> {
        self.audits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FixedRevision(pub String);

#[async_trait]
impl RevisionProbe for FixedRevision {
    async fn current_revision(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

pub fn settings(root: &Path) -> Settings {
    Settings::for_root(root)
}

pub fn coordinator(settings: &Settings, revision: &str) -> (Coordinator, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let coordinator = Coordinator::new(
        settings,
        recorder.clone(),
        Arc::new(FixedRevision(revision.to_string())),
        recorder.clone(),
    );
    (coordinator, recorder)
}

pub fn capture(category: &str, topic: &str, details: &str) -> CaptureRequest {
    CaptureRequest {
        category: category.into(),
        topic: topic.into(),
        details: details.into(),
        files: Vec::new(),
    }
}

pub fn write(settings: &Settings, rel: &str, content: &str) {
    let path = settings.knowledge_dir.join(rel);
    std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    std::fs::write(path, content).expect("write document");
}

pub fn read(settings: &Settings, rel: &str) -> String {
    std::fs::read_to_string(settings.knowledge_dir.join(rel)).expect("read document")
}

pub fn json_files(dir: &Path) -> Vec<std::path::PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(rd) => rd
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|x| x == "json"))
            .collect(),
        Err(_) => Vec::new(),
    }
}
