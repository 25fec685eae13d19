#![allow(dead_code, clippy::unwrap_used)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use firesync_core::{
    BackendError, CanonicalQuery, Protocol, Rule, RuleAction, RuleBackend, RuleId, RulePatch,
};
use tokio::sync::{mpsc, oneshot};

// ── Sample corpus ───────────────────────────────────────────────────

pub fn rule(id: &str, name: &str, action: RuleAction, enabled: bool) -> Rule {
    Rule {
        id: RuleId::new(id),
        name: name.into(),
        source: "10.0.0.0/24".into(),
        destination: "any".into(),
        protocol: Protocol::Tcp,
        port: "22".into(),
        action,
        enabled,
    }
}

/// Five rules: three allow, two deny, one of each disabled.
pub fn corpus() -> Vec<Rule> {
    vec![
        rule("fw-1", "Allow SSH from office", RuleAction::Allow, true),
        rule("fw-2", "Allow HTTPS inbound", RuleAction::Allow, true),
        rule("fw-3", "Deny Telnet", RuleAction::Deny, true),
        rule("fw-4", "Allow DNS resolvers", RuleAction::Allow, false),
        rule("fw-5", "Deny legacy SMB", RuleAction::Deny, false),
    ]
}

pub fn ids(rules: &[std::sync::Arc<Rule>]) -> Vec<&str> {
    rules.iter().map(|r| r.id.as_str()).collect()
}

/// Let every spawned task run until it blocks.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

// ── Scripted backend ────────────────────────────────────────────────
//
// Every call is parked until the test answers it, so completion order
// is under the test's control.

pub enum Call {
    Fetch {
        query: CanonicalQuery,
        reply: oneshot::Sender<Result<Vec<Rule>, BackendError>>,
    },
    Patch {
        id: RuleId,
        patch: RulePatch,
        reply: oneshot::Sender<Result<Rule, BackendError>>,
    },
}

pub struct ScriptedBackend {
    calls: mpsc::UnboundedSender<Call>,
}

pub struct Script {
    calls: mpsc::UnboundedReceiver<Call>,
}

pub fn scripted() -> (ScriptedBackend, Script) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ScriptedBackend { calls: tx }, Script { calls: rx })
}

fn closed() -> BackendError {
    BackendError::new("script closed", None)
}

impl RuleBackend for ScriptedBackend {
    async fn fetch_rules(&self, query: &CanonicalQuery) -> Result<Vec<Rule>, BackendError> {
        let (reply, rx) = oneshot::channel();
        self.calls
            .send(Call::Fetch {
                query: query.clone(),
                reply,
            })
            .map_err(|_| closed())?;
        rx.await.map_err(|_| closed())?
    }

    async fn patch_rule(&self, id: &RuleId, patch: &RulePatch) -> Result<Rule, BackendError> {
        let (reply, rx) = oneshot::channel();
        self.calls
            .send(Call::Patch {
                id: id.clone(),
                patch: patch.clone(),
                reply,
            })
            .map_err(|_| closed())?;
        rx.await.map_err(|_| closed())?
    }
}

pub struct PendingFetch {
    pub query: CanonicalQuery,
    reply: oneshot::Sender<Result<Vec<Rule>, BackendError>>,
}

impl PendingFetch {
    pub fn ok(self, rules: Vec<Rule>) {
        let _ = self.reply.send(Ok(rules));
    }

    pub fn fail(self, message: &str, status: u16) {
        let _ = self.reply.send(Err(BackendError::new(message, Some(status))));
    }
}

pub struct PendingPatch {
    pub id: RuleId,
    pub patch: RulePatch,
    reply: oneshot::Sender<Result<Rule, BackendError>>,
}

impl PendingPatch {
    pub fn ok(self, rule: Rule) {
        let _ = self.reply.send(Ok(rule));
    }

    pub fn fail(self, message: &str, status: u16) {
        let _ = self.reply.send(Err(BackendError::new(message, Some(status))));
    }
}

impl Script {
    pub async fn next_fetch(&mut self) -> PendingFetch {
        match self.calls.recv().await.unwrap() {
            Call::Fetch { query, reply } => PendingFetch { query, reply },
            Call::Patch { id, .. } => panic!("expected a fetch, got a patch of {id}"),
        }
    }

    pub async fn next_patch(&mut self) -> PendingPatch {
        match self.calls.recv().await.unwrap() {
            Call::Patch { id, patch, reply } => PendingPatch { id, patch, reply },
            Call::Fetch { query, .. } => panic!("expected a patch, got a fetch of {}", query.key()),
        }
    }

    /// Assert that no call is waiting to be answered.
    pub fn assert_silent(&mut self) {
        if let Ok(call) = self.calls.try_recv() {
            let what = match call {
                Call::Fetch { query, .. } => format!("fetch of {}", query.key()),
                Call::Patch { id, .. } => format!("patch of {id}"),
            };
            panic!("unexpected backend call: {what}");
        }
    }
}

// ── In-memory backend ───────────────────────────────────────────────

/// Answers immediately from a mutable corpus, filtering like the server.
pub struct MemoryBackend {
    rules: Mutex<Vec<Rule>>,
    reject_writes: Mutex<bool>,
    pub fetches: AtomicUsize,
    pub patches: AtomicUsize,
}

impl MemoryBackend {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            rules: Mutex::new(rules),
            reject_writes: Mutex::new(false),
            fetches: AtomicUsize::new(0),
            patches: AtomicUsize::new(0),
        }
    }

    pub fn reject_writes(&self, reject: bool) {
        *self.reject_writes.lock().unwrap() = reject;
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn patch_count(&self) -> usize {
        self.patches.load(Ordering::SeqCst)
    }
}

impl RuleBackend for MemoryBackend {
    async fn fetch_rules(&self, query: &CanonicalQuery) -> Result<Vec<Rule>, BackendError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if query.simulate_failure {
            return Err(BackendError::new("Simulated internal server error", Some(500)));
        }
        let rules = self.rules.lock().unwrap();
        Ok(rules.iter().filter(|r| query.matches(r)).cloned().collect())
    }

    async fn patch_rule(&self, id: &RuleId, patch: &RulePatch) -> Result<Rule, BackendError> {
        self.patches.fetch_add(1, Ordering::SeqCst);
        if *self.reject_writes.lock().unwrap() {
            return Err(BackendError::new(
                "Simulated firewall rule update error",
                Some(500),
            ));
        }
        let mut rules = self.rules.lock().unwrap();
        let Some(slot) = rules.iter_mut().find(|r| &r.id == id) else {
            return Err(BackendError::new("Firewall rule not found", Some(404)));
        };
        *slot = slot.patched(patch);
        Ok(slot.clone())
    }
}
