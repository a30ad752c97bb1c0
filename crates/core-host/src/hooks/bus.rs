//! The priority-ordered, per-event Hook Bus.
//!
//! One registry per event key, stable-sorted by descending priority so
//! insertion order breaks ties. `emit` walks the sequence sequentially,
//! normalizing handler failures into [`HookExecutionResult`] entries rather
//! than letting them propagate to the caller.

use std::collections::{HashMap, HashSet};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tokio::sync::Mutex;

use super::types::{EmitOptions, HookDefinition, HookExecutionResult, HookPayload};

fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

struct StoredHook {
    id: u64,
    name: String,
    once: bool,
    priority: i32,
    handler: super::types::HookHandler,
}

#[derive(Default)]
struct Inner {
    events: HashMap<String, Vec<StoredHook>>,
    owner_index: HashMap<String, HashSet<u64>>,
    id_to_event: HashMap<u64, String>,
    next_id: u64,
}

impl Inner {
    fn resort(&mut self, event: &str) {
        if let Some(hooks) = self.events.get_mut(event) {
            hooks.sort_by(|a, b| b.priority.cmp(&a.priority));
        }
    }
}

#[derive(Default)]
pub struct HookBus {
    inner: Mutex<Inner>,
}

impl HookBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook. The returned id can be passed to [`HookBus::unregister`].
    pub async fn register(&self, def: HookDefinition, owner: Option<&str>) -> u64 {
        let mut inner = self.inner.lock().await;
        let id = inner.next_id;
        inner.next_id += 1;
        let event = def.event.clone();
        let stored = StoredHook { id, name: def.name, once: def.once, priority: def.priority, handler: def.handler };
        inner.events.entry(event.clone()).or_default().push(stored);
        inner.resort(&event);
        if let Some(owner) = owner {
            inner.owner_index.entry(owner.to_string()).or_default().insert(id);
        }
        inner.id_to_event.insert(id, event.clone());
        log::debug!("hook bus: registered hook #{} on '{}'", id, event);
        id
    }

    /// Remove a single hook registration by id, regardless of owner.
    pub async fn unregister(&self, id: u64) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(event) = inner.id_to_event.remove(&id) else {
            return false;
        };
        if let Some(hooks) = inner.events.get_mut(&event) {
            hooks.retain(|h| h.id != id);
        }
        for ids in inner.owner_index.values_mut() {
            ids.remove(&id);
        }
        true
    }

    /// Convenience wrapper matching the Hook Contract's `on(event, handler)`.
    pub async fn on(
        &self,
        event: impl Into<String>,
        name: impl Into<String>,
        priority: i32,
        owner: Option<&str>,
        handler: super::types::HookHandler,
    ) -> u64 {
        let def = HookDefinition::new(name, event, handler).with_priority(priority);
        self.register(def, owner).await
    }

    /// As `on`, with the one-shot flag set.
    pub async fn once(
        &self,
        event: impl Into<String>,
        name: impl Into<String>,
        owner: Option<&str>,
        handler: super::types::HookHandler,
    ) -> u64 {
        let def = HookDefinition::new(name, event, handler).once();
        self.register(def, owner).await
    }

    /// Walk the event's ordered sequence, invoking each handler in turn.
    /// One-shot hooks are removed after being invoked, regardless of
    /// outcome. Handler errors never propagate to the caller — they are
    /// captured as `success: false` entries unless `stop_on_error` is set,
    /// in which case the walk halts and the results gathered so far are
    /// returned.
    pub async fn emit(&self, event: &str, data: Value, opts: EmitOptions) -> Vec<HookExecutionResult> {
        let payload = HookPayload { event: event.to_string(), timestamp: now_millis(), data, source: opts.source };

        let mut inner = self.inner.lock().await;
        let hook_count = inner.events.get(event).map(|v| v.len()).unwrap_or(0);
        let mut results = Vec::with_capacity(hook_count);
        let mut fired_once_ids = Vec::new();

        if let Some(hooks) = inner.events.get(event) {
            for hook in hooks {
                let started = Instant::now();
                let outcome = (hook.handler)(payload.clone()).await;
                let duration = started.elapsed();
                let success = outcome.is_ok();
                if hook.once {
                    fired_once_ids.push(hook.id);
                }
                results.push(HookExecutionResult {
                    hook_name: hook.name.clone(),
                    success,
                    duration,
                    error: outcome.err(),
                });
                if !success && opts.stop_on_error {
                    break;
                }
            }
        }

        if !fired_once_ids.is_empty() {
            if let Some(hooks) = inner.events.get_mut(event) {
                hooks.retain(|h| !fired_once_ids.contains(&h.id));
            }
            for id in &fired_once_ids {
                inner.id_to_event.remove(id);
                for ids in inner.owner_index.values_mut() {
                    ids.remove(id);
                }
            }
        }

        results
    }

    /// Remove every hook owned by `owner`, across all events.
    pub async fn unregister_plugin(&self, owner: &str) {
        let mut inner = self.inner.lock().await;
        let Some(ids) = inner.owner_index.remove(owner) else {
            return;
        };
        for hooks in inner.events.values_mut() {
            hooks.retain(|h| !ids.contains(&h.id));
        }
        for id in &ids {
            inner.id_to_event.remove(id);
        }
        log::debug!("hook bus: unregistered {} hook(s) owned by '{}'", ids.len(), owner);
    }

    pub async fn get_total_hook_count(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.events.values().map(|v| v.len()).sum()
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.events.clear();
        inner.owner_index.clear();
        inner.id_to_event.clear();
    }
}
