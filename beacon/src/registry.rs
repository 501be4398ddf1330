use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use crate::{
    definition::ReportDefinition,
    error::{ReportError, Result},
};

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(0);

/// Identifies a committed definition inside the registry that issued it.
/// Other registries do not resolve it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReportHandle {
    registry: u64,
    index: usize,
}

/// Table of committed report definitions.
///
/// Filled while the application configures itself and read-only once it
/// is frozen into a [`Tracker`](crate::Tracker). Definitions are kept in
/// commit order and indexed by trigger target (model or controller class)
/// and trigger key (event or action name).
#[derive(Debug)]
pub struct ReportRegistry {
    id: u64,
    reports: Vec<Arc<ReportDefinition>>,
    targets: HashMap<String, HashMap<String, Vec<ReportHandle>>>,
}

impl ReportRegistry {
    pub fn new() -> Self {
        Self {
            id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            reports: Vec::new(),
            targets: HashMap::new(),
        }
    }

    /// Adds a definition. Templates without a trigger are rejected.
    pub(crate) fn insert(&mut self, definition: ReportDefinition) -> Result<ReportHandle> {
        if !definition.valid_for_push() {
            return Err(ReportError::configuration(
                "cannot commit a report definition without a trigger binding",
            ));
        }

        let handle = ReportHandle {
            registry: self.id,
            index: self.reports.len(),
        };
        if let Some(trigger) = definition.trigger() {
            if let (Some(target), Some(key)) = (trigger.target(), trigger.key()) {
                self.targets
                    .entry(target.to_string())
                    .or_default()
                    .entry(key.to_string())
                    .or_default()
                    .push(handle);
                tracing::debug!("registered report for {}#{}", target, key);
            }
        }
        self.reports.push(Arc::new(definition));
        Ok(handle)
    }

    /// `None` for handles issued by another registry.
    pub fn get(&self, handle: ReportHandle) -> Option<&Arc<ReportDefinition>> {
        if handle.registry != self.id {
            return None;
        }
        self.reports.get(handle.index)
    }

    /// Handles of the definitions that fire for `key` on `target`, in
    /// commit order.
    pub fn handles_for(&self, target: &str, key: &str) -> &[ReportHandle] {
        self.targets
            .get(target)
            .and_then(|keys| keys.get(key))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Trigger keys registered for `target`.
    pub fn keys_for(&self, target: &str) -> Vec<&str> {
        let mut keys: Vec<&str> = self
            .targets
            .get(target)
            .map(|keys| keys.keys().map(String::as_str).collect())
            .unwrap_or_default();
        keys.sort_unstable();
        keys
    }

    pub fn reports(&self) -> impl Iterator<Item = &Arc<ReportDefinition>> {
        self.reports.iter()
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }
}

impl Default for ReportRegistry {
    fn default() -> Self {
        Self::new()
    }
}
