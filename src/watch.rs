use indexmap::IndexMap;

use crate::payload::FieldValue;

/// Last value a watch has seen, in comparable form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Snapshot {
    /// No payload was available yet, so any real reading counts as a change.
    Unobserved,
    Absent,
    Text(String),
    Xml(String),
}

impl Snapshot {
    pub fn of(value: Option<&FieldValue>) -> Self {
        match value {
            None => Snapshot::Absent,
            Some(FieldValue::Text(text)) => Snapshot::Text(text.clone()),
            Some(value @ FieldValue::Xml(_)) => Snapshot::Xml(value.serialize()),
        }
    }
}

struct Watch<C> {
    snapshot: Snapshot,
    /// Empty while the callback is running.
    callback: Option<C>,
}

/// Watched field paths in registration order.
pub struct WatchSet<C> {
    watches: IndexMap<String, Watch<C>>,
}

impl<C> Default for WatchSet<C> {
    fn default() -> Self {
        Self {
            watches: IndexMap::new(),
        }
    }
}

impl<C> WatchSet<C> {
    /// Registers `callback`; an existing watch on the same path keeps its
    /// position and gets the new callback and snapshot.
    pub fn add(&mut self, path: impl Into<String>, callback: C, snapshot: Snapshot) {
        self.watches.insert(
            path.into(),
            Watch {
                snapshot,
                callback: Some(callback),
            },
        );
    }

    pub fn clear(&mut self) {
        self.watches.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }

    pub fn len(&self) -> usize {
        self.watches.len()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.watches.contains_key(path)
    }

    pub fn paths(&self) -> Vec<String> {
        self.watches.keys().cloned().collect()
    }

    /// Records `current` for `path` and hands out the callback when the
    /// value differs from the last one seen.
    pub fn take_if_changed(&mut self, path: &str, current: Snapshot) -> Option<C> {
        let watch = self.watches.get_mut(path)?;
        if watch.snapshot == current {
            return None;
        }
        watch.snapshot = current;
        watch.callback.take()
    }

    /// Puts a callback back after it ran, unless the watch was removed or
    /// re-registered meanwhile.
    pub fn restore(&mut self, path: &str, callback: C) {
        if let Some(watch) = self.watches.get_mut(path) {
            if watch.callback.is_none() {
                watch.callback = Some(callback);
            }
        }
    }
}
