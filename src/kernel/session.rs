//! Session state visible to kernel commands: named bindings and diagnostics

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};

/// Ring buffer capacity for diagnostics.
const DIAGNOSTICS_CAPACITY: usize = 500;

/// Severity of a diagnostic record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Error,
}

/// One message surfaced to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub level: Level,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.level {
            Level::Info => write!(f, "{}", self.message),
            Level::Error => write!(f, "error: {}", self.message),
        }
    }
}

/// Thread-safe diagnostics sink shared between a session and the commands
/// it runs.
///
/// Clone shares the underlying buffer, so sign-in notices raised while a
/// command is suspended land in the same place as its final result.
#[derive(Clone)]
pub struct Diagnostics {
    inner: Arc<Mutex<VecDeque<Diagnostic>>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(DIAGNOSTICS_CAPACITY))),
        }
    }

    /// Push a record. If the buffer is at capacity, the oldest record is
    /// removed.
    pub fn push(&self, level: Level, message: impl Into<String>) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if guard.len() >= DIAGNOSTICS_CAPACITY {
            guard.pop_front();
        }
        guard.push_back(Diagnostic {
            level,
            message: message.into(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.push(Level::Info, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.push(Level::Error, message);
    }

    /// Drain all records, oldest first.
    pub fn drain(&self) -> Vec<Diagnostic> {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.drain(..).collect()
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}

/// A named value in the session.
#[derive(Clone)]
pub struct Binding {
    pub name: String,
    pub declared_type: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}

impl Binding {
    /// The bound value, if it has type `T`.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.value).downcast::<T>().ok()
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("name", &self.name)
            .field("declared_type", &self.declared_type)
            .finish()
    }
}

/// Named values visible to later code in the session. Last write wins.
#[derive(Debug, Default)]
pub struct Bindings {
    values: HashMap<String, Binding>,
}

impl Bindings {
    /// Bind `value` under `name`, returning the binding it replaced.
    pub fn bind<T: Any + Send + Sync>(
        &mut self,
        name: impl Into<String>,
        declared_type: &'static str,
        value: T,
    ) -> Option<Binding> {
        let name = name.into();
        let binding = Binding {
            name: name.clone(),
            declared_type,
            value: Arc::new(value),
        };
        self.values.insert(name, binding)
    }

    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.values.get(name)
    }

    /// Look up `name` and downcast it in one step.
    pub fn get_as<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.get(name).and_then(Binding::downcast)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

/// Everything a command can touch in the host session.
#[derive(Debug, Default)]
pub struct Session {
    pub bindings: Bindings,
    pub diagnostics: Diagnostics,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.inner.lock().map(|g| g.len()).unwrap_or_default();
        f.debug_struct("Diagnostics").field("pending", &len).finish()
    }
}
