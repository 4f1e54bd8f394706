//! Workflow run context shared by every step of a single run.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

/// Type-safe context key wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextKey(String);

impl ContextKey {
    /// Creates a new ContextKey.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ContextKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ContextKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for ContextKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for ContextKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// The identity performing a workflow run.
///
/// The engine never inspects it; it is handed to every service call as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    id: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    attributes: Map<String, Value>,
}

impl Actor {
    /// Creates an actor with the given identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: Map::new(),
        }
    }

    /// The actor used for runs started by the system itself.
    pub fn system() -> Self {
        Self::new("system")
    }

    /// Attaches an attribute (role, tenant, ...) to the actor.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Returns the actor identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns an attribute, if set.
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }
}

/// Failure payload recorded on a failed context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextError {
    /// Human-readable message of the first failure.
    pub message: String,
    /// Structured details, merged across repeated `fail` calls.
    pub details: Map<String, Value>,
}

/// Execution context for one workflow run.
///
/// Values are stored as JSON so that any serializable value can be shared
/// between steps and rendered into the run result.
///
/// # Examples
///
/// ```
/// use nagare_core::{Actor, Context};
///
/// let mut ctx = Context::new(Actor::new("user-1"));
///
/// ctx.insert("order_id", 42);
/// ctx.insert("status", "pending");
///
/// assert_eq!(ctx.get_as::<u64>("order_id"), Some(42));
/// assert_eq!(ctx.get("status").and_then(|v| v.as_str()), Some("pending"));
///
/// // Unknown keys are reported as absent
/// assert_eq!(ctx.get("missing"), None);
/// ```
pub struct Context {
    actor: Actor,
    params: Value,
    data: HashMap<ContextKey, Value>,
    error: Option<ContextError>,
    invoked: bool,
    started_at: Instant,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys = self.data.keys().collect::<Vec<_>>();
        keys.sort();
        f.debug_struct("Context")
            .field("actor", &self.actor.id)
            .field("keys", &keys)
            .field("failed", &self.is_failure())
            .field("invoked", &self.invoked)
            .finish()
    }
}

impl Context {
    /// Creates an empty context for the given actor.
    pub fn new(actor: Actor) -> Self {
        Self {
            actor,
            params: Value::Object(Map::new()),
            data: HashMap::new(),
            error: None,
            invoked: false,
            started_at: Instant::now(),
        }
    }

    /// Creates a context seeded with run parameters.
    ///
    /// Each entry of a JSON object becomes a top-level key. Any other value
    /// is stored as a whole under the `params` key.
    pub fn with_params(actor: Actor, params: Value) -> Self {
        let mut ctx = Self::new(actor);
        match &params {
            Value::Object(map) => {
                for (key, value) in map {
                    ctx.data.insert(ContextKey::new(key.as_str()), value.clone());
                }
            }
            Value::Null => {}
            other => {
                ctx.data.insert(ContextKey::new("params"), other.clone());
            }
        }
        ctx.params = params;
        ctx
    }

    /// Returns the actor that started the run.
    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    /// Returns the parameters the run was started with.
    pub fn params(&self) -> &Value {
        &self.params
    }

    /// Inserts a value with the given key, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<ContextKey>, value: impl Into<Value>) {
        self.data.insert(key.into(), value.into());
    }

    /// Serializes `value` and inserts it with the given key.
    pub fn insert_serialized<T: Serialize>(
        &mut self,
        key: impl Into<ContextKey>,
        value: &T,
    ) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(value)?;
        self.data.insert(key.into(), value);
        Ok(())
    }

    /// Returns the value for the given key, or `None` if it was never set.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Returns the value for the given key deserialized into `T`.
    ///
    /// Returns `None` if the key doesn't exist or the value doesn't fit `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data.get(key).and_then(|v| T::deserialize(v).ok())
    }

    /// Looks up a dotted path such as `order.id`.
    ///
    /// The first segment names a context key, the rest walk into JSON objects
    /// (or arrays, when the segment is an index).
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.data.get(segments.next()?)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Returns `true` if the context contains a value for the given key.
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Returns an iterator over all keys in the context.
    pub fn keys(&self) -> impl Iterator<Item = &ContextKey> {
        self.data.keys()
    }

    /// Returns the number of entries in the context.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the context contains no entries.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns `true` until the context is failed.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Returns `true` once [`Context::fail`] has been called.
    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }

    /// Marks the context as failed.
    ///
    /// Calling it again on a failed context keeps the first message and
    /// merges the new details in; the context never returns to success.
    pub fn fail(&mut self, message: impl Into<String>, details: Map<String, Value>) {
        match &mut self.error {
            Some(error) => error.details.extend(details),
            None => {
                self.error = Some(ContextError {
                    message: message.into(),
                    details,
                });
            }
        }
    }

    /// Returns the failure payload, if the context failed.
    pub fn error(&self) -> Option<&ContextError> {
        self.error.as_ref()
    }

    /// Records that a workflow run has picked this context up.
    pub fn mark_invoked(&mut self) {
        self.invoked = true;
    }

    /// Returns `true` once a run has started with this context.
    pub fn is_invoked(&self) -> bool {
        self.invoked
    }

    /// Returns the time elapsed since the context was created.
    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    /// Renders every stored key into a JSON object.
    pub fn to_value(&self) -> Value {
        Value::Object(self.to_map())
    }

    /// Copies every stored key into a JSON map.
    pub fn to_map(&self) -> Map<String, Value> {
        self.data
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), v.clone()))
            .collect()
    }
}
