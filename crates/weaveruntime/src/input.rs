use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use weavecore::{Context, Value};

/// Predicate over the context deciding whether a transition is taken.
/// Must not have side effects.
pub type Condition = Arc<dyn Fn(&Context) -> bool + Send + Sync>;

/// Wrap a closure as a [`Condition`].
pub fn when(f: impl Fn(&Context) -> bool + Send + Sync + 'static) -> Condition {
    Arc::new(f)
}

/// Where one input parameter gets its value from
#[derive(Clone)]
pub enum InputSource {
    /// A fixed value
    Literal(Value),
    /// The value stored under another context key
    Key(String),
    /// A value computed from the context
    Derived(Arc<dyn Fn(&Context) -> Value + Send + Sync>),
}

impl InputSource {
    pub fn literal(value: impl Into<Value>) -> Self {
        InputSource::Literal(value.into())
    }

    pub fn key(key: impl Into<String>) -> Self {
        InputSource::Key(key.into())
    }

    pub fn derive(f: impl Fn(&Context) -> Value + Send + Sync + 'static) -> Self {
        InputSource::Derived(Arc::new(f))
    }

    /// Resolve against `context`; a missing key yields `None`.
    pub fn resolve(&self, context: &Context) -> Option<Value> {
        match self {
            InputSource::Literal(value) => Some(value.clone()),
            InputSource::Key(key) => context.get(key).cloned(),
            InputSource::Derived(f) => Some(f(context)),
        }
    }
}

impl fmt::Debug for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputSource::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            InputSource::Key(key) => f.debug_tuple("Key").field(key).finish(),
            InputSource::Derived(_) => f.write_str("Derived(..)"),
        }
    }
}

/// Where each input parameter of a node comes from
#[derive(Clone, Debug, Default)]
pub struct InputMapping {
    sources: HashMap<String, InputSource>,
}

impl InputMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn literal(mut self, param: impl Into<String>, value: impl Into<Value>) -> Self {
        self.sources.insert(param.into(), InputSource::literal(value));
        self
    }

    pub fn key(mut self, param: impl Into<String>, key: impl Into<String>) -> Self {
        self.sources.insert(param.into(), InputSource::key(key));
        self
    }

    pub fn derive(
        mut self,
        param: impl Into<String>,
        f: impl Fn(&Context) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.sources.insert(param.into(), InputSource::derive(f));
        self
    }

    pub fn insert(&mut self, param: impl Into<String>, source: InputSource) {
        self.sources.insert(param.into(), source);
    }

    pub fn get(&self, param: &str) -> Option<&InputSource> {
        self.sources.get(param)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Resolve every mapped parameter; parameters whose key is absent from
    /// the context are left out.
    pub fn resolve_all(&self, context: &Context) -> HashMap<String, Value> {
        self.sources
            .iter()
            .filter_map(|(param, source)| {
                source.resolve(context).map(|value| (param.clone(), value))
            })
            .collect()
    }
}

/// Resolve the declared inputs of a node.
///
/// Explicit mapping entries take priority; any declared input still
/// unresolved falls back to the same-named context key.
pub(crate) fn resolve_inputs(
    declared: &[String],
    mapping: Option<&InputMapping>,
    context: &Context,
) -> HashMap<String, Value> {
    let mut inputs = HashMap::with_capacity(declared.len());
    for param in declared {
        let mapped = mapping
            .and_then(|m| m.get(param))
            .and_then(|source| source.resolve(context));
        let value = mapped.or_else(|| context.get(param).cloned());
        if let Some(value) = value {
            inputs.insert(param.clone(), value);
        }
    }
    inputs
}
