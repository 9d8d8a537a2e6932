//! Write callback and argument templates
//!
//! The session hands each flushed element (or batch) to an external write
//! callback. Its arguments are described once as a template of literal values
//! and placeholders; at flush time a single substitution pass binds
//!
//! - `Path` to the generated file path
//! - `Data` to the element or batch being flushed
//! - `Attribute(name)` to a live read of a named session attribute

use crate::error::{Error, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// One argument slot of a callback template
#[derive(Debug, Clone, PartialEq)]
pub enum ArgTemplate {
    /// Fixed value passed on every call
    Literal(Value),
    /// The generated file path
    Path,
    /// The element or batch being flushed
    Data,
    /// A session attribute read when the call is made
    Attribute(String),
}

impl ArgTemplate {
    /// A literal argument
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    /// A live attribute lookup
    pub fn attribute(name: impl Into<String>) -> Self {
        Self::Attribute(name.into())
    }
}

impl From<Value> for ArgTemplate {
    fn from(value: Value) -> Self {
        Self::Literal(value)
    }
}

/// Samples handed to one callback invocation
#[derive(Debug)]
pub enum Data<'a, T> {
    /// A single buffered element
    Element(&'a T),
    /// A whole flushed batch, oldest first
    Batch(&'a [T]),
}

impl<'a, T> Data<'a, T> {
    /// The samples as a slice
    pub fn as_slice(&self) -> &'a [T] {
        match self {
            Self::Element(element) => std::slice::from_ref(*element),
            Self::Batch(batch) => *batch,
        }
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// Whether there are no samples
    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }

    /// Whether this is a whole batch
    pub fn is_batch(&self) -> bool {
        matches!(self, Self::Batch(_))
    }
}

impl<T> Clone for Data<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Data<'_, T> {}

/// A resolved argument
#[derive(Debug, Clone)]
pub enum Arg<'a, T> {
    /// A literal or attribute value
    Value(Value),
    /// The generated file path
    Path(&'a Path),
    /// The flushed samples
    Data(Data<'a, T>),
}

impl<'a, T> Arg<'a, T> {
    /// The path, if this argument is one
    pub fn as_path(&self) -> Option<&'a Path> {
        match self {
            Self::Path(path) => Some(path),
            _ => None,
        }
    }

    /// The samples, if this argument carries them
    pub fn as_data(&self) -> Option<Data<'a, T>> {
        match self {
            Self::Data(data) => Some(*data),
            _ => None,
        }
    }

    /// The value, if this argument is a literal or attribute
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }
}

/// Resolved positional and keyword arguments for one callback invocation
#[derive(Debug, Clone)]
pub struct CallArgs<'a, T> {
    /// Positional arguments, in template order
    pub args: Vec<Arg<'a, T>>,
    /// Keyword arguments
    pub kwargs: BTreeMap<String, Arg<'a, T>>,
}

impl<'a, T> CallArgs<'a, T> {
    /// First path among the positional, then keyword arguments
    pub fn path(&self) -> Option<&'a Path> {
        self.all().find_map(Arg::as_path)
    }

    /// First data argument among the positional, then keyword arguments
    pub fn data(&self) -> Option<Data<'a, T>> {
        self.all().find_map(Arg::as_data)
    }

    /// Keyword argument by name
    pub fn get(&self, name: &str) -> Option<&Arg<'a, T>> {
        self.kwargs.get(name)
    }

    /// Keyword argument value by name
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.get(name).and_then(Arg::as_value)
    }

    fn all(&self) -> impl Iterator<Item = &Arg<'a, T>> {
        self.args.iter().chain(self.kwargs.values())
    }
}

/// Argument template applied to every callback invocation
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackTemplate {
    /// Positional argument templates
    pub args: Vec<ArgTemplate>,
    /// Keyword argument templates
    pub kwargs: BTreeMap<String, ArgTemplate>,
}

impl Default for CallbackTemplate {
    /// `(Path, Data)` with no keyword arguments
    fn default() -> Self {
        Self {
            args: vec![ArgTemplate::Path, ArgTemplate::Data],
            kwargs: BTreeMap::new(),
        }
    }
}

impl CallbackTemplate {
    /// Template with the given positional arguments and no keyword arguments
    pub fn positional(args: Vec<ArgTemplate>) -> Self {
        Self {
            args,
            kwargs: BTreeMap::new(),
        }
    }

    /// Add a keyword argument
    pub fn with_kwarg(mut self, name: impl Into<String>, template: ArgTemplate) -> Self {
        self.kwargs.insert(name.into(), template);
        self
    }

    /// Substitute every placeholder
    ///
    /// `lookup` resolves attribute names; an unknown name is a configuration error.
    pub fn resolve<'a, T, F>(&self, path: &'a Path, data: Data<'a, T>, lookup: F) -> Result<CallArgs<'a, T>>
    where
        F: Fn(&str) -> Option<Value>,
    {
        let bind = |template: &ArgTemplate| -> Result<Arg<'a, T>> {
            Ok(match template {
                ArgTemplate::Literal(value) => Arg::Value(value.clone()),
                ArgTemplate::Path => Arg::Path(path),
                ArgTemplate::Data => Arg::Data(data),
                ArgTemplate::Attribute(name) => Arg::Value(lookup(name).ok_or_else(|| {
                    Error::configuration(format!("unknown instance attribute '{name}'"))
                })?),
            })
        };

        let args = self.args.iter().map(&bind).collect::<Result<Vec<_>>>()?;
        let kwargs = self
            .kwargs
            .iter()
            .map(|(name, template)| Ok((name.clone(), bind(template)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;

        Ok(CallArgs { args, kwargs })
    }
}

/// External write callback invoked once per flushed element or batch
pub trait SaveCallback<T>: Send {
    /// Persist the samples described by `call`
    fn call(&mut self, call: &CallArgs<'_, T>) -> anyhow::Result<()>;
}

impl<T, F> SaveCallback<T> for F
where
    F: FnMut(&CallArgs<'_, T>) -> anyhow::Result<()> + Send,
{
    fn call(&mut self, call: &CallArgs<'_, T>) -> anyhow::Result<()> {
        self(call)
    }
}
