use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::items::{PageMetadata, Params};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Browser,
    Mac,
    Windows,
    Ubuntu,
    Linux,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Browser => "browser",
            Self::Mac => "mac",
            Self::Windows => "windows",
            Self::Ubuntu => "ubuntu",
            Self::Linux => "linux",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ComputerError {
    #[error("missing parameter `{0}`")]
    MissingParam(String),
    #[error("invalid parameter `{name}`: expected {expected}")]
    InvalidParam { name: String, expected: &'static str },
    #[error(transparent)]
    Driver(#[from] anyhow::Error),
}

pub type OperationFuture<'a> = BoxFuture<'a, Result<(), ComputerError>>;

type Handler<C> = Arc<dyn for<'a> Fn(&'a C, Params) -> OperationFuture<'a> + Send + Sync>;

/// Name → handler table for the operations a surface supports. Built once per surface
/// type; an unregistered name is how "no matching operation" is expressed.
pub struct OperationRegistry<C> {
    handlers: HashMap<String, Handler<C>>,
}

impl<C> OperationRegistry<C> {
    pub fn new() -> Self {
        Self { handlers: HashMap::new() }
    }

    pub fn register<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: for<'a> Fn(&'a C, Params) -> OperationFuture<'a> + Send + Sync + 'static,
    {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Start the operation registered under `name`, or `None` when there is none.
    pub fn invoke<'a>(&self, target: &'a C, name: &str, params: Params) -> Option<OperationFuture<'a>> {
        self.handlers.get(name).map(|handler| handler(target, params))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl<C> Default for OperationRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for OperationRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("OperationRegistry").field("operations", &names).finish()
    }
}

/// The controllable target: a browser page or a desktop.
#[async_trait]
pub trait Computer: Send + Sync {
    fn environment(&self) -> Environment;
    fn dimensions(&self) -> (u32, u32);
    /// Base64-encoded PNG of the current surface.
    async fn screenshot(&self) -> Result<String, ComputerError>;
    fn operations() -> OperationRegistry<Self>
    where
        Self: Sized;
    /// Browser-only introspection, when the surface offers it.
    fn browser(&self) -> Option<&dyn BrowserIntrospection> {
        None
    }
}

#[async_trait]
pub trait BrowserIntrospection: Send + Sync {
    async fn current_url(&self) -> Result<String, ComputerError>;

    async fn page_metadata(&self) -> Result<Option<PageMetadata>, ComputerError> {
        Ok(None)
    }
}

/// Typed accessors over raw operation parameters.
pub trait ParamsExt {
    fn required_i64(&self, key: &str) -> Result<i64, ComputerError>;
    fn optional_i64(&self, key: &str) -> Result<Option<i64>, ComputerError>;
    fn required_str(&self, key: &str) -> Result<&str, ComputerError>;
    fn optional_str(&self, key: &str) -> Option<&str>;
    fn string_list(&self, key: &str) -> Result<Vec<String>, ComputerError>;
    fn points(&self, key: &str) -> Result<Vec<(i64, i64)>, ComputerError>;
}

fn as_int(v: &Value) -> Option<i64> {
    v.as_i64().or_else(|| v.as_f64().map(|f| f.round() as i64))
}

impl ParamsExt for Params {
    fn required_i64(&self, key: &str) -> Result<i64, ComputerError> {
        self.optional_i64(key)?
            .ok_or_else(|| ComputerError::MissingParam(key.to_string()))
    }

    fn optional_i64(&self, key: &str) -> Result<Option<i64>, ComputerError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => as_int(v).map(Some).ok_or(ComputerError::InvalidParam {
                name: key.to_string(),
                expected: "integer",
            }),
        }
    }

    fn required_str(&self, key: &str) -> Result<&str, ComputerError> {
        match self.get(key) {
            None | Some(Value::Null) => Err(ComputerError::MissingParam(key.to_string())),
            Some(v) => v.as_str().ok_or(ComputerError::InvalidParam {
                name: key.to_string(),
                expected: "string",
            }),
        }
    }

    fn optional_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    fn string_list(&self, key: &str) -> Result<Vec<String>, ComputerError> {
        let invalid = || ComputerError::InvalidParam { name: key.to_string(), expected: "list of strings" };
        let arr = self
            .get(key)
            .ok_or_else(|| ComputerError::MissingParam(key.to_string()))?
            .as_array()
            .ok_or_else(invalid)?;
        arr.iter()
            .map(|v| v.as_str().map(str::to_string).ok_or_else(invalid))
            .collect()
    }

    fn points(&self, key: &str) -> Result<Vec<(i64, i64)>, ComputerError> {
        let invalid = || ComputerError::InvalidParam { name: key.to_string(), expected: "list of {x, y}" };
        let arr = self
            .get(key)
            .ok_or_else(|| ComputerError::MissingParam(key.to_string()))?
            .as_array()
            .ok_or_else(invalid)?;
        arr.iter()
            .map(|p| -> Result<(i64, i64), ComputerError> {
                let x = p.get("x").and_then(as_int).ok_or_else(invalid)?;
                let y = p.get("y").and_then(as_int).ok_or_else(invalid)?;
                Ok((x, y))
            })
            .collect()
    }
}
