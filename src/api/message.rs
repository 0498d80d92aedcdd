//! Purpose: Define the wire envelopes of the `/execute` protocol.
//! Exports: `Message`, `Response`, `ResponseType`, `MessageType`, `ModuleCreateMethod`.
//! Role: Shared by the HTTP server, `ExecutionService`, `RemoteClient` and the CLI.
//! Invariants: `stdout`/`stderr` are always serialized; `result` only for `type=result`.
//! Invariants: `type` is kept as a raw string so unknown types reach the service.
use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as Json;

use crate::core::output::CapturedOutput;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MessageType {
    Eval,
    Exec,
    Status,
    Quit,
}

impl MessageType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "eval" => Some(Self::Eval),
            "exec" => Some(Self::Exec),
            "status" => Some(Self::Status),
            "quit" => Some(Self::Quit),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eval => "eval",
            Self::Exec => "exec",
            Self::Status => "status",
            Self::Quit => "quit",
        }
    }
}

/// How a missing target module is materialized.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ModuleCreateMethod {
    Create,
    #[default]
    Import,
    ImportOrCreate,
}

impl ModuleCreateMethod {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "create" => Some(Self::Create),
            "import" => Some(Self::Import),
            "import_or_create" => Some(Self::ImportOrCreate),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Import => "import",
            Self::ImportOrCreate => "import_or_create",
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(
        rename = "moduleCreateMethod",
        alias = "module-create-method",
        alias = "module_create_method",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub module_create_method: Option<String>,
}

impl Message {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Self::default()
        }
    }

    pub fn eval(code: impl Into<String>) -> Self {
        Self::new(MessageType::Eval.as_str()).with_code(code)
    }

    pub fn exec(code: impl Into<String>) -> Self {
        Self::new(MessageType::Exec.as_str()).with_code(code)
    }

    pub fn status() -> Self {
        Self::new(MessageType::Status.as_str())
    }

    pub fn quit() -> Self {
        Self::new(MessageType::Quit.as_str())
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn with_create_method(mut self, method: impl Into<String>) -> Self {
        self.module_create_method = Some(method.into());
        self
    }

    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::parse(&self.kind)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    Result,
    Error,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "type")]
    pub kind: ResponseType,
    /// `Some(Json::Null)` for value-less results; `None` only on errors.
    #[serde(
        default,
        deserialize_with = "present_json",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_modules: Option<BTreeMap<String, Vec<String>>>,
}

/// Keeps an explicit `null` distinguishable from an absent field.
fn present_json<'de, D>(deserializer: D) -> Result<Option<Json>, D::Error>
where
    D: Deserializer<'de>,
{
    Json::deserialize(deserializer).map(Some)
}

impl Response {
    pub fn result(value: Json, output: CapturedOutput) -> Self {
        Self {
            kind: ResponseType::Result,
            result: Some(value),
            error: None,
            stdout: output.stdout,
            stderr: output.stderr,
            updated_modules: None,
        }
    }

    pub fn error(message: impl Into<String>, output: CapturedOutput) -> Self {
        Self {
            kind: ResponseType::Error,
            result: None,
            error: Some(message.into()),
            stdout: output.stdout,
            stderr: output.stderr,
            updated_modules: None,
        }
    }

    /// Attaches hot-reload updates; an empty map leaves the field absent.
    pub fn with_updated_modules(mut self, updates: BTreeMap<String, Vec<String>>) -> Self {
        if !updates.is_empty() {
            self.updated_modules = Some(updates);
        }
        self
    }

    pub fn is_error(&self) -> bool {
        self.kind == ResponseType::Error
    }
}
