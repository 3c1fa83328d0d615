//! # Function registry
//!
//! Functions are named callables the model can ask to run in the middle of a
//! conversation. Each one has a definition (name, description, JSON Schema for
//! its parameters) that is advertised to the model, and a handler that runs
//! when the model requests it.
//!
//! ## Lifecycle
//!
//! ```text
//! 1. Definition:  registry.define(...) at startup, before the registry is shared
//! 2. Selection:   registry.parse_requested(text) picks functions named with -f / --fn
//! 3. Advertising: the selected definitions go out with the completion request
//! 4. Invocation:  the model streams a function call; registry.invoke(name, args)
//! 5. Response:    the handler result comes back as a function-role message
//! ```
//!
//! The registry is built with `&mut self` and then shared read-only
//! (typically behind an [`Arc`]), so concurrent lookups need no locking.
//!
//! ## Schema Conversion
//!
//! Schemas may be given in a short notation and are normalized to JSON Schema:
//!
//! - **Simple notation**: `{"message": "string"}`
//! - **Typed schema**: `{"sides": {"type": "integer", "default": 6}}`
//! - **Full JSON Schema**: already has `"type"` and `"properties"`, passed through
//!
//! ## Example
//!
//! ```rust
//! use chat_relay::FunctionRegistry;
//! use serde_json::json;
//!
//! let mut registry = FunctionRegistry::new();
//! registry.define_sync(
//!     "shout",
//!     "Upper-cases the given text",
//!     json!({"text": "string"}),
//!     |args| Ok(json!(args["text"].as_str().unwrap_or_default().to_uppercase())),
//! );
//!
//! let selected = registry.parse_requested("say it loud -f shout");
//! assert_eq!(selected[0].name, "shout");
//! ```

use crate::types::ChatMessage;
use crate::{Error, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Type alias for function handlers.
///
/// ```text
/// Arc<                                      // shared by the registry and callers
///   dyn Fn(Value)                           // JSON arguments in
///     -> Pin<Box<                           // boxed so handlers of different types fit one table
///       dyn Future<Output = Result<Value>>  // async result
///         + Send>>
///     + Send + Sync>
/// ```
///
/// Synchronous handlers registered with [`FunctionRegistry::define_sync`] are
/// wrapped in an already-completed future.
pub type FunctionHandler =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> + Send + Sync>;

/// Advertised description of a function.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments object
    pub parameters: Value,
}

impl FunctionDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: convert_schema(schema),
        }
    }

    /// Entry for the `functions` array of a chat completion request.
    pub fn to_openai_format(&self) -> Value {
        serde_json::json!({
            "name": self.name,
            "description": self.description,
            "parameters": self.parameters
        })
    }
}

/// Name and description pair, as listed to users and models.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionInfo {
    pub name: String,
    pub description: String,
}

#[derive(Clone)]
struct RegisteredFunction {
    definition: FunctionDefinition,
    handler: FunctionHandler,
}

/// Name → (definition, handler) table.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, RegisteredFunction>,
    // definition order, for listing
    order: Vec<String>,
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.order)
            .finish()
    }
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in `dice` and `echo` functions.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register(&mut registry);
        registry
    }

    /// Register an async function. A second definition under the same name
    /// replaces the first.
    pub fn define<F, Fut>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        schema: Value,
        handler: F,
    ) -> FunctionDefinition
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let definition = FunctionDefinition::new(name, description, schema);
        self.insert(
            definition.clone(),
            Arc::new(move |args| Box::pin(handler(args))),
        );
        definition
    }

    /// Register a synchronous function.
    pub fn define_sync<F>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        schema: Value,
        handler: F,
    ) -> FunctionDefinition
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        let definition = FunctionDefinition::new(name, description, schema);
        self.insert(
            definition.clone(),
            Arc::new(move |args| Box::pin(std::future::ready(handler(args)))),
        );
        definition
    }

    fn insert(&mut self, definition: FunctionDefinition, handler: FunctionHandler) {
        let name = definition.name.clone();
        let previous = self
            .functions
            .insert(name.clone(), RegisteredFunction { definition, handler });

        if previous.is_some() {
            log::info!("Function redefined: {}", name);
        } else {
            log::info!("Function loaded: {}", name);
            self.order.push(name);
        }
    }

    /// Names and descriptions in definition order.
    pub fn list(&self) -> Vec<FunctionInfo> {
        self.order
            .iter()
            .filter_map(|name| self.functions.get(name))
            .map(|f| FunctionInfo {
                name: f.definition.name.clone(),
                description: f.definition.description.clone(),
            })
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&FunctionDefinition> {
        self.functions.get(name).map(|f| &f.definition)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Definitions selected in `text` with `-f NAME`, `--fn NAME` or
    /// `--fn=NAME`, in the order given. Unknown names are dropped, repeats
    /// are kept once. Only the text from the first flag on is parsed, so
    /// quotes in the message before it do not matter.
    pub fn parse_requested(&self, text: &str) -> Vec<FunctionDefinition> {
        let Some(start) = flag_start(text) else {
            return Vec::new();
        };
        let args = split_args(&text[start..]);
        let mut names: Vec<&str> = Vec::new();

        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            let name = match arg.as_str() {
                "-f" | "--fn" => match iter.next() {
                    Some(value) => value.as_str(),
                    None => break,
                },
                other => match other.strip_prefix("--fn=") {
                    Some(value) => value,
                    None => continue,
                },
            };
            if !names.contains(&name) {
                names.push(name);
            }
        }

        names
            .into_iter()
            .filter_map(|name| self.get(name).cloned())
            .collect()
    }

    /// Run the named function and wrap its result as a function-role message.
    ///
    /// String results are used verbatim; other JSON values are serialized.
    /// Handler failures are returned to the caller, which decides recovery.
    pub async fn invoke(&self, name: &str, params: Value) -> Result<ChatMessage> {
        let handler = self
            .functions
            .get(name)
            .map(|f| f.handler.clone())
            .ok_or_else(|| Error::function_not_found(name))?;

        log::info!("Invoking function {} with {}", name, params);

        let result = handler(params).await.map_err(|e| match e {
            Error::Function(_) | Error::FunctionNotFound(_) => e,
            other => Error::function(format!("{}: {}", name, other)),
        })?;

        let content = match result {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        };

        Ok(ChatMessage::function(name, content))
    }
}

/// Split a message into whitespace-separated arguments. A token that starts
/// with a double or single quote runs to the matching quote and is returned
/// without the quotes; quotes inside a word are literal.
pub fn split_args(text: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let mut token = String::new();
        if c == '"' || c == '\'' {
            chars.next();
            let mut closed = false;
            for next in chars.by_ref() {
                if next == c {
                    closed = true;
                    break;
                }
                token.push(next);
            }
            if !closed {
                // unterminated quote: keep it as written
                token.insert(0, c);
            }
        } else {
            while let Some(&next) = chars.peek() {
                if next.is_whitespace() {
                    break;
                }
                token.push(next);
                chars.next();
            }
        }
        args.push(token);
    }

    args
}

// byte offset of the first word that starts with `-f` or `--fn`
fn flag_start(text: &str) -> Option<usize> {
    text.char_indices()
        .filter(|&(i, c)| {
            c == '-' && text[..i].chars().next_back().is_none_or(char::is_whitespace)
        })
        .map(|(i, _)| i)
        .find(|&i| text[i..].starts_with("-f") || text[i..].starts_with("--fn"))
}

/// Normalize a schema to a JSON Schema object.
fn convert_schema(schema: Value) -> Value {
    let Value::Object(obj) = schema else {
        return serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        });
    };

    if obj.contains_key("type") && obj.contains_key("properties") {
        return Value::Object(obj);
    }

    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();

    for (param_name, param_type) in obj {
        match param_type {
            Value::String(type_str) => {
                properties.insert(param_name.clone(), type_to_json_schema(&type_str));
                required.push(param_name);
            }
            Value::Object(mut prop) => {
                let is_optional = prop
                    .remove("optional")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                let is_required = prop.remove("required").and_then(|v| v.as_bool());
                let has_default = prop.contains_key("default");

                properties.insert(param_name.clone(), Value::Object(prop));

                // explicit required wins, then optional flags, then defaults
                if is_required == Some(true) || (!is_optional && is_required.is_none() && !has_default)
                {
                    required.push(param_name);
                }
            }
            _ => {}
        }
    }

    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required
    })
}

fn type_to_json_schema(type_str: &str) -> Value {
    let json_type = match type_str {
        "string" | "str" => "string",
        "integer" | "int" | "i32" | "i64" | "u32" | "u64" => "integer",
        "number" | "float" | "f32" | "f64" => "number",
        "boolean" | "bool" => "boolean",
        "array" | "list" | "vec" => "array",
        "object" | "dict" | "map" => "object",
        _ => "string",
    };

    serde_json::json!({ "type": json_type })
}

/// Functions shipped with the crate.
pub mod builtin {
    use super::FunctionRegistry;
    use crate::Error;
    use rand::Rng;
    use serde_json::{Value, json};

    pub const DICE_MAX_SIDES: u64 = 1000;

    /// Register `dice` and `echo`.
    pub fn register(registry: &mut FunctionRegistry) {
        registry.define_sync(
            "dice",
            "Rolls a dice",
            json!({
                "sides": {
                    "type": "integer",
                    "description": "The number of sides of the dice",
                    "default": 6,
                    "minimum": 1,
                    "maximum": DICE_MAX_SIDES
                }
            }),
            roll_dice,
        );

        registry.define_sync(
            "echo",
            "Echoes the given message",
            json!({
                "message": {
                    "type": "string",
                    "description": "The message to echo"
                }
            }),
            echo,
        );
    }

    fn roll_dice(args: Value) -> crate::Result<Value> {
        let sides = match args.get("sides") {
            None | Some(Value::Null) => 6,
            Some(v) => v
                .as_u64()
                .or_else(|| v.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64))
                .ok_or_else(|| Error::invalid_input("sides must be a whole number"))?,
        };
        if !(1..=DICE_MAX_SIDES).contains(&sides) {
            return Err(Error::invalid_input(format!(
                "sides must be between 1 and {}",
                DICE_MAX_SIDES
            )));
        }
        let roll = rand::thread_rng().gen_range(1..=sides);
        Ok(json!(roll.to_string()))
    }

    fn echo(args: Value) -> crate::Result<Value> {
        let message = args
            .get("message")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::invalid_input("message is required"))?;
        Ok(json!(message))
    }
}
