//! Определения из TOML, YAML или JSON документа
//!
//! ```yaml
//! parameters:
//!   mailer.transport: smtp
//! services:
//!   mailer:
//!     class: Mailer
//!     arguments: ["%mailer.transport%", "@logger", "@?metrics"]
//!     calls:
//!       - [setFormatter, ["@formatter"]]
//!     tags: [{ name: channel, priority: 10 }]
//!   logger: ~
//!   mail: "@mailer"
//! ```
//!
//! Синтаксис строк в значениях:
//! - `@id` ссылка, `@?id` null если нет сервиса, `@!id` игнорировать если нет
//! - `@@text` литерал `@text`
//! - `!tagged name` все сервисы с тегом `name`
//! - `!closure @id` отложенная ссылка, `!lazy @id` ссылка через proxy

use serde_json::{Map, Value as Raw};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::argument::ClosureArgument;
use crate::builder::ContainerBuilder;
use crate::definition::{Decoration, Definition, Factory, TagAttributes, Visibility};
use crate::errors::{ContainerError, ContainerResult};
use crate::reference::Reference;
use crate::value::Value;

use super::ServiceProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Toml,
    Yaml,
    Json,
}

impl FileFormat {
    pub fn from_path(path: &Path) -> ContainerResult<Self> {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .as_deref()
        {
            Some("toml") => Ok(FileFormat::Toml),
            Some("yaml") | Some("yml") => Ok(FileFormat::Yaml),
            Some("json") => Ok(FileFormat::Json),
            other => Err(ContainerError::configuration(
                format!("unsupported definition file format: {:?}", other),
                Some(path.display().to_string()),
            )),
        }
    }

    fn parse(self, content: &str) -> ContainerResult<Raw> {
        match self {
            FileFormat::Toml => toml::from_str(content).map_err(ContainerError::serialization),
            FileFormat::Yaml => serde_yaml::from_str(content).map_err(ContainerError::serialization),
            FileFormat::Json => Ok(serde_json::from_str(content)?),
        }
    }
}

/// Провайдер поверх разобранного документа определений
#[derive(Debug, Clone)]
pub struct FileProvider {
    source: String,
    document: Map<String, Raw>,
}

impl FileProvider {
    pub fn from_path(path: impl AsRef<Path>) -> ContainerResult<Self> {
        let path = path.as_ref();
        let format = FileFormat::from_path(path)?;
        let content = fs::read_to_string(path).map_err(|e| ContainerError::io(path, e))?;
        let provider = Self::parse(&content, format, path.display().to_string())?;
        info!(path = %path.display(), "📄 Definition file loaded");
        Ok(provider)
    }

    pub fn from_content(content: &str, format: FileFormat) -> ContainerResult<Self> {
        Self::parse(content, format, String::from("<inline>"))
    }

    fn parse(content: &str, format: FileFormat, source: String) -> ContainerResult<Self> {
        match format.parse(content)? {
            Raw::Object(document) => Ok(Self { source, document }),
            Raw::Null => Ok(Self {
                source,
                document: Map::new(),
            }),
            other => Err(ContainerError::configuration(
                format!("definition document must be a map, got {}", raw_kind(&other)),
                Some(source),
            )),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    fn section(&self, name: &str) -> ContainerResult<Option<&Map<String, Raw>>> {
        match self.document.get(name) {
            None | Some(Raw::Null) => Ok(None),
            Some(Raw::Object(map)) => Ok(Some(map)),
            Some(other) => Err(ContainerError::configuration(
                format!("'{}' must be a map, got {}", name, raw_kind(other)),
                Some(self.source.clone()),
            )),
        }
    }
}

impl ServiceProvider for FileProvider {
    fn build(&self, builder: &mut ContainerBuilder) -> ContainerResult<()> {
        if let Some(parameters) = self.section("parameters")? {
            for (name, raw) in parameters {
                builder.set_parameter(name.clone(), convert_value(raw)?)?;
            }
        }

        if let Some(bindings) = self.section("bindings")? {
            for (id, raw) in bindings {
                builder.bind(id.clone(), convert_value(raw)?)?;
            }
        }

        if let Some(services) = self.section("services")? {
            for (id, raw) in services {
                match raw {
                    // `alias: "@target"`
                    Raw::String(s) if s.starts_with('@') && !s.starts_with("@@") => {
                        builder.set_alias(id.clone(), s.trim_start_matches('@'))?;
                    }
                    _ => {
                        let definition = parse_definition(id, raw)
                            .map_err(|e| locate(e, &self.source, id))?;
                        builder.set_definition(definition)?;
                    }
                }
            }
        }

        if let Some(aliases) = self.section("aliases")? {
            for (id, raw) in aliases {
                match raw {
                    Raw::String(target) => {
                        builder.set_alias(id.clone(), target.trim_start_matches('@'))?;
                    }
                    Raw::Object(fields) => {
                        let target = fields.get("target").and_then(Raw::as_str).ok_or_else(|| {
                            ContainerError::invalid_argument(format!("alias '{}' has no target", id))
                        })?;
                        let public = fields.get("public").and_then(Raw::as_bool).unwrap_or(true);
                        if public {
                            builder.set_alias(id.clone(), target)?;
                        } else {
                            builder.set_private_alias(id.clone(), target)?;
                        }
                    }
                    other => {
                        return Err(ContainerError::invalid_argument(format!(
                            "alias '{}' must be a string or a map, got {}",
                            id,
                            raw_kind(other)
                        )))
                    }
                }
            }
        }

        debug!(source = %self.source, "File provider applied");
        Ok(())
    }
}

fn locate(error: ContainerError, source: &str, id: &str) -> ContainerError {
    match error {
        ContainerError::InvalidArgument { message } => ContainerError::configuration(
            format!("service '{}': {}", id, message),
            Some(source.to_string()),
        ),
        other => other,
    }
}

fn parse_definition(id: &str, raw: &Raw) -> ContainerResult<Definition> {
    let mut definition = Definition::new(id);

    let fields = match raw {
        // `logger: ~` это class shortcut
        Raw::Null => return Ok(definition),
        Raw::Object(fields) => fields,
        other => {
            return Err(ContainerError::invalid_argument(format!(
                "definition must be a map, null or an \"@alias\", got {}",
                raw_kind(other)
            )))
        }
    };

    for (key, value) in fields {
        match key.as_str() {
            "class" => definition.set_factory(Factory::class(expect_str(key, value)?)),
            "factory" => definition.set_factory(Factory::parse(expect_str(key, value)?)?),
            "value" => definition.set_factory(Factory::Value {
                value: convert_value(value)?,
            }),
            "arguments" => definition.set_arguments(convert_list(key, value)?),
            "calls" => {
                for call in expect_list(key, value)? {
                    let (method, arguments) = parse_call(call)?;
                    definition.add_method_call(method, arguments);
                }
            }
            "tags" => {
                for tag in expect_list(key, value)? {
                    let (name, attributes) = parse_tag(tag)?;
                    definition.add_tag(name, attributes);
                }
            }
            "shared" => definition.set_shared(expect_bool(key, value)?),
            "public" => definition.set_visibility(if expect_bool(key, value)? {
                Visibility::Public
            } else {
                Visibility::Private
            }),
            "lazy" => definition.set_lazy(expect_bool(key, value)?),
            "abstract" => definition.set_abstract(expect_bool(key, value)?),
            "parent" => definition.set_extends(Some(expect_str(key, value)?.to_string())),
            "decorates" => {
                let priority = match fields.get("decoration_priority") {
                    Some(p) => p.as_i64().and_then(|p| i32::try_from(p).ok()).ok_or_else(|| {
                        ContainerError::invalid_argument("decoration_priority must be a small integer")
                    })?,
                    None => 0,
                };
                definition.set_decorates(Some(Decoration {
                    target: expect_str(key, value)?.to_string(),
                    priority,
                }));
            }
            "decoration_priority" => {}
            other => {
                return Err(ContainerError::invalid_argument(format!("unknown key '{}'", other)))
            }
        }
    }

    Ok(definition)
}

/// `[method, [args]]`, `[method]` or `{method: .., arguments: [..]}`
fn parse_call(raw: &Raw) -> ContainerResult<(String, Vec<Value>)> {
    match raw {
        Raw::Array(parts) => match parts.as_slice() {
            [Raw::String(method)] => Ok((method.clone(), Vec::new())),
            [Raw::String(method), arguments] => Ok((method.clone(), convert_list("calls", arguments)?)),
            _ => Err(ContainerError::invalid_argument(
                "method call must be [method] or [method, [arguments]]",
            )),
        },
        Raw::Object(fields) => {
            let method = fields
                .get("method")
                .and_then(Raw::as_str)
                .ok_or_else(|| ContainerError::invalid_argument("method call has no 'method'"))?;
            let arguments = match fields.get("arguments") {
                Some(arguments) => convert_list("arguments", arguments)?,
                None => Vec::new(),
            };
            Ok((method.to_string(), arguments))
        }
        other => Err(ContainerError::invalid_argument(format!(
            "method call must be a list or a map, got {}",
            raw_kind(other)
        ))),
    }
}

/// `name` or `{name: .., attr: ..}`
fn parse_tag(raw: &Raw) -> ContainerResult<(String, TagAttributes)> {
    match raw {
        Raw::String(name) => Ok((name.clone(), TagAttributes::new())),
        Raw::Object(fields) => {
            let name = fields
                .get("name")
                .and_then(Raw::as_str)
                .ok_or_else(|| ContainerError::invalid_argument("tag has no 'name'"))?;
            let mut attributes = TagAttributes::new();
            for (key, value) in fields.iter().filter(|(k, _)| k.as_str() != "name") {
                attributes.insert(key.clone(), convert_value(value)?);
            }
            Ok((name.to_string(), attributes))
        }
        other => Err(ContainerError::invalid_argument(format!(
            "tag must be a string or a map, got {}",
            raw_kind(other)
        ))),
    }
}

/// Значение документа в значение графа
fn convert_value(raw: &Raw) -> ContainerResult<Value> {
    match raw {
        Raw::Null => Ok(Value::Null),
        Raw::Bool(b) => Ok(Value::Bool(*b)),
        Raw::Number(n) => match n.as_i64() {
            Some(i) => Ok(Value::Int(i)),
            None => n
                .as_f64()
                .map(Value::Float)
                .ok_or_else(|| ContainerError::invalid_argument(format!("number {} is out of range", n))),
        },
        Raw::String(s) => convert_string(s),
        Raw::Array(items) => Ok(Value::array(
            items.iter().map(convert_value).collect::<ContainerResult<_>>()?,
        )),
        Raw::Object(map) => Ok(Value::Map(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), convert_value(v)?)))
                .collect::<ContainerResult<_>>()?,
        )),
    }
}

fn convert_string(s: &str) -> ContainerResult<Value> {
    if let Some(rest) = s.strip_prefix("@@") {
        return Ok(Value::String(format!("@{}", rest)));
    }
    if s.starts_with('@') {
        return parse_reference(s).map(Value::Reference);
    }
    if let Some(tag) = s.strip_prefix("!tagged ") {
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(ContainerError::invalid_argument("'!tagged' needs a tag name"));
        }
        return Ok(Value::Tagged(tag.to_string()));
    }
    if let Some(target) = s.strip_prefix("!closure ") {
        return Ok(Value::Closure(ClosureArgument::new(parse_reference(target.trim())?)));
    }
    if let Some(target) = s.strip_prefix("!lazy ") {
        let reference = parse_reference(target.trim())?;
        return Ok(Value::Reference(Reference::lazy(reference.id())));
    }
    Ok(Value::String(s.to_string()))
}

fn parse_reference(s: &str) -> ContainerResult<Reference> {
    let body = s.strip_prefix('@').ok_or_else(|| {
        ContainerError::invalid_argument(format!("expected a reference like '@id', got '{}'", s))
    })?;
    let (reference, id) = match body.chars().next() {
        Some('?') => (Reference::null_on_missing(&body[1..]), &body[1..]),
        Some('!') => (Reference::ignore_on_missing(&body[1..]), &body[1..]),
        _ => (Reference::new(body), body),
    };
    if id.is_empty() {
        return Err(ContainerError::invalid_argument(format!("empty reference '{}'", s)));
    }
    Ok(reference)
}

fn convert_list(key: &str, raw: &Raw) -> ContainerResult<Vec<Value>> {
    expect_list(key, raw)?.iter().map(convert_value).collect()
}

fn expect_list<'a>(key: &str, raw: &'a Raw) -> ContainerResult<&'a [Raw]> {
    raw.as_array()
        .map(Vec::as_slice)
        .ok_or_else(|| ContainerError::invalid_argument(format!("'{}' must be a list", key)))
}

fn expect_str<'a>(key: &str, raw: &'a Raw) -> ContainerResult<&'a str> {
    raw.as_str()
        .ok_or_else(|| ContainerError::invalid_argument(format!("'{}' must be a string", key)))
}

fn expect_bool(key: &str, raw: &Raw) -> ContainerResult<bool> {
    raw.as_bool()
        .ok_or_else(|| ContainerError::invalid_argument(format!("'{}' must be a boolean", key)))
}

fn raw_kind(raw: &Raw) -> &'static str {
    match raw {
        Raw::Null => "null",
        Raw::Bool(_) => "bool",
        Raw::Number(_) => "number",
        Raw::String(_) => "string",
        Raw::Array(_) => "list",
        Raw::Object(_) => "map",
    }
}

/// Файлы определений в `dir` с известным расширением, отсортированные
pub fn definition_files(dir: impl AsRef<Path>) -> ContainerResult<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| ContainerError::io(dir, e))? {
        let path = entry.map_err(|e| ContainerError::io(dir, e))?.path();
        if path.is_file() && FileFormat::from_path(&path).is_ok() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
