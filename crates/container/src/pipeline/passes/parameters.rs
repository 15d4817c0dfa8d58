//! Разрешение плейсхолдеров `%name%`.
//!
//! Строка, целиком состоящая из плейсхолдера, получает значение параметра с
//! исходным типом. Плейсхолдеры внутри строки подставляются текстом и должны
//! указывать на скаляры. `%%` это литерал процента.

use std::collections::BTreeMap;
use tracing::debug;

use crate::builder::ContainerBuilder;
use crate::errors::{ContainerError, ContainerResult};
use crate::pipeline::{CompileContext, Pass};
use crate::value::Value;

/// Параметры, разрешённые в текущем запуске compile
#[derive(Default)]
struct ResolvedParameters {
    values: BTreeMap<String, Value>,
}

pub struct ResolveParameterPlaceholdersPass;

impl Pass for ResolveParameterPlaceholdersPass {
    fn name(&self) -> &str {
        "resolve_parameter_placeholders"
    }

    fn process(
        &mut self,
        builder: &mut ContainerBuilder,
        ctx: &mut CompileContext,
    ) -> ContainerResult<()> {
        let raw = builder.parameters.clone();
        ctx.with_cache(|cache: &mut ResolvedParameters| -> ContainerResult<()> {
            for name in raw.keys() {
                resolve_parameter(name, &raw, &mut Vec::new(), &mut cache.values)?;
            }
            Ok(())
        })?;

        let resolved = ctx
            .cached::<ResolvedParameters>()
            .map(|r| r.values.clone())
            .unwrap_or_default();
        let mut lookup = |name: &str| -> ContainerResult<Value> {
            resolved
                .get(name)
                .cloned()
                .ok_or_else(|| ContainerError::parameter_not_found(name))
        };

        let ids = builder.definition_ids();
        for id in &ids {
            ctx.enter(id);
            if let Some(definition) = builder.definitions.get_mut(id) {
                for value in definition.values_mut() {
                    resolve_in(value, &mut lookup)?;
                }
            }
        }
        ctx.leave();

        for (id, value) in builder.bindings.iter_mut() {
            ctx.enter(id);
            resolve_in(value, &mut lookup)?;
        }
        ctx.leave();

        debug!(parameters = resolved.len(), "Parameter placeholders resolved");
        builder.parameters = resolved;
        Ok(())
    }
}

fn resolve_parameter(
    name: &str,
    raw: &BTreeMap<String, Value>,
    stack: &mut Vec<String>,
    resolved: &mut BTreeMap<String, Value>,
) -> ContainerResult<Value> {
    if let Some(value) = resolved.get(name) {
        return Ok(value.clone());
    }
    if let Some(pos) = stack.iter().position(|n| n == name) {
        return Err(ContainerError::circular(stack[pos..].to_vec()));
    }

    let mut value = raw
        .get(name)
        .cloned()
        .ok_or_else(|| ContainerError::parameter_not_found(name))?;

    stack.push(name.to_string());
    resolve_in(&mut value, &mut |inner| {
        resolve_parameter(inner, raw, stack, resolved)
    })?;
    stack.pop();

    resolved.insert(name.to_string(), value.clone());
    Ok(value)
}

/// Заменить плейсхолдеры во всех строках внутри `value`. Подставленный текст
/// повторно не сканируется.
fn resolve_in(
    value: &mut Value,
    lookup: &mut dyn FnMut(&str) -> ContainerResult<Value>,
) -> ContainerResult<()> {
    match value {
        Value::String(s) => {
            if let Some(replacement) = resolve_string(s, lookup)? {
                *value = replacement;
            }
        }
        Value::Map(map) => {
            for v in map.values_mut() {
                resolve_in(v, lookup)?;
            }
        }
        Value::Array(a) => {
            for v in a.values_mut() {
                resolve_in(v, lookup)?;
            }
        }
        Value::Iterator(a) => {
            for v in a.values_mut() {
                resolve_in(v, lookup)?;
            }
        }
        Value::Condition(c) => {
            for v in c.values_mut() {
                resolve_in(v, lookup)?;
            }
        }
        Value::Parameter(p) => resolve_in(p.default_mut(), lookup)?,
        Value::Inline(definition) => {
            for v in definition.values_mut() {
                resolve_in(v, lookup)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn is_parameter_name(candidate: &str) -> bool {
    !candidate.is_empty() && !candidate.contains(|c: char| c == '%' || c.is_whitespace())
}

/// `None`, если в строке нет плейсхолдеров и экранирования
fn resolve_string(
    s: &str,
    lookup: &mut dyn FnMut(&str) -> ContainerResult<Value>,
) -> ContainerResult<Option<Value>> {
    if !s.contains('%') {
        return Ok(None);
    }

    if s.len() > 2 && s.starts_with('%') && s.ends_with('%') {
        let inner = &s[1..s.len() - 1];
        if is_parameter_name(inner) {
            return lookup(inner).map(Some);
        }
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(stripped) = after.strip_prefix('%') {
            out.push('%');
            rest = stripped;
            continue;
        }

        match after.find('%') {
            Some(end) if is_parameter_name(&after[..end]) => {
                let name = &after[..end];
                let value = lookup(name)?;
                let text = value.scalar_string().ok_or_else(|| {
                    ContainerError::invalid_argument(format!(
                        "parameter '{}' of type {} cannot be embedded in string \"{}\"",
                        name,
                        value.kind(),
                        s
                    ))
                })?;
                out.push_str(&text);
                rest = &after[end + 1..];
            }
            _ => {
                out.push('%');
                rest = after;
            }
        }
    }
    out.push_str(rest);

    Ok(Some(Value::String(out)))
}
