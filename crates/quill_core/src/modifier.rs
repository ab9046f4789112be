//! Modifier engine.
//!
//! Applies update operators to a document, producing a new document. The
//! original is never mutated: callers swap the result in atomically once
//! every index accepts it.

use crate::error::{DbError, DbResult};
use crate::matcher::matches;
use quill_codec::{check_object, compare, deep_copy, equal, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Update operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Modifier {
    Set,
    Unset,
    Inc,
    Min,
    Max,
    Push,
    AddToSet,
    Pop,
    Pull,
}

impl Modifier {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "$set" => Self::Set,
            "$unset" => Self::Unset,
            "$inc" => Self::Inc,
            "$min" => Self::Min,
            "$max" => Self::Max,
            "$push" => Self::Push,
            "$addToSet" => Self::AddToSet,
            "$pop" => Self::Pop,
            "$pull" => Self::Pull,
            _ => return None,
        })
    }
}

/// Produce a new document by applying an update to `obj`.
///
/// An update with no `$`-prefixed top-level key is a full replace that
/// preserves the document's `_id`. Otherwise every top-level key must be a
/// modifier (no mixing), each carrying a mapping from dot-path to operand.
///
/// # Errors
///
/// - `ImmutableId` if the update would change `_id`
/// - `MixedOperators` if modifiers and plain fields mix at the top level
/// - `UnknownModifier` / `ModifierArgType` / `TypeMismatch` on bad shapes
/// - `InvalidKey` (via the codec) if the result has invalid field names
pub fn modify(obj: &Value, update: &Value) -> DbResult<Value> {
    let update_map = update
        .as_object()
        .ok_or_else(|| DbError::type_mismatch("update must be an object"))?;

    let dollar_keys = update_map.keys().filter(|k| k.starts_with('$')).count();

    let new_doc = if dollar_keys == 0 {
        // Full replace.
        if let (Some(new_id), Some(old_id)) = (update.get("_id"), obj.get("_id")) {
            if !equal(new_id, old_id) {
                return Err(DbError::ImmutableId);
            }
        }
        let mut copy = deep_copy(update, false);
        if let (Some(map), Some(old_id)) = (copy.as_object_mut(), obj.get("_id")) {
            map.insert("_id".to_string(), old_id.clone());
        }
        copy
    } else {
        if dollar_keys != update_map.len() {
            return Err(DbError::MixedOperators);
        }
        let mut copy = deep_copy(obj, false);
        for (name, spec) in update_map {
            let op = Modifier::parse(name).ok_or_else(|| DbError::unknown_modifier(name))?;
            let spec_map = spec.as_object().ok_or_else(|| {
                DbError::bad_operand(format!("{name} takes an object of field/operand pairs"))
            })?;
            for (path, operand) in spec_map {
                let parts: Vec<&str> = path.split('.').collect();
                apply(op, &mut copy, &parts, operand)?;
            }
        }
        copy
    };

    check_object(&new_doc)?;
    if let Some(old_id) = obj.get("_id") {
        match new_doc.get("_id") {
            Some(new_id) if equal(new_id, old_id) => {}
            _ => return Err(DbError::ImmutableId),
        }
    }

    Ok(new_doc)
}

/// Walk the dot-path, creating empty intermediate objects as needed
/// (except for `$unset`, which never fabricates), and run the operator at
/// the leaf. Traversing a scalar silently refuses the whole operation.
fn apply(op: Modifier, current: &mut Value, parts: &[&str], operand: &Value) -> DbResult<()> {
    let Some((&head, rest)) = parts.split_first() else {
        return Ok(());
    };
    if rest.is_empty() {
        return last_step(op, current, head, operand);
    }

    match current {
        Value::Object(map) => {
            if !map.contains_key(head) {
                if op == Modifier::Unset {
                    return Ok(());
                }
                map.insert(head.to_string(), Value::Object(BTreeMap::new()));
            }
            match map.get_mut(head) {
                Some(child) => apply(op, child, rest, operand),
                None => Ok(()),
            }
        }
        Value::Array(items) => {
            let Ok(idx) = head.parse::<usize>() else {
                return Ok(());
            };
            match items.get_mut(idx) {
                Some(child) => apply(op, child, rest, operand),
                None => Ok(()),
            }
        }
        _ => Ok(()),
    }
}

fn field_get<'a>(container: &'a Value, field: &str) -> Option<&'a Value> {
    match container {
        Value::Object(map) => map.get(field),
        Value::Array(items) => field.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

fn field_set(container: &mut Value, field: &str, value: Value) {
    match container {
        Value::Object(map) => {
            map.insert(field.to_string(), value);
        }
        Value::Array(items) => {
            if let Ok(idx) = field.parse::<usize>() {
                match idx.cmp(&items.len()) {
                    Ordering::Less => items[idx] = value,
                    Ordering::Equal => items.push(value),
                    Ordering::Greater => {}
                }
            }
        }
        _ => {}
    }
}

fn last_step(op: Modifier, container: &mut Value, field: &str, operand: &Value) -> DbResult<()> {
    match op {
        Modifier::Set => {
            field_set(container, field, operand.clone());
            Ok(())
        }
        Modifier::Unset => {
            match container {
                Value::Object(map) => {
                    map.remove(field);
                }
                Value::Array(items) => {
                    // Removing an array slot leaves a null, preserving the
                    // positions of the other elements.
                    if let Ok(idx) = field.parse::<usize>() {
                        if let Some(slot) = items.get_mut(idx) {
                            *slot = Value::Null;
                        }
                    }
                }
                _ => {}
            }
            Ok(())
        }
        Modifier::Inc => {
            let Value::Number(step) = operand else {
                return Err(DbError::bad_operand("$inc modifier called with a non-number operand"));
            };
            match field_get(container, field) {
                None | Some(Value::Undefined) => {
                    field_set(container, field, Value::Number(*step));
                    Ok(())
                }
                Some(Value::Number(current)) => {
                    let next = current + step;
                    field_set(container, field, Value::Number(next));
                    Ok(())
                }
                Some(_) => Err(DbError::type_mismatch("cannot use $inc on a non-number field")),
            }
        }
        Modifier::Min => {
            match field_get(container, field) {
                None | Some(Value::Undefined) => field_set(container, field, operand.clone()),
                Some(current) => {
                    if compare(operand, current) == Ordering::Less {
                        field_set(container, field, operand.clone());
                    }
                }
            }
            Ok(())
        }
        Modifier::Max => {
            match field_get(container, field) {
                None | Some(Value::Undefined) => field_set(container, field, operand.clone()),
                Some(current) => {
                    if compare(operand, current) == Ordering::Greater {
                        field_set(container, field, operand.clone());
                    }
                }
            }
            Ok(())
        }
        Modifier::Push => push(container, field, operand),
        Modifier::AddToSet => add_to_set(container, field, operand),
        Modifier::Pop => pop(container, field, operand),
        Modifier::Pull => pull(container, field, operand),
    }
}

/// The array an array-modifier operates on, created empty when `create`
/// and absent.
fn target_array<'a>(
    container: &'a mut Value,
    field: &str,
    create: bool,
    op_name: &str,
) -> DbResult<&'a mut Vec<Value>> {
    if create && field_get(container, field).is_none() {
        field_set(container, field, Value::Array(Vec::new()));
    }
    let found = match container {
        Value::Object(map) => map.get_mut(field),
        Value::Array(items) => field.parse::<usize>().ok().and_then(|i| items.get_mut(i)),
        _ => None,
    };
    match found {
        Some(Value::Array(items)) => Ok(items),
        _ => Err(DbError::type_mismatch(format!(
            "cannot use {op_name} on a non-array field"
        ))),
    }
}

fn push(container: &mut Value, field: &str, operand: &Value) -> DbResult<()> {
    // Validate the $each/$slice envelope before touching the document.
    let envelope = operand.as_object().filter(|m| m.contains_key("$each"));
    if let Some(env) = envelope {
        if env.keys().any(|k| k != "$each" && k != "$slice") {
            return Err(DbError::bad_operand(
                "$push only takes $slice alongside $each",
            ));
        }
    } else if operand
        .as_object()
        .is_some_and(|m| m.contains_key("$slice"))
    {
        return Err(DbError::bad_operand(
            "$slice can only be used in conjunction with $each",
        ));
    }

    let slice = match envelope.and_then(|env| env.get("$slice")) {
        Some(Value::Number(n)) if n.fract() == 0.0 => Some(*n),
        Some(_) => return Err(DbError::bad_operand("$slice requires an integer operand")),
        None => None,
    };
    let additions: Vec<Value> = match envelope {
        Some(env) => match env.get("$each") {
            Some(Value::Array(items)) => items.clone(),
            _ => return Err(DbError::bad_operand("$each requires an array operand")),
        },
        None => vec![operand.clone()],
    };

    let items = target_array(container, field, true, "$push")?;
    items.extend(additions);

    if let Some(n) = slice {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        if n == 0.0 {
            items.clear();
        } else if n > 0.0 {
            items.truncate(n as usize);
        } else {
            let keep = ((-n) as usize).min(items.len());
            let drop = items.len() - keep;
            items.drain(..drop);
        }
    }
    Ok(())
}

fn add_to_set(container: &mut Value, field: &str, operand: &Value) -> DbResult<()> {
    let envelope = operand.as_object().filter(|m| m.contains_key("$each"));
    let additions: Vec<Value> = match envelope {
        Some(env) => {
            if env.len() > 1 {
                return Err(DbError::bad_operand("$addToSet takes no modifier besides $each"));
            }
            match env.get("$each") {
                Some(Value::Array(items)) => items.clone(),
                _ => return Err(DbError::bad_operand("$each requires an array operand")),
            }
        }
        None => vec![operand.clone()],
    };

    let items = target_array(container, field, true, "$addToSet")?;
    for addition in additions {
        if !items.iter().any(|existing| equal(existing, &addition)) {
            items.push(addition);
        }
    }
    Ok(())
}

fn pop(container: &mut Value, field: &str, operand: &Value) -> DbResult<()> {
    let Value::Number(n) = operand else {
        return Err(DbError::bad_operand("$pop requires an integer operand"));
    };
    if n.fract() != 0.0 {
        return Err(DbError::bad_operand("$pop requires an integer operand"));
    }

    let items = target_array(container, field, false, "$pop")?;
    if *n > 0.0 {
        items.pop();
    } else if *n < 0.0 && !items.is_empty() {
        items.remove(0);
    }
    Ok(())
}

fn pull(container: &mut Value, field: &str, operand: &Value) -> DbResult<()> {
    let items = target_array(container, field, false, "$pull")?;
    let mut kept = Vec::with_capacity(items.len());
    for el in items.drain(..) {
        if !matches(&el, operand)? {
            kept.push(el);
        }
    }
    *items = kept;
    Ok(())
}
