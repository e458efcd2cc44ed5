use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One RFC 6902 operation as emitted by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PatchOp {
    pub op: PatchKind,
    #[schemars(description = "JSON pointer, e.g. /interests/-")]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(description = "New value; omit for remove")]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum PatchKind {
    Add,
    Replace,
    Remove,
}

/// Apply `ops` in order. The document is left untouched if any op fails.
///
/// `replace` on a missing object member inserts it; models routinely
/// "replace" optional fields that were never set.
pub fn apply(doc: &mut Value, ops: &[PatchOp]) -> Result<(), String> {
    let mut working = doc.clone();
    for op in ops {
        apply_one(&mut working, op)?;
    }
    *doc = working;
    Ok(())
}

fn apply_one(doc: &mut Value, op: &PatchOp) -> Result<(), String> {
    let path = op.path.as_str();
    let value = || {
        op.value
            .clone()
            .ok_or_else(|| format!("{:?} at '{path}' needs a value", op.op))
    };

    if path.is_empty() {
        return match op.op {
            PatchKind::Add | PatchKind::Replace => {
                *doc = value()?;
                Ok(())
            }
            PatchKind::Remove => Err("cannot remove the whole document".into()),
        };
    }

    let split = path
        .rfind('/')
        .ok_or_else(|| format!("path '{path}' must start with '/'"))?;
    let (parent_path, token) = (&path[..split], unescape(&path[split + 1..]));

    let parent = doc
        .pointer_mut(parent_path)
        .ok_or_else(|| format!("no such path '{parent_path}'"))?;

    match parent {
        Value::Object(map) => match op.op {
            PatchKind::Add | PatchKind::Replace => {
                map.insert(token, value()?);
                Ok(())
            }
            PatchKind::Remove => map
                .remove(&token)
                .map(|_| ())
                .ok_or_else(|| format!("no such member '{path}'")),
        },
        Value::Array(items) => {
            if token == "-" {
                return match op.op {
                    PatchKind::Add => {
                        items.push(value()?);
                        Ok(())
                    }
                    _ => Err(format!("'-' is only valid for add, at '{path}'")),
                };
            }
            let index: usize = token
                .parse()
                .map_err(|_| format!("invalid array index '{token}' in '{path}'"))?;
            match op.op {
                PatchKind::Add if index <= items.len() => {
                    items.insert(index, value()?);
                    Ok(())
                }
                PatchKind::Replace if index < items.len() => {
                    items[index] = value()?;
                    Ok(())
                }
                PatchKind::Remove if index < items.len() => {
                    items.remove(index);
                    Ok(())
                }
                _ => Err(format!("index {index} out of bounds at '{path}'")),
            }
        }
        _ => Err(format!("'{parent_path}' is not a container")),
    }
}

fn unescape(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}
