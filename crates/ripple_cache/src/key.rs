//! Cache key construction and mapped-item key extraction.

use tracing::debug;

use crate::fingerprint::ObjectHasher;
use crate::value::{view_of, Fingerprintable, ValueView};

/// Separator between node name and item key in composite cache keys.
pub const ITEM_KEY_SEPARATOR: &str = "::";

/// Field names probed, in order, when a mapped node declares no key
/// attribute.
const KEY_ATTR_FALLBACKS: [&str; 4] = ["id", "uuid", "key", "name"];

/// Builds the cache key for a node, optionally scoped to one mapped item.
pub fn make_cache_key(node_name: &str, item_key: Option<&str>) -> String {
    match item_key {
        Some(item) => format!("{node_name}{ITEM_KEY_SEPARATOR}{item}"),
        None => node_name.to_string(),
    }
}

/// Extracts a stable identifier for one item of a mapped node.
///
/// Tries the declared key attribute first, then the fixed fallback probe
/// list, and finally the item's structural fingerprint. The fingerprint
/// fallback keeps per-item caching working for items with no natural
/// identifier, at the cost of the key changing whenever the content does.
pub fn item_key(
    item: &dyn Fingerprintable,
    key_attr: Option<&str>,
    hasher: &ObjectHasher,
) -> String {
    let view = view_of(item);
    if let Some(attr) = key_attr {
        match field_key(&view, attr) {
            Some(key) => return key,
            None => {
                debug!(attr, "declared key attribute unusable; probing fallbacks");
            }
        }
    }
    for attr in KEY_ATTR_FALLBACKS {
        if let Some(key) = field_key(&view, attr) {
            return key;
        }
    }
    hasher.fingerprint(item).to_string()
}

/// Looks up a scalar field of a record view and renders it as a key.
fn field_key(view: &ValueView, attr: &str) -> Option<String> {
    let ValueView::Record { fields, .. } = view else {
        return None;
    };
    let (_, value) = fields.iter().find(|(name, _)| name == attr)?;
    scalar_key(value)
}

fn scalar_key(view: &ValueView) -> Option<String> {
    match view {
        ValueView::Bool(b) => Some(b.to_string()),
        ValueView::Int(i) => Some(i.to_string()),
        ValueView::UInt(u) => Some(u.to_string()),
        ValueView::Str(s) => Some(s.clone()),
        _ => None,
    }
}
