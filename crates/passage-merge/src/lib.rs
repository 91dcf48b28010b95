//! Prop reconciliation.
//!
//! Given the previous prop tree, an incoming page, and the visit's reset
//! list, [`reconcile`] produces the next prop tree under these rules:
//!
//! - A name present in the incoming props replaces the previous value.
//! - A name absent from the incoming props is carried over unchanged.
//! - A name in the reset list is cleared before the incoming value lands,
//!   so merge directives start fresh instead of appending to stale state.
//! - A name in `merge_props` shallow-appends (arrays concatenate, objects
//!   shallow-merge); a name in `deep_merge_props` merges recursively, with
//!   `match_props_on` switching nested arrays from concatenation to
//!   upsert-by-identity.
//! - A once-prop already present is carried over untouched no matter what
//!   the incoming page or reset list says.
//!
//! Precedence when directives collide on one name:
//! once > reset > deep merge > shallow merge. `match_props_on` only
//! modifies arrays reached through a deep merge.

use std::collections::BTreeMap;

use passage_types::page::Page;
use passage_types::path::PropPath;
use serde_json::{Map, Value};

/// Borrowed view of a page's merge directives.
#[derive(Debug, Clone, Copy)]
pub struct MergeDirectives<'a> {
    merge_props: &'a [String],
    deep_merge_props: &'a [String],
    match_props_on: &'a BTreeMap<String, String>,
    once_props: &'a [String],
}

impl<'a> MergeDirectives<'a> {
    /// The directives declared by `page`.
    #[must_use]
    pub fn of(page: &'a Page) -> Self {
        Self {
            merge_props: &page.merge_props,
            deep_merge_props: &page.deep_merge_props,
            match_props_on: &page.match_props_on,
            once_props: &page.once_props,
        }
    }

    fn is_shallow_merge(&self, name: &str) -> bool {
        self.merge_props.iter().any(|p| p == name)
    }

    fn is_deep_merge(&self, name: &str) -> bool {
        self.deep_merge_props.iter().any(|p| p == name)
    }

    fn is_once(&self, name: &str) -> bool {
        self.once_props.iter().any(|p| p == name)
    }
}

/// Reconcile `previous` props with an incoming page.
///
/// `previous` is the current page's prop tree when the visit targets the
/// same component, or empty when the component changes (a fresh page starts
/// a fresh prop lifetime, including for once-props).
#[must_use]
pub fn reconcile(
    previous: &Map<String, Value>,
    incoming: &Page,
    reset: &[PropPath],
) -> Map<String, Value> {
    let directives = MergeDirectives::of(incoming);
    let mut next = previous.clone();

    for path in reset {
        // Once-props outrank reset: their first value is permanent.
        if directives.is_once(path.root()) && previous.contains_key(path.root()) {
            continue;
        }
        remove_path(&mut next, path);
    }

    for (name, value) in &incoming.props {
        if directives.is_once(name) && previous.contains_key(name) {
            continue;
        }
        let merged = match next.get(name) {
            Some(existing) if directives.is_deep_merge(name) => {
                deep_merge(existing, value, name, directives.match_props_on)
            }
            Some(existing) if directives.is_shallow_merge(name) => {
                shallow_merge(existing, value)
            }
            _ => value.clone(),
        };
        next.insert(name.clone(), merged);
    }

    next
}

/// Remove the value addressed by a dot path, if present.
///
/// Intermediate segments must be objects; arrays are not traversed.
fn remove_path(props: &mut Map<String, Value>, path: &PropPath) {
    let segments: Vec<&str> = path.segments().collect();
    let Some((&last, parents)) = segments.split_last() else {
        return;
    };

    let mut cursor = props;
    for &segment in parents {
        match cursor.get_mut(segment) {
            Some(Value::Object(inner)) => cursor = inner,
            _ => return,
        }
    }
    cursor.remove(last);
}

/// Shallow append: arrays concatenate, objects merge per top-level key,
/// anything else replaces.
fn shallow_merge(previous: &Value, incoming: &Value) -> Value {
    match (previous, incoming) {
        (Value::Array(old), Value::Array(new)) => {
            let mut out = old.clone();
            out.extend(new.iter().cloned());
            Value::Array(out)
        }
        (Value::Object(old), Value::Object(new)) => {
            let mut out = old.clone();
            for (key, value) in new {
                out.insert(key.clone(), value.clone());
            }
            Value::Object(out)
        }
        _ => incoming.clone(),
    }
}

/// Recursive merge. `path` is the dot path of the value being merged, used
/// to look up identity keys for array upserts.
fn deep_merge(
    previous: &Value,
    incoming: &Value,
    path: &str,
    match_on: &BTreeMap<String, String>,
) -> Value {
    match (previous, incoming) {
        (Value::Object(old), Value::Object(new)) => {
            let mut out = old.clone();
            for (key, value) in new {
                let merged = match old.get(key) {
                    Some(existing) => {
                        deep_merge(existing, value, &format!("{path}.{key}"), match_on)
                    }
                    None => value.clone(),
                };
                out.insert(key.clone(), merged);
            }
            Value::Object(out)
        }
        (Value::Array(old), Value::Array(new)) => match match_on.get(path) {
            Some(key) => upsert_by_identity(old, new, key),
            None => {
                let mut out = old.clone();
                out.extend(new.iter().cloned());
                Value::Array(out)
            }
        },
        _ => incoming.clone(),
    }
}

/// Upsert `new` items into `old` by the identity field `key`: an item whose
/// identity matches an existing one replaces it in place; everything else
/// appends. Items lacking the identity field always append.
fn upsert_by_identity(old: &[Value], new: &[Value], key: &str) -> Value {
    let mut out = old.to_vec();
    for item in new {
        let identity = item.get(key);
        let slot = identity.and_then(|id| {
            out.iter()
                .position(|candidate| candidate.get(key) == Some(id))
        });
        match slot {
            Some(index) => out[index] = item.clone(),
            None => out.push(item.clone()),
        }
    }
    Value::Array(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn path(raw: &str) -> PropPath {
        PropPath::parse(raw).expect("valid path")
    }

    fn page_with(props_value: Value) -> Page {
        let mut page = Page::new("Feed", "/feed");
        page.props = props(props_value);
        page
    }

    #[test]
    fn incoming_names_replace_absent_names_carry() {
        let previous = props(json!({ "a": 1, "b": 2 }));
        let incoming = page_with(json!({ "a": 10 }));
        let next = reconcile(&previous, &incoming, &[]);
        assert_eq!(next.get("a"), Some(&json!(10)));
        assert_eq!(next.get("b"), Some(&json!(2)));
    }

    #[test]
    fn merge_prop_concatenates_arrays() {
        let previous = props(json!({ "items": [1, 2, 3] }));
        let mut incoming = page_with(json!({ "items": [4, 5] }));
        incoming.merge_props = vec!["items".to_owned()];
        let next = reconcile(&previous, &incoming, &[]);
        assert_eq!(next.get("items"), Some(&json!([1, 2, 3, 4, 5])));
    }

    #[test]
    fn merge_prop_shallow_merges_objects() {
        let previous = props(json!({ "paginated": { "page": 1, "data": "old" } }));
        let mut incoming = page_with(json!({ "paginated": { "page": 2 } }));
        incoming.merge_props = vec!["paginated".to_owned()];
        let next = reconcile(&previous, &incoming, &[]);
        assert_eq!(
            next.get("paginated"),
            Some(&json!({ "page": 2, "data": "old" }))
        );
    }

    #[test]
    fn reset_clears_accumulation_before_merge() {
        let previous = props(json!({ "items": [1, 2, 3, 4, 5] }));
        let mut incoming = page_with(json!({ "items": [9] }));
        incoming.merge_props = vec!["items".to_owned()];
        let next = reconcile(&previous, &incoming, &[path("items")]);
        assert_eq!(next.get("items"), Some(&json!([9])));
    }

    #[test]
    fn reset_without_incoming_value_removes_the_prop() {
        let previous = props(json!({ "filters": { "q": "abc" }, "other": 1 }));
        let incoming = page_with(json!({}));
        let next = reconcile(&previous, &incoming, &[path("filters")]);
        assert!(!next.contains_key("filters"));
        assert_eq!(next.get("other"), Some(&json!(1)));
    }

    #[test]
    fn reset_reaches_nested_paths() {
        let previous = props(json!({ "auth": { "user": { "name": "ada" }, "token": "x" } }));
        let incoming = page_with(json!({}));
        let next = reconcile(&previous, &incoming, &[path("auth.user")]);
        assert_eq!(next.get("auth"), Some(&json!({ "token": "x" })));
    }

    #[test]
    fn deep_merge_recurses_through_objects() {
        let previous = props(json!({
            "users": { "data": [1], "meta": { "page": 1, "total": 50 } }
        }));
        let mut incoming = page_with(json!({
            "users": { "data": [2], "meta": { "page": 2 } }
        }));
        incoming.deep_merge_props = vec!["users".to_owned()];
        let next = reconcile(&previous, &incoming, &[]);
        assert_eq!(
            next.get("users"),
            Some(&json!({ "data": [1, 2], "meta": { "page": 2, "total": 50 } }))
        );
    }

    #[test]
    fn deep_merge_upserts_by_identity_key() {
        let previous = props(json!({
            "users": { "data": [
                { "id": 1, "name": "ada" },
                { "id": 2, "name": "grace" }
            ] }
        }));
        let mut incoming = page_with(json!({
            "users": { "data": [
                { "id": 2, "name": "grace hopper" },
                { "id": 3, "name": "edsger" }
            ] }
        }));
        incoming.deep_merge_props = vec!["users".to_owned()];
        incoming
            .match_props_on
            .insert("users.data".to_owned(), "id".to_owned());
        let next = reconcile(&previous, &incoming, &[]);
        let data = next["users"]["data"].as_array().expect("array");
        assert_eq!(data.len(), 3);
        assert_eq!(data[1], json!({ "id": 2, "name": "grace hopper" }));
        assert_eq!(data[2], json!({ "id": 3, "name": "edsger" }));
    }

    #[test]
    fn match_key_is_inert_without_deep_merge() {
        let previous = props(json!({ "users": [{ "id": 1 }] }));
        let mut incoming = page_with(json!({ "users": [{ "id": 1, "v": 2 }] }));
        incoming
            .match_props_on
            .insert("users".to_owned(), "id".to_owned());
        let next = reconcile(&previous, &incoming, &[]);
        // Plain replace: no directive placed "users" under merge rules.
        assert_eq!(next.get("users"), Some(&json!([{ "id": 1, "v": 2 }])));
    }

    #[test]
    fn items_without_identity_field_append() {
        let merged = upsert_by_identity(
            &[json!({ "id": 1 })],
            &[json!({ "name": "anon" }), json!({ "id": 1, "name": "ada" })],
            "id",
        );
        assert_eq!(
            merged,
            json!([{ "id": 1, "name": "ada" }, { "name": "anon" }])
        );
    }

    #[test]
    fn once_prop_is_carried_untouched() {
        let previous = props(json!({ "settings": { "theme": "dark" } }));
        let mut incoming = page_with(json!({ "settings": { "theme": "light" } }));
        incoming.once_props = vec!["settings".to_owned()];
        let next = reconcile(&previous, &incoming, &[]);
        assert_eq!(next.get("settings"), Some(&json!({ "theme": "dark" })));
    }

    #[test]
    fn once_prop_populates_on_first_arrival() {
        let previous = props(json!({}));
        let mut incoming = page_with(json!({ "settings": { "theme": "light" } }));
        incoming.once_props = vec!["settings".to_owned()];
        let next = reconcile(&previous, &incoming, &[]);
        assert_eq!(next.get("settings"), Some(&json!({ "theme": "light" })));
    }

    #[test]
    fn once_prop_outranks_reset() {
        let previous = props(json!({ "settings": { "theme": "dark" } }));
        let mut incoming = page_with(json!({}));
        incoming.once_props = vec!["settings".to_owned()];
        let next = reconcile(&previous, &incoming, &[path("settings")]);
        assert_eq!(next.get("settings"), Some(&json!({ "theme": "dark" })));
    }

    #[test]
    fn non_merge_application_is_idempotent() {
        let previous = props(json!({ "a": [1, 2], "b": { "c": 3 } }));
        let incoming = page_with(json!({ "a": [9], "b": { "c": 4 } }));
        let once = reconcile(&previous, &incoming, &[]);
        let twice = reconcile(&once, &incoming, &[]);
        assert_eq!(once, twice);
    }

    #[test]
    fn merge_application_is_not_idempotent_by_design() {
        let previous = props(json!({ "items": [1] }));
        let mut incoming = page_with(json!({ "items": [2] }));
        incoming.merge_props = vec!["items".to_owned()];
        let once = reconcile(&previous, &incoming, &[]);
        let twice = reconcile(&once, &incoming, &[]);
        assert_eq!(once.get("items"), Some(&json!([1, 2])));
        assert_eq!(twice.get("items"), Some(&json!([1, 2, 2])));
    }
}
