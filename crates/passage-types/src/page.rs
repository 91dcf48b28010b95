//! The protocol page shape.
//!
//! A [`Page`] is the JSON body of every protocol response and the single
//! value held by the page store. It is immutable once constructed; visits
//! replace it wholesale after prop reconciliation.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

/// One scroll position for a scroll region on the page.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ScrollRegion {
    pub x: f64,
    pub y: f64,
}

impl ScrollRegion {
    /// The top-left origin.
    pub const ORIGIN: Self = Self { x: 0.0, y: 0.0 };
}

/// A server-rendered page: component name, prop tree, and the directives
/// controlling how the prop tree reconciles against the previous page.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    /// Name of the component the adapter should render.
    pub component: String,
    /// The prop tree for the component.
    #[serde(default)]
    pub props: Map<String, Value>,
    /// The page's canonical URL (path + query).
    pub url: String,
    /// Server asset version; a mismatch forces a full document reload.
    #[serde(default)]
    pub version: Option<String>,
    /// Seal this page's persisted history entry.
    #[serde(default)]
    pub encrypt_history: bool,
    /// Drop all prior history entries (and rotate the sealing key) once
    /// this page commits.
    #[serde(default)]
    pub clear_history: bool,
    /// Named groups of props the server omitted from this response; each
    /// group is fetched by one follow-up partial reload.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub deferred_groups: BTreeMap<String, Vec<String>>,
    /// Prop names whose updates append (shallow) instead of replacing.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merge_props: Vec<String>,
    /// Prop names whose updates merge recursively.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deep_merge_props: Vec<String>,
    /// For deep-merged array fields: dot path of the array to the identity
    /// key used to upsert items instead of concatenating.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_props_on: BTreeMap<String, String>,
    /// Prop names populated at most once per page lifetime and carried
    /// over unchanged afterwards.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub once_props: Vec<String>,
    /// One-shot messages; replaced wholesale on every applied response.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub flash: Map<String, Value>,
}

impl Page {
    /// A minimal page for the given component and URL.
    #[must_use]
    pub fn new(component: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            url: url.into(),
            ..Self::default()
        }
    }

    /// Whether the prop tree carries validation errors (`props.errors`
    /// present and non-empty).
    #[must_use]
    pub fn has_errors(&self) -> bool {
        match self.props.get("errors") {
            Some(Value::Object(map)) => !map.is_empty(),
            Some(Value::Null) | None => false,
            Some(_) => true,
        }
    }

    /// Whether `name` is declared once-populated.
    #[must_use]
    pub fn is_once_prop(&self, name: &str) -> bool {
        self.once_props.iter().any(|p| p == name)
    }
}
