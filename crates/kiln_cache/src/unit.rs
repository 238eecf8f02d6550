//! The compilation unit and optimizer option model.

use std::collections::BTreeMap;

use serde::de::Error as _;
use serde::{Deserialize, Serialize};

use kiln_common::canonical_map_text;

/// A located piece of source text belonging to a compilation unit.
///
/// The `path` is the fragment's location identity (file path, URL, or a
/// synthetic id); the fragment's logical module name is extracted by the
/// compiler, not stored here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFragment {
    /// Location identity of the fragment.
    pub path: String,
    /// UTF-8 source text.
    pub content: String,
}

impl SourceFragment {
    /// Creates a fragment from a location and its source text.
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// A named bundle of source fragments compiled as one program.
///
/// The first fragment is the main fragment; the rest are dependency
/// modules. Fragment order does not affect the cache key, because each
/// fragment is digested and indexed by its extracted module name before
/// combination. Immutable once constructed for a given compile attempt.
#[derive(Debug, Clone)]
pub struct CompilationUnit {
    /// Ordered source fragments; the first is the entry point.
    pub fragments: Vec<SourceFragment>,
    /// Preferred display name. Prefixes the cache key and identifies the
    /// unit in compiler error messages.
    pub preferred_name: String,
    /// Compile-time parameters supplied by the caller. The compiler
    /// resolves these into the declared parameter set used for keying.
    pub parameters: BTreeMap<String, String>,
}

impl CompilationUnit {
    /// Creates a unit with no compile-time parameters.
    pub fn new(preferred_name: impl Into<String>, fragments: Vec<SourceFragment>) -> Self {
        Self {
            fragments,
            preferred_name: preferred_name.into(),
            parameters: BTreeMap::new(),
        }
    }

    /// Sets the compile-time parameters.
    pub fn with_parameters(mut self, parameters: BTreeMap<String, String>) -> Self {
        self.parameters = parameters;
        self
    }

    /// The entry-point fragment, if the unit has any fragments.
    pub fn main_fragment(&self) -> Option<&SourceFragment> {
        self.fragments.first()
    }
}

/// Optimizer configuration for a compile attempt.
///
/// Two enabled option sets are equivalent for caching purposes iff their
/// flags serialize identically after sorting by key; the `BTreeMap` keeps
/// flags key-sorted at all times, so equivalence reduces to equality of
/// the canonical text.
#[derive(Debug, Clone, PartialEq)]
pub enum OptimizeOptions {
    /// Optimization disabled; the compile produces the unoptimized variant.
    Disabled,
    /// Optimization enabled with the given optimizer flags.
    Enabled {
        /// Optimizer flags; values are JSON scalars rendered as compact
        /// JSON in the canonical text.
        flags: BTreeMap<String, serde_json::Value>,
    },
}

impl OptimizeOptions {
    /// Sentinel naming the disabled state in canonical text, key suffixes,
    /// and the wire shape.
    pub(crate) const UNOPTIMIZED: &'static str = "unoptimized";

    /// Creates enabled options from a flag map.
    pub fn enabled(flags: BTreeMap<String, serde_json::Value>) -> Self {
        Self::Enabled { flags }
    }

    /// `true` if optimization is disabled.
    pub fn is_disabled(&self) -> bool {
        matches!(self, Self::Disabled)
    }

    /// Renders the options as canonical text for digesting.
    ///
    /// Disabled options render as the `unoptimized` sentinel; enabled
    /// options render one `flag=value` line per flag in key order.
    pub fn canonical_text(&self) -> String {
        match self {
            Self::Disabled => Self::UNOPTIMIZED.to_string(),
            Self::Enabled { flags } => {
                canonical_map_text(flags.iter().map(|(k, v)| (k.clone(), v.to_string())))
            }
        }
    }
}

// Wire shape: the string "unoptimized" when disabled, else the flag map.
impl Serialize for OptimizeOptions {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Disabled => serializer.serialize_str(Self::UNOPTIMIZED),
            Self::Enabled { flags } => flags.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for OptimizeOptions {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match serde_json::Value::deserialize(deserializer)? {
            serde_json::Value::String(s) if s == Self::UNOPTIMIZED => Ok(Self::Disabled),
            serde_json::Value::String(other) => Err(D::Error::custom(format!(
                "unknown optimize sentinel '{other}'"
            ))),
            serde_json::Value::Object(map) => Ok(Self::Enabled {
                flags: map.into_iter().collect(),
            }),
            other => Err(D::Error::custom(format!(
                "expected 'unoptimized' or a flag map, got {other}"
            ))),
        }
    }
}
