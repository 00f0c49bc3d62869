//! Resource manifest
//!
//! A manifest maps every managed, origin-relative path to the fingerprint of
//! its content, and names the core paths that must be cached before the
//! application shell can start. It is produced by the build and treated as
//! trusted, read-only input.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SwError};

/// Synthetic key for the origin root.
pub const ROOT_KEY: &str = "/";

/// Document that `/` aliases.
pub const INDEX_KEY: &str = "index.html";

/// Immutable mapping of resource path to fingerprint plus the core set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    resources: BTreeMap<String, String>,
    core: Vec<String>,
}

impl Manifest {
    /// Build a manifest. Repeated core paths keep their first position only.
    pub fn new<R, C, K, V, P>(resources: R, core: C) -> Self
    where
        R: IntoIterator<Item = (K, V)>,
        C: IntoIterator<Item = P>,
        K: Into<String>,
        V: Into<String>,
        P: Into<String>,
    {
        let resources = resources
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        let mut seen = HashSet::new();
        let core = core
            .into_iter()
            .map(Into::into)
            .filter(|path: &String| seen.insert(path.clone()))
            .collect();

        Self { resources, core }
    }

    /// Parse `{"resources": {path: fingerprint}, "core": [path]}`.
    pub fn from_json(json: &str) -> Result<Self> {
        #[derive(Deserialize)]
        struct Raw {
            resources: BTreeMap<String, String>,
            #[serde(default)]
            core: Vec<String>,
        }

        let raw: Raw = serde_json::from_str(json).map_err(|e| SwError::manifest(e.to_string()))?;
        Ok(Self::new(raw.resources, raw.core))
    }

    /// Extract the manifest from a generated worker script.
    ///
    /// The build emits `const RESOURCES = {...};` and `const CORE = [...];`
    /// with JSON-compatible literals.
    pub fn from_worker_script(script: &str) -> Result<Self> {
        let resources_literal = extract_literal(script, "RESOURCES", '{', '}')?;
        let core_literal = extract_literal(script, "CORE", '[', ']')?;

        let resources: BTreeMap<String, String> = serde_json::from_str(resources_literal)
            .map_err(|e| SwError::manifest(format!("RESOURCES: {e}")))?;
        let core: Vec<String> = serde_json::from_str(core_literal)
            .map_err(|e| SwError::manifest(format!("CORE: {e}")))?;

        Ok(Self::new(resources, core))
    }

    /// Load from disk: `.js` files are parsed as worker scripts, anything else as JSON.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| SwError::manifest(format!("{}: {}", path.display(), e)))?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("js") => Self::from_worker_script(&text),
            _ => Self::from_json(&text),
        }
    }

    /// Fingerprint of a path, if managed.
    pub fn fingerprint(&self, key: &str) -> Option<&str> {
        self.resources.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.resources.contains_key(key)
    }

    /// All managed paths, in sorted order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    /// Core paths, in declaration order, without duplicates.
    pub fn core(&self) -> &[String] {
        &self.core
    }

    pub fn resources(&self) -> &BTreeMap<String, String> {
        &self.resources
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Check the structural rules a build is expected to uphold.
    pub fn validate(&self) -> Result<()> {
        if self.resources.keys().any(String::is_empty) {
            return Err(SwError::manifest("empty resource path"));
        }

        if let Some(missing) = self.core.iter().find(|p| !self.contains(p)) {
            return Err(SwError::manifest(format!(
                "core path {missing} is not a manifest resource"
            )));
        }

        if let (Some(root), Some(index)) = (self.fingerprint(ROOT_KEY), self.fingerprint(INDEX_KEY))
        {
            if root != index {
                return Err(SwError::manifest(format!(
                    "{ROOT_KEY} ({root}) and {INDEX_KEY} ({index}) must share a fingerprint"
                )));
            }
        }

        Ok(())
    }

    /// Body of the history record: the path → fingerprint mapping as JSON.
    pub fn history_json(&self) -> String {
        // A map of strings always serializes.
        serde_json::to_string(&self.resources).unwrap_or_else(|_| "{}".to_string())
    }

    /// Parse a history record written by [`Manifest::history_json`].
    pub fn parse_history(body: &[u8]) -> Result<BTreeMap<String, String>> {
        serde_json::from_slice(body).map_err(|e| SwError::manifest(format!("history record: {e}")))
    }
}

/// Find `const NAME = <open>...<close>` and return the balanced literal.
fn extract_literal<'a>(script: &'a str, name: &str, open: char, close: char) -> Result<&'a str> {
    let marker = format!("const {name}");
    let decl = script
        .find(&marker)
        .ok_or_else(|| SwError::manifest(format!("no `{marker}` declaration")))?;

    let after = &script[decl + marker.len()..];
    let start = after
        .find(open)
        .ok_or_else(|| SwError::manifest(format!("{name} has no `{open}` literal")))?;
    let body = &after[start..];

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in body.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        if c == '"' {
            in_string = true;
        } else if c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
            if depth == 0 {
                return Ok(&body[..=i]);
            }
        }
    }

    Err(SwError::manifest(format!("unterminated {name} literal")))
}
