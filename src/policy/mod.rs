//! Declarative compliance policy: forbidden names, pattern rules, config keys.
//!
//! A policy is loaded once per run and is immutable afterwards; concurrent
//! scans of different roots may share one instance. Entries in
//! `forbidden_filenames` ending with `/` are directory markers matched against
//! every path segment (`api/` flags `api/handler.js` anywhere in the tree);
//! all other entries match the file name exactly.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, WardenError};

/// Highest policy schema version this build understands.
///
/// Documents declaring a higher version are rejected at load time rather than
/// silently ignoring fields they may depend on.
pub const SUPPORTED_SCHEMA_VERSION: u32 = 1;

/// Violation severity, ordered ascending.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// One raw pattern rule as it appears in the policy document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternRule {
    /// Stable rule identifier, e.g. `server-side-props`.
    pub id: String,
    /// Regular expression matched against raw file text.
    pub pattern: String,
    /// Severity assigned to violations of this rule.
    pub severity: Severity,
}

/// A pattern rule with its compiled matcher.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    rule: PatternRule,
    regex: Regex,
}

impl CompiledRule {
    pub fn id(&self) -> &str {
        &self.rule.id
    }

    pub fn severity(&self) -> Severity {
        self.rule.severity
    }

    /// Whether this rule matches anywhere in `text`.
    #[must_use]
    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    /// Replace every matched span with `replacement`, returning the new text
    /// and the number of spans replaced.
    #[must_use]
    pub fn strip(&self, text: &str, replacement: &str) -> (String, usize) {
        let count = self.regex.find_iter(text).count();
        if count == 0 {
            return (text.to_string(), 0);
        }
        (
            self.regex.replace_all(text, replacement).into_owned(),
            count,
        )
    }
}

/// On-disk policy document (JSON).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyDocument {
    pub schema_version: u32,
    pub forbidden_filenames: Vec<String>,
    pub forbidden_patterns: Vec<PatternRule>,
    pub forbidden_config_keys: Vec<String>,
    /// Substrings that must be present in marker-expecting config files.
    /// Validation-only: missing markers are reported, never sanitized.
    pub required_markers: Vec<String>,
    /// File names whose dialect expects the required markers.
    pub marker_filenames: Vec<String>,
    /// Extensions treated as text source (pattern rules apply).
    pub text_extensions: Vec<String>,
    /// Extensions treated as structured data (config-key rules apply).
    pub structured_extensions: Vec<String>,
}

impl Default for PolicyDocument {
    fn default() -> Self {
        Self {
            schema_version: SUPPORTED_SCHEMA_VERSION,
            forbidden_filenames: Vec::new(),
            forbidden_patterns: Vec::new(),
            forbidden_config_keys: Vec::new(),
            required_markers: Vec::new(),
            marker_filenames: Vec::new(),
            text_extensions: default_text_extensions(),
            structured_extensions: default_structured_extensions(),
        }
    }
}

fn default_text_extensions() -> Vec<String> {
    ["js", "jsx", "ts", "tsx", "mjs", "cjs"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn default_structured_extensions() -> Vec<String> {
    vec!["json".to_string()]
}

/// Compiled, immutable policy shared across a run.
#[derive(Debug, Clone)]
pub struct Policy {
    version: u32,
    exact_names: HashSet<String>,
    dir_markers: HashSet<String>,
    rules: Vec<CompiledRule>,
    config_keys: Vec<String>,
    required_markers: Vec<String>,
    marker_filenames: HashSet<String>,
    text_extensions: HashSet<String>,
    structured_extensions: HashSet<String>,
}

impl Policy {
    /// Load and compile a policy document from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|source| WardenError::PolicyLoad {
            path: path.to_path_buf(),
            details: source.to_string(),
        })?;
        let doc: PolicyDocument =
            serde_json::from_str(&raw).map_err(|e| WardenError::PolicyLoad {
                path: path.to_path_buf(),
                details: e.to_string(),
            })?;
        Self::from_document(doc)
    }

    /// Compile a policy document, rejecting unsupported schema versions and
    /// malformed rules.
    pub fn from_document(doc: PolicyDocument) -> Result<Self> {
        if doc.schema_version > SUPPORTED_SCHEMA_VERSION || doc.schema_version == 0 {
            return Err(WardenError::PolicyVersion {
                found: doc.schema_version,
                supported: SUPPORTED_SCHEMA_VERSION,
            });
        }

        let mut seen_ids: HashSet<&str> = HashSet::new();
        let mut rules = Vec::with_capacity(doc.forbidden_patterns.len());
        for rule in &doc.forbidden_patterns {
            if rule.id.is_empty() {
                return Err(WardenError::PolicyRule {
                    rule_id: "<empty>".to_string(),
                    details: "rule id must not be empty".to_string(),
                });
            }
            if !seen_ids.insert(rule.id.as_str()) {
                return Err(WardenError::PolicyRule {
                    rule_id: rule.id.clone(),
                    details: "duplicate rule id".to_string(),
                });
            }
            let regex = Regex::new(&rule.pattern).map_err(|e| WardenError::PolicyRule {
                rule_id: rule.id.clone(),
                details: e.to_string(),
            })?;
            rules.push(CompiledRule {
                rule: rule.clone(),
                regex,
            });
        }

        let mut exact_names = HashSet::new();
        let mut dir_markers = HashSet::new();
        for name in &doc.forbidden_filenames {
            if let Some(marker) = name.strip_suffix('/') {
                dir_markers.insert(marker.to_string());
            } else {
                exact_names.insert(name.clone());
            }
        }

        Ok(Self {
            version: doc.schema_version,
            exact_names,
            dir_markers,
            rules,
            config_keys: doc.forbidden_config_keys,
            required_markers: doc.required_markers,
            marker_filenames: doc.marker_filenames.into_iter().collect(),
            text_extensions: doc.text_extensions.into_iter().collect(),
            structured_extensions: doc.structured_extensions.into_iter().collect(),
        })
    }

    /// Built-in policy enforcing static-export compliance of web build output.
    ///
    /// Flags server entrypoints, server-rendering APIs, and server-feature
    /// configuration keys that a purely static artifact tree must not carry.
    #[must_use]
    pub fn static_export() -> Self {
        Self::from_document(static_export_document())
            .expect("built-in static-export policy must compile")
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn rule(&self, id: &str) -> Option<&CompiledRule> {
        self.rules.iter().find(|r| r.id() == id)
    }

    pub fn forbidden_config_keys(&self) -> &[String] {
        &self.config_keys
    }

    pub fn required_markers(&self) -> &[String] {
        &self.required_markers
    }

    /// Check a root-relative path against forbidden filenames and directory
    /// markers. Returns the matched token.
    #[must_use]
    pub fn forbidden_name_match(&self, relative: &Path) -> Option<String> {
        if let Some(name) = relative.file_name().map(|n| n.to_string_lossy())
            && self.exact_names.contains(name.as_ref())
        {
            return Some(name.into_owned());
        }
        for segment in relative.iter() {
            let segment = segment.to_string_lossy();
            if self.dir_markers.contains(segment.as_ref()) {
                return Some(format!("{segment}/"));
            }
        }
        None
    }

    /// Whether pattern rules apply to this file (by extension).
    #[must_use]
    pub fn is_text_source(&self, path: &Path) -> bool {
        extension_of(path).is_some_and(|ext| self.text_extensions.contains(&ext))
    }

    /// Whether config-key rules apply to this file (by extension).
    #[must_use]
    pub fn is_structured_data(&self, path: &Path) -> bool {
        extension_of(path).is_some_and(|ext| self.structured_extensions.contains(&ext))
    }

    /// Whether this file's dialect expects the required markers.
    #[must_use]
    pub fn expects_markers(&self, path: &Path) -> bool {
        !self.required_markers.is_empty()
            && path
                .file_name()
                .map(|n| n.to_string_lossy())
                .is_some_and(|name| self.marker_filenames.contains(name.as_ref()))
    }

    /// Required markers absent from `text`. Empty when compliant.
    #[must_use]
    pub fn missing_markers(&self, text: &str) -> Vec<String> {
        self.required_markers
            .iter()
            .filter(|marker| !text.contains(marker.as_str()))
            .cloned()
            .collect()
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
}

/// Resolve a dotted key path (`experimental.serverActions`) against a JSON
/// value. Present means every segment resolves to an existing object key.
#[must_use]
pub fn json_key_present(value: &serde_json::Value, dotted: &str) -> bool {
    let mut current = value;
    for segment in dotted.split('.') {
        match current.get(segment) {
            Some(next) => current = next,
            None => return false,
        }
    }
    true
}

fn static_export_document() -> PolicyDocument {
    let rule = |id: &str, pattern: &str, severity: Severity| PatternRule {
        id: id.to_string(),
        pattern: pattern.to_string(),
        severity,
    };

    PolicyDocument {
        schema_version: SUPPORTED_SCHEMA_VERSION,
        forbidden_filenames: [
            "server.js",
            "server.ts",
            "middleware.js",
            "middleware.ts",
            "_middleware.js",
            "required-server-files.json",
            "api/",
        ]
        .into_iter()
        .map(str::to_string)
        .collect(),
        forbidden_patterns: vec![
            rule("server-side-props", r"getServerSideProps", Severity::High),
            rule("initial-props", r"getInitialProps", Severity::High),
            rule("static-props", r"getStaticProps", Severity::High),
            rule("static-paths", r"getStaticPaths", Severity::High),
            rule("api-request-type", r"NextApiRequest", Severity::High),
            rule("api-response-type", r"NextApiResponse", Severity::High),
            rule(
                "middleware-export",
                r"export\s+async\s+function\s+middleware",
                Severity::High,
            ),
            rule(
                "node-runtime-decl",
                r#"runtime\s*:\s*['"]nodejs['"]"#,
                Severity::High,
            ),
            rule(
                "runtime-export",
                r"export\s+const\s+runtime\s*=[^;\n]*;?",
                Severity::High,
            ),
            // Single-line on purpose: the greedy dot-star form swallows
            // everything between an unrelated fetch and a later revalidate.
            rule(
                "fetch-revalidate",
                r"fetch\([^\n]*revalidate",
                Severity::High,
            ),
            rule("server-import", r#"['"]next/server['"]"#, Severity::High),
            rule("og-image-service", r"vercel/og", Severity::High),
        ],
        forbidden_config_keys: [
            "api",
            "serverComponents",
            "serverActions",
            "middleware",
            "edge",
            "nodejs",
            "experimental.serverActions",
        ]
        .into_iter()
        .map(str::to_string)
        .collect(),
        required_markers: ["output: 'export'", "unoptimized: true", "distDir"]
            .into_iter()
            .map(str::to_string)
            .collect(),
        marker_filenames: ["next.config.js", "next.config.mjs", "next.config.ts"]
            .into_iter()
            .map(str::to_string)
            .collect(),
        text_extensions: default_text_extensions(),
        structured_extensions: default_structured_extensions(),
    }
}
