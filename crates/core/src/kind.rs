//! Job kinds and their remote parameter templates.
//!
//! Every [`JobKind`] maps to one [`KindConfig`] supplied at startup: the
//! credential and application id used against the remote service, plus a
//! template describing which remote node fields receive which uploaded
//! input. Binding a template is the same operation for every kind: copy
//! the template, fill the slot-bound entries with the remote filenames of
//! the uploads, then append the static entries of the selected style.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// JobKind
// ---------------------------------------------------------------------------

/// The closed set of processing kinds the engine knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    /// Character image + pose reference image, many outputs.
    PoseTransfer,
    /// Single image upscale / detail enhancement.
    Enhance,
    /// Older enhancement workflow with prompt text nodes.
    EnhanceClassic,
    /// Blend-and-relight of a single image.
    Relight,
    /// Watermark removal.
    Watermark,
}

impl JobKind {
    pub const ALL: [JobKind; 5] = [
        JobKind::PoseTransfer,
        JobKind::Enhance,
        JobKind::EnhanceClassic,
        JobKind::Relight,
        JobKind::Watermark,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::PoseTransfer => "pose-transfer",
            JobKind::Enhance => "enhance",
            JobKind::EnhanceClassic => "enhance-classic",
            JobKind::Relight => "relight",
            JobKind::Watermark => "watermark",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| CoreError::UnknownKind(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

/// Whether a kind yields a single result or a list of them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputCardinality {
    #[default]
    One,
    Many,
}

/// One entry of a kind's parameter template.
///
/// Entries with a `slot` receive the remote filename of that input once it
/// has been uploaded; entries without one are passed through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateEntry {
    pub node_id: String,
    pub field_name: String,
    #[serde(default)]
    pub field_value: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub slot: Option<String>,
}

/// A fully bound remote parameter, ready for submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeBinding {
    pub node_id: String,
    pub field_name: String,
    pub field_value: String,
}

impl From<&TemplateEntry> for NodeBinding {
    fn from(entry: &TemplateEntry) -> Self {
        Self {
            node_id: entry.node_id.clone(),
            field_name: entry.field_name.clone(),
            field_value: entry.field_value.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// KindConfig
// ---------------------------------------------------------------------------

/// Static remote endpoint configuration for one job kind.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindConfig {
    pub credential: String,
    pub app_id: String,
    pub template: Vec<TemplateEntry>,
    #[serde(default)]
    pub output: OutputCardinality,
    /// Optional remote instance class, e.g. `"plus"`.
    #[serde(default)]
    pub instance_type: Option<String>,
    /// Named presets of static entries appended after binding.
    #[serde(default)]
    pub styles: BTreeMap<String, Vec<TemplateEntry>>,
    /// Style name that means "append nothing".
    #[serde(default)]
    pub default_style: Option<String>,
}

// The credential never shows up in logs.
impl fmt::Debug for KindConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KindConfig")
            .field("credential", &credential_hint(&self.credential))
            .field("app_id", &self.app_id)
            .field("template", &self.template)
            .field("output", &self.output)
            .field("instance_type", &self.instance_type)
            .field("styles", &self.styles.keys().collect::<Vec<_>>())
            .field("default_style", &self.default_style)
            .finish()
    }
}

/// Show only the last 4 characters of a credential.
pub fn credential_hint(credential: &str) -> String {
    let chars: Vec<char> = credential.chars().collect();
    if chars.len() >= 8 {
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("...{tail}")
    } else {
        "****".to_string()
    }
}

impl KindConfig {
    /// Distinct input slots in template order. This is also the upload order.
    pub fn required_slots(&self) -> Vec<&str> {
        let mut slots: Vec<&str> = Vec::new();
        for slot in self.template.iter().filter_map(|e| e.slot.as_deref()) {
            if !slots.contains(&slot) {
                slots.push(slot);
            }
        }
        slots
    }

    /// Check the configuration is usable before accepting jobs for it.
    pub fn validate(&self, kind: JobKind) -> Result<(), CoreError> {
        if self.credential.trim().is_empty() {
            return Err(CoreError::Validation(format!(
                "Kind '{kind}' has an empty credential"
            )));
        }
        if self.app_id.trim().is_empty() {
            return Err(CoreError::Validation(format!(
                "Kind '{kind}' has an empty application id"
            )));
        }
        if self.required_slots().is_empty() {
            return Err(CoreError::Validation(format!(
                "Kind '{kind}' template binds no input slot"
            )));
        }
        for (name, entries) in &self.styles {
            if entries.iter().any(|e| e.slot.is_some()) {
                return Err(CoreError::Validation(format!(
                    "Style '{name}' of kind '{kind}' must not bind input slots"
                )));
            }
        }
        if let Some(default) = &self.default_style {
            if !self.styles.is_empty() && !self.styles.contains_key(default) {
                return Err(CoreError::Validation(format!(
                    "Default style '{default}' of kind '{kind}' is not declared"
                )));
            }
        }
        Ok(())
    }

    /// Resolve a style name to the entries it appends.
    ///
    /// `None` and the default style append nothing. Unknown names are an error.
    pub fn style_entries(
        &self,
        kind: JobKind,
        style: Option<&str>,
    ) -> Result<&[TemplateEntry], CoreError> {
        let Some(name) = style else {
            return Ok(&[]);
        };
        if self.default_style.as_deref() == Some(name) {
            return Ok(&[]);
        }
        self.styles
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| CoreError::Validation(format!("Kind '{kind}' has no style '{name}'")))
    }

    /// Produce the concrete submission parameters for one job.
    ///
    /// `uploaded` pairs each slot with the remote filename returned by the
    /// upload. The template itself is never modified.
    pub fn bind(
        &self,
        kind: JobKind,
        uploaded: &[(String, String)],
        style: Option<&str>,
    ) -> Result<Vec<NodeBinding>, CoreError> {
        let mut bound = Vec::with_capacity(self.template.len());
        for entry in &self.template {
            let mut binding = NodeBinding::from(entry);
            if let Some(slot) = entry.slot.as_deref() {
                let (_, remote_name) = uploaded
                    .iter()
                    .find(|(s, _)| s == slot)
                    .ok_or_else(|| CoreError::MissingInput {
                        kind,
                        slot: slot.to_string(),
                    })?;
                binding.field_value = remote_name.clone();
            }
            bound.push(binding);
        }
        bound.extend(self.style_entries(kind, style)?.iter().map(NodeBinding::from));
        Ok(bound)
    }
}

// ---------------------------------------------------------------------------
// KindRegistry
// ---------------------------------------------------------------------------

/// The startup kind table.
#[derive(Debug, Clone, Default)]
pub struct KindRegistry {
    kinds: HashMap<JobKind, KindConfig>,
}

impl KindRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON object of `"<kind>": KindConfig` and validate every entry.
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        let parsed: BTreeMap<JobKind, KindConfig> = serde_json::from_str(json)
            .map_err(|e| CoreError::Validation(format!("Invalid kind table: {e}")))?;
        let mut registry = Self::new();
        for (kind, config) in parsed {
            registry.insert(kind, config)?;
        }
        Ok(registry)
    }

    pub fn insert(&mut self, kind: JobKind, config: KindConfig) -> Result<(), CoreError> {
        config.validate(kind)?;
        self.kinds.insert(kind, config);
        Ok(())
    }

    pub fn get(&self, kind: JobKind) -> Result<&KindConfig, CoreError> {
        self.kinds
            .get(&kind)
            .ok_or_else(|| CoreError::UnknownKind(kind.to_string()))
    }

    pub fn kinds(&self) -> impl Iterator<Item = JobKind> + '_ {
        self.kinds.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Reject a submission whose slots or style do not match the kind.
    pub fn validate_submission<'a>(
        &self,
        kind: JobKind,
        slots: impl IntoIterator<Item = &'a str>,
        style: Option<&str>,
    ) -> Result<(), CoreError> {
        let config = self.get(kind)?;
        let required = config.required_slots();
        let provided: Vec<&str> = slots.into_iter().collect();

        if let Some(extra) = provided.iter().find(|s| !required.contains(*s)) {
            return Err(CoreError::UnexpectedInput {
                kind,
                slot: extra.to_string(),
            });
        }
        if let Some(missing) = required.iter().find(|s| !provided.contains(*s)) {
            return Err(CoreError::MissingInput {
                kind,
                slot: missing.to_string(),
            });
        }
        config.style_entries(kind, style)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
