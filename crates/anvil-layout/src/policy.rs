//! Policy-as-data configuration for the layout engine.
//!
//! Captures the tunable admission limits and editing behavior as a single
//! [`LayoutPolicy`] that can be loaded from TOML or JSON at startup.
//!
//! # Loading
//!
//! ```toml
//! # anvil-layout.toml
//! max_rows_per_section = 6
//! max_widgets_per_row = 8
//! prune_empty_rows = false
//! measurement_timeout_ms = 250
//! ```
//!
//! ```rust,ignore
//! let policy = LayoutPolicy::from_toml_file("anvil-layout.toml")?.validated()?;
//! let policy = LayoutPolicy::from_json_str(json)?;
//! ```
//!
//! # Defaults
//!
//! Sections hold at most four Rows; everything else is unbounded.

#[cfg(feature = "policy-config")]
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::tree::{NodeKindTag, SizePreference};
use crate::validate::WidgetDescriptor;

/// Tunable limits and editing behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutPolicy {
    /// Maximum Sections on the canvas.
    pub max_sections: Option<usize>,
    /// Maximum Rows per Section, unless a Section overrides it.
    pub max_rows_per_section: Option<usize>,
    /// Maximum children per Row, unless a Row overrides it.
    pub max_widgets_per_row: Option<usize>,
    /// Empty Rows seeded into a freshly created Section.
    pub rows_per_new_section: usize,
    /// Remove a Row left empty by a drag, unless it is its Section's last Row.
    pub prune_empty_rows: bool,
    /// How long a requested DOM measurement may stay outstanding.
    pub measurement_timeout_ms: u64,
    /// Minimum extent given to widgets dropped from the palette.
    pub default_slot_min_size: u32,
}

impl Default for LayoutPolicy {
    fn default() -> Self {
        Self {
            max_sections: None,
            max_rows_per_section: Some(4),
            max_widgets_per_row: None,
            rows_per_new_section: 1,
            prune_empty_rows: true,
            measurement_timeout_ms: 500,
            default_slot_min_size: 40,
        }
    }
}

impl LayoutPolicy {
    /// Load from a TOML string.
    #[cfg(feature = "policy-config")]
    pub fn from_toml_str(s: &str) -> Result<Self, PolicyConfigError> {
        toml::from_str(s).map_err(PolicyConfigError::Toml)
    }

    /// Load from a TOML file on disk.
    #[cfg(feature = "policy-config")]
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, PolicyConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(PolicyConfigError::Io)?;
        Self::from_toml_str(&content)
    }

    /// Load from a JSON string.
    #[cfg(feature = "policy-config")]
    pub fn from_json_str(s: &str) -> Result<Self, PolicyConfigError> {
        serde_json::from_str(s).map_err(PolicyConfigError::Json)
    }

    /// Load from a JSON file on disk.
    #[cfg(feature = "policy-config")]
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, PolicyConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(PolicyConfigError::Io)?;
        Self::from_json_str(&content)
    }

    /// Validate all parameters are within acceptable ranges.
    ///
    /// Returns a list of validation errors. An empty list means the policy
    /// is valid.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_sections == Some(0) {
            errors.push("max_sections must be > 0 (at least one section always exists)".into());
        }
        if self.max_rows_per_section == Some(0) {
            errors.push("max_rows_per_section must be > 0".into());
        }
        if self.max_widgets_per_row == Some(0) {
            errors.push("max_widgets_per_row must be > 0".into());
        }
        if let Some(max_rows) = self.max_rows_per_section
            && self.rows_per_new_section > max_rows
        {
            errors.push(format!(
                "rows_per_new_section ({}) exceeds max_rows_per_section ({max_rows})",
                self.rows_per_new_section
            ));
        }
        if self.measurement_timeout_ms == 0 {
            errors.push("measurement_timeout_ms must be > 0".into());
        }

        errors
    }

    /// Return `self` if it validates cleanly.
    pub fn validated(self) -> Result<Self, PolicyConfigError> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(PolicyConfigError::Validation(errors))
        }
    }

    /// Default child limit for a container of `kind`.
    #[must_use]
    pub const fn default_max_children(&self, kind: NodeKindTag, is_root: bool) -> Option<usize> {
        match kind {
            NodeKindTag::Section if is_root => self.max_sections,
            NodeKindTag::Section => self.max_rows_per_section,
            NodeKindTag::Row => self.max_widgets_per_row,
            NodeKindTag::WidgetSlot => Some(0),
        }
    }

    /// Size a new slot gets from `widget`.
    ///
    /// Descriptors without an explicit size grow from `default_slot_min_size`.
    #[must_use]
    pub const fn slot_size(&self, widget: &WidgetDescriptor) -> SizePreference {
        match widget.size {
            Some(size) => size,
            None => SizePreference::grow(self.default_slot_min_size),
        }
    }
}

/// Errors that can occur when loading a layout policy.
#[derive(Debug)]
pub enum PolicyConfigError {
    /// I/O error reading a file.
    Io(std::io::Error),
    /// TOML parse error.
    #[cfg(feature = "policy-config")]
    Toml(toml::de::Error),
    /// JSON parse error.
    #[cfg(feature = "policy-config")]
    Json(serde_json::Error),
    /// Validation errors.
    Validation(Vec<String>),
}

impl std::fmt::Display for PolicyConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            #[cfg(feature = "policy-config")]
            Self::Toml(e) => write!(f, "TOML parse error: {e}"),
            #[cfg(feature = "policy-config")]
            Self::Json(e) => write!(f, "JSON parse error: {e}"),
            Self::Validation(errors) => {
                write!(f, "validation errors: {}", errors.join("; "))
            }
        }
    }
}

impl std::error::Error for PolicyConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            #[cfg(feature = "policy-config")]
            Self::Toml(e) => Some(e),
            #[cfg(feature = "policy-config")]
            Self::Json(e) => Some(e),
            Self::Validation(_) => None,
        }
    }
}
