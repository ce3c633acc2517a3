//! Caller-defined configuration options.
//!
//! Applications extend the fixed configuration schema by registering named
//! options, each with a default value and a policy for empty values. The
//! registry keeps insertion order, which is also the order options are shown
//! in the configuration portal and written to storage.
//!
//! # Example
//!
//! ```
//! use esp_config_wizard::config::OptionRegistry;
//!
//! let mut options = OptionRegistry::new();
//! options.register("retries", "3", false);
//!
//! assert!(options.set_value("retries", "").is_err());
//! assert_eq!(options.find("retries").unwrap().value(), "3");
//!
//! options.set_value("retries", "5").unwrap();
//! assert_eq!(options.find("retries").unwrap().value(), "5");
//! ```

use std::fmt;

/// A single named option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserOption {
    name: String,
    /// `None` until a value has been set.
    value: Option<String>,
    default_value: String,
    allows_empty: bool,
}

impl UserOption {
    fn new(name: impl Into<String>, default_value: impl Into<String>, allows_empty: bool) -> Self {
        Self {
            name: name.into(),
            value: None,
            default_value: default_value.into(),
            allows_empty,
        }
    }

    /// Option name (unique within its registry).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Effective value.
    ///
    /// Falls back to the default when no value was set, or when the stored
    /// value is empty and the option does not allow empty values.
    pub fn value(&self) -> &str {
        match &self.value {
            Some(value) if !value.is_empty() || self.allows_empty => value,
            _ => &self.default_value,
        }
    }

    /// Stored value without default fallback.
    pub fn raw_value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// Default value.
    pub fn default_value(&self) -> &str {
        &self.default_value
    }

    /// Whether an empty value is accepted as a legal value.
    pub fn allows_empty(&self) -> bool {
        self.allows_empty
    }
}

/// Errors from option mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionError {
    /// No option with this name is registered.
    Unknown(String),
    /// Empty value for an option that does not allow it.
    EmptyValue(String),
    /// Value refused by an application-supplied validator.
    Rejected { name: String, reason: String },
}

impl fmt::Display for OptionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(name) => write!(f, "unknown option: {}", name),
            Self::EmptyValue(name) => write!(f, "option '{}' cannot be empty", name),
            Self::Rejected { name, reason } => {
                write!(f, "value for option '{}' rejected: {}", name, reason)
            }
        }
    }
}

impl std::error::Error for OptionError {}

/// Insertion-ordered collection of uniquely named options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionRegistry {
    entries: Vec<UserOption>,
}

impl OptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an option, or update the definition of an existing one.
    ///
    /// Re-registering keeps the current value and replaces the default and
    /// the empty-value policy.
    pub fn register(
        &mut self,
        name: &str,
        default_value: &str,
        allows_empty: bool,
    ) -> &mut UserOption {
        let index = match self.position(name) {
            Some(index) => {
                let option = &mut self.entries[index];
                option.default_value = default_value.to_string();
                option.allows_empty = allows_empty;
                index
            }
            None => {
                self.entries
                    .push(UserOption::new(name, default_value, allows_empty));
                self.entries.len() - 1
            }
        };
        &mut self.entries[index]
    }

    /// Look up an option by name.
    pub fn find(&self, name: &str) -> Option<&UserOption> {
        self.entries.iter().find(|option| option.name == name)
    }

    /// Set the value of a registered option.
    ///
    /// Nothing is modified when the option is unknown or when `value` is
    /// empty and the option does not allow empty values.
    pub fn set_value(&mut self, name: &str, value: &str) -> Result<(), OptionError> {
        let index = self
            .position(name)
            .ok_or_else(|| OptionError::Unknown(name.to_string()))?;
        let option = &mut self.entries[index];
        if value.is_empty() && !option.allows_empty {
            return Err(OptionError::EmptyValue(name.to_string()));
        }
        option.value = Some(value.to_string());
        Ok(())
    }

    /// Number of registered options.
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no options are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate options in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, UserOption> {
        self.entries.iter()
    }

    /// Start a new traversal, independent of any other cursor.
    pub fn cursor(&self) -> OptionCursor {
        OptionCursor::new()
    }

    /// Remove every option.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|option| option.name == name)
    }
}

impl<'a> IntoIterator for &'a OptionRegistry {
    type Item = &'a UserOption;
    type IntoIter = std::slice::Iter<'a, UserOption>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Resumable position in an [`OptionRegistry`].
///
/// The cursor only stores an index, so several traversals can be in flight
/// at once (for example one per portal client) without disturbing each other.
/// Advancing past the last option yields `None` and does not wrap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptionCursor {
    position: usize,
}

impl OptionCursor {
    /// Create a cursor positioned before the first option.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewind to the first option.
    pub fn reset(&mut self) {
        self.position = 0;
    }

    /// Return the next option and advance.
    pub fn next<'a>(&mut self, registry: &'a OptionRegistry) -> Option<&'a UserOption> {
        let option = registry.entries.get(self.position)?;
        self.position += 1;
        Some(option)
    }

    /// Number of options already returned.
    pub fn position(&self) -> usize {
        self.position
    }
}

/// Hook consulted before the portal applies an option value.
///
/// Returning `Err(reason)` refuses the value; the reason is reported to the
/// portal client. Closures of the form `FnMut(&str, &str) -> Result<(), String>`
/// implement this trait.
pub trait OptionValidator {
    /// Check `value` for the option called `name`.
    fn validate(&mut self, name: &str, value: &str) -> Result<(), String>;
}

impl<F> OptionValidator for F
where
    F: FnMut(&str, &str) -> Result<(), String>,
{
    fn validate(&mut self, name: &str, value: &str) -> Result<(), String> {
        self(name, value)
    }
}
