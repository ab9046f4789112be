//! Datastore configuration.

use crate::error::{DbError, DbResult};
use quill_codec::StringCmp;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// A serialization hook, applied to every journal line on its way to or
/// from disk (encryption, compression, framing).
pub type SerializationHook = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Sentinel strings used to verify that the configured hooks invert each
/// other before any data is written.
const HOOK_SENTINELS: [&str; 2] = [
    "quill hook sentinel",
    "multi\nline \u{00e9}\u{4e16} {\"x\":1}\ttab",
];

/// Configuration for opening a datastore.
#[derive(Clone, Default)]
pub struct DatastoreOptions {
    /// Path to the journal file. `None` together with `in_memory_only`
    /// gives a purely in-memory datastore.
    pub filename: Option<PathBuf>,

    /// Skip all persistence; documents live only in memory.
    pub in_memory_only: bool,

    /// Run `load()` during construction.
    pub autoload: bool,

    /// Stamp `createdAt`/`updatedAt` on insert and update.
    pub timestamp_data: bool,

    /// Tolerated ratio of unreadable journal records during load, in [0, 1].
    pub corrupt_alert_threshold: f64,

    /// Hook applied to each serialized line before it is written.
    pub after_serialization: Option<SerializationHook>,

    /// Hook applied to each raw line before it is deserialized.
    pub before_deserialization: Option<SerializationHook>,

    /// Custom string comparator for index ordering and sorting.
    pub compare_strings: Option<StringCmp>,
}

impl DatastoreOptions {
    /// Creates options for a file-backed datastore at the given path.
    #[must_use]
    pub fn with_filename(path: impl Into<PathBuf>) -> Self {
        Self {
            filename: Some(path.into()),
            corrupt_alert_threshold: 0.1,
            ..Self::default()
        }
    }

    /// Creates options for a purely in-memory datastore.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            in_memory_only: true,
            corrupt_alert_threshold: 0.1,
            ..Self::default()
        }
    }

    /// Sets whether to load the datafile during construction.
    #[must_use]
    pub fn autoload(mut self, value: bool) -> Self {
        self.autoload = value;
        self
    }

    /// Sets whether to stamp `createdAt`/`updatedAt` on documents.
    #[must_use]
    pub fn timestamp_data(mut self, value: bool) -> Self {
        self.timestamp_data = value;
        self
    }

    /// Sets the corruption tolerance ratio.
    #[must_use]
    pub fn corrupt_alert_threshold(mut self, value: f64) -> Self {
        self.corrupt_alert_threshold = value;
        self
    }

    /// Sets the paired serialization hooks.
    #[must_use]
    pub fn serialization_hooks(
        mut self,
        after_serialization: SerializationHook,
        before_deserialization: SerializationHook,
    ) -> Self {
        self.after_serialization = Some(after_serialization);
        self.before_deserialization = Some(before_deserialization);
        self
    }

    /// Sets the custom string comparator.
    #[must_use]
    pub fn compare_strings(mut self, cmp: StringCmp) -> Self {
        self.compare_strings = Some(cmp);
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// - `InvalidConfig` if no filename is configured for a persistent
    ///   datastore, the filename ends in `~` (reserved for the crash-safe
    ///   temporary file), or the corruption threshold is outside [0, 1]
    /// - `HooksMissing` if only one serialization hook is configured
    /// - `HooksNotInverse` if the hooks fail the round-trip check
    pub fn validate(&self) -> DbResult<()> {
        if !self.in_memory_only {
            let Some(filename) = &self.filename else {
                return Err(DbError::invalid_config(
                    "a persistent datastore needs a filename",
                ));
            };
            if filename.to_string_lossy().ends_with('~') {
                return Err(DbError::invalid_config(
                    "the datafile name can't end with a ~, which is reserved for crash-safe backup files",
                ));
            }
        }

        if !(0.0..=1.0).contains(&self.corrupt_alert_threshold) {
            return Err(DbError::invalid_config(
                "corrupt_alert_threshold must be between 0 and 1",
            ));
        }

        match (&self.after_serialization, &self.before_deserialization) {
            (None, None) => Ok(()),
            (Some(_), None) | (None, Some(_)) => Err(DbError::HooksMissing),
            (Some(after), Some(before)) => {
                for sentinel in HOOK_SENTINELS {
                    if before(&after(sentinel)) != sentinel {
                        return Err(DbError::HooksNotInverse);
                    }
                }
                Ok(())
            }
        }
    }
}

impl fmt::Debug for DatastoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatastoreOptions")
            .field("filename", &self.filename)
            .field("in_memory_only", &self.in_memory_only)
            .field("autoload", &self.autoload)
            .field("timestamp_data", &self.timestamp_data)
            .field("corrupt_alert_threshold", &self.corrupt_alert_threshold)
            .field("after_serialization", &self.after_serialization.is_some())
            .field(
                "before_deserialization",
                &self.before_deserialization.is_some(),
            )
            .field("compare_strings", &self.compare_strings.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_options_validate() {
        DatastoreOptions::with_filename("data.db").validate().unwrap();
    }

    #[test]
    fn trailing_tilde_rejected() {
        let opts = DatastoreOptions::with_filename("data.db~");
        assert!(matches!(
            opts.validate(),
            Err(DbError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn persistent_without_filename_rejected() {
        let opts = DatastoreOptions {
            corrupt_alert_threshold: 0.1,
            ..DatastoreOptions::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn threshold_out_of_range_rejected() {
        let opts = DatastoreOptions::in_memory().corrupt_alert_threshold(1.5);
        assert!(matches!(
            opts.validate(),
            Err(DbError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn lone_hook_rejected() {
        let mut opts = DatastoreOptions::in_memory();
        opts.after_serialization = Some(Arc::new(|s| s.to_string()));
        assert!(matches!(opts.validate(), Err(DbError::HooksMissing)));
    }

    #[test]
    fn non_inverse_hooks_rejected() {
        let opts = DatastoreOptions::in_memory().serialization_hooks(
            Arc::new(|s| format!("x{s}")),
            Arc::new(|s| s.to_string()),
        );
        assert!(matches!(opts.validate(), Err(DbError::HooksNotInverse)));
    }

    #[test]
    fn inverse_hooks_accepted() {
        let opts = DatastoreOptions::in_memory().serialization_hooks(
            Arc::new(|s| format!("@{s}")),
            Arc::new(|s| s.strip_prefix('@').unwrap_or(s).to_string()),
        );
        opts.validate().unwrap();
    }
}
