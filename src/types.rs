use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Which kind of synchronization pass a run performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncMode {
    /// Newest pages only, stopping once the stored frontier is re-met.
    Incremental,
    /// Incremental with a wider page budget.
    Thorough,
    /// Every page of the history.
    Full,
    /// Targeted backfill of suspicious silent ranges.
    GapFix,
}

impl SyncMode {
    /// Convert to the string stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incremental => "incremental",
            Self::Thorough => "thorough",
            Self::Full => "full",
            Self::GapFix => "gap_fix",
        }
    }

    /// Parse from the string stored in the database.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "incremental" => Some(Self::Incremental),
            "thorough" => Some(Self::Thorough),
            "full" => Some(Self::Full),
            "gap_fix" => Some(Self::GapFix),
            _ => None,
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_mode_roundtrips_through_db_string() {
        for mode in [
            SyncMode::Incremental,
            SyncMode::Thorough,
            SyncMode::Full,
            SyncMode::GapFix,
        ] {
            assert_eq!(SyncMode::from_str(mode.as_str()), Some(mode));
        }
        assert_eq!(SyncMode::from_str("weekly"), None);
    }

    #[test]
    fn log_level_maps_to_filter() {
        assert_eq!(LogLevel::Warn.as_filter(), "warn");
        assert_eq!(LogLevel::Debug.as_filter(), "debug");
    }
}
