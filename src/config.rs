// ============================================================================
// Workflow Configuration
// ============================================================================
//
// Plain settings value handed to the engines that need it. The binary loads
// it from the environment (after `.env`); tests build it directly.
//
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkflowConfig {
    /// Allow unmerging orders. Off unless explicitly enabled.
    pub unmerge_enabled: bool,
    /// Prefix for accession numbers issued to replacement orders.
    pub accession_prefix: String,
    /// First sequence number issued after the prefix.
    pub accession_start: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            unmerge_enabled: false,
            accession_prefix: "RIS".to_string(),
            accession_start: 1,
        }
    }
}

impl WorkflowConfig {
    /// Default settings with unmerge switched on.
    pub fn with_unmerge() -> Self {
        Self {
            unmerge_enabled: true,
            ..Self::default()
        }
    }

    /// Reads `RIS_UNMERGE_ENABLED`, `RIS_ACCESSION_PREFIX` and `RIS_ACCESSION_START`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let unmerge_enabled = match lookup("RIS_UNMERGE_ENABLED").as_deref() {
            Some("true") | Some("1") => true,
            Some("false") | Some("0") | None => false,
            Some(other) => {
                tracing::warn!(value = other, "invalid RIS_UNMERGE_ENABLED, unmerge stays disabled");
                false
            }
        };

        let accession_prefix = lookup("RIS_ACCESSION_PREFIX")
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(defaults.accession_prefix);

        let accession_start = match lookup("RIS_ACCESSION_START") {
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                tracing::warn!(value = %raw, error = %e, "invalid RIS_ACCESSION_START, using default");
                defaults.accession_start
            }),
            None => defaults.accession_start,
        };

        Self { unmerge_enabled, accession_prefix, accession_start }
    }
}
