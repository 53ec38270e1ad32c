use serde::{Deserialize, Serialize};

/// One flattened leaf value - represents one row in `PLIST_DATA`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatRow {
    /// Ancestor mapping keys joined with the configured separator.
    ///
    /// For a value stored directly under a mapping key this excludes the
    /// row's own key; for a sequence element it ends with the owning key,
    /// so siblings of the same sequence share one path.
    pub key_path: String,

    /// The innermost mapping key, or the root placeholder for a bare
    /// top-level value.
    pub key: String,

    /// The leaf rendered as text. Empty for empty containers.
    pub value: String,
}

impl FlatRow {
    pub fn new(
        key_path: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        FlatRow {
            key_path: key_path.into(),
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Identity of a processing step, recorded with every error row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Step {
    /// D1: XML plist reader
    XmlPlist,
    /// D2: strict binary plist reader
    BinaryPlist,
    /// D3: lenient binary plist reader
    LenientBplist,
    /// NSKeyedArchiver re-decode and graph resolution
    Archiver,
    /// Terminal file-level load failure
    Load,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Step::XmlPlist => "xml_plist",
            Step::BinaryPlist => "binary_plist",
            Step::LenientBplist => "lenient_bplist",
            Step::Archiver => "archiver_deserialize",
            Step::Load => "load",
        }
    }
}

/// Configuration for the flattening process
#[derive(Debug, Clone)]
pub struct ExtractConfig {
    /// Separator between key-path segments
    pub separator: String,

    /// Label used as the key for a bare top-level value
    pub root_label: String,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        ExtractConfig {
            separator: String::from("\\"),
            root_label: String::from("(root)"),
        }
    }
}

/// Counters reported after a completed run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    /// Files attempted (one `PROCESSED_FILES` row each)
    pub files: u64,

    /// `PLIST_DATA` rows written
    pub data_rows: u64,

    /// `ERRORS` rows written
    pub error_rows: u64,

    /// Whether any archiver re-decode failed or came back incomplete
    pub archiver_anomaly: bool,
}
