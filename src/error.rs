use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Patterns (lowercase) that indicate sensitive data not safe for UI display.
/// Used by `contains_sensitive()` for case-insensitive matching.
pub(crate) const SENSITIVE_PATTERNS: &[&str] = &[
    "bearer ",
    "x-goog-api-key",
    "api_key",
    "apikey",
    "key=",
    "authorization:",
];

/// Returns true if the message contains any sensitive pattern (case-insensitive).
pub(crate) fn contains_sensitive(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Sanitizes a message for UI display.
/// If sensitive content is detected, returns the fallback instead.
pub(crate) fn sanitize_message(msg: &str, fallback: &str) -> String {
    if contains_sensitive(msg) {
        fallback.into()
    } else {
        msg.to_string()
    }
}

/// User-friendly error presentation for a driver (dashboard, CLI, ...).
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPresentation {
    pub title: String,
    pub message: String,
    pub action: Option<String>,
}

/// Crate-wide error type.
///
/// Splitter and tracker failures are structural: callers should not retry
/// them automatically. Expected model failures never surface here; they are
/// reported through `ProcessResult` instead.
#[derive(Debug, Error)]
pub enum EngineError {
    // ── Chunking ──────────────────────────────────────────────────────────────
    #[error("Invalid chunk size {size}: must be greater than zero")]
    InvalidChunkSize { size: usize },

    #[error("Nothing to save: input is empty")]
    EmptyInput,

    // ── Checkpoint ────────────────────────────────────────────────────────────
    #[error("Checkpoint not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Checkpoint is not valid JSON: {0}")]
    NotJson(String),

    #[error("Unsupported checkpoint version {found} (expected {expected:.1})")]
    UnsupportedVersion { found: String, expected: f64 },

    #[error("Checkpoint is inconsistent: {0}")]
    CorruptCheckpoint(String),

    #[error("No chunk has been fetched since the last mark")]
    NoCurrentChunk,

    #[error("Chunk {0} is not part of this checkpoint")]
    UnknownChunk(Uuid),

    #[error("I/O failure: {0}")]
    IoFailure(String),

    // ── Orchestration ─────────────────────────────────────────────────────────
    #[error("Prompt must not be empty")]
    EmptyPrompt,

    #[error("No model invoker configured")]
    NoInvoker,

    #[error("No chunk tracker configured")]
    NoTracker,

    #[error("No token ledger configured")]
    NoLedger,

    // ── Collaborators ─────────────────────────────────────────────────────────
    #[error("Model backend error: {0}")]
    Backend(String),

    #[error("Result sink error: {0}")]
    Sink(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // ── Generic fallback ──────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Converts the error into a user-friendly presentation suitable for display.
    /// Never leaks API keys or authorization headers.
    pub fn to_presentation(&self) -> ErrorPresentation {
        match self {
            // ── Chunking ──────────────────────────────────────────────────────
            EngineError::InvalidChunkSize { size } => ErrorPresentation {
                title: "Invalid Chunk Size".into(),
                message: format!("A chunk size of {} is not allowed.", size),
                action: Some("Choose a chunk size of at least 1 row".into()),
            },

            EngineError::EmptyInput => ErrorPresentation {
                title: "Nothing To Save".into(),
                message: "The dataset produced no rows to work with.".into(),
                action: Some("Load a dataset with at least one row".into()),
            },

            // ── Checkpoint ────────────────────────────────────────────────────
            EngineError::NotFound(path) => ErrorPresentation {
                title: "Checkpoint Missing".into(),
                message: format!("No checkpoint file was found at {}.", path.display()),
                action: Some("Split the dataset again to create a new checkpoint".into()),
            },

            EngineError::NotJson(_) => ErrorPresentation {
                title: "Unreadable Checkpoint".into(),
                message: "The checkpoint file is not valid JSON.".into(),
                action: Some("Split the dataset again to create a new checkpoint".into()),
            },

            EngineError::UnsupportedVersion { found, expected } => ErrorPresentation {
                title: "Incompatible Checkpoint".into(),
                message: format!(
                    "This checkpoint has version {} but version {:.1} is required.",
                    found, expected
                ),
                action: Some("Split the dataset again to create a new checkpoint".into()),
            },

            EngineError::CorruptCheckpoint(msg) => ErrorPresentation {
                title: "Inconsistent Checkpoint".into(),
                message: format!("The checkpoint file is inconsistent: {}", msg),
                action: Some("Split the dataset again to create a new checkpoint".into()),
            },

            EngineError::NoCurrentChunk => ErrorPresentation {
                title: "No Active Chunk".into(),
                message: "There is no fetched chunk to mark as processed.".into(),
                action: None,
            },

            EngineError::UnknownChunk(_) => ErrorPresentation {
                title: "Unknown Chunk".into(),
                message: "The chunk does not belong to the loaded checkpoint.".into(),
                action: None,
            },

            EngineError::IoFailure(msg) => ErrorPresentation {
                title: "File Error".into(),
                message: sanitize_message(msg, "A file could not be read or written."),
                action: Some("Check disk space and permissions, then retry".into()),
            },

            // ── Orchestration ─────────────────────────────────────────────────
            EngineError::EmptyPrompt => ErrorPresentation {
                title: "Missing Prompt".into(),
                message: "A prompt is required before chunks can be processed.".into(),
                action: Some("Enter a prompt".into()),
            },

            EngineError::NoInvoker => ErrorPresentation {
                title: "No Model Selected".into(),
                message: "No model backend is configured.".into(),
                action: Some("Select a model and provide an API key".into()),
            },

            EngineError::NoTracker => ErrorPresentation {
                title: "No Checkpoint Loaded".into(),
                message: "No chunk checkpoint is loaded.".into(),
                action: Some("Split a dataset or resume an existing checkpoint".into()),
            },

            EngineError::NoLedger => ErrorPresentation {
                title: "No Token Budget".into(),
                message: "No token budget is configured for this run.".into(),
                action: Some("Set a token budget".into()),
            },

            // ── Collaborators ─────────────────────────────────────────────────
            EngineError::Backend(msg) => ErrorPresentation {
                title: "Model Backend Error".into(),
                message: sanitize_message(msg, "The model backend could not be set up."),
                action: Some("Check the model settings and API key".into()),
            },

            EngineError::Sink(msg) => ErrorPresentation {
                title: "Could Not Save Results".into(),
                message: sanitize_message(msg, "Results could not be stored."),
                action: Some("Check the results location and retry".into()),
            },

            EngineError::Config(msg) => ErrorPresentation {
                title: "Invalid Configuration".into(),
                message: sanitize_message(msg, "The configuration is invalid."),
                action: Some("Fix the configuration file".into()),
            },

            // ── Generic ───────────────────────────────────────────────────────
            EngineError::Internal(_) => ErrorPresentation {
                title: "Unexpected Error".into(),
                message: "Something went wrong. Please try again.".into(),
                action: Some("Try again".into()),
            },
        }
    }
}

impl Serialize for EngineError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_presentation().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Returns all EngineError variants for exhaustive testing.
    fn all_variants() -> Vec<EngineError> {
        vec![
            // Chunking
            EngineError::InvalidChunkSize { size: 0 },
            EngineError::EmptyInput,
            // Checkpoint
            EngineError::NotFound(PathBuf::from("/tmp/chunks.json")),
            EngineError::NotJson("expected value at line 1".into()),
            EngineError::UnsupportedVersion { found: "2.0".into(), expected: 1.0 },
            EngineError::CorruptCheckpoint("total_chunks mismatch".into()),
            EngineError::NoCurrentChunk,
            EngineError::UnknownChunk(Uuid::new_v4()),
            EngineError::IoFailure("disk full".into()),
            // Orchestration
            EngineError::EmptyPrompt,
            EngineError::NoInvoker,
            EngineError::NoTracker,
            EngineError::NoLedger,
            // Collaborators
            EngineError::Backend("bad base url".into()),
            EngineError::Sink("database locked".into()),
            EngineError::Config("chunk_size must be > 0".into()),
            // Generic
            EngineError::Internal("something broke".into()),
        ]
    }

    #[test]
    fn all_variants_have_nonempty_title_and_message() {
        for variant in all_variants() {
            let presentation = variant.to_presentation();
            assert!(
                !presentation.title.trim().is_empty(),
                "Empty title for {:?}",
                variant
            );
            assert!(
                !presentation.message.trim().is_empty(),
                "Empty message for {:?}",
                variant
            );
        }
    }

    #[test]
    fn checkpoint_errors_suggest_resplitting() {
        let errors = vec![
            EngineError::NotFound(PathBuf::from("missing.json")),
            EngineError::NotJson("eof".into()),
            EngineError::UnsupportedVersion { found: "0.9".into(), expected: 1.0 },
        ];

        for variant in errors {
            let action = variant
                .to_presentation()
                .action
                .expect("checkpoint error should have action");
            assert!(
                action.to_lowercase().contains("split"),
                "{:?} action should mention splitting, got: {}",
                variant,
                action
            );
        }
    }

    #[test]
    fn unsupported_version_mentions_both_versions() {
        let err = EngineError::UnsupportedVersion { found: "2.0".into(), expected: 1.0 };
        assert_eq!(
            err.to_string(),
            "Unsupported checkpoint version 2.0 (expected 1.0)"
        );
        let presentation = err.to_presentation();
        assert!(presentation.message.contains("2.0"));
        assert!(presentation.message.contains("1.0"));
    }

    #[test]
    fn serialization_produces_valid_json_with_required_fields() {
        for variant in all_variants() {
            let json = serde_json::to_string(&variant)
                .unwrap_or_else(|_| panic!("Failed to serialize {:?}", variant));

            let parsed: serde_json::Value = serde_json::from_str(&json)
                .unwrap_or_else(|_| panic!("Failed to parse JSON for {:?}", variant));

            assert!(parsed.get("title").is_some(), "{:?} missing 'title'", variant);
            assert!(parsed.get("message").is_some(), "{:?} missing 'message'", variant);
            // action can be null, but field should exist
            assert!(parsed.get("action").is_some(), "{:?} missing 'action'", variant);
        }
    }

    #[test]
    fn no_secret_leakage_in_presentation() {
        let test_cases: Vec<(&str, EngineError)> = vec![
            ("Backend", EngineError::Backend("x-goog-api-key: AIzaSecret".into())),
            ("Sink", EngineError::Sink("Authorization: Bearer abc".into())),
            ("IoFailure", EngineError::IoFailure("GET ?key=AIzaSecret failed".into())),
            ("Config", EngineError::Config("api_key=AIzaSecret is invalid".into())),
            ("Internal", EngineError::Internal("bearer token leaked".into())),
        ];

        for (label, variant) in test_cases {
            let presentation = variant.to_presentation();
            let output_lower = format!(
                "{} {} {}",
                presentation.title,
                presentation.message,
                presentation.action.as_deref().unwrap_or("")
            )
            .to_ascii_lowercase();

            for pattern in SENSITIVE_PATTERNS {
                assert!(
                    !output_lower.contains(pattern),
                    "{} presentation contains sensitive pattern",
                    label
                );
            }
            assert!(!output_lower.contains("aizasecret"), "{} leaked the key", label);
        }
    }
}
