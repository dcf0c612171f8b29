//! Result of one apply run as reported to the caller.

use std::fmt;

use serde::Serialize;

use crate::error::ThemeError;

/// Every apply run ends in exactly one of these. Failures carry a human-readable
/// detail; a partial failure means the theme itself was applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum ApplyOutcome {
    Succeeded {
        detail: String,
    },
    ValidationFailed {
        detail: String,
    },
    #[serde(rename_all = "camelCase")]
    ActivationFailed {
        code: Option<u32>,
        step: String,
        detail: String,
    },
    PartialFailure {
        detail: String,
        caveats: Vec<String>,
    },
}

impl ApplyOutcome {
    pub fn succeeded(detail: impl Into<String>) -> Self {
        Self::Succeeded {
            detail: detail.into(),
        }
    }

    /// Map an activation-stage error to `ActivationFailed`
    pub fn activation_failed(error: &ThemeError) -> Self {
        let step = match error {
            ThemeError::NativeActivation { step, .. } => step.to_string(),
            ThemeError::Timeout { .. } => "timed out".to_string(),
            ThemeError::Io { .. } => "Staging theme copy".to_string(),
            ThemeError::ConfigWrite { .. } => "Writing settings".to_string(),
            _ => "Activation".to_string(),
        };
        Self::ActivationFailed {
            code: error.code(),
            step,
            detail: error.to_string(),
        }
    }

    /// Downgrade a success to a partial failure. Later caveats are appended.
    pub fn with_caveats(self, extra: Vec<String>) -> Self {
        if extra.is_empty() {
            return self;
        }
        match self {
            Self::Succeeded { detail } => Self::PartialFailure {
                detail,
                caveats: extra,
            },
            Self::PartialFailure { detail, mut caveats } => {
                caveats.extend(extra);
                Self::PartialFailure { detail, caveats }
            }
            failed => failed,
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            Self::Succeeded { detail }
            | Self::ValidationFailed { detail }
            | Self::ActivationFailed { detail, .. }
            | Self::PartialFailure { detail, .. } => detail,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    /// Validation or activation failure: nothing, or nothing visible, was applied
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::ValidationFailed { .. } | Self::ActivationFailed { .. }
        )
    }

    /// Process exit code for the command-line caller
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Succeeded { .. } => 0,
            Self::PartialFailure { .. } => 2,
            Self::ValidationFailed { .. } | Self::ActivationFailed { .. } => 1,
        }
    }
}

impl fmt::Display for ApplyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded { detail } => write!(f, "{}", detail),
            Self::ValidationFailed { detail } => write!(f, "Validation failed: {}", detail),
            Self::ActivationFailed { step, detail, .. } => {
                write!(f, "Activation failed ({}): {}", step, detail)
            }
            Self::PartialFailure { detail, caveats } => {
                write!(f, "{} (with caveats: {})", detail, caveats.join("; "))
            }
        }
    }
}
