use thiserror::Error;

/// Errors raised by the calibration library.
///
/// Ingestion-time problems are fatal and surface here. A fit that fails to
/// converge is *not* an error: it is reported on `FitResult::status`.
#[derive(Debug, Error)]
pub enum CalibError {
    #[error("Channel '{channel}': {reason}")]
    InputShapeMismatch { channel: String, reason: String },

    #[error("Systematic source '{0}' does not apply to any channel.")]
    DegenerateSource(String),

    #[error("Channel index {0} does not fit in a 32-bit channel mask.")]
    TooManyChannels(usize),

    #[error("Invalid binning: {0}")]
    InvalidBinning(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Missing required column: `{0}`")]
    MissingColumn(String),

    #[error("Not enough data: {0}")]
    EmptyInput(String),

    #[error("Fit did not converge: {0}")]
    NotConverged(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CalibError {
    pub fn shape_mismatch(channel: impl Into<String>, reason: impl Into<String>) -> Self {
        CalibError::InputShapeMismatch {
            channel: channel.into(),
            reason: reason.into(),
        }
    }

    /// Process exit code used by the `jesfit` binary.
    pub fn exit_code(&self) -> u8 {
        match self {
            CalibError::InputShapeMismatch { .. }
            | CalibError::DegenerateSource(_)
            | CalibError::TooManyChannels(_)
            | CalibError::InvalidBinning(_)
            | CalibError::InvalidConfig(_)
            | CalibError::MissingColumn(_)
            | CalibError::Io(_)
            | CalibError::Csv(_)
            | CalibError::Json(_) => 2,
            CalibError::EmptyInput(_) => 3,
            CalibError::NotConverged(_) => 4,
        }
    }
}

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl From<CalibError> for AppError {
    fn from(err: CalibError) -> Self {
        AppError::new(err.exit_code(), err.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calib_errors_map_to_exit_codes() {
        let e: AppError = CalibError::DegenerateSource("bm0_jec".into()).into();
        assert_eq!(e.exit_code(), 2);
        assert!(e.to_string().contains("bm0_jec"));

        let e: AppError = CalibError::EmptyInput("no points".into()).into();
        assert_eq!(e.exit_code(), 3);
    }
}
