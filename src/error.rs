//! Error types for the reduction pipeline
//!
//! Every variant is scoped to one unit of work (a run, a calibration file, a condition fit). The
//! pipeline logs the failure and leaves the unit out of downstream aggregates.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A run or calibration file was not found on disk
    #[error("file not found: {}", .0.display())]
    MissingFile(PathBuf),

    /// An input file exists but its contents cannot be read
    #[error("cannot read {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Too few points, or no spread in the abscissa, to fit a line
    #[error("insufficient data for fit: {0}")]
    InsufficientData(String),

    /// The fitted quantity has no variance, so goodness of fit is undefined
    #[error("goodness of fit is undefined: {0}")]
    UndefinedFit(String),

    /// Polynomial degree is too high for the number of distinct abscissae
    #[error("ill-conditioned polynomial fit: degree {degree} needs more than {distinct} distinct points")]
    IllConditionedFit { degree: usize, distinct: usize },

    /// The trim window removes every sample of a run
    #[error("trim window ({start_cut} + {end_cut}) leaves no samples out of {len}")]
    InsufficientSamples {
        len: usize,
        start_cut: usize,
        end_cut: usize,
    },

    /// A run calibration record cannot map raw values to physical units
    #[error("malformed calibration record: {0}")]
    MalformedCalibration(String),

    /// Condition codes are restricted to 1..=13
    #[error("condition code {0} is outside 1..=13")]
    InvalidCondition(i64),

    /// A run number was reduced twice
    #[error("run {0} is already reduced")]
    DuplicateRun(u32),

    /// The runs of one bucket span more than one condition
    #[error("bucket mixes conditions {first} and {other}")]
    MixedConditions { first: u8, other: u8 },

    /// The campaign configuration is inconsistent
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A table or header field could not be parsed
    #[error("parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("config error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

impl Error {
    /// Errors which abort the current unit of work only
    ///
    /// IO errors of the output side, shape errors and a broken configuration are not
    /// recoverable. Everything that describes one bad input file or run is, including an input
    /// file that cannot be read.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::Io(_) | Self::Shape(_) | Self::Toml(_) | Self::InvalidConfig(_) | Self::DuplicateRun(_)
        )
    }
}

/// Read a per-unit input file whole
///
/// # Errors
/// [`Error::MissingFile`] when `path` does not exist, [`Error::Unreadable`] when it exists but
/// cannot be read (permissions, a directory in its place).
pub fn read_input(path: &Path) -> crate::Result<Vec<u8>> {
    if !path.exists() {
        return Err(Error::MissingFile(path.to_path_buf()));
    }
    fs::read(path).map_err(|source| Error::Unreadable {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempdir::TempDir;

    #[test]
    fn unreadable_input_is_recoverable() {
        let tmp_dir = TempDir::new("unreadable_input_is_recoverable").unwrap();
        // A directory where a file is expected
        let path = tmp_dir.path().join("R12.csv");
        fs::create_dir(&path).unwrap();

        let err = read_input(&path).unwrap_err();
        assert!(matches!(err, Error::Unreadable { .. }));
        assert!(err.is_recoverable());

        let missing = read_input(&tmp_dir.path().join("R13.csv")).unwrap_err();
        assert!(matches!(missing, Error::MissingFile(_)));
        assert!(missing.is_recoverable());
    }

    #[test]
    fn output_and_configuration_failures_abort() {
        let io = Error::Io(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "results"));
        assert!(!io.is_recoverable());
        assert!(!Error::InvalidConfig("overlap".to_owned()).is_recoverable());
        assert!(!Error::DuplicateRun(4).is_recoverable());
        assert!(Error::MixedConditions { first: 1, other: 2 }.is_recoverable());
    }
}
