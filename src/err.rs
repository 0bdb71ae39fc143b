//! Error taxonomy shared by the run-info, reference, dispatch and VCF code.

use std::path::PathBuf;

/// Failure of a single region job during a combine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionFailure {
    /// Name of the region, e.g., `chr1` or `chr1:1-1000`.
    pub region: String,
    /// Rendered error of the job.
    pub message: String,
}

impl std::fmt::Display for RegionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.region, self.message)
    }
}

/// Render the failures for the `RegionMerge` message.
fn join_failures(failures: &[RegionFailure]) -> String {
    failures
        .iter()
        .map(|failure| failure.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Malformed run information, reference or pipeline configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Missing, invalid or inconsistent VCF input.
    #[error("input error in {path:?}: {reason}")]
    Input { path: PathBuf, reason: String },
    /// One or more region jobs of a combine failed.
    #[error(
        "merging into {output:?} failed for {} region(s): {}",
        failures.len(),
        join_failures(failures)
    )]
    RegionMerge {
        output: PathBuf,
        failures: Vec<RegionFailure>,
    },
    /// The execution backend could not run the jobs.
    #[error("dispatch error: {0}")]
    Dispatch(String),
    /// Filesystem problem on the output side.
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Shortcut for constructing an `Error::Input`.
    pub fn input<P: Into<PathBuf>, S: ToString>(path: P, reason: S) -> Self {
        Error::Input {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Shortcut for constructing an `Error::Io`.
    pub fn io<P: Into<PathBuf>>(path: P, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Process exit code for this kind of error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Configuration(_) => 2,
            Error::Input { .. } => 3,
            Error::RegionMerge { .. } => 4,
            Error::Dispatch(_) => 5,
            Error::Io { .. } => 6,
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{Error, RegionFailure};

    #[test]
    fn region_merge_lists_all_regions() {
        let error = Error::RegionMerge {
            output: "out.vcf".into(),
            failures: vec![
                RegionFailure {
                    region: "chr1".into(),
                    message: "boom".into(),
                },
                RegionFailure {
                    region: "chrX:1-100".into(),
                    message: "bang".into(),
                },
            ],
        };
        insta::assert_snapshot!(
            error.to_string(),
            @r###"merging into "out.vcf" failed for 2 region(s): chr1: boom; chrX:1-100: bang"###
        );
    }

    #[test]
    fn input_error_names_path() {
        let error = Error::input("S1-variants.vcf", "sample S3 not found");
        assert_eq!(
            r#"input error in "S1-variants.vcf": sample S3 not found"#,
            error.to_string()
        );
    }

    #[rstest::rstest]
    #[case(Error::Configuration("x".into()), 2)]
    #[case(Error::input("x", "y"), 3)]
    #[case(Error::RegionMerge { output: "x".into(), failures: vec![] }, 4)]
    #[case(Error::Dispatch("x".into()), 5)]
    #[case(Error::io("x", std::io::Error::from(std::io::ErrorKind::NotFound)), 6)]
    fn exit_codes_are_distinct(#[case] error: Error, #[case] expected: u8) {
        assert_eq!(expected, error.exit_code());
    }
}
