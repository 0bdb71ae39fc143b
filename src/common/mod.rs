//! Common functionality.

use std::path::{Path, PathBuf};

use byte_unit::{Byte, UnitType};
use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};

pub mod io;

/// Commonly used command line arguments.
#[derive(Parser, Debug)]
pub struct Args {
    /// Verbosity of the program
    #[clap(flatten)]
    pub verbose: Verbosity<InfoLevel>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            verbose: Verbosity::new(0, 0),
        }
    }
}

/// Helper to print the current memory resident set size via `tracing`.
pub fn trace_rss_now() {
    let rss = procfs::process::Process::myself()
        .and_then(|me| me.stat())
        .map(|stat| stat.rss * procfs::page_size());
    match rss {
        Ok(rss) => tracing::debug!(
            "RSS now: {:.2}",
            Byte::from_u64(rss).get_appropriate_unit(UnitType::Binary)
        ),
        Err(e) => tracing::debug!("RSS not available: {}", e),
    }
}

/// Return the version of the `variant-pipeline-worker` crate and `x.y.z` in tests.
pub fn worker_version() -> &'static str {
    if cfg!(test) {
        "x.y.z"
    } else {
        env!("CARGO_PKG_VERSION")
    }
}

/// Known file name suffixes of VCF files, longest first.
const VCF_SUFFIXES: &[&str] = &[".vcf.gz", ".vcf.bgz", ".vcf"];

/// Split the file name of `path` into a stem and its VCF suffix.
///
/// Files without a known VCF suffix are split at their last extension.
pub fn split_vcf_name(path: &Path) -> (String, String) {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    for suffix in VCF_SUFFIXES {
        if let Some(stem) = name.strip_suffix(suffix) {
            if !stem.is_empty() {
                return (stem.to_string(), suffix.to_string());
            }
        }
    }
    match name.rfind('.') {
        Some(idx) if idx > 0 => (name[..idx].to_string(), name[idx..].to_string()),
        _ => (name, String::new()),
    }
}

/// Return `path` with the file name replaced by `<stem><infix><suffix>`.
pub fn with_stem_infix(path: &Path, infix: &str) -> PathBuf {
    let (stem, suffix) = split_vcf_name(path);
    path.with_file_name(format!("{}{}{}", stem, infix, suffix))
}

/// Return whether `path` names a gzip-compressed file.
pub fn is_gz<P: AsRef<Path>>(path: P) -> bool {
    matches!(
        path.as_ref().extension().and_then(|s| s.to_str()),
        Some("gz") | Some("bgz")
    )
}

/// Whether `a` and `b` name the same file, also when spelled differently.
pub fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(test)]
mod test {
    use std::path::{Path, PathBuf};

    use pretty_assertions::assert_eq;

    #[test]
    fn trace_rss_now_smoke() {
        super::trace_rss_now();
    }

    #[rstest::rstest]
    #[case("out/S1_S2-combined.vcf", "S1_S2-combined", ".vcf")]
    #[case("out/S1_S2-combined.vcf.gz", "S1_S2-combined", ".vcf.gz")]
    #[case("calls.bcf", "calls", ".bcf")]
    #[case("calls", "calls", "")]
    #[case(".vcf", ".vcf", "")]
    fn split_vcf_name(#[case] path: &str, #[case] stem: &str, #[case] suffix: &str) {
        assert_eq!(
            (stem.to_string(), suffix.to_string()),
            super::split_vcf_name(Path::new(path))
        );
    }

    #[rstest::rstest]
    #[case("data/S1_S2-combined.vcf", "data/S1_S2-combined-exclude.vcf")]
    #[case("S1_S2-combined.vcf.gz", "S1_S2-combined-exclude.vcf.gz")]
    fn with_stem_infix(#[case] path: &str, #[case] expected: &str) {
        assert_eq!(
            PathBuf::from(expected),
            super::with_stem_infix(Path::new(path), "-exclude")
        );
    }

    #[rstest::rstest]
    #[case("x.vcf.gz", true)]
    #[case("x.vcf.bgz", true)]
    #[case("x.vcf", false)]
    #[case("x", false)]
    fn is_gz(#[case] path: &str, #[case] expected: bool) {
        assert_eq!(expected, super::is_gz(path));
    }

    #[test]
    fn same_file_resolves_spelling() -> Result<(), anyhow::Error> {
        let tmpdir = temp_testdir::TempDir::default();
        let path = tmpdir.join("a.vcf");
        std::fs::write(&path, "x\n")?;
        let other = tmpdir.join(".").join("a.vcf");

        assert!(super::same_file(&path, &other));
        assert!(!super::same_file(&path, &tmpdir.join("b.vcf")));

        Ok(())
    }
}
