//! Implementation of `vcf exclude` subcommand: drop samples from a VCF file.

use std::{
    io::{BufRead, Write},
    path::{Path, PathBuf},
};

use indexmap::IndexSet;
use thousands::Separable;

use crate::{
    common::{
        self, io::open_read_maybe_gz, io::wrap_write_maybe_gz, same_file, with_stem_infix,
    },
    err::Error,
    reference::Reference,
    variants::{header::Header, record::VariantRecord},
};

/// Command line arguments for `vcf exclude` subcommand.
#[derive(Debug, clap::Parser)]
#[command(author, version, about = "remove samples from a VCF file", long_about = None)]
pub struct Args {
    /// Path to the input VCF file.
    #[clap(long)]
    pub path_in: String,
    /// Path to the output VCF file, defaults to `<stem>-exclude.vcf` next to the input.
    #[clap(long)]
    pub path_out: Option<String>,
    /// Name of sample to remove; may be given multiple times.
    #[clap(long = "sample", required = true)]
    pub samples: Vec<String>,
    /// Path to the reference FASTA file (`.fai` or `.dict` must exist).
    #[clap(long)]
    pub path_reference: String,
}

/// Default output path for excluding from `input_file`, e.g., `x-exclude.vcf.gz`.
pub fn exclude_output_path(input_file: &Path) -> PathBuf {
    with_stem_infix(input_file, "-exclude")
}

/// Write `input_file` without the samples in `samples_to_exclude` to `output_file`.
///
/// Every data line must be on a contig of `reference`.  The result is written to a
/// temporary file next to `output_file` and only moved into place on success.
pub fn exclude<S, P>(
    input_file: &Path,
    output_file: &Path,
    samples_to_exclude: &[S],
    reference: P,
) -> Result<PathBuf, Error>
where
    S: AsRef<str>,
    P: AsRef<Path>,
{
    let before_anything = std::time::Instant::now();
    if same_file(input_file, output_file) {
        return Err(Error::input(
            input_file,
            "output file must differ from input file",
        ));
    }
    let reference = Reference::from_path(reference)?;

    let mut reader = open_read_maybe_gz(input_file)
        .map_err(|e| Error::input(input_file, format!("could not open: {}", e)))?;
    let (header, _) = Header::read(&mut reader, input_file)?;

    let excluded = samples_to_exclude
        .iter()
        .map(|s| s.as_ref())
        .collect::<IndexSet<_>>();
    for name in &excluded {
        if !header.sample_names().iter().any(|s| s.as_str() == *name) {
            return Err(Error::input(
                input_file,
                format!("sample {} not found", name),
            ));
        }
    }
    let keep = header
        .sample_names()
        .iter()
        .enumerate()
        .filter(|(_, name)| !excluded.contains(name.as_str()))
        .map(|(idx, _)| idx)
        .collect::<Vec<_>>();
    if keep.is_empty() {
        return Err(Error::input(
            input_file,
            "cannot exclude all samples of the file",
        ));
    }
    let out_header = header.with_sample_names(
        keep.iter()
            .map(|&idx| header.sample_names()[idx].clone())
            .collect(),
    );
    tracing::info!(
        "keeping {} of {} sample(s) of {:?}",
        keep.len(),
        header.sample_names().len(),
        input_file
    );

    let dir = match output_file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| Error::io(&dir, e))?;
    let file = tmp
        .as_file()
        .try_clone()
        .map_err(|e| Error::io(tmp.path(), e))?;

    let n_samples = header.sample_names().len();
    let mut n_records = 0usize;
    {
        let mut writer = wrap_write_maybe_gz(output_file, file);
        out_header
            .write(&mut writer)
            .map_err(|e| Error::io(tmp.path(), e))?;
        for line in reader.lines() {
            let line = line.map_err(|e| Error::input(input_file, e))?;
            if line.trim().is_empty() {
                continue;
            }
            let mut record = VariantRecord::parse(&line, n_samples)
                .map_err(|e| Error::input(input_file, e))?;
            if reference.contig_rank(&record.chrom).is_none() {
                return Err(Error::input(
                    input_file,
                    format!(
                        "contig {} is not in reference {:?}",
                        &record.chrom,
                        reference.path()
                    ),
                ));
            }
            record.retain_samples(&keep);
            writeln!(writer, "{}", record).map_err(|e| Error::io(tmp.path(), e))?;
            n_records += 1;
        }
        writer.finish().map_err(|e| Error::io(tmp.path(), e))?;
    }

    tmp.persist(output_file)
        .map_err(|e| Error::io(output_file, e.error))?;
    tracing::info!(
        "wrote {} record(s) to {:?} in {:?}",
        n_records.separate_with_commas(),
        output_file,
        before_anything.elapsed()
    );
    Ok(output_file.to_path_buf())
}

/// Main entry point for `vcf exclude` sub command.
pub fn run(args_common: &common::Args, args: &Args) -> Result<(), anyhow::Error> {
    tracing::info!("args_common = {:#?}", &args_common);
    tracing::info!("args = {:#?}", &args);

    let path_in = Path::new(&args.path_in);
    let path_out = args
        .path_out
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| exclude_output_path(path_in));
    exclude(path_in, &path_out, &args.samples, &args.path_reference)?;

    Ok(())
}
