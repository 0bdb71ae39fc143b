//! Implementation of `vcf combine` subcommand: region-sharded merge of VCF files.
//!
//! The inputs are indexed first (one job per input), then merged region by region
//! (one job per region, each writing its own file into a working directory), and the
//! region files are finally concatenated in region order.

use std::{
    fs::File,
    io::{BufRead, BufReader, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use indexmap::IndexMap;
use itertools::Itertools;
use thousands::Separable;

use crate::{
    common::{
        self, io::open_read_maybe_gz, io::wrap_write_maybe_gz, same_file, split_vcf_name,
    },
    conf::PipelineConfig,
    err::{Error, RegionFailure},
    parallel::{parallel_runner, Dispatch, Job},
    reference::{region_of, Partitioner, Reference, Region},
    variants::{header::Header, record::VariantRecord},
};

/// Command line arguments for `vcf combine` subcommand.
#[derive(Debug, clap::Parser)]
#[command(author, version, about = "combine VCF files region by region", long_about = None)]
pub struct Args {
    /// Path to input VCF file(s); `@path` reads a list of paths from a file.
    #[clap(long, required = true)]
    pub path_in: Vec<String>,
    /// Path to the output VCF file.
    #[clap(long)]
    pub path_out: String,
    /// Path to the reference FASTA file (`.fai` or `.dict` must exist).
    #[clap(long)]
    pub path_reference: String,
    /// Optional path to the pipeline configuration TOML file.
    #[clap(long)]
    pub path_config: Option<String>,
    /// Number of cores, overrides the configuration.
    #[clap(long)]
    pub cores: Option<usize>,
    /// Maximal region size, overrides the configuration.
    #[clap(long)]
    pub max_region_size: Option<u64>,
}

/// Location of the data lines of one input file, by region.
#[derive(Debug, Clone)]
pub struct InputIndex {
    /// Path to the input file.
    pub path: PathBuf,
    /// The input's header.
    pub header: Header,
    /// Byte range `[start, end)` of each region's data lines in the decompressed
    /// stream, keyed by region name.
    pub regions: IndexMap<String, (u64, u64)>,
    /// Number of data lines.
    pub n_records: usize,
}

/// Job for indexing one input file.
struct IndexJob {
    path: PathBuf,
    reference: Arc<Reference>,
    regions: Arc<Vec<Region>>,
}

impl Job for IndexJob {
    type Output = InputIndex;

    fn name(&self) -> String {
        format!("index {}", self.path.display())
    }

    fn run(&self) -> Result<InputIndex, anyhow::Error> {
        index_input(&self.path, &self.reference, &self.regions)
    }
}

/// Read the file at `path`, check that it is sorted in reference order and record
/// where the data lines of each of `regions` are.
pub fn index_input(
    path: &Path,
    reference: &Reference,
    regions: &[Region],
) -> Result<InputIndex, anyhow::Error> {
    let mut reader = open_read_maybe_gz(path)
        .map_err(|e| anyhow::anyhow!("could not open {:?}: {}", path, e))?;
    let (header, mut offset) = Header::read(&mut reader, path)?;
    let n_samples = header.sample_names().len();

    let mut ranges: IndexMap<String, (u64, u64)> = IndexMap::new();
    let mut current: Option<&Region> = None;
    let mut prev: Option<(usize, u64)> = None;
    let mut n_records = 0;
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader
            .read_line(&mut line)
            .map_err(|e| anyhow::anyhow!("problem reading {:?}: {}", path, e))?;
        if n == 0 {
            break;
        }
        let line_start = offset;
        offset += n as u64;
        if line.trim().is_empty() {
            continue;
        }
        if line.starts_with('#') {
            anyhow::bail!("header line after data lines in {:?}", path);
        }

        let record = VariantRecord::parse(&line, n_samples)
            .map_err(|e| anyhow::anyhow!("invalid data line in {:?}: {}", path, e))?;
        let rank = reference.contig_rank(&record.chrom).ok_or_else(|| {
            anyhow::anyhow!(
                "contig {} of {:?} is not in reference {:?}",
                &record.chrom,
                path,
                reference.path()
            )
        })?;
        match prev {
            Some((prev_rank, prev_pos)) if (rank, record.pos) < (prev_rank, prev_pos) => {
                anyhow::bail!(
                    "{:?} is not sorted in reference order at {}:{}",
                    path,
                    &record.chrom,
                    record.pos
                );
            }
            _ => (),
        }
        prev = Some((rank, record.pos));

        let region = match current {
            Some(region) if region.contains(&record.chrom, record.pos) => region,
            _ => region_of(regions, &record.chrom, record.pos).ok_or_else(|| {
                anyhow::anyhow!(
                    "no region for {}:{} of {:?}",
                    &record.chrom,
                    record.pos,
                    path
                )
            })?,
        };
        current = Some(region);
        ranges
            .entry(region.name())
            .and_modify(|range| range.1 = offset)
            .or_insert((line_start, offset));
        n_records += 1;
    }

    tracing::debug!(
        "indexed {} record(s) in {} region(s) of {:?}",
        n_records.separate_with_commas(),
        ranges.len(),
        path
    );
    Ok(InputIndex {
        path: path.to_path_buf(),
        header,
        regions: ranges,
        n_records,
    })
}

/// Read the data lines of `index` that fall into `region`, in file order.
fn read_region_records(
    index: &InputIndex,
    region: &Region,
) -> Result<Vec<VariantRecord>, anyhow::Error> {
    let Some(&(start, end)) = index.regions.get(&region.name()) else {
        return Ok(Vec::new());
    };

    let reader: Box<dyn BufRead> = if common::is_gz(&index.path) {
        let mut reader = open_read_maybe_gz(&index.path)?;
        std::io::copy(&mut reader.by_ref().take(start), &mut std::io::sink())?;
        Box::new(reader.take(end - start))
    } else {
        let mut file = File::open(&index.path)?;
        file.seek(SeekFrom::Start(start))?;
        Box::new(BufReader::new(file.take(end - start)))
    };

    let n_samples = index.header.sample_names().len();
    let mut result = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = VariantRecord::parse(&line, n_samples)
            .map_err(|e| anyhow::anyhow!("invalid data line in {:?}: {}", &index.path, e))?;
        if !region.contains(&record.chrom, record.pos) {
            anyhow::bail!(
                "{:?} changed since indexing, found {}:{} in range of {}",
                &index.path,
                &record.chrom,
                record.pos,
                region
            );
        }
        result.push(record);
    }
    Ok(result)
}

/// Shared, read-only state of the region jobs of one combine.
struct CombineContext {
    /// Indices of the inputs, in declaration order.
    inputs: Vec<InputIndex>,
    /// For each input, the target column of each of its samples.
    columns: Vec<Vec<usize>>,
    /// The unified output header.
    header: Header,
}

/// Result of one region job.
#[derive(Debug, Clone)]
pub struct RegionOutput {
    /// Path to the region's VCF file.
    pub path: PathBuf,
    /// Number of records written.
    pub n_records: usize,
}

/// Job for merging all inputs' records of one region.
struct RegionJob {
    region: Region,
    context: Arc<CombineContext>,
    path_out: PathBuf,
}

impl Job for RegionJob {
    type Output = RegionOutput;

    fn name(&self) -> String {
        format!("merge {}", self.region)
    }

    fn run(&self) -> Result<RegionOutput, anyhow::Error> {
        merge_region(&self.region, &self.context, &self.path_out)
    }
}

/// Merge the records of all inputs in `region` and write them to `path_out`.
///
/// Records are ordered by position; records at the same position are ordered by input
/// declaration order, then by ALT, then by their order within the input.
fn merge_region(
    region: &Region,
    context: &CombineContext,
    path_out: &Path,
) -> Result<RegionOutput, anyhow::Error> {
    let per_input = context
        .inputs
        .iter()
        .enumerate()
        .map(|(idx, index)| {
            let mut records = read_region_records(index, region)?;
            records.sort_by(|a, b| (a.pos, &a.alternative).cmp(&(b.pos, &b.alternative)));
            Ok::<_, anyhow::Error>(records.into_iter().map(move |record| (idx, record)))
        })
        .collect::<Result<Vec<_>, anyhow::Error>>()?;

    let n_target = context.header.sample_names().len();
    let mut writer = File::create(path_out)
        .map(std::io::BufWriter::new)
        .map_err(|e| anyhow::anyhow!("could not create {:?}: {}", path_out, e))?;
    context.header.write(&mut writer)?;

    let mut n_records = 0;
    let merged = per_input.into_iter().kmerge_by(
        |(a_idx, a): &(usize, VariantRecord), (b_idx, b): &(usize, VariantRecord)| {
            (a.pos, a_idx, &a.alternative) < (b.pos, b_idx, &b.alternative)
        },
    );
    for (idx, record) in merged {
        let record = record.reconcile(&context.columns[idx], n_target);
        writeln!(writer, "{}", record)?;
        n_records += 1;
    }
    writer
        .flush()
        .map_err(|e| anyhow::anyhow!("problem flushing {:?}: {}", path_out, e))?;

    tracing::debug!(
        "wrote {} record(s) of region {} to {:?}",
        n_records.separate_with_commas(),
        region,
        path_out
    );
    Ok(RegionOutput {
        path: path_out.to_path_buf(),
        n_records,
    })
}

/// Working directory of a combine into `output_file`, e.g., `out/x-regions` for `out/x.vcf`.
pub fn region_dir(output_file: &Path) -> PathBuf {
    let (stem, _) = split_vcf_name(output_file);
    output_file.with_file_name(format!("{}-regions", stem))
}

/// Directory that `path` lives in, `.` for bare file names.
fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Index all inputs, reporting every failing input at once.
fn index_inputs<D: Dispatch>(
    input_files: &[PathBuf],
    reference: &Arc<Reference>,
    regions: &Arc<Vec<Region>>,
    dispatch: &D,
) -> Result<Vec<InputIndex>, Error> {
    for path in input_files {
        if !path.is_file() {
            return Err(Error::input(path, "file does not exist or is not readable"));
        }
    }

    let jobs = input_files
        .iter()
        .map(|path| IndexJob {
            path: path.clone(),
            reference: reference.clone(),
            regions: regions.clone(),
        })
        .collect::<Vec<_>>();
    let results = dispatch.submit(jobs)?;

    let mut indices = Vec::new();
    let mut failures = Vec::new();
    for (path, result) in input_files.iter().zip(results) {
        match result {
            Ok(index) => indices.push(index),
            Err(e) => failures.push((path, e)),
        }
    }
    match failures.first() {
        None => Ok(indices),
        Some((first, _)) => Err(Error::input(
            *first,
            failures
                .iter()
                .map(|(path, e)| format!("{}: {:#}", path.display(), e))
                .join("; "),
        )),
    }
}

/// Concatenate the region files in order into `output_file`, behind the unified header.
fn concatenate(
    header: &Header,
    outputs: &[RegionOutput],
    output_file: &Path,
) -> Result<usize, Error> {
    let dir = parent_dir(output_file);
    let tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| Error::io(&dir, e))?;
    let file = tmp.as_file().try_clone().map_err(|e| Error::io(tmp.path(), e))?;

    let mut n_records = 0;
    {
        let mut writer = wrap_write_maybe_gz(output_file, file);
        header
            .write(&mut writer)
            .map_err(|e| Error::io(tmp.path(), e))?;
        for output in outputs {
            let reader = File::open(&output.path)
                .map(BufReader::new)
                .map_err(|e| Error::io(&output.path, e))?;
            for line in reader.lines() {
                let line = line.map_err(|e| Error::io(&output.path, e))?;
                if line.starts_with('#') {
                    continue;
                }
                writeln!(writer, "{}", line).map_err(|e| Error::io(tmp.path(), e))?;
                n_records += 1;
            }
        }
        writer.finish().map_err(|e| Error::io(tmp.path(), e))?;
    }

    tmp.persist(output_file)
        .map_err(|e| Error::io(output_file, e.error))?;
    Ok(n_records)
}

/// Combine `input_files` into `output_file`, merging region by region.
///
/// The regions are computed from `reference` by `partitioner` and merged through
/// `dispatch`.  The working directory next to the output is removed before starting
/// and after success; after a failed region it is left for inspection and no output is
/// written.
pub fn combine<P, D>(
    input_files: &[P],
    output_file: &Path,
    reference: &Path,
    partitioner: &Partitioner,
    dispatch: &D,
) -> Result<PathBuf, Error>
where
    P: AsRef<Path>,
    D: Dispatch,
{
    let before_anything = std::time::Instant::now();
    if input_files.is_empty() {
        return Err(Error::input(output_file, "no input files to combine"));
    }
    let input_files = input_files
        .iter()
        .map(|p| p.as_ref().to_path_buf())
        .collect::<Vec<_>>();
    if let Some(input) = input_files.iter().find(|p| same_file(p, output_file)) {
        return Err(Error::input(
            input,
            "output file must not be one of the input files",
        ));
    }

    let (reference, regions) = partitioner.regions(reference)?;
    let reference = Arc::new(reference);
    let regions = Arc::new(regions);

    tracing::info!("indexing {} input file(s)...", input_files.len());
    let inputs = index_inputs(&input_files, &reference, &regions, dispatch)?;
    let header = Header::merge(inputs.iter().map(|i| (i.path.as_path(), &i.header)))?;
    let target = header
        .sample_names()
        .iter()
        .enumerate()
        .map(|(idx, name)| (name.as_str(), idx))
        .collect::<IndexMap<_, _>>();
    let columns = inputs
        .iter()
        .map(|i| {
            i.header
                .sample_names()
                .iter()
                .map(|name| target[name.as_str()])
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();
    tracing::info!(
        "... indexed {} record(s) of {} sample(s)",
        inputs
            .iter()
            .map(|i| i.n_records)
            .sum::<usize>()
            .separate_with_commas(),
        header.sample_names().len()
    );

    let work_dir = region_dir(output_file);
    if work_dir.exists() {
        tracing::info!("removing previous working directory {:?}", &work_dir);
        std::fs::remove_dir_all(&work_dir).map_err(|e| Error::io(&work_dir, e))?;
    }
    if output_file.exists() {
        tracing::info!("removing previous output {:?}", output_file);
        std::fs::remove_file(output_file).map_err(|e| Error::io(output_file, e))?;
    }
    std::fs::create_dir_all(&work_dir).map_err(|e| Error::io(&work_dir, e))?;

    let (stem, _) = split_vcf_name(output_file);
    let context = Arc::new(CombineContext {
        inputs,
        columns,
        header,
    });
    let jobs = regions
        .iter()
        .map(|region| RegionJob {
            region: region.clone(),
            context: context.clone(),
            path_out: work_dir.join(format!("{}-{}.vcf", &stem, region.slug())),
        })
        .collect::<Vec<_>>();

    tracing::info!("merging {} region(s)...", jobs.len());
    let before_merge = std::time::Instant::now();
    let results = dispatch.submit(jobs)?;

    let mut outputs = Vec::with_capacity(results.len());
    let mut failures = Vec::new();
    for (region, result) in regions.iter().zip(results) {
        match result {
            Ok(output) => outputs.push(output),
            Err(e) => failures.push(RegionFailure {
                region: region.name(),
                message: format!("{:#}", e),
            }),
        }
    }
    if !failures.is_empty() {
        tracing::error!(
            "{} region(s) failed, keeping {:?} for inspection",
            failures.len(),
            &work_dir
        );
        return Err(Error::RegionMerge {
            output: output_file.to_path_buf(),
            failures,
        });
    }
    tracing::info!("... merged regions in {:?}", before_merge.elapsed());

    let n_records = concatenate(&context.header, &outputs, output_file)?;
    std::fs::remove_dir_all(&work_dir).map_err(|e| Error::io(&work_dir, e))?;

    tracing::info!(
        "combined {} record(s) into {:?} in {:?}",
        n_records.separate_with_commas(),
        output_file,
        before_anything.elapsed()
    );
    Ok(output_file.to_path_buf())
}

/// Expand `@path` arguments into the paths listed in the file.
fn expand_paths(paths: &[String]) -> Result<Vec<String>, anyhow::Error> {
    let mut result = Vec::new();
    for path in paths {
        if let Some(list) = path.strip_prefix('@') {
            let contents = std::fs::read_to_string(list)
                .map_err(|e| anyhow::anyhow!("could not read path list {}: {}", list, e))?;
            result.extend(
                contents
                    .lines()
                    .map(|line| line.trim())
                    .filter(|line| !line.is_empty())
                    .map(|line| line.to_string()),
            );
        } else {
            result.push(path.clone());
        }
    }
    Ok(result)
}

/// Main entry point for `vcf combine` sub command.
pub fn run(args_common: &common::Args, args: &Args) -> Result<(), anyhow::Error> {
    tracing::info!("args_common = {:#?}", &args_common);
    tracing::info!("args = {:#?}", &args);

    common::trace_rss_now();

    let mut config = match &args.path_config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(cores) = args.cores {
        config.distributed.cores = cores;
    }
    if let Some(max_region_size) = args.max_region_size {
        config.algorithm.max_region_size = Some(max_region_size);
    }
    tracing::info!("config = {:#?}", &config);

    let runner = parallel_runner(&config.distributed)?;
    let path_in = expand_paths(&args.path_in)?;
    combine(
        &path_in,
        Path::new(&args.path_out),
        Path::new(&args.path_reference),
        &config.partitioner(),
        &runner,
    )?;

    Ok(())
}

#[cfg(test)]
mod test {
    use std::path::{Path, PathBuf};

    use pretty_assertions::assert_eq;

    use super::{combine, region_dir};
    use crate::{
        err::Error,
        parallel::{LocalRunner, SerialRunner},
        reference::Partitioner,
    };

    const REFERENCE: &str = "tests/reference/hg19.fa";

    /// Copy the named fixture files from `tests/variants` into `dir`.
    fn stage(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
        names
            .iter()
            .map(|name| {
                let path = dir.join(name);
                std::fs::copy(Path::new("tests/variants").join(name), &path)
                    .expect("could not copy fixture");
                path
            })
            .collect()
    }

    fn data_lines(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .expect("could not read output")
            .lines()
            .filter(|line| !line.starts_with('#'))
            .map(|line| line.to_string())
            .collect()
    }

    #[test]
    fn parallel_vcf_combine() -> Result<(), anyhow::Error> {
        let tmpdir = temp_testdir::TempDir::default();
        let files = stage(&tmpdir, &["S1-variants.vcf", "S2-variants.vcf"]);
        let out_file = tmpdir.join("S1_S2-combined.vcf");

        let res = combine(
            &files,
            &out_file,
            Path::new(REFERENCE),
            &Partitioner::default(),
            &SerialRunner,
        )?;

        assert_eq!(out_file, res);
        assert!(!region_dir(&out_file).exists());
        assert_eq!(
            std::fs::read_to_string("tests/variants/S1_S2-combined.vcf")?,
            std::fs::read_to_string(&out_file)?
        );

        Ok(())
    }

    #[rstest::rstest]
    #[case(None, 1)]
    #[case(Some(60), 1)]
    #[case(None, 4)]
    #[case(Some(60), 4)]
    fn same_result_for_any_partitioning(
        #[case] max_region_size: Option<u64>,
        #[case] cores: usize,
    ) -> Result<(), anyhow::Error> {
        let tmpdir = temp_testdir::TempDir::default();
        let files = stage(&tmpdir, &["S1-variants.vcf", "S2-variants.vcf"]);
        let out_file = tmpdir.join("S1_S2-combined.vcf");

        combine(
            &files,
            &out_file,
            Path::new(REFERENCE),
            &Partitioner::new(max_region_size),
            &LocalRunner::new(cores)?,
        )?;

        assert_eq!(
            std::fs::read_to_string("tests/variants/S1_S2-combined.vcf")?,
            std::fs::read_to_string(&out_file)?
        );

        Ok(())
    }

    #[test]
    fn combine_is_idempotent() -> Result<(), anyhow::Error> {
        let tmpdir = temp_testdir::TempDir::default();
        let files = stage(&tmpdir, &["S1-variants.vcf", "S2-variants.vcf"]);
        let out_file = tmpdir.join("S1_S2-combined.vcf");
        let first = tmpdir.join("first.vcf");

        combine(
            &files,
            &out_file,
            Path::new(REFERENCE),
            &Partitioner::default(),
            &SerialRunner,
        )?;
        std::fs::copy(&out_file, &first)?;
        combine(
            &files,
            &out_file,
            Path::new(REFERENCE),
            &Partitioner::default(),
            &SerialRunner,
        )?;

        assert!(file_diff::diff(
            first.to_str().expect("invalid path"),
            out_file.to_str().expect("invalid path")
        ));
        assert!(!region_dir(&out_file).exists());

        Ok(())
    }

    #[test]
    fn stale_working_directory_is_removed() -> Result<(), anyhow::Error> {
        let tmpdir = temp_testdir::TempDir::default();
        let files = stage(&tmpdir, &["S1-variants.vcf", "S2-variants.vcf"]);
        let out_file = tmpdir.join("S1_S2-combined.vcf");
        let work_dir = region_dir(&out_file);
        std::fs::create_dir_all(&work_dir)?;
        std::fs::write(work_dir.join("S1_S2-combined-chr1.vcf"), "stale\n")?;
        std::fs::write(&out_file, "stale\n")?;

        combine(
            &files,
            &out_file,
            Path::new(REFERENCE),
            &Partitioner::default(),
            &SerialRunner,
        )?;

        assert!(!work_dir.exists());
        assert_eq!(
            std::fs::read_to_string("tests/variants/S1_S2-combined.vcf")?,
            std::fs::read_to_string(&out_file)?
        );

        Ok(())
    }

    #[test]
    fn input_order_only_changes_ties() -> Result<(), anyhow::Error> {
        let tmpdir = temp_testdir::TempDir::default();
        let files = stage(&tmpdir, &["S1-variants.vcf", "S2-variants.vcf"]);
        let out_file = tmpdir.join("S2_S1-combined.vcf");

        combine(
            &[files[1].clone(), files[0].clone()],
            &out_file,
            Path::new(REFERENCE),
            &Partitioner::default(),
            &SerialRunner,
        )?;

        let forward = data_lines(Path::new("tests/variants/S1_S2-combined.vcf"));
        let reverse = data_lines(&out_file);
        assert_eq!(forward.len(), reverse.len());

        // Same (CHROM, POS) sequence; columns swapped.
        let key = |line: &String| {
            let mut fields = line.split('\t');
            (
                fields.next().unwrap_or_default().to_string(),
                fields.next().unwrap_or_default().to_string(),
            )
        };
        assert_eq!(
            forward.iter().map(key).collect::<Vec<_>>(),
            reverse.iter().map(key).collect::<Vec<_>>()
        );
        // Tie at chr1:100: S2's record comes first now.
        let ties = reverse
            .iter()
            .filter(|line| line.starts_with("chr1\t100\t"))
            .collect::<Vec<_>>();
        assert_eq!(2, ties.len());
        assert!(ties[0].ends_with("\t0/1\t./."), "{}", ties[0]);
        assert!(ties[1].ends_with("\t./.\t1/1"), "{}", ties[1]);

        Ok(())
    }

    #[test]
    fn gzip_input_and_output() -> Result<(), anyhow::Error> {
        use std::io::{Read, Write};

        let tmpdir = temp_testdir::TempDir::default();
        let files = stage(&tmpdir, &["S1-variants.vcf", "S2-variants.vcf"]);
        let s1_gz = tmpdir.join("S1-variants.vcf.gz");
        {
            let mut encoder = flate2::write::GzEncoder::new(
                std::fs::File::create(&s1_gz)?,
                flate2::Compression::default(),
            );
            encoder.write_all(&std::fs::read(&files[0])?)?;
            encoder.finish()?;
        }
        let out_file = tmpdir.join("S1_S2-combined.vcf.gz");

        combine(
            &[s1_gz, files[1].clone()],
            &out_file,
            Path::new(REFERENCE),
            &Partitioner::new(Some(100)),
            &SerialRunner,
        )?;

        let mut decoded = String::new();
        flate2::read::MultiGzDecoder::new(std::fs::File::open(&out_file)?)
            .read_to_string(&mut decoded)?;
        assert_eq!(
            std::fs::read_to_string("tests/variants/S1_S2-combined.vcf")?,
            decoded
        );
        assert!(!tmpdir.join("S1_S2-combined-regions").exists());

        Ok(())
    }

    #[test]
    fn duplicate_sample_is_configuration_error() -> Result<(), anyhow::Error> {
        let tmpdir = temp_testdir::TempDir::default();
        let files = stage(&tmpdir, &["S1-variants.vcf"]);
        let copy = tmpdir.join("S1-copy.vcf");
        std::fs::copy(&files[0], &copy)?;

        let res = combine(
            &[files[0].clone(), copy],
            &tmpdir.join("out.vcf"),
            Path::new(REFERENCE),
            &Partitioner::default(),
            &SerialRunner,
        );
        assert!(matches!(res, Err(Error::Configuration(_))), "{:?}", res);
        assert!(!tmpdir.join("out.vcf").exists());

        Ok(())
    }

    #[test]
    fn missing_input_is_input_error() {
        let tmpdir = temp_testdir::TempDir::default();
        let res = combine(
            &[tmpdir.join("nope.vcf")],
            &tmpdir.join("out.vcf"),
            Path::new(REFERENCE),
            &Partitioner::default(),
            &SerialRunner,
        );
        assert!(matches!(res, Err(Error::Input { .. })), "{:?}", res);
    }

    #[test]
    fn no_inputs_is_input_error() {
        let tmpdir = temp_testdir::TempDir::default();
        let res = combine::<PathBuf, _>(
            &[],
            &tmpdir.join("out.vcf"),
            Path::new(REFERENCE),
            &Partitioner::default(),
            &SerialRunner,
        );
        assert!(matches!(res, Err(Error::Input { .. })), "{:?}", res);
    }

    #[test]
    fn output_must_not_overwrite_an_input() -> Result<(), anyhow::Error> {
        let tmpdir = temp_testdir::TempDir::default();
        let files = stage(&tmpdir, &["S1-variants.vcf", "S2-variants.vcf"]);
        let before = std::fs::read_to_string(&files[0])?;

        let res = combine(
            &files,
            &tmpdir.join(".").join("S1-variants.vcf"),
            Path::new(REFERENCE),
            &Partitioner::default(),
            &SerialRunner,
        );
        match res {
            Err(Error::Input { path, .. }) => assert_eq!(files[0], path),
            other => panic!("unexpected result {:?}", other),
        }
        assert!(files[0].exists());
        assert_eq!(before, std::fs::read_to_string(&files[0])?);
        assert!(!region_dir(&files[0]).exists());

        Ok(())
    }

    #[rstest::rstest]
    #[case::whole_contigs(None)]
    #[case::split_contigs(Some(120))]
    fn telomere_records_are_kept(
        #[case] max_region_size: Option<u64>,
    ) -> Result<(), anyhow::Error> {
        let tmpdir = temp_testdir::TempDir::default();
        let in_file = tmpdir.join("telomere.vcf");
        std::fs::write(
            &in_file,
            "##fileformat=VCFv4.2\n\
             #CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tT1\n\
             chr1\t0\t.\tN\t<DEL>\t.\t.\t.\tGT\t0/1\n\
             chr1\t5\t.\tA\tT\t.\t.\t.\tGT\t1/1\n\
             chr1\t130\t.\tC\tG\t.\t.\t.\tGT\t0/1\n",
        )?;
        let out_file = tmpdir.join("telomere-combined.vcf");

        combine(
            &[&in_file],
            &out_file,
            Path::new(REFERENCE),
            &Partitioner::new(max_region_size),
            &SerialRunner,
        )?;

        let positions = data_lines(&out_file)
            .iter()
            .map(|line| line.split('\t').nth(1).unwrap_or_default().to_string())
            .collect::<Vec<_>>();
        assert_eq!(vec!["0", "5", "130"], positions);

        Ok(())
    }

    #[rstest::rstest]
    #[case::unsorted("unsorted.vcf", "not sorted")]
    #[case::unknown_contig("unknown-contig.vcf", "not in reference")]
    fn unindexable_inputs_are_reported_together(
        #[case] name: &str,
        #[case] reason: &str,
    ) -> Result<(), anyhow::Error> {
        let tmpdir = temp_testdir::TempDir::default();
        let files = stage(&tmpdir, &["S1-variants.vcf", name]);
        let out_file = tmpdir.join("out.vcf");

        let res = combine(
            &files,
            &out_file,
            Path::new(REFERENCE),
            &Partitioner::default(),
            &LocalRunner::new(2)?,
        );
        match res {
            Err(Error::Input { path, reason: msg }) => {
                assert_eq!(files[1], path);
                assert!(msg.contains(reason), "{}", msg);
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert!(!out_file.exists());

        Ok(())
    }

    #[test]
    fn region_failures_are_aggregated() -> Result<(), anyhow::Error> {
        let tmpdir = temp_testdir::TempDir::default();
        let files = stage(&tmpdir, &["S1-variants.vcf", "S2-variants.vcf"]);
        let out_file = tmpdir.join("S1_S2-combined.vcf");
        let work_dir = region_dir(&out_file);

        let res = combine(
            &files,
            &out_file,
            Path::new(REFERENCE),
            &Partitioner::default(),
            &FailingRunner {
                fail: vec!["merge chr2".into(), "merge chrX".into()],
            },
        );
        match res {
            Err(Error::RegionMerge { output, failures }) => {
                assert_eq!(out_file, output);
                assert_eq!(
                    vec!["chr2".to_string(), "chrX".to_string()],
                    failures.iter().map(|f| f.region.clone()).collect::<Vec<_>>()
                );
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert!(!out_file.exists());
        assert!(work_dir.exists());
        assert!(work_dir.join("S1_S2-combined-chr1.vcf").exists());

        Ok(())
    }

    /// Runs jobs serially but fails those with the given names without running them.
    struct FailingRunner {
        fail: Vec<String>,
    }

    impl crate::parallel::Dispatch for FailingRunner {
        fn submit<J: crate::parallel::Job>(
            &self,
            jobs: Vec<J>,
        ) -> Result<Vec<crate::parallel::JobResult<J::Output>>, Error> {
            Ok(jobs
                .iter()
                .map(|job| {
                    if self.fail.contains(&job.name()) {
                        Err(anyhow::anyhow!("simulated failure"))
                    } else {
                        job.run()
                    }
                })
                .collect())
        }
    }
}
