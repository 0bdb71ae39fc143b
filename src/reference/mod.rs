//! Reference sequence access and partitioning into regions.
//!
//! The contig list is taken from the FASTA index (`.fai`) next to the reference or,
//! failing that, from a Picard sequence dictionary (`.dict`).  The declared order of
//! the contigs defines the sort order of all VCF output.

use std::{
    io::BufRead,
    path::{Path, PathBuf},
};

use indexmap::IndexMap;

use crate::err::Error;

/// Path of the FASTA index for `path`.
pub fn fai_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".fai");
    PathBuf::from(name)
}

/// Path of the sequence dictionary for `path`, e.g., `hg19.dict` for `hg19.fa(.gz)`.
pub fn dict_path(path: &Path) -> PathBuf {
    let path = if path.extension().and_then(|s| s.to_str()) == Some("gz") {
        path.with_extension("")
    } else {
        path.to_path_buf()
    };
    path.with_extension("dict")
}

/// Contigs of a reference sequence in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Path to the reference FASTA file.
    path: PathBuf,
    /// Mapping from contig name to length; the index is the contig's rank.
    contigs: IndexMap<String, u64>,
}

impl Reference {
    /// Construct from an explicit contig list.
    pub fn new<P: Into<PathBuf>>(path: P, contigs: Vec<(String, u64)>) -> Result<Self, Error> {
        let path = path.into();
        let mut map = IndexMap::new();
        for (name, length) in contigs {
            if map.insert(name.clone(), length).is_some() {
                return Err(Error::Configuration(format!(
                    "duplicate contig {} in reference {:?}",
                    name, &path
                )));
            }
        }
        if map.is_empty() {
            return Err(Error::Configuration(format!(
                "reference {:?} declares no contigs",
                &path
            )));
        }
        Ok(Self {
            path,
            contigs: map,
        })
    }

    /// Load the contig list for the reference at `path`.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let path_fai = fai_path(path);
        let path_dict = dict_path(path);
        let contigs = if path_fai.exists() {
            tracing::debug!("reading contigs from FASTA index {:?}", &path_fai);
            load_fai(&path_fai)?
        } else if path_dict.exists() {
            tracing::debug!("reading contigs from sequence dictionary {:?}", &path_dict);
            load_dict(&path_dict)?
        } else {
            return Err(Error::Configuration(format!(
                "no index for reference {:?}, tried {:?} and {:?}",
                path, &path_fai, &path_dict
            )));
        };
        Self::new(path, contigs)
    }

    /// Path to the reference FASTA file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Iterate over `(name, length)` in declaration order.
    pub fn contigs(&self) -> impl Iterator<Item = (&str, u64)> {
        self.contigs
            .iter()
            .map(|(name, length)| (name.as_str(), *length))
    }

    /// Rank of the contig in the declaration order.
    pub fn contig_rank(&self, name: &str) -> Option<usize> {
        self.contigs.get_index_of(name)
    }
}

/// Read `(name, length)` pairs from a FASTA index.
fn load_fai(path: &Path) -> Result<Vec<(String, u64)>, Error> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| Error::Configuration(format!("could not open {:?}: {}", path, e)))?;

    let mut result = Vec::new();
    for (lineno, record) in reader.records().enumerate() {
        let record = record
            .map_err(|e| Error::Configuration(format!("could not read {:?}: {}", path, e)))?;
        let (name, length) = match (record.get(0), record.get(1)) {
            (Some(name), Some(length)) if !name.is_empty() => (name, length),
            _ => {
                return Err(Error::Configuration(format!(
                    "line {} of {:?} has less than two columns",
                    lineno + 1,
                    path
                )))
            }
        };
        let length = length.trim().parse::<u64>().map_err(|e| {
            Error::Configuration(format!(
                "invalid length {:?} for contig {} in {:?}: {}",
                length, name, path, e
            ))
        })?;
        result.push((name.to_string(), length));
    }
    Ok(result)
}

/// Read `(name, length)` pairs from the `@SQ` lines of a sequence dictionary.
fn load_dict(path: &Path) -> Result<Vec<(String, u64)>, Error> {
    let file = std::fs::File::open(path)
        .map(std::io::BufReader::new)
        .map_err(|e| Error::Configuration(format!("could not open {:?}: {}", path, e)))?;

    let mut result = Vec::new();
    for line in file.lines() {
        let line =
            line.map_err(|e| Error::Configuration(format!("could not read {:?}: {}", path, e)))?;
        if !line.starts_with("@SQ") {
            continue;
        }
        let mut name = None;
        let mut length = None;
        for field in line.split('\t').skip(1) {
            if let Some(value) = field.strip_prefix("SN:") {
                name = Some(value.to_string());
            } else if let Some(value) = field.strip_prefix("LN:") {
                length = Some(value.parse::<u64>().map_err(|e| {
                    Error::Configuration(format!(
                        "invalid LN:{} in {:?}: {}",
                        value, path, e
                    ))
                })?);
            }
        }
        match (name, length) {
            (Some(name), Some(length)) => result.push((name, length)),
            _ => {
                return Err(Error::Configuration(format!(
                    "@SQ line without SN or LN in {:?}: {}",
                    path, line
                )))
            }
        }
    }
    Ok(result)
}

/// A contiguous genomic interval, 1-based and inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize)]
pub struct Region {
    /// Name of the contig.
    pub contig: String,
    /// First position of the region.
    pub start: u64,
    /// Last position of the region.
    pub end: u64,
    /// Length of the whole contig.
    pub contig_length: u64,
}

impl Region {
    /// Whether the region spans the whole contig.
    pub fn is_whole_contig(&self) -> bool {
        self.start == 1 && self.end >= self.contig_length
    }

    /// Whether this region is the last one of its contig.
    ///
    /// The last region also takes records positioned beyond the declared contig length.
    pub fn is_contig_end(&self) -> bool {
        self.end >= self.contig_length
    }

    /// Human readable name, `chr1` or `chr1:1-1000`.
    pub fn name(&self) -> String {
        if self.is_whole_contig() {
            self.contig.clone()
        } else {
            format!("{}:{}-{}", self.contig, self.start, self.end)
        }
    }

    /// Name usable as part of a file name.
    pub fn slug(&self) -> String {
        let contig = self
            .contig
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect::<String>();
        if self.is_whole_contig() {
            contig
        } else {
            format!("{}_{}_{}", contig, self.start, self.end)
        }
    }

    /// Whether the record at `chrom:pos` belongs to this region.
    ///
    /// The first region of a contig also takes `POS=0` (telomere) records.
    pub fn contains(&self, chrom: &str, pos: u64) -> bool {
        chrom == self.contig
            && (pos >= self.start || self.start == 1)
            && (pos <= self.end || self.is_contig_end())
    }
}

/// The region of `regions` that the record at `chrom:pos` belongs to.
pub fn region_of<'a>(regions: &'a [Region], chrom: &str, pos: u64) -> Option<&'a Region> {
    regions.iter().find(|region| region.contains(chrom, pos))
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Splits a reference into an ordered list of regions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Partitioner {
    /// Contigs longer than this are split into chunks of at most this size.
    pub max_region_size: Option<u64>,
}

impl Partitioner {
    pub fn new(max_region_size: Option<u64>) -> Self {
        Self { max_region_size }
    }

    /// Compute the regions of `reference`, contigs in declaration order.
    pub fn partition(&self, reference: &Reference) -> Result<Vec<Region>, Error> {
        let chunk = match self.max_region_size {
            Some(0) => {
                return Err(Error::Configuration(
                    "max_region_size must be positive".into(),
                ))
            }
            chunk => chunk,
        };

        let mut result = Vec::new();
        for (contig, length) in reference.contigs() {
            match chunk {
                Some(chunk) if length > chunk => {
                    let mut start = 1;
                    while start <= length {
                        let end = std::cmp::min(start + chunk - 1, length);
                        result.push(Region {
                            contig: contig.to_string(),
                            start,
                            end,
                            contig_length: length,
                        });
                        start = end + 1;
                    }
                }
                _ => result.push(Region {
                    contig: contig.to_string(),
                    start: 1,
                    end: length,
                    contig_length: length,
                }),
            }
        }
        Ok(result)
    }

    /// Load the reference at `path` and compute its regions.
    pub fn regions<P: AsRef<Path>>(&self, path: P) -> Result<(Reference, Vec<Region>), Error> {
        let reference = Reference::from_path(path)?;
        let regions = self.partition(&reference)?;
        tracing::debug!(
            "partitioned {} contig(s) of {:?} into {} region(s)",
            reference.contigs().count(),
            reference.path(),
            regions.len()
        );
        Ok((reference, regions))
    }
}

/// Command line arguments for `reference regions` sub command.
#[derive(Debug, clap::Parser)]
#[command(author, version, about = "list regions of a reference", long_about = None)]
pub struct Args {
    /// Path to the reference FASTA file (`.fai` or `.dict` must exist).
    #[clap(long)]
    pub path_reference: String,
    /// Split contigs longer than this into chunks.
    #[clap(long)]
    pub max_region_size: Option<u64>,
}

/// Main entry point for `reference regions` sub command.
pub fn run(args_common: &crate::common::Args, args: &Args) -> Result<(), anyhow::Error> {
    tracing::info!("args_common = {:#?}", &args_common);
    tracing::info!("args = {:#?}", &args);

    let (_, regions) = Partitioner::new(args.max_region_size).regions(&args.path_reference)?;
    for region in &regions {
        println!("{}", region);
    }
    Ok(())
}
