//! VCF header handling.
//!
//! The meta lines are kept verbatim so that the output headers carry everything the
//! inputs declared; `noodles-vcf` validates the header and provides the sample names.

use std::{
    io::{BufRead, Write},
    path::Path,
};

use indexmap::{IndexMap, IndexSet};
use noodles_vcf as vcf;

use crate::err::Error;

/// The fixed column names of the `#CHROM` line.
pub const FIXED_COLUMNS: &[&str] = &[
    "#CHROM", "POS", "ID", "REF", "ALT", "QUAL", "FILTER", "INFO",
];

/// Meta lines plus sample names of a VCF file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// The `##` lines, without line terminator.
    meta: Vec<String>,
    /// Sample names from the `#CHROM` line.
    sample_names: Vec<String>,
}

impl Header {
    pub fn new(meta: Vec<String>, sample_names: Vec<String>) -> Self {
        Self { meta, sample_names }
    }

    pub fn sample_names(&self) -> &[String] {
        &self.sample_names
    }

    /// Copy of the header with a different sample list.
    pub fn with_sample_names(&self, sample_names: Vec<String>) -> Self {
        Self {
            meta: self.meta.clone(),
            sample_names,
        }
    }

    /// Read the header from `reader`, leaving it at the first data line.
    ///
    /// Returns the header and the number of bytes consumed.
    pub fn read<R: BufRead + ?Sized>(reader: &mut R, path: &Path) -> Result<(Self, u64), Error> {
        let mut meta = Vec::new();
        let mut consumed = 0u64;
        let mut line = String::new();
        let column_line = loop {
            line.clear();
            let n = reader
                .read_line(&mut line)
                .map_err(|e| Error::input(path, format!("problem reading header: {}", e)))?;
            if n == 0 {
                return Err(Error::input(path, "no #CHROM line in header"));
            }
            consumed += n as u64;
            let trimmed = line.trim_end_matches(['\n', '\r']);
            if trimmed.starts_with("##") {
                meta.push(trimmed.to_string());
            } else if trimmed.starts_with("#CHROM") {
                break trimmed.to_string();
            } else {
                return Err(Error::input(
                    path,
                    format!("unexpected line in header: {:?}", trimmed),
                ));
            }
        };

        let columns = column_line.split('\t').collect::<Vec<_>>();
        if columns.len() < FIXED_COLUMNS.len() || columns[..FIXED_COLUMNS.len()] != *FIXED_COLUMNS
        {
            return Err(Error::input(
                path,
                format!("malformed #CHROM line: {:?}", column_line),
            ));
        }
        if columns.len() > FIXED_COLUMNS.len() && columns[FIXED_COLUMNS.len()] != "FORMAT" {
            return Err(Error::input(
                path,
                format!("expected FORMAT column in #CHROM line: {:?}", column_line),
            ));
        }

        let mut raw = meta.join("\n");
        raw.push('\n');
        raw.push_str(&column_line);
        raw.push('\n');
        let parsed: vcf::Header = raw
            .parse()
            .map_err(|e| Error::input(path, format!("invalid VCF header: {}", e)))?;
        let sample_names = parsed.sample_names().iter().cloned().collect::<Vec<_>>();
        let unique = sample_names.iter().collect::<IndexSet<_>>();
        if unique.len() != sample_names.len() {
            return Err(Error::input(path, "duplicate sample names in header"));
        }

        Ok((Self::new(meta, sample_names), consumed))
    }

    /// The `#CHROM` line, without line terminator.
    pub fn column_line(&self) -> String {
        let mut columns = FIXED_COLUMNS.to_vec();
        if !self.sample_names.is_empty() {
            columns.push("FORMAT");
            columns.extend(self.sample_names.iter().map(String::as_str));
        }
        columns.join("\t")
    }

    /// Write the header, including the `#CHROM` line.
    pub fn write<W: Write + ?Sized>(&self, writer: &mut W) -> std::io::Result<()> {
        for line in &self.meta {
            writeln!(writer, "{}", line)?;
        }
        writeln!(writer, "{}", self.column_line())
    }

    /// Merge the headers of the inputs of a combine.
    ///
    /// Meta lines are unified in first-seen order, `##fileformat` first; structured
    /// lines (`##INFO=<ID=...`) are unified by kind and ID.  The sample list is the
    /// union in first-seen order; a sample in two inputs is a configuration error.
    pub fn merge<'a, I>(headers: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (&'a Path, &'a Header)>,
    {
        let mut fileformat: Option<String> = None;
        let mut meta: IndexMap<String, String> = IndexMap::new();
        let mut sample_names: IndexMap<String, &'a Path> = IndexMap::new();

        for (path, header) in headers {
            for line in &header.meta {
                if line.starts_with("##fileformat=") {
                    fileformat.get_or_insert_with(|| line.clone());
                    continue;
                }
                meta.entry(meta_key(line)).or_insert_with(|| line.clone());
            }
            for name in &header.sample_names {
                if let Some(first) = sample_names.get(name) {
                    return Err(Error::Configuration(format!(
                        "sample {} occurs in both {:?} and {:?}",
                        name, first, path
                    )));
                }
                sample_names.insert(name.clone(), path);
            }
        }

        let meta = fileformat
            .into_iter()
            .chain(meta.into_values())
            .collect::<Vec<_>>();
        Ok(Self::new(meta, sample_names.into_keys().collect()))
    }
}

/// Key for unifying meta lines: `INFO/DP` for structured lines, else the line itself.
fn meta_key(line: &str) -> String {
    let body = line.trim_start_matches('#');
    if let Some((kind, value)) = body.split_once('=') {
        if let Some(fields) = value.strip_prefix('<') {
            if let Some(id) = fields
                .trim_end_matches('>')
                .split(',')
                .find_map(|field| field.strip_prefix("ID="))
            {
                return format!("{}/{}", kind, id);
            }
        }
    }
    line.to_string()
}
