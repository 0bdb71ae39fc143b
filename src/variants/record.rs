//! VCF data lines.

/// Placeholder genotype for a sample without call when the FORMAT has `GT` first.
pub const NO_CALL_GT: &str = "./.";
/// Placeholder for a sample without data otherwise.
pub const NO_CALL: &str = ".";

/// A VCF data line split into its columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantRecord {
    pub chrom: String,
    pub pos: u64,
    pub id: String,
    pub reference: String,
    pub alternative: String,
    pub qual: String,
    pub filter: String,
    pub info: String,
    /// The FORMAT column, if present.
    pub format: Option<String>,
    /// One column per sample, in header order.
    pub genotypes: Vec<String>,
}

impl VariantRecord {
    /// Parse a data line of a file with `n_samples` samples.
    pub fn parse(line: &str, n_samples: usize) -> Result<Self, String> {
        let line = line.trim_end_matches(['\n', '\r']);
        let fields = line.split('\t').collect::<Vec<_>>();
        let valid = if n_samples == 0 {
            fields.len() == 8 || fields.len() == 9
        } else {
            fields.len() == 9 + n_samples
        };
        if !valid {
            return Err(format!(
                "expected {} columns but found {} in line {:?}",
                if n_samples == 0 { 8 } else { 9 + n_samples },
                fields.len(),
                line
            ));
        }

        let pos = fields[1]
            .parse::<u64>()
            .map_err(|e| format!("invalid position {:?}: {}", fields[1], e))?;
        if fields[0].is_empty() {
            return Err(format!("empty CHROM in line {:?}", line));
        }

        Ok(Self {
            chrom: fields[0].to_string(),
            pos,
            id: fields[2].to_string(),
            reference: fields[3].to_string(),
            alternative: fields[4].to_string(),
            qual: fields[5].to_string(),
            filter: fields[6].to_string(),
            info: fields[7].to_string(),
            format: fields.get(8).map(|s| s.to_string()),
            genotypes: fields.iter().skip(9).map(|s| s.to_string()).collect(),
        })
    }

    /// Placeholder to use for samples that have no data in this record.
    pub fn no_call(&self) -> &'static str {
        match &self.format {
            Some(format) if format.split(':').next() != Some("GT") => NO_CALL,
            _ => NO_CALL_GT,
        }
    }

    /// Spread the genotype columns over `n_target` columns.
    ///
    /// `columns[i]` is the target column of this record's `i`-th sample; all other
    /// target columns receive a no-call placeholder.
    pub fn reconcile(&self, columns: &[usize], n_target: usize) -> Self {
        let no_call = self.no_call();
        let mut genotypes = vec![no_call.to_string(); n_target];
        for (value, &target) in self.genotypes.iter().zip(columns) {
            genotypes[target] = value.clone();
        }
        let format = match (&self.format, n_target) {
            (_, 0) => None,
            (Some(format), _) => Some(format.clone()),
            (None, _) => Some("GT".to_string()),
        };
        Self {
            format,
            genotypes,
            ..self.clone()
        }
    }

    /// Keep only the genotype columns at `keep`, in that order.
    pub fn retain_samples(&mut self, keep: &[usize]) {
        self.genotypes = keep.iter().map(|&i| self.genotypes[i].clone()).collect();
    }
}

impl std::fmt::Display for VariantRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.chrom,
            self.pos,
            self.id,
            self.reference,
            self.alternative,
            self.qual,
            self.filter,
            self.info
        )?;
        if let Some(format) = &self.format {
            write!(f, "\t{}", format)?;
            for genotype in &self.genotypes {
                write!(f, "\t{}", genotype)?;
            }
        }
        Ok(())
    }
}
