//! Common, IO-related code.

use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::Path,
};

use flate2::{bufread::MultiGzDecoder, write::GzEncoder, Compression};

use crate::common::is_gz;

/// Transparently open a file with gzip decoder.
pub fn open_read_maybe_gz<P>(path: P) -> Result<Box<dyn BufRead + Send>, std::io::Error>
where
    P: AsRef<Path>,
{
    if is_gz(path.as_ref()) {
        tracing::trace!("Opening {:?} as gzip for reading", path.as_ref());
        let file = File::open(path)?;
        let bufreader = BufReader::new(file);
        let decoder = MultiGzDecoder::new(bufreader);
        Ok(Box::new(BufReader::new(decoder)))
    } else {
        tracing::trace!("Opening {:?} as plain text for reading", path.as_ref());
        let file = File::open(path)?;
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Plain or gzip-compressed output that must be completed with `finish`.
pub enum MaybeGzWriter {
    Plain(BufWriter<File>),
    Gz(GzEncoder<BufWriter<File>>),
}

impl MaybeGzWriter {
    /// Write the gzip trailer (if any) and flush everything to the file.
    pub fn finish(self) -> Result<(), std::io::Error> {
        let bufwriter = match self {
            MaybeGzWriter::Plain(bufwriter) => bufwriter,
            MaybeGzWriter::Gz(encoder) => encoder.finish()?,
        };
        bufwriter.into_inner().map_err(|e| e.into_error())?;
        Ok(())
    }
}

impl Write for MaybeGzWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            MaybeGzWriter::Plain(w) => w.write(buf),
            MaybeGzWriter::Gz(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            MaybeGzWriter::Plain(w) => w.flush(),
            MaybeGzWriter::Gz(w) => w.flush(),
        }
    }
}

/// Wrap `file` with a gzip encoder if `path` asks for one.
///
/// The file itself may be a temporary file; only `path` decides about compression.
pub fn wrap_write_maybe_gz<P>(path: P, file: File) -> MaybeGzWriter
where
    P: AsRef<Path>,
{
    let bufwriter = BufWriter::new(file);
    if is_gz(path.as_ref()) {
        tracing::trace!("Opening {:?} as gzip for writing", path.as_ref());
        MaybeGzWriter::Gz(GzEncoder::new(bufwriter, Compression::default()))
    } else {
        tracing::trace!("Opening {:?} as plain text for writing", path.as_ref());
        MaybeGzWriter::Plain(bufwriter)
    }
}
