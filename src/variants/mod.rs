//! Code for merging and subsetting VCF files.

pub mod combine;
pub mod exclude;
pub mod header;
pub mod record;
