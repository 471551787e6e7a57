//! VCF output for simulated genealogies.
//!
//! Positions are shifted to 1-based coordinates on the way out: a site at
//! 0-based position `x` is written as `x + 1`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use flate2::Compression;
use flate2::write::GzEncoder;

use crate::demography::PLOIDY;
use crate::error::Result;
use crate::genealogy::Genealogy;

/// 1-based copies of 0-based positions.
pub fn one_based(positions: &[u64]) -> Vec<u64> {
    positions.iter().map(|&x| x + 1).collect()
}

enum Output {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
    Stream(Box<dyn Write>),
}

impl Write for Output {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Output::Plain(w) => w.write(buf),
            Output::Gzip(w) => w.write(buf),
            Output::Stream(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Output::Plain(w) => w.flush(),
            Output::Gzip(w) => w.flush(),
            Output::Stream(w) => w.flush(),
        }
    }
}

pub struct VcfWriter {
    writer: Output,
}

impl VcfWriter {
    /// Writes to `path`, gzip-compressed when it ends in `.gz`.
    pub fn create(path: &Path) -> Result<Self> {
        let file = BufWriter::new(File::create(path)?);
        let is_gzipped = path.extension().map(|e| e == "gz").unwrap_or(false);
        let writer = if is_gzipped {
            Output::Gzip(GzEncoder::new(file, Compression::default()))
        } else {
            Output::Plain(file)
        };
        Ok(Self { writer })
    }

    pub fn new(writer: impl Write + 'static) -> Self {
        Self {
            writer: Output::Stream(Box::new(writer)),
        }
    }

    /// Header, then one record per site.
    pub fn write_genealogy(&mut self, genealogy: &Genealogy, contig_id: &str) -> Result<()> {
        self.write_header(genealogy, contig_id)?;

        let positions: Vec<u64> = genealogy.sites().iter().map(|s| s.position).collect();
        let positions = one_based(&positions);

        for (variant, pos) in genealogy.variants().zip(positions) {
            let reference = variant.alleles[0] as char;
            let alt: Vec<String> = variant.alleles[1..]
                .iter()
                .map(|&a| (a as char).to_string())
                .collect();
            let alt = if alt.is_empty() {
                ".".to_string()
            } else {
                alt.join(",")
            };

            write!(
                self.writer,
                "{contig_id}\t{pos}\t{}\t{reference}\t{alt}\t.\tPASS\t.\tGT",
                variant.site
            )?;
            for genotype in variant.genotypes.chunks(PLOIDY) {
                let gt: Vec<String> = genotype.iter().map(|g| g.to_string()).collect();
                write!(self.writer, "\t{}", gt.join("|"))?;
            }
            writeln!(self.writer)?;
        }
        Ok(())
    }

    fn write_header(&mut self, genealogy: &Genealogy, contig_id: &str) -> Result<()> {
        writeln!(self.writer, "##fileformat=VCFv4.2")?;
        writeln!(
            self.writer,
            "##source={} {}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        )?;
        writeln!(
            self.writer,
            "##FILTER=<ID=PASS,Description=\"All filters passed\">"
        )?;
        writeln!(
            self.writer,
            "##contig=<ID={},length={}>",
            contig_id,
            genealogy.sequence_length()
        )?;
        writeln!(
            self.writer,
            "##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">"
        )?;
        write!(self.writer, "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT")?;
        for name in genealogy.individual_names() {
            write!(self.writer, "\t{name}")?;
        }
        writeln!(self.writer)?;
        Ok(())
    }

    /// Flushes and closes the underlying writer.
    pub fn finish(self) -> Result<()> {
        match self.writer {
            Output::Plain(mut w) => w.flush()?,
            Output::Gzip(w) => w.finish()?.flush()?,
            Output::Stream(mut w) => w.flush()?,
        }
        Ok(())
    }
}

/// Writes `genealogy` as a VCF file at `path`.
pub fn write_vcf(genealogy: &Genealogy, contig_id: &str, path: &Path) -> Result<()> {
    let mut writer = VcfWriter::create(path)?;
    writer.write_genealogy(genealogy, contig_id)?;
    writer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genealogy::tests::two_tree_genealogy;
    use crate::genealogy::{Mutation, Site};
    use flate2::read::MultiGzDecoder;
    use std::io::Read;
    use tempfile::tempdir;

    fn mutated() -> Genealogy {
        let mut g = two_tree_genealogy();
        let sites = vec![
            Site {
                position: 0,
                ancestral_state: b'A',
            },
            Site {
                position: 55,
                ancestral_state: b'G',
            },
        ];
        let mutations = vec![
            // above node 4: samples 0 and 1
            Mutation {
                site: 0,
                node: 4,
                time: 15.0,
                parent: None,
                derived_state: b'T',
            },
            // above sample 3
            Mutation {
                site: 1,
                node: 3,
                time: 30.0,
                parent: None,
                derived_state: b'C',
            },
        ];
        g.set_mutations(sites, mutations).unwrap();
        g
    }

    fn render(g: &Genealogy, contig: &str) -> String {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.vcf");
        write_vcf(g, contig, &path).unwrap();
        std::fs::read_to_string(&path).unwrap()
    }

    #[test]
    fn shifts_positions() {
        assert_eq!(one_based(&[0, 5, 6]), vec![1, 6, 7]);
        let once = one_based(&[3]);
        assert_eq!(one_based(&once), vec![5]);
    }

    #[test]
    fn header_lists_contig_and_individuals() {
        let text = render(&mutated(), "chr7");
        let header: Vec<&str> = text.lines().filter(|l| l.starts_with('#')).collect();
        assert_eq!(header[0], "##fileformat=VCFv4.2");
        assert!(header.contains(&"##contig=<ID=chr7,length=100>"));
        assert_eq!(
            header.last().copied(),
            Some("#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tA\tB")
        );
    }

    #[test]
    fn records_are_one_based_and_phased() {
        let text = render(&mutated(), "1");
        let records: Vec<&str> = text.lines().filter(|l| !l.starts_with('#')).collect();
        assert_eq!(
            records,
            vec![
                "1\t1\t0\tA\tT\t.\tPASS\t.\tGT\t1|1\t0|0",
                "1\t56\t1\tG\tC\t.\tPASS\t.\tGT\t0|0\t0|1",
            ]
        );
    }

    #[test]
    fn no_sites_writes_header_only() {
        let text = render(&two_tree_genealogy(), "1");
        assert!(text.lines().all(|l| l.starts_with('#')));
    }

    #[test]
    fn gzip_by_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.vcf.gz");
        write_vcf(&mutated(), "1", &path).unwrap();

        let mut text = String::new();
        MultiGzDecoder::new(File::open(&path).unwrap())
            .read_to_string(&mut text)
            .unwrap();
        assert!(text.starts_with("##fileformat=VCFv4.2"));
        assert_eq!(text.lines().filter(|l| !l.starts_with('#')).count(), 2);
    }
}
