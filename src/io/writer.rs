use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use fxhash::FxHashMap;
use log::debug;

use super::reader::FastxRecord;
use crate::error::{BinError, Result};
use crate::model::BinId;

/// Output file of every bin seen during one binning run, with per-bin read counts.
///
/// A bin id is registered once, on its first write, and keeps that path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BinRegistry {
    paths: BTreeMap<BinId, PathBuf>,
    counts: BTreeMap<BinId, u64>,
}

impl BinRegistry {
    /// Register `bin_id` if unseen; returns true when this call registered it.
    fn register(&mut self, bin_id: BinId, path: PathBuf) -> bool {
        if self.paths.contains_key(&bin_id) {
            return false;
        }
        self.paths.insert(bin_id, path);
        true
    }

    fn increment(&mut self, bin_id: BinId) {
        *self.counts.entry(bin_id).or_insert(0) += 1;
    }

    #[cfg(test)]
    pub fn path(&self, bin_id: BinId) -> Option<&Path> {
        self.paths.get(&bin_id).map(PathBuf::as_path)
    }

    pub fn count(&self, bin_id: BinId) -> u64 {
        self.counts.get(&bin_id).copied().unwrap_or(0)
    }

    /// Bins in ascending id order
    pub fn iter(&self) -> impl Iterator<Item = (BinId, &Path)> {
        self.paths.iter().map(|(id, p)| (*id, p.as_path()))
    }

    pub fn bin_ids(&self) -> Vec<BinId> {
        self.paths.keys().copied().collect()
    }

    pub fn counts(&self) -> &BTreeMap<BinId, u64> {
        &self.counts
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn total_reads(&self) -> u64 {
        self.counts.values().sum()
    }
}

struct OpenBin {
    writer: BufWriter<File>,
    last_used: u64,
}

/// Appends reads to `<folder>/<file_base>.bin-<id>.fastq`, one file per bin.
///
/// With `max_open == 0` every write opens, appends and closes the file.
/// Otherwise up to `max_open` handles stay open and the least recently used
/// one is flushed and closed when another bin needs a slot.
pub struct BinWriter {
    folder: PathBuf,
    file_base: String,
    max_open: usize,
    open: FxHashMap<BinId, OpenBin>,
    tick: u64,
    registry: BinRegistry,
}

impl BinWriter {
    pub fn new<P: AsRef<Path>>(folder: P, file_base: &str, max_open: usize) -> Self {
        BinWriter {
            folder: folder.as_ref().to_owned(),
            file_base: file_base.to_string(),
            max_open,
            open: FxHashMap::default(),
            tick: 0,
            registry: BinRegistry::default(),
        }
    }

    pub fn bin_path(&self, bin_id: BinId) -> PathBuf {
        self.folder
            .join(format!("{}.bin-{}.fastq", self.file_base, bin_id))
    }

    /// Append one read, tagged with its bin id, to that bin's file
    pub fn write(&mut self, bin_id: BinId, read: &FastxRecord) -> Result<()> {
        let path = self.bin_path(bin_id);
        if self.registry.register(bin_id, path.clone()) {
            debug!("new bin {} -> {}", bin_id, path.display());
        }

        if self.max_open == 0 {
            let mut writer = BufWriter::new(open_append(&path)?);
            write_record(&mut writer, bin_id, read)
                .and_then(|_| writer.flush())
                .map_err(|e| BinError::io(&path, "appending read", e))?;
        } else {
            self.tick += 1;
            let tick = self.tick;
            if !self.open.contains_key(&bin_id) {
                if self.open.len() >= self.max_open {
                    self.evict_oldest()?;
                }
                let writer = BufWriter::new(open_append(&path)?);
                self.open.insert(bin_id, OpenBin { writer, last_used: tick });
            }
            if let Some(bin) = self.open.get_mut(&bin_id) {
                bin.last_used = tick;
                write_record(&mut bin.writer, bin_id, read)
                    .map_err(|e| BinError::io(&path, "appending read", e))?;
            }
        }

        self.registry.increment(bin_id);
        Ok(())
    }

    fn evict_oldest(&mut self) -> Result<()> {
        let oldest = self
            .open
            .iter()
            .min_by_key(|(_, bin)| bin.last_used)
            .map(|(id, _)| *id);
        if let Some(bin_id) = oldest {
            if let Some(mut bin) = self.open.remove(&bin_id) {
                bin.writer
                    .flush()
                    .map_err(|e| BinError::io(self.bin_path(bin_id), "flushing bin file", e))?;
            }
        }
        Ok(())
    }

    /// Flush and close every open handle, returning the registry of the run.
    pub fn finish(mut self) -> Result<BinRegistry> {
        let ids: Vec<BinId> = self.open.keys().copied().collect();
        for bin_id in ids {
            if let Some(mut bin) = self.open.remove(&bin_id) {
                bin.writer
                    .flush()
                    .map_err(|e| BinError::io(self.bin_path(bin_id), "flushing bin file", e))?;
            }
        }
        Ok(std::mem::take(&mut self.registry))
    }
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| BinError::io(path, "opening bin file", e))
}

/// Header of a binned read: `<id> bin_id=<n>|<description>`
pub fn tagged_header(bin_id: BinId, read: &FastxRecord) -> String {
    if read.description.is_empty() {
        format!("{} bin_id={}", read.id, bin_id)
    } else {
        format!("{} bin_id={}|{}", read.id, bin_id, read.description)
    }
}

/// Write in the input's format: FASTQ when the read has qualities, FASTA otherwise
fn write_record<W: Write>(writer: &mut W, bin_id: BinId, read: &FastxRecord) -> std::io::Result<()> {
    let header = tagged_header(bin_id, read);
    match &read.qual {
        Some(qual) => {
            writeln!(writer, "@{}", header)?;
            writer.write_all(&read.seq)?;
            writer.write_all(b"\n+\n")?;
            writer.write_all(qual)?;
            writer.write_all(b"\n")
        }
        None => {
            writeln!(writer, ">{}", header)?;
            writer.write_all(&read.seq)?;
            writer.write_all(b"\n")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::FastxReader;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn read(id: &str, seq: &str) -> FastxRecord {
        FastxRecord {
            id: id.to_string(),
            description: format!("desc of {}", id),
            seq: seq.as_bytes().to_vec(),
            qual: Some(vec![b'I'; seq.len()]),
        }
    }

    fn read_ids(path: &Path) -> Vec<String> {
        let mut ids = Vec::new();
        FastxReader::new(path)
            .process_all(|r| {
                ids.push(r.id);
                Ok(())
            })
            .unwrap();
        ids
    }

    #[test]
    fn test_tagged_header() {
        let mut r = read("r1", "ACGT");
        assert_eq!(tagged_header(3, &r), "r1 bin_id=3|desc of r1");
        r.description.clear();
        assert_eq!(tagged_header(3, &r), "r1 bin_id=3");
    }

    fn exercise(max_open: usize) -> anyhow::Result<()> {
        let dir = tempdir()?;
        let mut writer = BinWriter::new(dir.path(), "sample", max_open);

        let assignments = [(0, "a"), (1, "b"), (2, "c"), (0, "d"), (2, "e"), (0, "f")];
        for (bin, id) in assignments {
            writer.write(bin, &read(id, "ACGTACGT"))?;
        }
        let registry = writer.finish()?;

        assert_eq!(registry.bin_ids(), vec![0, 1, 2]);
        assert_eq!(registry.count(0), 3);
        assert_eq!(registry.total_reads(), 6);

        let bin0 = registry.path(0).unwrap();
        assert_eq!(bin0, dir.path().join("sample.bin-0.fastq"));
        assert_eq!(read_ids(bin0), vec!["a", "d", "f"]);
        assert_eq!(read_ids(registry.path(2).unwrap()), vec!["c", "e"]);
        Ok(())
    }

    #[test]
    fn test_open_append_close() -> anyhow::Result<()> {
        exercise(0)
    }

    #[test]
    fn test_pooled_handles_with_eviction() -> anyhow::Result<()> {
        // 3 bins through 2 slots forces evictions between writes
        exercise(2)
    }

    #[test]
    fn test_fasta_output_for_fasta_input() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let mut writer = BinWriter::new(dir.path(), "s", 0);
        let mut r = read("x", "ACGT");
        r.qual = None;
        writer.write(5, &r)?;
        let registry = writer.finish()?;

        let text = std::fs::read_to_string(registry.path(5).unwrap())?;
        assert_eq!(text, ">x bin_id=5|desc of x\nACGT\n");
        Ok(())
    }
}
