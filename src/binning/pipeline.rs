use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, trace, warn};
use rayon::prelude::*;

use super::types::{BinnedRead, BinningOutcome, DroppedReads, PipelineState};
use crate::error::{BinError, FeatureError, Result};
use crate::io::{BinWriter, FastxReader, FastxRecord};
use crate::kmer::FeatureExtractor;
use crate::model::BinPredictor;

/// Upper bound on feature values held in memory by one chunk
const FEATURE_BUDGET: usize = 1 << 24;

/// Everything one binning run needs, passed explicitly instead of shared state.
pub struct BinningContext<'a> {
    pub input: PathBuf,
    /// Parameter set name; bins go to `<input folder>/<param>/`
    pub param: String,
    pub extractor: FeatureExtractor,
    pub predictor: &'a dyn BinPredictor,
    /// Bin files kept open at once, 0 for open/append/close per read
    pub max_open: usize,
    /// Reads sent to rayon together; writes still happen in input order
    pub chunk_size: usize,
    /// Run a first pass to count reads for the progress bar
    pub count_total: bool,
    pub show_progress: bool,
}

/// Streams one input file through feature extraction, bin assignment and bin writing.
///
/// Reads whose features cannot be extracted are dropped and counted; the run
/// goes on. Each instance owns its registry and counters.
pub struct BinningPipeline<'a> {
    ctx: BinningContext<'a>,
    state: PipelineState,
}

impl<'a> BinningPipeline<'a> {
    pub fn new(ctx: BinningContext<'a>) -> Self {
        BinningPipeline {
            ctx,
            state: PipelineState::Init,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Output folder for this input and parameter set
    pub fn output_folder(&self) -> PathBuf {
        let parent = self
            .ctx
            .input
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        parent.join(&self.ctx.param)
    }

    fn file_base(&self) -> String {
        self.ctx
            .input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "reads".to_string())
    }

    pub fn run(&mut self) -> Result<BinningOutcome> {
        match self.run_states() {
            Ok(outcome) => {
                self.state = PipelineState::Done;
                Ok(outcome)
            }
            Err(e) => {
                warn!("binning of {} failed in state {}", self.ctx.input.display(), self.state);
                self.state = PipelineState::Failed;
                Err(e)
            }
        }
    }

    fn run_states(&mut self) -> Result<BinningOutcome> {
        self.state = PipelineState::Init;
        if !self.ctx.input.is_file() {
            return Err(BinError::InputNotFound(self.ctx.input.clone()));
        }
        let folder = self.output_folder();
        let renamed_previous = move_aside_existing(&folder)?;
        fs::create_dir_all(&folder).map_err(|e| BinError::io(&folder, "creating bin folder", e))?;

        let reader = FastxReader::new(&self.ctx.input);
        let total = if self.ctx.count_total {
            self.state = PipelineState::CountingTotal;
            let total = reader.count_records()?;
            debug!("{} reads in {}", total, self.ctx.input.display());
            Some(total)
        } else {
            None
        };

        self.state = PipelineState::Binning;
        info!(
            "Binning the reads of {} (count k-mers, scale, find bin, copy to {}/{}.bin-<id>.fastq)",
            self.ctx.input.display(),
            folder.display(),
            self.file_base()
        );
        let progress = self.progress_bar(total);

        let mut writer = BinWriter::new(&folder, &self.file_base(), self.ctx.max_open);
        let mut dropped = DroppedReads::default();
        let mut reads_seen = 0u64;
        let chunk_size = self.chunk_capacity();
        let mut chunk: Vec<FastxRecord> = Vec::with_capacity(chunk_size);

        reader.process_all(|read| {
            reads_seen += 1;
            chunk.push(read);
            if chunk.len() >= chunk_size {
                self.flush_chunk(&mut chunk, &mut writer, &mut dropped)?;
                progress.inc(chunk_size as u64);
            }
            Ok(())
        })?;
        let remaining = chunk.len() as u64;
        self.flush_chunk(&mut chunk, &mut writer, &mut dropped)?;
        progress.inc(remaining);
        progress.finish_and_clear();

        let registry = writer.finish()?;
        let bins: Vec<String> = registry.bin_ids().iter().map(|b| b.to_string()).collect();
        info!(
            "{} reads binned into {} bins: [{}]",
            registry.total_reads(),
            registry.len(),
            bins.join(", ")
        );
        if dropped.total() > 0 {
            warn!(
                "{} reads dropped from {} ({} degenerate, {} with ambiguous bases)",
                dropped.total(),
                self.ctx.input.display(),
                dropped.degenerate,
                dropped.ambiguous
            );
        }

        Ok(BinningOutcome {
            folder,
            renamed_previous,
            registry,
            reads_seen,
            dropped,
        })
    }

    /// Chunk size capped so a chunk's feature vectors stay within the budget
    fn chunk_capacity(&self) -> usize {
        let per_read = self.ctx.extractor.dimension().max(1);
        self.ctx.chunk_size.min(FEATURE_BUDGET / per_read).max(1)
    }

    fn assign(&self, read: FastxRecord) -> std::result::Result<BinnedRead, (FastxRecord, FeatureError)> {
        match self.ctx.extractor.extract(&read.seq) {
            Ok(feature) => {
                let bin_id = self.ctx.predictor.predict(feature.as_slice());
                Ok(BinnedRead {
                    read,
                    bin_id,
                    feature,
                })
            }
            Err(e) => Err((read, e)),
        }
    }

    /// Assign bins to a chunk in parallel, then write sequentially in input order.
    fn flush_chunk(
        &self,
        chunk: &mut Vec<FastxRecord>,
        writer: &mut BinWriter,
        dropped: &mut DroppedReads,
    ) -> Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        let assigned: Vec<_> = if chunk.len() == 1 {
            chunk.drain(..).map(|read| self.assign(read)).collect()
        } else {
            std::mem::take(chunk)
                .into_par_iter()
                .map(|read| self.assign(read))
                .collect()
        };

        for result in assigned {
            match result {
                Ok(binned) => {
                    trace!(
                        "{} -> bin {} ({} windows)",
                        binned.read.id,
                        binned.bin_id,
                        binned.feature.valid_windows
                    );
                    writer.write(binned.bin_id, &binned.read)?
                }
                Err((read, e)) => {
                    debug!("dropping read {}: {}", read.id, e);
                    dropped.record(&e);
                }
            }
        }
        Ok(())
    }

    fn progress_bar(&self, total: Option<u64>) -> ProgressBar {
        if !self.ctx.show_progress {
            return ProgressBar::hidden();
        }
        match total {
            Some(total) => {
                let bar = ProgressBar::new(total);
                bar.set_style(
                    ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len} reads ({eta})")
                        .unwrap_or_else(|_| ProgressStyle::default_bar()),
                );
                bar.set_message("binning reads");
                bar
            }
            None => {
                let spinner = ProgressBar::new_spinner();
                spinner.set_message("binning reads");
                spinner
            }
        }
    }
}

/// Rename an existing output folder with a timestamp suffix taken from its
/// modification time, so two runs never mix their bin files.
pub fn move_aside_existing(folder: &Path) -> Result<Option<PathBuf>> {
    if !folder.is_dir() {
        return Ok(None);
    }
    let modified = fs::metadata(folder)
        .and_then(|m| m.modified())
        .map_err(|e| BinError::io(folder, "reading folder timestamp", e))?;
    let stamp = DateTime::<Local>::from(modified).format("%Y-%m-%d_%H-%M").to_string();

    let mut target = suffixed(folder, &format!("_{}", stamp));
    let mut n = 1;
    while target.exists() {
        target = suffixed(folder, &format!("_{}-{}", stamp, n));
        n += 1;
    }

    warn!(
        "Folder {} exists, renaming to {} to avoid losing files",
        folder.display(),
        target.display()
    );
    fs::rename(folder, &target).map_err(|e| BinError::io(folder, "renaming existing bin folder", e))?;
    Ok(Some(target))
}

fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kmer::Normalization;
    use crate::model::BinId;
    use pretty_assertions::assert_eq;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    const BASES: [u8; 4] = [b'A', b'C', b'G', b'T'];

    /// 20 distinct 12-base reads: the read index spelled in base 4, padded with A
    fn scenario_reads() -> Vec<Vec<u8>> {
        (0..20u32)
            .map(|i| {
                let mut seq = vec![b'A'; 8];
                seq.push(BASES[(i / 16) as usize % 4]);
                seq.push(BASES[(i / 4) as usize % 4]);
                seq.push(BASES[i as usize % 4]);
                seq.push(b'T');
                seq
            })
            .collect()
    }

    fn write_fastq(path: &Path, reads: &[Vec<u8>]) -> anyhow::Result<()> {
        let mut file = File::create(path)?;
        for (i, seq) in reads.iter().enumerate() {
            writeln!(file, "@read{} sample", i)?;
            file.write_all(seq)?;
            writeln!(file, "\n+")?;
            file.write_all(&vec![b'I'; seq.len()])?;
            writeln!(file)?;
        }
        Ok(())
    }

    /// Predictor mapping each known feature vector to `read index mod 3`
    fn index_mod_3(extractor: &FeatureExtractor, reads: &[Vec<u8>]) -> impl Fn(&[f64]) -> BinId + Send + Sync {
        let table: Vec<Vec<f64>> = reads
            .iter()
            .map(|s| extractor.extract(s).unwrap().values)
            .collect();
        move |features: &[f64]| -> BinId {
            let idx = table.iter().position(|v| v.as_slice() == features).unwrap();
            (idx % 3) as BinId
        }
    }

    fn parse_marker(description: &str) -> Option<BinId> {
        description
            .strip_prefix("bin_id=")?
            .split('|')
            .next()?
            .parse()
            .ok()
    }

    fn context<'a>(input: &Path, predictor: &'a dyn BinPredictor, chunk_size: usize) -> BinningContext<'a> {
        BinningContext {
            input: input.to_path_buf(),
            param: "miniKM_4mer_s10000".to_string(),
            extractor: FeatureExtractor::new(4, true, Normalization::PerWindowAndK),
            predictor,
            max_open: 0,
            chunk_size,
            count_total: true,
            show_progress: false,
        }
    }

    fn run_scenario(chunk_size: usize) -> anyhow::Result<()> {
        let dir = tempdir()?;
        let input = dir.path().join("sample.fastq");
        let reads = scenario_reads();
        write_fastq(&input, &reads)?;

        let extractor = FeatureExtractor::new(4, true, Normalization::PerWindowAndK);
        let predictor = index_mod_3(&extractor, &reads);
        let mut pipeline = BinningPipeline::new(context(&input, &predictor, chunk_size));
        let outcome = pipeline.run()?;

        assert_eq!(pipeline.state(), PipelineState::Done);
        assert_eq!(outcome.reads_seen, 20);
        assert_eq!(outcome.dropped.total(), 0);
        assert_eq!(outcome.registry.bin_ids(), vec![0, 1, 2]);
        assert_eq!(outcome.folder, dir.path().join("miniKM_4mer_s10000"));

        let mut all_ids = Vec::new();
        for (bin, expected) in [(0, 7), (1, 7), (2, 6)] {
            let path = outcome.registry.path(bin).unwrap();
            assert_eq!(path, outcome.folder.join(format!("sample.bin-{}.fastq", bin)));

            let mut ids = Vec::new();
            FastxReader::new(path).process_all(|r| {
                assert_eq!(parse_marker(&r.description), Some(bin));
                assert_eq!(r.qual.as_ref().map(Vec::len), Some(r.seq.len()));
                ids.push(r.id);
                Ok(())
            })?;
            assert_eq!(ids.len(), expected);

            // input order preserved within the bin
            let expected_ids: Vec<String> = (0..20)
                .filter(|i| i % 3 == bin as usize)
                .map(|i| format!("read{}", i))
                .collect();
            assert_eq!(ids, expected_ids);
            all_ids.extend(ids);
        }
        all_ids.sort();
        all_ids.dedup();
        assert_eq!(all_ids.len(), 20);
        Ok(())
    }

    #[test]
    fn test_scenario_sequential() -> anyhow::Result<()> {
        run_scenario(1)
    }

    #[test]
    fn test_scenario_parallel_chunks() -> anyhow::Result<()> {
        run_scenario(6)
    }

    #[test]
    fn test_dropped_reads_are_counted() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let input = dir.path().join("mixed.fasta");
        let mut file = File::create(&input)?;
        writeln!(file, ">ok1\nACGTACGTAC\n>short\nACG\n>ns\nNNNNNNNN\n>ok2\nTTTTGGGG")?;

        let predictor = |_: &[f64]| -> BinId { 4 };
        let mut ctx = context(&input, &predictor, 2);
        ctx.count_total = false;
        let outcome = BinningPipeline::new(ctx).run()?;

        assert_eq!(outcome.reads_seen, 4);
        assert_eq!(outcome.dropped.degenerate, 2);
        assert_eq!(outcome.reads_binned() + outcome.dropped.total(), outcome.reads_seen);
        assert_eq!(outcome.registry.count(4), 2);
        Ok(())
    }

    #[test]
    fn test_ambiguous_reads_dropped_when_strict() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let input = dir.path().join("reads.fasta");
        let mut file = File::create(&input)?;
        writeln!(file, ">a\nACGTNACGTA\n>b\nACGTACGTAC")?;

        let predictor = |_: &[f64]| -> BinId { 0 };
        let mut ctx = context(&input, &predictor, 1);
        ctx.extractor = FeatureExtractor::new(4, false, Normalization::PerWindowAndK);
        let outcome = BinningPipeline::new(ctx).run()?;

        assert_eq!(outcome.dropped.ambiguous, 1);
        assert_eq!(outcome.reads_binned(), 1);
        Ok(())
    }

    #[test]
    fn test_rerun_moves_previous_folder_aside() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let input = dir.path().join("sample.fastq");
        write_fastq(&input, &scenario_reads())?;
        let predictor = |_: &[f64]| -> BinId { 0 };

        let first = BinningPipeline::new(context(&input, &predictor, 4)).run()?;
        assert_eq!(first.renamed_previous, None);
        let second = BinningPipeline::new(context(&input, &predictor, 4)).run()?;
        let third = BinningPipeline::new(context(&input, &predictor, 4)).run()?;

        let moved = second.renamed_previous.expect("first run folder renamed");
        let moved_again = third.renamed_previous.expect("second run folder renamed");
        assert_ne!(moved, moved_again);
        for folder in [&moved, &moved_again, &third.folder] {
            assert_eq!(read_count(&folder.join("sample.bin-0.fastq"))?, 20);
        }
        let name = moved.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("miniKM_4mer_s10000_"), "{}", name);
        Ok(())
    }

    fn read_count(path: &Path) -> anyhow::Result<usize> {
        Ok(FastxReader::new(path).process_all(|_| Ok(()))?)
    }

    #[test]
    fn test_missing_input_fails_before_binning() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("absent.fastq");
        let predictor = |_: &[f64]| -> BinId { 0 };
        let mut pipeline = BinningPipeline::new(context(&input, &predictor, 1));

        assert!(matches!(pipeline.run(), Err(BinError::InputNotFound(_))));
        assert_eq!(pipeline.state(), PipelineState::Failed);
        assert!(!dir.path().join("miniKM_4mer_s10000").exists());
    }
}
