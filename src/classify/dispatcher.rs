use std::ffi::OsString;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use super::types::{Classifier, ClassifierJob, DbType, JobOutcome, JobStatus};
use crate::error::{BinError, Result};
use crate::io::BinRegistry;
use crate::model::BinId;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// What to classify for one input file
pub enum DispatchTarget<'a> {
    /// Each bin file against the sub-database named after its bin id
    Bins(&'a BinRegistry),
    /// The unbinned input file against the complete database
    Full,
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub classifier: Classifier,
    /// Overrides the classifier's default program
    pub executable: Option<PathBuf>,
    /// Complete database (full) or folder of per-bin sub-databases (bins)
    pub database_root: PathBuf,
    pub report_folder: PathBuf,
    /// Parameter set name, used in output file names
    pub param: String,
    pub cores: usize,
    pub dry_run: bool,
    pub timeout: Option<Duration>,
}

/// Runs the external classifier once per target, one job at a time.
///
/// Output names are derived from the input name and target label only, so a
/// re-run overwrites the previous reports.
pub struct ClassifierDispatcher {
    config: DispatchConfig,
}

impl ClassifierDispatcher {
    pub fn new(config: DispatchConfig) -> Self {
        ClassifierDispatcher { config }
    }

    fn program(&self) -> OsString {
        match &self.config.executable {
            Some(path) => path.clone().into_os_string(),
            None => self.config.classifier.program().into(),
        }
    }

    /// `<report folder>/<input stem>/<param>.<db type>`
    fn output_prefix(&self, input: &Path, db_type: DbType) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "reads".to_string());
        self.config
            .report_folder
            .join(stem)
            .join(format!("{}.{}", self.config.param, db_type))
    }

    fn job(&self, prefix: &Path, label: &str, bin_id: Option<BinId>, input: &Path, database: PathBuf) -> ClassifierJob {
        let mut base = prefix.as_os_str().to_owned();
        if bin_id.is_some() {
            base.push(format!(".{}", label));
        }
        base.push(format!(".{}", self.config.classifier.name()));

        let mut calls = base.clone();
        calls.push(".out");
        let mut report = base;
        report.push(".report");

        ClassifierJob {
            label: label.to_string(),
            bin_id,
            input: input.to_path_buf(),
            database,
            calls_path: PathBuf::from(calls),
            report_path: PathBuf::from(report),
        }
    }

    /// Plan the jobs for one input file, bins in ascending id order
    pub fn plan(&self, reads: &Path, target: &DispatchTarget) -> Vec<ClassifierJob> {
        match target {
            DispatchTarget::Bins(registry) => {
                let prefix = self.output_prefix(reads, DbType::Bins);
                registry
                    .iter()
                    .map(|(bin_id, path)| {
                        self.job(
                            &prefix,
                            &format!("bin-{}", bin_id),
                            Some(bin_id),
                            path,
                            self.config.database_root.join(bin_id.to_string()),
                        )
                    })
                    .collect()
            }
            DispatchTarget::Full => {
                let prefix = self.output_prefix(reads, DbType::Full);
                vec![self.job(&prefix, "full", None, reads, self.config.database_root.clone())]
            }
        }
    }

    /// Run every planned job. A failing job is recorded and the next one still runs.
    pub fn classify(&self, reads: &Path, target: DispatchTarget) -> Result<Vec<JobOutcome>> {
        let mode = match target {
            DispatchTarget::Bins(_) => DbType::Bins,
            DispatchTarget::Full => DbType::Full,
        };
        info!("Classifying reads of {} with {} setting", reads.display(), mode);
        if let DispatchTarget::Bins(registry) = &target {
            if registry.is_empty() {
                warn!("no reads were binned from {}, nothing to classify", reads.display());
            }
            for bin_id in registry.bin_ids() {
                debug!("bin {}: {} reads", bin_id, registry.count(bin_id));
            }
        }

        let jobs = self.plan(reads, &target);
        if !self.config.dry_run {
            if let Some(folder) = self.output_prefix(reads, mode).parent() {
                fs::create_dir_all(folder).map_err(|e| BinError::io(folder, "creating report folder", e))?;
            }
        }

        let outcomes = jobs.into_iter().map(|job| self.run_job(job)).collect::<Vec<_>>();
        let failed = outcomes.iter().filter(|o| o.is_failed()).count();
        if failed > 0 {
            warn!("{}/{} classifier jobs failed for {}", failed, outcomes.len(), reads.display());
        }
        Ok(outcomes)
    }

    fn run_job(&self, job: ClassifierJob) -> JobOutcome {
        let start = Instant::now();
        let program = self.program();
        let args = self.config.classifier.args(self.config.cores, &job);
        let command = std::iter::once(&program)
            .chain(args.iter())
            .map(|a| a.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ");

        let database_file = job.database.join(self.config.classifier.database_file());
        let database_bytes = fs::metadata(&database_file).map(|m| m.len()).unwrap_or(0);
        let input_bytes = fs::metadata(&job.input).map(|m| m.len()).unwrap_or(0);

        info!(
            "start to classify reads from file ({:.2} MB) {}",
            input_bytes as f64 / 1e6,
            job.input.display()
        );
        info!(
            "with {}, {}. database is ({:.2} GB) {}",
            self.config.classifier,
            job.label,
            database_bytes as f64 / 1e9,
            job.database.display()
        );
        info!("output is {}", job.calls_path.display());
        debug!("{}", command);

        let status = if !job.database.is_dir() {
            let err = BinError::config(format!(
                "database for {} not found: {}",
                job.label,
                job.database.display()
            ));
            error!("{}", err);
            JobStatus::Failed(err.to_string())
        } else if self.config.dry_run {
            info!("dry run, not executing: {}", command);
            JobStatus::DryRun
        } else {
            match self.execute(&program, &args) {
                Ok(stdout) => {
                    if !stdout.is_empty() {
                        debug!("{}", stdout.trim_end());
                    }
                    JobStatus::Succeeded
                }
                Err(e) => {
                    error!("{} failed for {}: {}", self.config.classifier, job.label, e);
                    JobStatus::Failed(e.to_string())
                }
            }
        };

        JobOutcome {
            job,
            command,
            status,
            database_bytes,
            elapsed_secs: start.elapsed().as_secs_f64(),
        }
    }

    /// Spawn the classifier, capture its output and wait, killing it on timeout.
    fn execute(&self, program: &OsString, args: &[OsString]) -> Result<String> {
        let program_name = program.to_string_lossy().into_owned();
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // own process group, so a timeout also reaches helpers the classifier started
            command.process_group(0);
        }
        let mut child = command
            .spawn()
            .map_err(|e| BinError::io(PathBuf::from(program), "spawning classifier", e))?;

        // Drain both pipes on their own threads so a chatty child cannot block
        let stdout = child.stdout.take().map(capture);
        let stderr = child.stderr.take().map(capture);

        let status = match self.config.timeout {
            Some(timeout) => match wait_timeout(&mut child, timeout)? {
                Some(status) => status,
                None => {
                    kill_tree(&mut child);
                    // Capture threads are left detached: a surviving descendant may
                    // still hold the pipes open.
                    drop(stdout);
                    drop(stderr);
                    return Err(BinError::Timeout {
                        program: program_name,
                        limit: timeout,
                    });
                }
            },
            None => child
                .wait()
                .map_err(|e| BinError::io(PathBuf::from(program), "waiting for classifier", e))?,
        };

        let stdout = join(stdout);
        let stderr = join(stderr);
        if !status.success() {
            return Err(BinError::ExternalProcess {
                program: program_name,
                code: status.code(),
                stdout,
                stderr,
            });
        }
        Ok(stdout)
    }
}

fn capture<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join(handle: Option<JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

/// Kill the child and, on unix, every process left in its process group.
fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        let group = format!("-{}", child.id());
        if let Err(e) = Command::new("kill")
            .args(["-KILL", "--", group.as_str()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            warn!("could not kill process group {}: {}", child.id(), e);
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

fn wait_timeout(child: &mut Child, timeout: Duration) -> Result<Option<ExitStatus>> {
    let start = Instant::now();
    loop {
        if let Some(status) = child
            .try_wait()
            .map_err(|e| BinError::io("classifier", "polling classifier", e))?
        {
            return Ok(Some(status));
        }
        if start.elapsed() >= timeout {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}
