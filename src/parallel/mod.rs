//! Dispatching batches of jobs to an execution backend.
//!
//! Callers build a list of jobs and hand it to a `Dispatch` implementation.  The
//! results come back in submission order, whatever the completion order was.  A
//! failing (or panicking) job is reported in its slot and never affects its siblings.

use std::panic::AssertUnwindSafe;

use rayon::prelude::*;

use crate::err::Error;

/// A unit of work.
pub trait Job: Send + Sync {
    /// Result of a successful run.
    type Output: Send;

    /// Name for log and error messages.
    fn name(&self) -> String;

    /// Execute the job.
    fn run(&self) -> Result<Self::Output, anyhow::Error>;
}

/// Result of a single job.
pub type JobResult<T> = Result<T, anyhow::Error>;

/// Capability to execute a batch of jobs.
pub trait Dispatch {
    /// Run all `jobs` and return one result per job, in submission order.
    ///
    /// Returns `Err` only if the backend could not run the batch at all.
    fn submit<J: Job>(&self, jobs: Vec<J>) -> Result<Vec<JobResult<J::Output>>, Error>;
}

/// Render a panic payload.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Run `job`, turning a panic into an error.
fn run_isolated<J: Job>(job: &J) -> JobResult<J::Output> {
    let before = std::time::Instant::now();
    let result = match std::panic::catch_unwind(AssertUnwindSafe(|| job.run())) {
        Ok(result) => result,
        Err(payload) => Err(anyhow::anyhow!(
            "job {} panicked: {}",
            job.name(),
            panic_message(payload.as_ref())
        )),
    };
    match &result {
        Ok(_) => tracing::debug!("job {} done in {:?}", job.name(), before.elapsed()),
        Err(e) => tracing::warn!("job {} failed after {:?}: {}", job.name(), before.elapsed(), e),
    }
    result
}

/// Runs jobs one after another in the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialRunner;

impl Dispatch for SerialRunner {
    fn submit<J: Job>(&self, jobs: Vec<J>) -> Result<Vec<JobResult<J::Output>>, Error> {
        tracing::debug!("running {} job(s) serially", jobs.len());
        Ok(jobs.iter().map(run_isolated).collect())
    }
}

/// Runs jobs on a dedicated Rayon thread pool.
#[derive(Debug)]
pub struct LocalRunner {
    cores: usize,
    pool: rayon::ThreadPool,
}

impl LocalRunner {
    /// Build a runner with `cores` worker threads.
    pub fn new(cores: usize) -> Result<Self, Error> {
        if cores == 0 {
            return Err(Error::Configuration(
                "number of cores must be positive".into(),
            ));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(cores)
            .thread_name(|idx| format!("worker-{}", idx))
            .build()
            .map_err(|e| Error::Dispatch(format!("building Rayon thread pool failed: {}", e)))?;
        Ok(Self { cores, pool })
    }
}

impl Dispatch for LocalRunner {
    fn submit<J: Job>(&self, jobs: Vec<J>) -> Result<Vec<JobResult<J::Output>>, Error> {
        tracing::debug!(
            "running {} job(s) on {} thread(s)",
            jobs.len(),
            self.cores
        );
        Ok(self
            .pool
            .install(|| jobs.par_iter().map(run_isolated).collect::<Vec<_>>()))
    }
}

/// Kind of execution backend.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
    strum::Display,
    strum::EnumString,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Backend {
    /// Threads on the local machine.
    #[default]
    Local,
    /// Submission to a cluster scheduler.
    Cluster,
}

fn default_cores() -> usize {
    1
}

/// Backend descriptor, e.g., `{type = "local", cores = 4}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ParallelConfig {
    /// The backend to use.
    #[serde(rename = "type", default)]
    pub backend: Backend,
    /// Number of cores to use.
    #[serde(default = "default_cores")]
    pub cores: usize,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Local,
            cores: default_cores(),
        }
    }
}

/// A configured backend.
#[derive(Debug)]
pub enum Runner {
    Serial(SerialRunner),
    Local(LocalRunner),
}

impl Dispatch for Runner {
    fn submit<J: Job>(&self, jobs: Vec<J>) -> Result<Vec<JobResult<J::Output>>, Error> {
        match self {
            Runner::Serial(runner) => runner.submit(jobs),
            Runner::Local(runner) => runner.submit(jobs),
        }
    }
}

/// Construct the runner described by `config`.
pub fn parallel_runner(config: &ParallelConfig) -> Result<Runner, Error> {
    match (config.backend, config.cores) {
        (_, 0) => Err(Error::Configuration(
            "number of cores must be positive".into(),
        )),
        (Backend::Cluster, _) => Err(Error::Dispatch(
            "cluster backend is not available in this build".into(),
        )),
        (Backend::Local, 1) => {
            tracing::debug!("using serial runner");
            Ok(Runner::Serial(SerialRunner))
        }
        (Backend::Local, cores) => {
            tracing::debug!("using local runner with {} cores", cores);
            Ok(Runner::Local(LocalRunner::new(cores)?))
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::{parallel_runner, Backend, Dispatch, Job, LocalRunner, ParallelConfig, Runner};
    use crate::err::Error;

    /// Job for testing: sleeps, then fails, panics or returns its index.
    struct TestJob {
        idx: usize,
        sleep_ms: u64,
        fail: bool,
        panic: bool,
    }

    impl TestJob {
        fn ok(idx: usize, sleep_ms: u64) -> Self {
            Self {
                idx,
                sleep_ms,
                fail: false,
                panic: false,
            }
        }
    }

    impl Job for TestJob {
        type Output = usize;

        fn name(&self) -> String {
            format!("test-{}", self.idx)
        }

        fn run(&self) -> Result<usize, anyhow::Error> {
            std::thread::sleep(Duration::from_millis(self.sleep_ms));
            if self.panic {
                panic!("job {} exploded", self.idx);
            }
            if self.fail {
                anyhow::bail!("job {} failed", self.idx);
            }
            Ok(self.idx)
        }
    }

    fn ok_indices<D: Dispatch>(runner: &D, jobs: Vec<TestJob>) -> Vec<Option<usize>> {
        runner
            .submit(jobs)
            .expect("dispatch failed")
            .into_iter()
            .map(|res| res.ok())
            .collect()
    }

    #[rstest::rstest]
    #[case(1)]
    #[case(4)]
    fn results_in_submission_order(#[case] cores: usize) -> Result<(), anyhow::Error> {
        let runner = parallel_runner(&ParallelConfig {
            backend: Backend::Local,
            cores,
        })?;
        // Later jobs finish first.
        let jobs = (0..8).map(|i| TestJob::ok(i, 5 * (8 - i as u64))).collect();

        assert_eq!((0..8).map(Some).collect::<Vec<_>>(), ok_indices(&runner, jobs));

        Ok(())
    }

    #[test]
    fn failure_does_not_drop_siblings() -> Result<(), anyhow::Error> {
        let runner = LocalRunner::new(2)?;
        let mut jobs = (0..4).map(|i| TestJob::ok(i, 1)).collect::<Vec<_>>();
        jobs[1].fail = true;
        jobs[3].fail = true;

        let results = runner.submit(jobs)?;
        assert_eq!(4, results.len());
        assert_eq!(0, *results[0].as_ref().expect("job 0 ok"));
        assert_eq!(
            "job 1 failed",
            results[1].as_ref().expect_err("job 1 failed").to_string()
        );
        assert_eq!(2, *results[2].as_ref().expect("job 2 ok"));
        assert!(results[3].is_err());

        Ok(())
    }

    #[rstest::rstest]
    #[case(1)]
    #[case(3)]
    fn panic_is_reported_as_failure(#[case] cores: usize) -> Result<(), anyhow::Error> {
        let runner = parallel_runner(&ParallelConfig {
            backend: Backend::Local,
            cores,
        })?;
        let mut jobs = (0..3).map(|i| TestJob::ok(i, 1)).collect::<Vec<_>>();
        jobs[0].panic = true;

        let results = runner.submit(jobs)?;
        let msg = results[0].as_ref().expect_err("panicked").to_string();
        assert!(msg.contains("job 0 exploded"), "{}", msg);
        assert!(results[1].is_ok());
        assert!(results[2].is_ok());

        Ok(())
    }

    #[test]
    fn cores_select_backend() -> Result<(), anyhow::Error> {
        assert!(matches!(
            parallel_runner(&ParallelConfig::default())?,
            Runner::Serial(_)
        ));
        assert!(matches!(
            parallel_runner(&ParallelConfig {
                backend: Backend::Local,
                cores: 2
            })?,
            Runner::Local(_)
        ));

        Ok(())
    }

    #[test]
    fn cluster_backend_is_dispatch_error() {
        let res = parallel_runner(&ParallelConfig {
            backend: Backend::Cluster,
            cores: 8,
        });
        assert!(matches!(res, Err(Error::Dispatch(_))));
    }

    #[test]
    fn zero_cores_is_configuration_error() {
        let res = parallel_runner(&ParallelConfig {
            backend: Backend::Local,
            cores: 0,
        });
        assert!(matches!(res, Err(Error::Configuration(_))));
    }

    #[test]
    fn config_from_toml() -> Result<(), anyhow::Error> {
        let config: ParallelConfig = toml::from_str("type = \"cluster\"\ncores = 16\n")?;
        assert_eq!(
            ParallelConfig {
                backend: Backend::Cluster,
                cores: 16
            },
            config
        );
        let config: ParallelConfig = toml::from_str("")?;
        assert_eq!(ParallelConfig::default(), config);

        Ok(())
    }

    #[test]
    fn empty_batch() -> Result<(), anyhow::Error> {
        let runner = LocalRunner::new(2)?;
        assert!(runner.submit(Vec::<TestJob>::new())?.is_empty());

        Ok(())
    }
}
