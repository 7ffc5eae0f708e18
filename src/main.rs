use astro_tiler::config::{self, PipelineConfig};
use astro_tiler::imaging::{ImageBackend, RustBackend, plan_pyramid};
use astro_tiler::job::{JobId, JobRecord, JobStatus};
use astro_tiler::process::{JobOutcome, Orchestrator};
use astro_tiler::queue::{ChannelQueue, JobQueue, SubprocessQueue, run_worker};
use astro_tiler::store::{JobStore, JsonJobStore, StoreError};
use astro_tiler::output;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::error;

fn version_string() -> &'static str {
    let on_tag = env!("ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once at startup
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "astro-tiler")]
#[command(about = "Deep-zoom tile pyramids for large astronomical images")]
#[command(long_about = "\
Deep-zoom tile pyramids for large astronomical images

Each submitted source becomes a job record. Running a job validates the TIFF
source, writes a bounded thumbnail, and renders a Deep Zoom tile pyramid:

  media/
  ├── config.toml                     # Optional pipeline config
  ├── images/m31.tif                  # Submitted sources
  ├── jobs/job_7.json                 # Job records (status, zoom depth, size)
  ├── thumbnails/job_7_thumb.jpg      # 512x512-bounded preview
  └── tiles/image_7/
      ├── image_7.dzi                 # Descriptor, written last
      └── image_7_files/<level>/<col>_<row>.jpeg

Job status moves PENDING → PROCESSING → COMPLETED | FAILED.
'tile' exits 0 when the job completes, 1 when it fails, 2 when it cannot run.

Run 'astro-tiler gen-config' to generate a documented config.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Storage root for sources, records, thumbnails and tiles
    #[arg(long, default_value = "media", global = true)]
    media_root: PathBuf,

    /// Config file (default: <media-root>/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the tiling pipeline for one job
    Tile {
        /// Job record identifier
        job_id: JobId,
    },
    /// Copy a source into the media root, create a job and dispatch it
    Submit {
        /// Source TIFF
        source: PathBuf,
        /// Display name (default: file stem)
        #[arg(long)]
        name: Option<String>,
        /// Only create the PENDING record
        #[arg(long, conflicts_with = "wait")]
        no_dispatch: bool,
        /// Run the job in this process and wait for it
        #[arg(long)]
        wait: bool,
    },
    /// Show a job record
    Status {
        /// Job record identifier
        job_id: JobId,
    },
    /// Validate a source without tiling it
    Check {
        /// Source TIFF
        source: PathBuf,
    },
    /// Print a stock config.toml with all options documented
    GenConfig,
}

const EXIT_FAILED: u8 = 1;
const EXIT_NOT_RUN: u8 = 2;

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    init_tracing();
    let cli = Cli::parse();

    if let Command::GenConfig = cli.command {
        print!("{}", config::stock_config_toml());
        return Ok(ExitCode::SUCCESS);
    }

    let config = match config::load_config(&cli.media_root, cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "configuration not loaded");
            return Ok(ExitCode::from(EXIT_NOT_RUN));
        }
    };

    match cli.command {
        Command::Tile { job_id } => {
            init_thread_pool(&config.processing);
            let store = JsonJobStore::new(config.jobs_root());
            let orchestrator = Orchestrator::new(config, RustBackend::new(), store);
            let result = with_progress(orchestrator, |orch| orch.run(job_id))?;
            Ok(match result {
                Ok(outcome) => outcome_code(&outcome),
                Err(e) => {
                    error!(job_id = %job_id, error = %e, "job not run");
                    ExitCode::from(EXIT_NOT_RUN)
                }
            })
        }
        Command::Submit {
            source,
            name,
            no_dispatch,
            wait,
        } => {
            let relative = import_source(&source, &config)?;
            let name = name.unwrap_or_else(|| file_stem(&source));
            let store = JsonJobStore::new(config.jobs_root());
            let record = store.create(name, relative)?;
            println!("Created job {}", record.id);

            if wait {
                init_thread_pool(&config.processing);
                let job_id = record.id;
                let orchestrator = Orchestrator::new(config, RustBackend::new(), store);
                let finished = with_progress(
                    orchestrator,
                    |orch| -> Result<JobRecord, Box<dyn std::error::Error>> {
                        let (queue, jobs) = ChannelQueue::channel();
                        queue.enqueue(job_id)?;
                        drop(queue);
                        run_worker(orch, jobs);
                        Ok(orch.store().load(job_id)?)
                    },
                )??;
                return Ok(status_code(&finished));
            }
            if !no_dispatch {
                SubprocessQueue::current_exe(forwarded_args(&cli.media_root, cli.config.as_deref()))?
                    .enqueue(record.id)?;
                println!("Dispatched job {}", record.id);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Status { job_id } => {
            match JsonJobStore::new(config.jobs_root()).load(job_id) {
                Ok(record) => {
                    output::print_record(&record);
                    Ok(ExitCode::SUCCESS)
                }
                Err(StoreError::NotFound(id)) => {
                    error!(job_id = %id, "no such job");
                    Ok(ExitCode::from(EXIT_NOT_RUN))
                }
                Err(e) => Err(e.into()),
            }
        }
        Command::Check { source } => match RustBackend::new().validate(&source) {
            Ok(info) => {
                let plan = plan_pyramid(
                    info.dimensions.width,
                    info.dimensions.height,
                    config.tiles.size,
                );
                for line in output::format_check(
                    &source.display().to_string(),
                    &info,
                    plan.max_zoom_level,
                ) {
                    println!("{}", line);
                }
                Ok(ExitCode::SUCCESS)
            }
            Err(e) => {
                error!(path = %source.display(), error = %e, "source rejected");
                Ok(ExitCode::from(EXIT_FAILED))
            }
        },
        Command::GenConfig => Ok(ExitCode::SUCCESS),
    }
}

/// Structured logs go to stderr; stdout carries the progress lines.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Size the global rayon pool that tiles and thumbnails encode on.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = processing.tile_workers();
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}

/// Run `f` with a printer thread formatting the orchestrator's events.
///
/// The orchestrator (and with it the event sender) is dropped before the
/// printer is joined, so the printer always drains and exits.
fn with_progress<S: JobStore, T>(
    orchestrator: Orchestrator<RustBackend, S>,
    f: impl FnOnce(&Orchestrator<RustBackend, S>) -> T,
) -> Result<T, Box<dyn std::error::Error>> {
    let (tx, rx) = std::sync::mpsc::channel();
    let printer = std::thread::spawn(move || {
        for event in rx {
            for line in output::format_process_event(&event) {
                println!("{}", line);
            }
        }
    });
    let orchestrator = orchestrator.with_events(tx);
    let result = f(&orchestrator);
    drop(orchestrator);
    printer
        .join()
        .map_err(|_| "progress printer panicked")?;
    Ok(result)
}

fn outcome_code(outcome: &JobOutcome) -> ExitCode {
    status_code(outcome.record())
}

fn status_code(record: &JobRecord) -> ExitCode {
    match record.status() {
        JobStatus::Completed => ExitCode::SUCCESS,
        JobStatus::Failed => ExitCode::from(EXIT_FAILED),
        JobStatus::Pending | JobStatus::Processing => ExitCode::from(EXIT_NOT_RUN),
    }
}

/// Global flags a dispatched `tile` child needs to see the same storage.
fn forwarded_args(media_root: &Path, config: Option<&Path>) -> Vec<String> {
    let mut args = vec![
        "--media-root".to_string(),
        absolute(media_root).display().to_string(),
    ];
    if let Some(path) = config {
        args.push("--config".to_string());
        args.push(absolute(path).display().to_string());
    }
    args
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Copy `source` into the images directory under a free name.
///
/// Returns the copy's path relative to the media root, as stored on the record.
fn import_source(source: &Path, config: &PipelineConfig) -> std::io::Result<String> {
    let images = config.images_root();
    std::fs::create_dir_all(&images)?;

    let file_name = source
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .ok_or_else(|| std::io::Error::other(format!("{} is not a file", source.display())))?;
    let stem = file_stem(source);
    let extension = source
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut candidate = file_name;
    let mut n = 1;
    while images.join(&candidate).exists() {
        candidate = format!("{stem}-{n}{extension}");
        n += 1;
    }
    std::fs::copy(source, images.join(&candidate))?;
    Ok(format!("{}/{}", config.images_dir, candidate))
}
