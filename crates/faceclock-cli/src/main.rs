mod config;
mod review;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use config::Config;
use faceclock_core::{
    Action, AttendanceStore, CaptureSource, CheckInError, CheckInSession, Completion, Employee,
    FlowState, NewEmployee, PhotoCategory, PhotoStorage,
};
use faceclock_io::{open_store, HttpVerifier, LocalPhotoStore, StillImageCapture, StoreHandle};
use std::future::Future;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "faceclock", about = "Face-verified attendance check-in")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered employees
    Employees {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Register an employee with a reference photo
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        /// Reference photo (JPEG or any format the image decoder reads)
        #[arg(long)]
        photo: PathBuf,
    },
    /// Check an employee in, gated on face verification
    Checkin {
        /// Employee ID or name
        #[arg(short, long)]
        employee: String,
        /// Captured photo; re-read on every retry
        #[arg(short, long)]
        photo: PathBuf,
    },
    /// Show today's check-ins
    Today {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Query the verification service health endpoint
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Employees { json } => {
            let store = open_store(&config.db_path)?;
            let employees = store.employees().await?;
            if json {
                println!("{}", review::employees_json(&employees)?);
            } else if employees.is_empty() {
                println!("No employees registered");
            } else {
                for employee in &employees {
                    println!("{}", review::employee_line(employee));
                }
            }
        }
        Commands::Register { name, email, photo } => register(&config, name, email, photo).await?,
        Commands::Checkin { employee, photo } => checkin(&config, &employee, photo).await?,
        Commands::Today { json } => {
            let store = open_store(&config.db_path)?;
            let entries = store.today_attendance().await?;
            if json {
                println!("{}", review::attendance_json(&entries)?);
            } else if entries.is_empty() {
                println!("No check-ins today");
            } else {
                for entry in &entries {
                    println!("{}", review::attendance_line(entry));
                }
            }
        }
        Commands::Health => {
            let verifier = verifier(&config)?;
            let health = verifier
                .health()
                .await
                .with_context(|| format!("verification service at {}", verifier.base_url()))?;
            println!("status:   {}", health.status);
            if let Some(version) = &health.deepface_version {
                println!("version:  {version}");
            }
            if !health.available_models.is_empty() {
                println!("models:   {}", health.available_models.join(", "));
            }
            if let Some(error) = &health.error {
                println!("error:    {error}");
            }
            if !health.is_healthy() {
                bail!("verification service is not healthy");
            }
        }
    }

    Ok(())
}

fn verifier(config: &Config) -> Result<HttpVerifier> {
    Ok(HttpVerifier::with_timeouts(
        &config.verifier_url,
        LocalPhotoStore::new(&config.photo_dir),
        config.verify_timeout(),
        config.connect_timeout(),
    )?)
}

async fn register(config: &Config, name: String, email: String, photo: PathBuf) -> Result<()> {
    let name = name.trim().to_string();
    let email = email.trim().to_string();
    if name.is_empty() || email.is_empty() {
        bail!("name and email must not be empty");
    }

    let image = StillImageCapture::new(&photo)
        .capture()
        .with_context(|| format!("reference photo {}", photo.display()))?;
    let photos = LocalPhotoStore::new(&config.photo_dir);
    let locator = photos.upload(image.bytes(), PhotoCategory::Employees).await?;

    let store = open_store(&config.db_path)?;
    let employee = store
        .register_employee(NewEmployee {
            name,
            email,
            photo_locator: Some(locator),
        })
        .await?;
    println!("Registered {} ({})", employee.name, employee.id);
    Ok(())
}

/// Exact ID match first, then a unique case-insensitive name match.
fn find_employee(employees: &[Employee], query: &str) -> Result<Employee> {
    if let Some(e) = employees.iter().find(|e| e.id == query) {
        return Ok(e.clone());
    }
    let matches: Vec<&Employee> = employees
        .iter()
        .filter(|e| e.name.eq_ignore_ascii_case(query))
        .collect();
    match matches.as_slice() {
        [one] => Ok((*one).clone()),
        [] => bail!("no employee matches {query:?}"),
        many => {
            let ids: Vec<&str> = many.iter().map(|e| e.id.as_str()).collect();
            bail!("{query:?} is ambiguous; use one of: {}", ids.join(", "))
        }
    }
}

struct Prompt {
    lines: Lines<BufReader<Stdin>>,
}

impl Prompt {
    fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    /// Read one answer. `None` on EOF or Ctrl-C.
    async fn ask(&mut self, question: &str) -> Result<Option<String>> {
        println!("{question}");
        tokio::select! {
            line = self.lines.next_line() => Ok(line?),
            _ = tokio::signal::ctrl_c() => Ok(None),
        }
    }
}

type Session = CheckInSession<HttpVerifier, LocalPhotoStore, StoreHandle>;

async fn checkin(config: &Config, query: &str, photo: PathBuf) -> Result<()> {
    let store = open_store(&config.db_path)?;
    let mut session: Session =
        CheckInSession::new(verifier(config)?, LocalPhotoStore::new(&config.photo_dir), store);

    let employees = session.employees().await?;
    let employee = find_employee(&employees, query)?;
    println!("Checking in {}", employee.name);
    session.select(employee)?;

    let mut source = StillImageCapture::new(photo);
    let mut prompt = Prompt::new();
    let mut recapture = false;

    loop {
        match session.flow().state() {
            FlowState::CapturingPhoto => {
                if recapture {
                    let question = format!(
                        "Replace {} with a new photo and press Enter, or type cancel",
                        source.path().display()
                    );
                    match prompt.ask(&question).await? {
                        Some(answer) if answer.trim().is_empty() => {}
                        _ => {
                            session.cancel()?;
                            continue;
                        }
                    }
                }
                recapture = true;
                verify(&mut session, &mut source).await?;
            }
            FlowState::ReviewingResult => review_step(&mut session, &mut prompt).await?,
            FlowState::Committed => {
                if let Some(record) = session.flow().committed_record() {
                    println!(
                        "Checked in at {} ({})",
                        record.checked_in_at.with_timezone(&chrono::Local).format("%H:%M:%S"),
                        record.verification.label()
                    );
                }
                return Ok(());
            }
            FlowState::Cancelled => {
                println!("Check-in cancelled");
                return Ok(());
            }
            other => bail!("check-in stuck in state {other}"),
        }
    }
}

/// Capture and verify; Ctrl-C while the request is in flight cancels the
/// check-in.
async fn verify(session: &mut Session, source: &mut StillImageCapture) -> Result<()> {
    let cancel = CancellationToken::new();
    let watcher = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    println!("Verifying...");
    let result = session.capture_and_verify(source, &cancel).await;
    watcher.abort();

    match result {
        Ok(Completion::Applied(_)) | Ok(Completion::Discarded) => Ok(()),
        Err(CheckInError::Capture(e)) => {
            eprintln!("Capture failed: {e}");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

const COMMIT_NOTICE: &str = "Check-in is being recorded and cannot be interrupted; please wait";

/// Drive `work` to completion. An interrupt arriving meanwhile is reported,
/// not acted on, so a commit is never abandoned between upload and insert.
async fn run_uninterruptible<F: Future>(
    work: F,
    interrupt: impl Future<Output = ()>,
    notice: &str,
) -> F::Output {
    tokio::pin!(work);
    tokio::pin!(interrupt);
    let mut notified = false;
    loop {
        tokio::select! {
            out = &mut work => return out,
            _ = &mut interrupt, if !notified => {
                eprintln!("{notice}");
                notified = true;
            }
        }
    }
}

async fn review_step(session: &mut Session, prompt: &mut Prompt) -> Result<()> {
    let Some(attempt) = session.flow().attempt() else {
        bail!("no attempt under review");
    };
    println!("\n{}", review::summary(attempt));

    let actions = session.flow().available_actions();
    let Some(answer) = prompt.ask(&review::choices(&actions)).await? else {
        session.cancel()?;
        return Ok(());
    };
    let Some(action) = review::parse_choice(&answer, &actions) else {
        eprintln!("Please answer one of {}", review::choices(&actions));
        return Ok(());
    };

    match action {
        Action::Confirm => {
            let interrupt = async {
                if tokio::signal::ctrl_c().await.is_err() {
                    std::future::pending::<()>().await;
                }
            };
            let committed =
                run_uninterruptible(session.confirm_and_commit(), interrupt, COMMIT_NOTICE).await;
            if let Err(e) = committed {
                // The attempt stays under review; confirming again retries.
                eprintln!("{e}");
            }
        }
        Action::AcknowledgeBypass => session.acknowledge_bypass()?,
        Action::Retry => session.retry()?,
        Action::Cancel => session.cancel()?,
        other => bail!("unexpected action {other}"),
    }
    Ok(())
}
