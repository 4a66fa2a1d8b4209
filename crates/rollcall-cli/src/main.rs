use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::{CapturedImage, Class, FeatureWorker, NewStudent, RosterError, ThumbnailExtractor};
use rollcall_engine::{AttendanceEngine, Config, RosterManager, Table};
use rollcall_store::{spawn_poller, RosterObserver, RosterStore, SqliteDocumentStore};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rollcall", about = "Classroom attendance by face check-in")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage classes
    Class {
        #[command(subcommand)]
        command: ClassCommand,
    },
    /// Manage individual students
    Student {
        #[command(subcommand)]
        command: StudentCommand,
    },
    /// Import students from a JSON table (array of rows, header row first)
    Import {
        join_code: String,
        file: PathBuf,
    },
    /// Export the attendance sheet as a JSON table
    Export {
        join_code: String,
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Register a student's reference face
    Enroll {
        join_code: String,
        /// Student ID as listed on the roster
        student: String,
        /// Captured image (JPEG or PNG)
        image: PathBuf,
    },
    /// Check a student in against their reference face
    Verify {
        join_code: String,
        student: String,
        image: PathBuf,
    },
    /// Show a student's check-in confirmation
    Ticket { join_code: String, student: String },
    /// Follow a class roster until Ctrl-C
    Watch { join_code: String },
}

#[derive(Subcommand)]
enum ClassCommand {
    /// Create a class, optionally seeded from a JSON table
    Create {
        name: String,
        join_code: String,
        #[arg(long)]
        roster: Option<PathBuf>,
    },
    /// List classes, newest first
    List,
    /// Show a class roster and its counts
    Show { join_code: String },
    /// Mark a class as completed
    Complete { join_code: String },
}

#[derive(Subcommand)]
enum StudentCommand {
    /// Add one student to a class
    Add {
        join_code: String,
        external_id: String,
        full_name: String,
        section: String,
        /// Sequence number; defaults to after the current last student
        #[arg(long)]
        seq: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("loading configuration")?;

    if let Err(err) = run(cli.command, &config).await {
        if let Some(roster_err) = err.downcast_ref::<RosterError>() {
            eprintln!("{}", roster_err.user_message());
        }
        return Err(err);
    }
    Ok(())
}

async fn open_store(config: &Config) -> Result<RosterStore<SqliteDocumentStore>> {
    let docs = SqliteDocumentStore::open(&config.db_path)
        .await
        .with_context(|| format!("opening roster database {}", config.db_path.display()))?;
    tracing::debug!(path = %config.db_path.display(), "roster database open");
    Ok(RosterStore::new(docs).with_retry(config.retry_policy()))
}

fn engine(
    store: RosterStore<SqliteDocumentStore>,
    config: &Config,
) -> Result<AttendanceEngine<SqliteDocumentStore, FeatureWorker>> {
    let features =
        FeatureWorker::spawn(ThumbnailExtractor::new()).context("starting feature worker")?;
    Ok(AttendanceEngine::new(store, features).with_threshold(config.match_threshold))
}

async fn run(command: Commands, config: &Config) -> Result<()> {
    let store = open_store(config).await?;

    match command {
        Commands::Class { command } => run_class(command, RosterManager::new(store)).await?,
        Commands::Student {
            command:
                StudentCommand::Add {
                    join_code,
                    external_id,
                    full_name,
                    section,
                    seq,
                },
        } => {
            let manager = RosterManager::new(store);
            let class = manager.find(&join_code).await?;
            let mut student = NewStudent::new(external_id, full_name, section);
            student.sequence_number = seq;
            let added = manager.add_student(&class.id, student).await?;
            println!(
                "Added #{} {} {}",
                added.value.sequence_number, added.value.external_id, added.value.full_name
            );
        }
        Commands::Import { join_code, file } => {
            let manager = RosterManager::new(store);
            let class = manager.find(&join_code).await?;
            let report = manager.import_students(&class.id, &read_table(&file)?).await?;
            println!(
                "Imported {} student(s), skipped {} incomplete row(s)",
                report.added.len(),
                report.dropped
            );
        }
        Commands::Export { join_code, output } => {
            let manager = RosterManager::new(store);
            let class = manager.find(&join_code).await?;
            let json = serde_json::to_string_pretty(&manager.export_rows(&class.id).await?.into_rows())?;
            match output {
                Some(path) => std::fs::write(&path, json)
                    .with_context(|| format!("writing {}", path.display()))?,
                None => println!("{json}"),
            }
        }
        Commands::Enroll {
            join_code,
            student,
            image,
        } => {
            let engine = engine(store, config)?;
            let class = engine.join(&join_code).await?;
            let record = engine.select_student(&class.id, &student).await?;
            let done = engine.enroll(&class.id, &record.id, &read_image(&image)?).await?;
            println!("Enrolled {} {}", done.student.external_id, done.student.full_name);
        }
        Commands::Verify {
            join_code,
            student,
            image,
        } => {
            let engine = engine(store, config)?;
            let class = engine.join(&join_code).await?;
            let record = engine.select_student(&class.id, &student).await?;
            let done = engine.verify(&class.id, &record.id, &read_image(&image)?).await?;
            println!(
                "Checked in {} {} (distance {:.3})",
                done.student.external_id, done.student.full_name, done.distance
            );
        }
        Commands::Ticket { join_code, student } => {
            let engine = engine(store, config)?;
            let class = engine.join(&join_code).await?;
            let record = engine.select_student(&class.id, &student).await?;
            match engine.ticket(&class.id, &record.id).await? {
                Some(ticket) => println!("{}", serde_json::to_string_pretty(&ticket)?),
                None => println!("{} has not checked in", record.external_id),
            }
        }
        Commands::Watch { join_code } => {
            let class = store.find_by_join_code(&join_code).await?;
            watch(store, class, config).await?;
        }
    }

    Ok(())
}

async fn run_class(command: ClassCommand, manager: RosterManager<SqliteDocumentStore>) -> Result<()> {
    match command {
        ClassCommand::Create {
            name,
            join_code,
            roster,
        } => {
            let students = match roster {
                Some(path) => rollcall_engine::parse_students(&read_table(&path)?)?.students,
                None => Vec::new(),
            };
            let created = manager.create_class(&name, &join_code, students).await?;
            println!(
                "Created {} ({}) with {} student(s)",
                created.value.display_name,
                created.value.join_code,
                created.value.roster.len()
            );
        }
        ClassCommand::List => {
            for class in manager.list_classes().await? {
                println!(
                    "{}\t{}\t{:?}\t{} student(s)",
                    class.join_code,
                    class.display_name,
                    class.status,
                    class.roster.len()
                );
            }
        }
        ClassCommand::Show { join_code } => {
            let class = manager.find(&join_code).await?;
            print_roster(&class);
        }
        ClassCommand::Complete { join_code } => {
            let class = manager.find(&join_code).await?;
            manager.complete_class(&class.id).await?;
            println!("{} completed", class.join_code);
        }
    }
    Ok(())
}

async fn watch(store: RosterStore<SqliteDocumentStore>, class: Class, config: &Config) -> Result<()> {
    let poller = spawn_poller(RosterObserver::new(store, class.id.clone()), config.poll_interval);
    let mut snapshots = poller.subscribe();
    println!("Watching {} ({}), Ctrl-C to stop", class.display_name, class.join_code);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(snapshot) = snapshots.borrow_and_update().as_ref() {
                    let stats = snapshot.class.stats();
                    println!(
                        "rev {}: {}/{} present, {} enrolled, {} absent",
                        snapshot.revision, stats.present, stats.total, stats.enrolled, stats.absent
                    );
                }
            }
        }
    }

    poller.shutdown().await;
    Ok(())
}

fn print_roster(class: &Class) {
    let stats = class.stats();
    println!("{} ({}) {:?}", class.display_name, class.join_code, class.status);
    println!(
        "{} student(s): {} enrolled, {} present, {} absent, {} not marked",
        stats.total, stats.enrolled, stats.present, stats.absent, stats.not_marked
    );
    for s in &class.roster {
        println!(
            "{:>3}  {:<12} {:<28} {:<8} {:?}",
            s.sequence_number,
            s.external_id,
            s.full_name,
            s.section_label,
            s.enrollment_state()
        );
    }
}

fn read_image(path: &Path) -> Result<CapturedImage> {
    let bytes = std::fs::read(path).with_context(|| format!("reading image {}", path.display()))?;
    Ok(CapturedImage::new(bytes))
}

/// Read a JSON array of rows. Non-string cells are taken as their JSON text.
fn read_table(path: &Path) -> Result<Table> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let rows: Vec<Vec<serde_json::Value>> =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(Table::from_rows(
        rows.into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect(),
    ))
}

fn cell_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}
