use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::persist;
use std::path::{Path, PathBuf};

// `#[zbus::proxy]` generates `RollcallProxy` (async) for the daemon interface.
#[zbus::proxy(
    interface = "org.rollcall.Rollcall1",
    default_service = "org.rollcall.Rollcall1",
    default_path = "/org/rollcall/Rollcall1"
)]
trait Rollcall {
    async fn register(&self, student_id: &str, name: &str, encodings_json: &str) -> zbus::Result<u32>;
    async fn identify(&self, probes_json: &str) -> zbus::Result<String>;
    async fn pending(&self) -> zbus::Result<String>;
    async fn confirm(&self, pending_id: &str, accept: bool, correct_student_id: &str) -> zbus::Result<bool>;
    async fn remove_student(&self, student_id: &str) -> zbus::Result<bool>;
    async fn list_students(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
    async fn update_settings(&self, settings_json: &str) -> zbus::Result<String>;
    async fn reload_settings(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall face-matching CLI")]
struct Cli {
    /// Talk to a daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a student from a JSON file of feature vectors
    Register {
        /// Student ID
        id: String,
        /// Display name
        #[arg(short, long, default_value = "")]
        name: String,
        /// JSON file: an array of vectors
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Match the faces of one frame from a JSON file of probe vectors
    Identify {
        #[arg(short, long)]
        file: PathBuf,
    },
    /// List matches awaiting confirmation
    Pending,
    /// Confirm (or reject) a pending match
    Confirm {
        /// Pending confirmation ID
        id: String,
        /// Reject instead of confirming
        #[arg(long)]
        reject: bool,
        /// Record the face for this student instead of the proposed one
        #[arg(long)]
        student: Option<String>,
    },
    /// Remove a student and their gallery
    Remove {
        /// Student ID to remove
        id: String,
    },
    /// List registered students
    List,
    /// Show daemon status
    Status,
    /// Change matching settings
    Settings {
        #[arg(long)]
        low: Option<f32>,
        #[arg(long)]
        high: Option<f32>,
        #[arg(long)]
        adaptive: Option<bool>,
        #[arg(long)]
        max_encodings: Option<usize>,
    },
    /// Re-read the daemon's settings file
    Reload,
    /// Inspect a gallery file without the daemon
    Inspect {
        path: PathBuf,
        /// Expected vector dimension
        #[arg(short, long, default_value_t = 128)]
        dimension: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Commands::Inspect { path, dimension } = &cli.command {
        return inspect(path, *dimension);
    }

    tracing::debug!(system = cli.system, "connecting to rollcalld");
    let conn = if cli.system {
        zbus::Connection::system().await?
    } else {
        zbus::Connection::session().await?
    };
    let proxy = RollcallProxy::new(&conn)
        .await
        .context("connecting to rollcalld")?;

    match cli.command {
        Commands::Register { id, name, file } => {
            let encodings = read_vectors(&file)?;
            let len = proxy.register(&id, &name, &encodings).await?;
            println!("Registered {id} ({len} encodings)");
        }
        Commands::Identify { file } => {
            let probes = read_vectors(&file)?;
            print_json(&proxy.identify(&probes).await?)?;
        }
        Commands::Pending => {
            print_json(&proxy.pending().await?)?;
        }
        Commands::Confirm {
            id,
            reject,
            student,
        } => {
            let learned = proxy
                .confirm(&id, !reject, student.as_deref().unwrap_or(""))
                .await?;
            match (reject, learned) {
                (true, _) => println!("Rejected {id}"),
                (false, true) => println!("Confirmed {id}; gallery updated"),
                (false, false) => println!("Confirmed {id}; adaptive learning is off"),
            }
        }
        Commands::Remove { id } => {
            if proxy.remove_student(&id).await? {
                println!("Removed {id}");
            } else {
                println!("No student {id}");
            }
        }
        Commands::List => {
            print_json(&proxy.list_students().await?)?;
        }
        Commands::Status => {
            print_json(&proxy.status().await?)?;
        }
        Commands::Settings {
            low,
            high,
            adaptive,
            max_encodings,
        } => {
            let status: serde_json::Value = serde_json::from_str(&proxy.status().await?)?;
            let mut settings = status["engine"]["settings"].clone();
            if let Some(v) = low {
                settings["low_threshold"] = v.into();
            }
            if let Some(v) = high {
                settings["high_threshold"] = v.into();
            }
            if let Some(v) = adaptive {
                settings["adaptive_learning"] = v.into();
            }
            if let Some(v) = max_encodings {
                settings["max_encodings"] = v.into();
            }
            print_json(&proxy.update_settings(&settings.to_string()).await?)?;
        }
        Commands::Reload => {
            print_json(&proxy.reload_settings().await?)?;
        }
        Commands::Inspect { .. } => unreachable!("handled before connecting"),
    }

    Ok(())
}

/// Read a JSON array of vectors, re-encoded compactly for the wire.
fn read_vectors(path: &Path) -> Result<String> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let vectors: Vec<Vec<f32>> = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a JSON array of vectors", path.display()))?;
    Ok(serde_json::to_string(&vectors)?)
}

fn print_json(json: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn inspect(path: &Path, dimension: usize) -> Result<()> {
    anyhow::ensure!(dimension > 0, "dimension must be positive");
    let (store, report) = persist::load(path, dimension, usize::MAX)
        .with_context(|| format!("loading {}", path.display()))?;

    println!(
        "{}: {} students, {} encodings (dimension {})",
        path.display(),
        report.students,
        report.encodings,
        store.dimension()
    );
    for student in store.students() {
        let len = store.gallery(&student.id).map_or(0, |g| g.len());
        match &student.name {
            Some(name) => println!("  {} ({name}): {len}", student.id),
            None => println!("  {}: {len}", student.id),
        }
    }
    for corrupt in &report.skipped_students {
        println!("  skipped: {corrupt}");
    }
    for corrupt in &report.skipped {
        println!("  skipped: {corrupt}");
    }
    Ok(())
}
