use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use clap::{Parser, Subcommand};

// `#[zbus::proxy]` generates `ClockfaceProxy` from the daemon's
// org.freedesktop.Clockface1 interface. Every method replies with JSON.
#[zbus::proxy(
    interface = "org.freedesktop.Clockface1",
    default_service = "org.freedesktop.Clockface1",
    default_path = "/org/freedesktop/Clockface1"
)]
trait Clockface {
    async fn select_mode(&self, shift: &str, direction: &str) -> zbus::Result<String>;
    async fn presence_frame(&self, image_b64: &str, descriptor_json: &str)
        -> zbus::Result<String>;
    async fn cancel(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
    async fn enroll(
        &self,
        enrollee_id: &str,
        display_name: &str,
        slot: &str,
        image_b64: &str,
        descriptor_json: &str,
    ) -> zbus::Result<String>;
    async fn list_enrollees(&self) -> zbus::Result<String>;
    async fn today_records(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "clockface", about = "Clockface attendance kiosk CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Select shift and direction for the next clock attempt
    Select {
        /// Shift: Morning or Afternoon
        shift: String,
        /// Direction: In or Out
        direction: String,
    },
    /// Submit one capture frame from an image file
    Frame {
        /// Image file (PNG or JPEG)
        image: PathBuf,
        /// File holding the face descriptor as a JSON float array
        #[arg(short, long)]
        descriptor: Option<PathBuf>,
    },
    /// Cancel the session and return to idle
    Cancel,
    /// Show daemon status
    Status,
    /// Enroll a person or update one of their descriptor slots
    Enroll {
        /// Existing enrollee id; omit to create a new enrollee
        #[arg(long)]
        id: Option<String>,
        /// Display name
        #[arg(short, long)]
        name: String,
        /// Slot: front, left, right, tilt or legacy
        #[arg(short, long, default_value = "front")]
        slot: String,
        /// Reference image file
        #[arg(long)]
        image: Option<PathBuf>,
        /// File holding the face descriptor as a JSON float array
        #[arg(long)]
        descriptor: Option<PathBuf>,
    },
    /// List enrolled people and their filled slots
    List,
    /// Show today's attendance records
    Today,
}

fn read_image_b64(path: &Path) -> Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("reading image {}", path.display()))?;
    Ok(BASE64.encode(bytes))
}

fn read_descriptor(path: Option<&PathBuf>) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading descriptor {}", path.display())),
        None => Ok(String::new()),
    }
}

/// Reprint a JSON reply indented; fall back to the raw string if the
/// daemon ever replies with something else.
fn print_reply(reply: &str) {
    match serde_json::from_str::<serde_json::Value>(reply) {
        Ok(value) => println!("{:#}", value),
        Err(_) => println!("{reply}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = zbus::Connection::session()
        .await
        .context("connecting to the session bus")?;
    let proxy = ClockfaceProxy::new(&conn)
        .await
        .context("reaching clockfaced")?;

    match cli.command {
        Commands::Select { shift, direction } => {
            print_reply(&proxy.select_mode(&shift, &direction).await?);
        }
        Commands::Frame { image, descriptor } => {
            let image_b64 = read_image_b64(&image)?;
            let descriptor_json = read_descriptor(descriptor.as_ref())?;
            print_reply(&proxy.presence_frame(&image_b64, &descriptor_json).await?);
        }
        Commands::Cancel => {
            print_reply(&proxy.cancel().await?);
        }
        Commands::Status => {
            print_reply(&proxy.status().await?);
        }
        Commands::Enroll {
            id,
            name,
            slot,
            image,
            descriptor,
        } => {
            let image_b64 = match &image {
                Some(path) => read_image_b64(path)?,
                None => String::new(),
            };
            let descriptor_json = read_descriptor(descriptor.as_ref())?;
            let enrollee_id = proxy
                .enroll(
                    id.as_deref().unwrap_or(""),
                    &name,
                    &slot,
                    &image_b64,
                    &descriptor_json,
                )
                .await?;
            println!("{enrollee_id}");
        }
        Commands::List => {
            print_reply(&proxy.list_enrollees().await?);
        }
        Commands::Today => {
            print_reply(&proxy.today_records().await?);
        }
    }

    Ok(())
}
