//! CLI commands for cloudpost using clap.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;

use crate::config::{load_settings_from, load_settings_or_default, Settings};
use crate::dispatcher::Dispatcher;
use crate::mail::GmailBackend;
use crate::nextcloud::{DavEntry, FolderStatus, NextcloudClient};
use crate::protocol::types::{EMAIL_SEND_REQUEST, HEALTH_CHECK};
use crate::protocol::{EmailRequest, Message, Payload};

/// Agent id used for the demonstration client.
const DEMO_CLIENT_ID: &str = "client-agent-001";
const DEMO_FOLDER: &str = "test_folder";
const DEMO_REMOTE_FILE: &str = "test_folder/uploaded_test.txt";
const DEMO_DOWNLOAD: &str = "downloads/downloaded_test.txt";

/// cloudpost - Gmail agent and Nextcloud file operations.
#[derive(Parser)]
#[command(name = "cloudpost")]
#[command(version = "0.1.0")]
#[command(about = "Gmail delivery agent and Nextcloud WebDAV client", long_about = None)]
pub struct Commands {
    /// Settings file (defaults to ~/.cloudpost/settings.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Send a test email through the agent, then run a health check
    GmailDemo {
        /// Recipient (repeatable); overrides demo.to from settings
        #[arg(long)]
        to: Vec<String>,

        /// Carbon-copy recipient (repeatable); overrides demo.cc
        #[arg(long)]
        cc: Vec<String>,
    },

    /// Answer one agent message read from a file or stdin
    Handle {
        /// File holding the JSON message
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Run the Nextcloud connect/list/upload/download demonstration
    NextcloudDemo {
        /// Server URL, e.g. https://cloud.example.com
        #[arg(long, env = "CLOUDPOST_NEXTCLOUD_URL")]
        server_url: Option<String>,

        /// Account name
        #[arg(long, env = "CLOUDPOST_NEXTCLOUD_USER")]
        username: Option<String>,

        /// Password or app password
        #[arg(long, env = "CLOUDPOST_NEXTCLOUD_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
}

impl Commands {
    /// Run the command.
    pub async fn run(&self) -> Result<()> {
        let settings = self.settings()?;
        match &self.command {
            Command::GmailDemo { to, cc } => cmd_gmail_demo(&settings, to, cc).await,
            Command::Handle { file } => cmd_handle(&settings, file.as_deref()).await,
            Command::NextcloudDemo {
                server_url,
                username,
                password,
            } => {
                let server_url = server_url.clone().or_else(|| settings.nextcloud.server_url.clone());
                let username = username.clone().or_else(|| settings.nextcloud.username.clone());
                let password = password.clone().or_else(|| settings.nextcloud.password.clone());
                match (server_url, username, password) {
                    (Some(url), Some(user), Some(pass)) => cmd_nextcloud_demo(&url, &user, &pass).await,
                    _ => bail!(
                        "Nextcloud server URL, username and password are required (flags, CLOUDPOST_NEXTCLOUD_* or settings.nextcloud)"
                    ),
                }
            }
        }
    }

    fn settings(&self) -> Result<Settings> {
        match &self.config {
            Some(path) => Ok(load_settings_from(path)?),
            None => Ok(load_settings_or_default()),
        }
    }
}

fn dispatcher(settings: &Settings) -> Dispatcher<GmailBackend> {
    Dispatcher::new(
        settings.agent.agent_id.clone(),
        GmailBackend::from_config(&settings.gmail),
    )
}

async fn cmd_gmail_demo(settings: &Settings, to: &[String], cc: &[String]) -> Result<()> {
    let to = if to.is_empty() { settings.demo.to.clone() } else { to.to_vec() };
    let cc = if cc.is_empty() { settings.demo.cc.clone() } else { cc.to_vec() };
    if to.is_empty() {
        bail!("No demo recipients: pass --to or set demo.to in settings");
    }

    let mut agent = dispatcher(settings);
    if let Err(e) = agent.connect().await {
        println!("Failed to authenticate. Please check your credentials. ({})", e);
        return Ok(());
    }

    let mut email = EmailRequest::new(
        to,
        "Test Email from Gmail Agent",
        "This is a test email sent using the Gmail Agent with Agent2Agent protocol.",
    );
    if !cc.is_empty() {
        email = email.with_cc(cc);
    }

    let request = Message::new(DEMO_CLIENT_ID, EMAIL_SEND_REQUEST, email.to_payload())
        .with_correlation_id("test-001");
    let response = agent.handle(&request).await;
    println!("Agent Response:");
    println!("{}", response.to_json_pretty()?);

    let health_check = Message::new(DEMO_CLIENT_ID, HEALTH_CHECK, Payload::new());
    let health = agent.handle(&health_check).await;
    println!("\nHealth Check Response:");
    println!("{}", health.to_json_pretty()?);

    Ok(())
}

async fn cmd_handle(settings: &Settings, file: Option<&Path>) -> Result<()> {
    let input = match file {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?,
        None => {
            let mut buf = String::new();
            tokio::io::stdin().read_to_string(&mut buf).await?;
            buf
        }
    };

    let mut agent = dispatcher(settings);
    println!("{}", agent.handle_json(&input).await);
    Ok(())
}

async fn cmd_nextcloud_demo(server_url: &str, username: &str, password: &str) -> Result<()> {
    println!("🌥️  Nextcloud Connection Program");
    println!("{}", "=".repeat(40));

    let client = NextcloudClient::new(server_url, username, password)?;
    if let Err(e) = run_nextcloud_demo(&client).await {
        println!("❌ {}", e);
    }
    Ok(())
}

/// The fixed demonstration sequence. Each step reports its own outcome;
/// only a failed connection test stops the run.
async fn run_nextcloud_demo(client: &NextcloudClient) -> crate::Result<()> {
    client.test_connection().await?;
    println!("✅ Successfully connected to Nextcloud!\n");

    println!("1. Listing root directory:");
    print_listing(client, "").await;
    println!();

    println!("2. Creating a test folder:");
    match client.create_folder(DEMO_FOLDER).await {
        Ok(FolderStatus::Created) => println!("✅ Successfully created folder: {}", DEMO_FOLDER),
        Ok(FolderStatus::AlreadyExists) => println!("ℹ️  Folder already exists: {}", DEMO_FOLDER),
        Err(e) => println!("❌ Failed to create folder: {}", e),
    }
    println!();

    println!("3. Creating and uploading a test file:");
    let local = std::env::temp_dir().join(format!("cloudpost-{}.txt", uuid::Uuid::new_v4().simple()));
    let content = format!(
        "Test file created at {}\nThis is a test upload to Nextcloud!\n",
        chrono::Local::now()
    );
    tokio::fs::write(&local, content).await?;
    match client.upload_file(&local, DEMO_REMOTE_FILE).await {
        Ok(()) => println!("✅ Successfully uploaded {} to {}", local.display(), DEMO_REMOTE_FILE),
        Err(e) => println!("❌ Upload failed: {}", e),
    }
    tokio::fs::remove_file(&local).await?;
    println!();

    println!("4. Listing test folder contents:");
    print_listing(client, &format!("{}/", DEMO_FOLDER)).await;
    println!();

    println!("5. Downloading the uploaded file:");
    let download = Path::new(DEMO_DOWNLOAD);
    match client.download_file(DEMO_REMOTE_FILE, download).await {
        Ok(_) => {
            println!("✅ Successfully downloaded {} to {}", DEMO_REMOTE_FILE, download.display());
            let text = tokio::fs::read_to_string(download).await?;
            println!("\n📄 Downloaded file contents:");
            println!("{}", text);
            tokio::fs::remove_file(download).await?;
        }
        Err(e) => println!("❌ Download failed: {}", e),
    }

    Ok(())
}

async fn print_listing(client: &NextcloudClient, path: &str) {
    match client.list_files(path).await {
        Ok(entries) => {
            println!("📁 Contents of /{}:", path);
            println!("{}", "-".repeat(50));
            for entry in &entries {
                println!("  {}", describe(entry));
            }
        }
        Err(e) => println!("❌ Failed to list files: {}", e),
    }
}

fn describe(entry: &DavEntry) -> String {
    match (entry.is_dir, entry.size) {
        (true, _) => format!("{}/", entry.name),
        (false, Some(size)) => format!("{} ({} bytes)", entry.name, size),
        (false, None) => entry.name.clone(),
    }
}
