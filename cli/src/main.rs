//! Codetainer CLI - Command-line interface for the codetainer server
//!
//! Provides a simple CLI for managing images, codetainers, terminals, files and sessions

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use reqwest::blocking::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::Value;

/// Codetainer CLI - container-backed terminals
#[derive(Parser)]
#[command(name = "codetainer")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "CLI for the codetainer server", long_about = None)]
struct Cli {
    /// Codetainer API URL
    #[arg(short, long, default_value = "http://127.0.0.1:3000")]
    api_url: String,

    /// Print raw JSON responses
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered images
    Images,

    /// Register an image present in the container engine
    RegisterImage {
        /// Image name, e.g. ubuntu
        name: String,

        /// Image tag
        #[arg(short, long, default_value = "latest")]
        tag: String,
    },

    /// Create a codetainer from a registered image
    Create {
        /// Codetainer name
        name: String,

        /// Registered image id or name:tag
        #[arg(short, long)]
        image: String,
    },

    /// List codetainers
    List,

    /// Start a codetainer
    Start {
        /// Codetainer id or name
        id: String,
    },

    /// Stop a codetainer
    Stop {
        /// Codetainer id or name
        id: String,
    },

    /// Show or change the terminal size
    Tty {
        /// Codetainer id or name
        id: String,

        /// New height in rows
        #[arg(long, requires = "width")]
        height: Option<u16>,

        /// New width in columns
        #[arg(long, requires = "height")]
        width: Option<u16>,
    },

    /// List files in a codetainer directory
    Files {
        /// Codetainer id or name
        id: String,

        /// Directory to list
        #[arg(default_value = "/")]
        path: String,
    },

    /// Upload a file into a codetainer
    Upload {
        /// Codetainer id or name
        id: String,

        /// Local file path
        file: PathBuf,

        /// Destination directory inside the codetainer
        #[arg(short, long, default_value = "/tmp")]
        dst: String,
    },

    /// Send a command line to the codetainer terminal
    Send {
        /// Codetainer id or name
        id: String,

        /// Command to send (a newline is appended)
        command: String,

        /// Use a one-off exec when no session is attached
        #[arg(short, long)]
        transient: bool,
    },

    /// Detach the interactive session of a codetainer
    Detach {
        /// Codetainer id or name
        id: String,
    },

    /// List interactive sessions
    Sessions,

    /// Get server health status
    Health,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
    active_sessions: u64,
    #[serde(default)]
    runtime_version: Option<String>,
}

/// Human-readable message for a failed response body
fn error_message(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(envelope) => match (envelope["error"].as_str(), envelope["message"].as_str()) {
            (Some(code), Some(message)) => format!("{}: {}", code, message),
            _ => body.to_string(),
        },
        Err(_) => body.to_string(),
    }
}

/// Send a request and decode its JSON body, failing on non-2xx responses
fn send(request: RequestBuilder, action: &str) -> Result<Value> {
    let response = request
        .send()
        .with_context(|| format!("Failed to {}", action))?;

    if !response.status().is_success() {
        let status = response.status();
        let error_text = response.text().unwrap_or_else(|_| "Unknown error".to_string());
        anyhow::bail!("Failed to {} ({}): {}", action, status, error_message(&error_text));
    }

    response.json().context("Failed to parse response")
}

fn print_codetainer(codetainer: &Value) {
    let status = codetainer["status"].as_str().unwrap_or("?");
    let status = match status {
        "running" => status.green(),
        "stopped" => status.red(),
        _ => status.yellow(),
    };
    println!(
        "  {} {} [{}] image={}",
        codetainer["name"].as_str().unwrap_or("?").bright_white().bold(),
        codetainer["id"].as_str().unwrap_or("?"),
        status,
        codetainer["image_id"].as_str().unwrap_or("?"),
    );
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::new();
    let api = format!("{}/api/v1", cli.api_url.trim_end_matches('/'));

    let result = match &cli.command {
        Commands::Images => send(client.get(format!("{}/image", api)), "list images")?,

        Commands::RegisterImage { name, tag } => send(
            client
                .post(format!("{}/image", api))
                .form(&[("name", name.as_str()), ("tag", tag.as_str())]),
            "register image",
        )?,

        Commands::Create { name, image } => send(
            client
                .post(format!("{}/codetainer", api))
                .form(&[("name", name.as_str()), ("image_id", image.as_str())]),
            "create codetainer",
        )?,

        Commands::List => send(client.get(format!("{}/codetainer", api)), "list codetainers")?,

        Commands::Start { id } => send(
            client.post(format!("{}/codetainer/{}/start", api, id)),
            "start codetainer",
        )?,

        Commands::Stop { id } => send(
            client.post(format!("{}/codetainer/{}/stop", api, id)),
            "stop codetainer",
        )?,

        Commands::Tty { id, height, width } => match (height, width) {
            (Some(height), Some(width)) => send(
                client
                    .post(format!("{}/codetainer/{}/tty", api, id))
                    .form(&[("height", height.to_string()), ("width", width.to_string())]),
                "resize terminal",
            )?,
            _ => send(client.get(format!("{}/codetainer/{}/tty", api, id)), "get terminal size")?,
        },

        Commands::Files { id, path } => send(
            client
                .get(format!("{}/codetainer/{}/file", api, id))
                .query(&[("path", path)]),
            "list files",
        )?,

        Commands::Upload { id, file, dst } => {
            let filename = file
                .file_name()
                .and_then(|n| n.to_str())
                .context("Invalid filename")?
                .to_string();

            let content = fs::read(file)
                .with_context(|| format!("Failed to read file: {}", file.display()))?;

            let form = reqwest::blocking::multipart::Form::new()
                .text("dst_path", dst.clone())
                .part(
                    "upload",
                    reqwest::blocking::multipart::Part::bytes(content).file_name(filename),
                );

            send(
                client
                    .put(format!("{}/codetainer/{}/file", api, id))
                    .multipart(form),
                "upload file",
            )?
        }

        Commands::Send { id, command, transient } => send(
            client
                .post(format!("{}/codetainer/{}/send", api, id))
                .form(&[("command", command.clone()), ("transient", transient.to_string())]),
            "send command",
        )?,

        Commands::Detach { id } => send(
            client.delete(format!("{}/codetainer/{}/attach", api, id)),
            "detach session",
        )?,

        Commands::Sessions => send(client.get(format!("{}/session", api)), "list sessions")?,

        Commands::Health => send(
            client.get(format!("{}/health", cli.api_url.trim_end_matches('/'))),
            "get health",
        )?,
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    match &cli.command {
        Commands::Images => {
            println!("{}", "Registered images:".bright_cyan().bold());
            for image in result["images"].as_array().context("Invalid response")? {
                println!(
                    "  {}:{} {}",
                    image["name"].as_str().unwrap_or("?"),
                    image["tag"].as_str().unwrap_or("?"),
                    image["id"].as_str().unwrap_or("?").dimmed(),
                );
            }
        }

        Commands::RegisterImage { .. } => {
            println!("{} {}", "✓ Registered:".green(), result["image"]["id"].as_str().unwrap_or("?"));
        }

        Commands::Create { .. } | Commands::Start { .. } | Commands::Stop { .. } => {
            print_codetainer(&result["codetainer"]);
        }

        Commands::List => {
            println!("{}", "Codetainers:".bright_cyan().bold());
            for codetainer in result["codetainers"].as_array().context("Invalid response")? {
                print_codetainer(codetainer);
            }
        }

        Commands::Tty { .. } => {
            println!(
                "{} {}x{}",
                "Terminal:".cyan(),
                result["tty"]["width"],
                result["tty"]["height"]
            );
        }

        Commands::Files { path, .. } => {
            println!("{} {}", "Files in".bright_cyan().bold(), path.bright_cyan().bold());
            for file in result["files"].as_array().context("Invalid response")? {
                let name = file["name"].as_str().unwrap_or("?");
                let icon = if file["type"].as_str() == Some("directory") { "📁" } else { "📄" };
                println!("  {} {}", icon, name);
            }
        }

        Commands::Upload { .. } => {
            println!("{} {}", "✓ Uploaded:".green(), result["path"].as_str().unwrap_or("?"));
            println!("{} {} bytes", "  Size:".cyan(), result["size_bytes"]);
            println!("{} {}", "  SHA-256:".cyan(), result["checksum"].as_str().unwrap_or("?"));
        }

        Commands::Send { .. } => println!("{}", "✓ Command sent".green()),

        Commands::Detach { .. } => {
            if result["detached"].as_bool() == Some(true) {
                println!("{}", "✓ Session detached".green());
            } else {
                println!("{}", "No session was attached".yellow());
            }
        }

        Commands::Sessions => {
            let sessions = result["sessions"].as_array().context("Invalid response")?;
            if sessions.is_empty() {
                println!("{}", "No active sessions".yellow());
            }
            for session in sessions {
                println!(
                    "  {} {} since {}",
                    session["container_id"].as_str().unwrap_or("?").bright_white(),
                    session["state"].as_str().unwrap_or("?"),
                    session["attached_at"].as_str().unwrap_or("?"),
                );
            }
        }

        Commands::Health => {
            let health: HealthResponse =
                serde_json::from_value(result).context("Failed to parse response")?;

            println!("{}", "Codetainer Server Status".bright_cyan().bold());
            println!("{}", "=".repeat(40).bright_blue());
            println!("{} {}", "Status:".cyan(),
                if health.status == "healthy" {
                    health.status.green()
                } else {
                    health.status.yellow()
                }
            );
            println!("{} {}", "Version:".cyan(), health.version);
            println!("{} {}s", "Uptime:".cyan(), health.uptime_seconds);
            println!("{} {}", "Active Sessions:".cyan(), health.active_sessions);
            if let Some(engine) = health.runtime_version {
                println!("{} {}", "Engine:".cyan(), engine);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_from_envelope() {
        let body = r#"{"error":"NOT_ATTACHED","message":"no session attached to container c1"}"#;
        assert_eq!(error_message(body), "NOT_ATTACHED: no session attached to container c1");
        assert_eq!(error_message("plain failure"), "plain failure");
    }

    #[test]
    fn test_cli_parses_tty_resize() {
        let cli = Cli::try_parse_from(["codetainer", "tty", "alpha", "--height", "24", "--width", "80"]).unwrap();
        match cli.command {
            Commands::Tty { id, height, width } => {
                assert_eq!(id, "alpha");
                assert_eq!(height, Some(24));
                assert_eq!(width, Some(80));
            }
            _ => panic!("expected tty command"),
        }

        assert!(Cli::try_parse_from(["codetainer", "tty", "alpha", "--height", "24"]).is_err());
    }
}
