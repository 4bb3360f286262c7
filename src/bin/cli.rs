//! CLI binary for avatar-chat.

use async_trait::async_trait;
use avatar_chat::avatar::Avatar;
use avatar_chat::backends::echo::{ECHO_BACKEND, EchoLlm};
use avatar_chat::backends::silence::{SILENCE_BACKEND, SilenceTts};
use avatar_chat::backends::{Backends, TtsBackend};
use avatar_chat::pipeline::messages::AudioClip;
use avatar_chat::screenplay::Screenplay;
use avatar_chat::{Chat, ChatConfig, ChatObserver, ChatState, SettingsStore};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Notify;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Longest a single clip is "played" on the console.
const MAX_CONSOLE_PLAYBACK: Duration = Duration::from_secs(5);

/// Talk to an avatar from the terminal.
#[derive(Parser)]
#[command(name = "avatar-chat", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print runtime events as JSON lines on stderr.
    #[arg(long)]
    events: bool,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Start an interactive text conversation.
    Chat,

    /// Write the default configuration file.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration as TOML.
    ShowConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so they do not interleave with the conversation.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("avatar_chat=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let path = cli
        .config
        .clone()
        .unwrap_or_else(ChatConfig::default_config_path);

    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => run_chat(load_config(&path, cli.config.is_some())?, cli.events).await,
        Command::InitConfig { force } => init_config(&path, force),
        Command::ShowConfig => {
            let config = load_config(&path, cli.config.is_some())?;
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

/// An explicit path must exist; the default path is optional.
fn load_config(path: &std::path::Path, explicit: bool) -> anyhow::Result<ChatConfig> {
    if explicit || path.exists() {
        info!("loading config from {}", path.display());
        Ok(ChatConfig::from_file(path)?)
    } else {
        Ok(ChatConfig::default())
    }
}

fn init_config(path: &std::path::Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    ChatConfig::default().save_to_file(path)?;
    println!("wrote {}", path.display());
    Ok(())
}

async fn run_chat(config: ChatConfig, print_events: bool) -> anyhow::Result<()> {
    println!("avatar-chat v{}", env!("CARGO_PKG_VERSION"));

    let name = config.chat.name.clone();
    let settings = Arc::new(SettingsStore::from_config(&config));

    let backends = Backends::new();
    backends.llm.register(ECHO_BACKEND, Arc::new(EchoLlm));
    backends.tts.register_lazy(SILENCE_BACKEND, || async {
        Ok::<_, avatar_chat::ChatError>(Arc::new(SilenceTts::default()) as Arc<dyn TtsBackend>)
    });

    let chat = Chat::builder(settings, backends)
        .with_avatar(Arc::new(ConsoleAvatar::new(name.clone())))
        .with_observer(Arc::new(ConsoleStatus))
        .build();
    chat.start();

    if print_events {
        let mut events = chat.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => match serde_json::to_string(&event) {
                        Ok(line) => eprintln!("{line}"),
                        Err(e) => warn!("failed to encode event: {e}"),
                    },
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "event printer lagged"),
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    println!("\nType a message and press Enter. Commands: /interrupt, /history, /quit\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received Ctrl+C, shutting down...");
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };

        match line.trim() {
            "" => {}
            "/quit" => break,
            "/interrupt" => {
                chat.interrupt();
            }
            "/history" => {
                for message in chat.messages() {
                    println!("  {}: {}", message.role, message.content.text());
                }
            }
            text => {
                // Runs in the background so a new line can interrupt it.
                let chat = chat.clone();
                let text = text.to_owned();
                tokio::spawn(async move {
                    if let Err(e) = chat.send_user_message(&text).await {
                        error!("failed to answer: {e}");
                    }
                });
            }
        }
    }

    chat.shutdown();
    Ok(())
}

/// Prints what the avatar would say and waits for the clip's length.
struct ConsoleAvatar {
    name: String,
    stop: Notify,
}

impl ConsoleAvatar {
    fn new(name: String) -> Self {
        Self {
            name,
            stop: Notify::new(),
        }
    }
}

#[async_trait]
impl Avatar for ConsoleAvatar {
    async fn speak(&self, audio: AudioClip, screenplay: &Screenplay) -> avatar_chat::Result<()> {
        println!(
            "{} ({}): {}",
            self.name,
            screenplay.expression,
            screenplay.talk.message.trim()
        );
        let length = audio
            .duration()
            .unwrap_or_default()
            .min(MAX_CONSOLE_PLAYBACK);
        tokio::select! {
            () = tokio::time::sleep(length) => {}
            () = self.stop.notified() => {}
        }
        Ok(())
    }

    fn stop_speaking(&self) -> avatar_chat::Result<()> {
        self.stop.notify_waiters();
        Ok(())
    }
}

/// Surfaces errors and state changes on the console.
struct ConsoleStatus;

impl ChatObserver for ConsoleStatus {
    fn on_state_change(&self, next: ChatState, prev: ChatState) {
        tracing::debug!(%prev, %next, "state");
    }

    fn on_error(&self, message: &str) {
        eprintln!("error: {message}");
    }
}
