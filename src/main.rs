use anyhow::Context as _;
use clap::{Parser, Subcommand};
use pocketbot::agent::{AgentDispatcher, CollaborationStore};
use pocketbot::api::{self, AppState};
use pocketbot::config::Config;
use pocketbot::conversation::store::ConversationStore;
use pocketbot::gateway::{
    CliGateway, DiscordGateway, GatewayManager, TelegramGateway, WhatsappGateway,
};
use pocketbot::heartbeat::{HeartbeatEngine, HeartbeatRunStore};
use pocketbot::intent::IntentRouter;
use pocketbot::llm::{ModelRouter, OpenAiClient};
use pocketbot::memory::MemoryStore;
use pocketbot::notify::{NotificationDispatcher, NotificationStore};
use pocketbot::pipeline::Pipeline;
use pocketbot::security::SecurityGate;
use pocketbot::skills::{self, SkillRegistry};
use pocketbot::stt::{Transcriber, WhisperTranscriber};
use pocketbot::GatewayKind;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt as _, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pocketbot", version, about = "Personal assistant platform")]
struct Cli {
    /// Path to a TOML config file. Defaults to `<data_dir>/pocketbot.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the webhook server plus the heartbeat and notification loops.
    Serve,
    /// Chat with the assistant on stdin/stdout.
    Chat,
    /// Heartbeat checklist operations.
    Heartbeat {
        #[command(subcommand)]
        command: HeartbeatCommand,
    },
    /// Scheduled notification operations.
    Notify {
        #[command(subcommand)]
        command: NotifyCommand,
    },
}

#[derive(Subcommand)]
enum HeartbeatCommand {
    /// Run every due checklist item once and exit.
    Run,
}

#[derive(Subcommand)]
enum NotifyCommand {
    /// Deliver every due notification once and exit.
    Run,
}

struct App {
    config: Config,
    conversations: Arc<ConversationStore>,
    dispatcher: Arc<AgentDispatcher>,
    gateways: Arc<GatewayManager>,
    whatsapp: Arc<WhatsappGateway>,
    pipeline: Arc<Pipeline>,
    heartbeat: Arc<HeartbeatEngine>,
    notifications: Arc<NotificationDispatcher>,
}

impl App {
    async fn build(config: Config) -> anyhow::Result<Self> {
        let pool = pocketbot::db::connect(&config.sqlite_path()).await?;

        let conversations = ConversationStore::new(pool.clone());
        conversations.initialize().await?;
        let memory = MemoryStore::new(pool.clone());
        memory.initialize().await?;
        let collaborations = CollaborationStore::new(pool.clone());
        collaborations.initialize().await?;
        let notification_store = NotificationStore::new(pool.clone());
        notification_store.initialize().await?;
        let heartbeat_runs = HeartbeatRunStore::new(pool.clone());
        heartbeat_runs.initialize().await?;
        let calendar = skills::calendar::CalendarStore::new(pool.clone());
        calendar.initialize().await?;

        let workspace = config.workspace_dir();
        std::fs::create_dir_all(&workspace)
            .with_context(|| format!("failed to create workspace: {}", workspace.display()))?;

        let mut registry = SkillRegistry::new(pool, config.security.autonomy);
        registry.register(skills::core::current_time());
        registry.register(skills::core::calculator());
        registry.register(skills::memory::remember(memory.clone()));
        registry.register(skills::memory::recall(memory.clone()));
        registry.register(skills::memory::forget(memory.clone()));
        registry.register(skills::shopping::shopping_list(memory.clone()));
        registry.register(skills::calendar::calendar(calendar));
        registry.register(skills::file::file_read(workspace.clone()));
        registry.register(skills::file::file_write(workspace.clone()));
        registry.register(skills::shell::shell(workspace));
        registry.register(skills::web_search::web_search(
            config.skills.web_search_api_key.clone(),
        ));
        registry.register(skills::scheduler::schedule_notification(
            notification_store.clone(),
        ));
        registry.initialize().await?;
        let registry = Arc::new(registry);

        let llm = Arc::new(OpenAiClient::from_config(&config.llm, registry.clone()));
        let dispatcher = Arc::new(AgentDispatcher::new(
            conversations.clone(),
            memory,
            collaborations,
            IntentRouter::new(config.instructions.clone()),
            ModelRouter::from_config(&config.llm),
            llm,
            registry,
            config.history.limit,
            config.memory.recall_limit,
        ));

        let whatsapp = Arc::new(WhatsappGateway::new(config.whatsapp.clone()));
        let mut manager = GatewayManager::new();
        manager.register(Arc::new(CliGateway));
        manager.register(Arc::new(TelegramGateway::new(config.telegram.clone())));
        manager.register(Arc::new(DiscordGateway::new(config.discord.clone())));
        manager.register(whatsapp.clone());
        let gateways = Arc::new(manager);

        let transcriber =
            WhisperTranscriber::from_config(&config.llm).map(|t| Arc::new(t) as Arc<dyn Transcriber>);

        let pipeline = Pipeline::new(
            gateways.clone(),
            SecurityGate::new(config.security.clone()),
            conversations.clone(),
            dispatcher.clone(),
            transcriber,
        );

        let heartbeat = Arc::new(HeartbeatEngine::new(
            config.heartbeat_source(),
            heartbeat_runs,
            conversations.clone(),
            dispatcher.clone(),
        ));
        let notifications = Arc::new(NotificationDispatcher::new(
            notification_store,
            conversations.clone(),
            gateways.clone(),
        ));

        Ok(Self {
            config,
            conversations,
            dispatcher,
            gateways,
            whatsapp,
            pipeline,
            heartbeat,
            notifications,
        })
    }

    async fn serve(self) -> anyhow::Result<()> {
        let heartbeat = self.heartbeat.clone();
        let tick = std::time::Duration::from_secs(self.config.heartbeat.tick_minutes.max(1) * 60);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match heartbeat.run_due_items(chrono::Utc::now()).await {
                    Ok(0) => {}
                    Ok(executed) => tracing::info!(executed, "heartbeat pass complete"),
                    Err(error) => tracing::error!(%error, "heartbeat pass failed"),
                }
            }
        });

        let notifications = self.notifications.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match notifications.run_due(chrono::Utc::now()).await {
                    Ok(0) => {}
                    Ok(handled) => tracing::info!(handled, "notification pass complete"),
                    Err(error) => tracing::error!(%error, "notification pass failed"),
                }
            }
        });

        let router = api::router(AppState {
            pipeline: self.pipeline,
            gateways: self.gateways,
            whatsapp: Some(self.whatsapp),
        });

        let listener = tokio::net::TcpListener::bind(&self.config.server.bind)
            .await
            .with_context(|| format!("failed to bind {}", self.config.server.bind))?;
        tracing::info!(bind = %self.config.server.bind, "webhook server listening");
        axum::serve(listener, router).await?;
        Ok(())
    }

    async fn chat(self) -> anyhow::Result<()> {
        let conversation = self
            .conversations
            .find_or_create(GatewayKind::Cli, Some("repl"), Some("CLI session"), None)
            .await?;

        println!("pocketbot ready. Empty line or ctrl-d to exit.");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print!("> ");
            use std::io::Write as _;
            std::io::stdout().flush()?;

            let Some(line) = lines.next_line().await? else {
                break;
            };
            let text = line.trim();
            if text.is_empty() {
                break;
            }

            match self.dispatcher.chat(&conversation, text).await {
                Ok(reply) => println!("{reply}"),
                Err(error) => {
                    tracing::error!(conversation_id = %conversation.id, %error, "chat failed");
                    println!("Sorry, something went wrong while handling that.");
                }
            }
        }

        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pocketbot=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };

    let app = App::build(config).await?;
    match cli.command {
        Command::Serve => app.serve().await,
        Command::Chat => app.chat().await,
        Command::Heartbeat {
            command: HeartbeatCommand::Run,
        } => {
            let executed = app.heartbeat.run_due_items(chrono::Utc::now()).await?;
            println!("{executed} heartbeat item(s) executed");
            Ok(())
        }
        Command::Notify {
            command: NotifyCommand::Run,
        } => {
            let handled = app.notifications.run_due(chrono::Utc::now()).await?;
            println!("{handled} notification(s) handled");
            Ok(())
        }
    }
}
