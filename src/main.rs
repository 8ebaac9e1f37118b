use clap::{Parser, Subcommand};
use reportbot::prelude::*;
use reportbot::server::{self, AppState};
use reportbot::slack::{SignatureVerifier, SlackClient};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Route chat questions to reporting dashboards
#[derive(Parser, Debug)]
#[command(name = "reportbot")]
#[command(about = "Chat bot that points people at the right report")]
#[command(version)]
struct Args {
    /// Catalog file (overrides CATALOG_PATH)
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    /// Scoring mode: containment or token-overlap (overrides SCORING_MODE)
    #[arg(long, global = true)]
    scoring_mode: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the Slack events webhook server
    Serve {
        /// Address to bind (overrides BIND_ADDR)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Chat with the bot on stdin, one message per line
    Chat {
        /// User id the messages are sent as
        #[arg(long, default_value = "console")]
        user: String,
    },

    /// Print the catalog's keyword sets as JSON
    Catalog,

    /// List raw BI view identifiers
    Views,

    /// Dry-run the view resolver for a loose path or dashboard URL
    Resolve {
        /// e.g. Sales/Report or https://bi.example.com/#/views/Sales/Report
        path: String,
    },
}

fn print_available_commands() {
    println!("Available commands:");
    println!("  serve     Run the Slack events webhook server");
    println!("  chat      Chat with the bot on stdin");
    println!("  catalog   Print the catalog's keyword sets");
    println!("  views     List raw BI view identifiers");
    println!("  resolve   Dry-run the view resolver");
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut builder = ConfigBuilder::from_env()?;
    if let Some(path) = &args.catalog {
        builder = builder.catalog_path(path.clone());
    }
    if let Some(mode) = &args.scoring_mode {
        builder = builder.scoring_mode_str(mode)?;
    }
    Ok(builder.build()?)
}

async fn run_serve(config: Config, bind: Option<String>) -> anyhow::Result<()> {
    let bot = ReportBot::from_config(&config)?;
    let sink = SlackClient::new(&config.slack)?;
    let secret = config
        .slack
        .signing_secret
        .clone()
        .ok_or_else(|| anyhow::anyhow!("SLACK_SIGNING_SECRET is not set"))?;
    let state = AppState {
        bot: Arc::new(bot),
        sink: Arc::new(sink),
        bot_user_id: config.slack.bot_user_id.clone(),
        verifier: Some(Arc::new(SignatureVerifier::new(secret))),
    };
    let bind = bind.unwrap_or(config.bind_addr);
    server::serve(state, &bind).await
}

async fn run_chat(config: Config, user: String) -> anyhow::Result<()> {
    let bot = ReportBot::from_config(&config)?;
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    print!("> ");
    stdout.flush()?;
    for line in stdin.lock().lines() {
        let line = line?;
        for reply in bot.handle(&InboundEvent::new(user.as_str(), line)).await {
            println!("{}", reply.text);
        }
        print!("> ");
        stdout.flush()?;
    }
    println!();
    Ok(())
}

fn bi_provider(config: &Config) -> anyhow::Result<Arc<reportbot::metadata::MetadataProvider>> {
    let bot = ReportBot::from_config(config)?;
    bot.matcher()
        .metadata()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("BI is not configured (set BI_SERVER, BI_TOKEN_NAME, BI_TOKEN_SECRET)"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let Some(command) = &args.command else {
        print_available_commands();
        return Ok(());
    };
    let config = load_config(&args)?;

    match command {
        Command::Serve { bind } => run_serve(config, bind.clone()).await,
        Command::Chat { user } => run_chat(config, user.clone()).await,
        Command::Catalog => {
            let catalog = Catalog::load(&config.catalog_path)?;
            println!("{}", serde_json::to_string_pretty(&catalog.keyword_sets())?);
            Ok(())
        }
        Command::Views => {
            let provider = bi_provider(&config)?;
            for view in provider.view_identifiers().await? {
                println!("{}", view);
            }
            Ok(())
        }
        Command::Resolve { path } => {
            let provider = bi_provider(&config)?;
            let report = provider.dry_run(path).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}
