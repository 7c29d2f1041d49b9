use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

use job_matcher_desktop_lib::core::gemini_client::GeminiClient;
use job_matcher_desktop_lib::core::models::{RunState, ScorerBackend, UploadedFile};
use job_matcher_desktop_lib::core::report::{render_json, render_text};
use job_matcher_desktop_lib::core::secret_store::{ApiKeyStore, KeySource, API_KEY_ENV};
use job_matcher_desktop_lib::core::session::{MatchPipeline, MatchingSession, RunEvent};
use job_matcher_desktop_lib::core::settings_store::{update_setting, SettingsStore};
use job_matcher_desktop_lib::init_tracing;

#[derive(Parser)]
#[command(name = "job-matcher-desktop")]
#[command(about = "Rate CVs against a job advertisement with Gemini")]
struct Cli {
    /// Debug-level logging on stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Rate every CV against the job advertisement
    Match {
        /// Job advertisement (PDF, PNG, JPG, JPEG)
        #[arg(long)]
        job_ad: PathBuf,
        /// CV files, in upload order
        #[arg(long = "cv", required = true, num_args = 1..)]
        cvs: Vec<PathBuf>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
        #[arg(long, value_enum)]
        scorer: Option<ScorerArg>,
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Show or change persisted settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Manage the Gemini API key in the OS keychain
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Show,
    /// Set one value, e.g. `config set maxConcurrentRequests 8`
    Set { key: String, value: String },
}

#[derive(Subcommand)]
enum KeyAction {
    Set { api_key: String },
    Clear,
    Status,
}

#[derive(Clone, Copy, ValueEnum)]
enum ScorerArg {
    Llm,
    Keyword,
}

impl From<ScorerArg> for ScorerBackend {
    fn from(arg: ScorerArg) -> Self {
        match arg {
            ScorerArg::Llm => ScorerBackend::Llm,
            ScorerArg::Keyword => ScorerBackend::Keyword,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Match {
            job_ad,
            cvs,
            json,
            scorer,
            concurrency,
        } => run_match(job_ad, cvs, json, scorer, concurrency).await,
        Command::Config { action } => run_config(action).await,
        Command::Key { action } => run_key(action),
    }
}

async fn run_match(
    job_ad: PathBuf,
    cvs: Vec<PathBuf>,
    json: bool,
    scorer: Option<ScorerArg>,
    concurrency: Option<usize>,
) -> anyhow::Result<()> {
    let mut settings = SettingsStore::new().load().await?;
    if let Some(scorer) = scorer {
        settings.scorer = scorer.into();
    }
    if let Some(concurrency) = concurrency {
        settings.max_concurrent_requests = concurrency;
    }
    let settings = settings.sanitized();

    let (api_key, source) = ApiKeyStore::new().resolve()?;
    info!(?source, scorer = ?settings.scorer, "using Gemini API key");

    let client = GeminiClient::new(api_key, settings.clone())?;
    let pipeline = MatchPipeline::from_settings(Arc::new(client), &settings);
    let mut session = MatchingSession::new(Arc::new(pipeline));
    session.set_job_ad(UploadedFile::from_path(job_ad));
    session.set_cvs(cvs.into_iter().map(UploadedFile::from_path).collect());
    session.start_run()?;

    let report = loop {
        match session.next_event().await {
            Some(RunEvent::Progress {
                processed,
                total,
                file_name,
            }) => info!("[{processed}/{total}] {file_name}"),
            Some(RunEvent::Completed(report)) => break report,
            None => anyhow::bail!("run ended without a report"),
        }
    };

    if json {
        println!("{}", render_json(&report)?);
    } else {
        println!("{}", render_text(&report));
    }

    if report.status == RunState::Failed {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_config(action: ConfigAction) -> anyhow::Result<()> {
    let store = SettingsStore::new();
    let settings = store.load().await?;

    match action {
        ConfigAction::Show => {
            println!("# {}", store.path().display());
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        ConfigAction::Set { key, value } => {
            let updated = update_setting(&settings, &key, &value)?;
            let saved = store.save(&updated).await?;
            println!("{}", serde_json::to_string_pretty(&saved)?);
        }
    }
    Ok(())
}

fn run_key(action: KeyAction) -> anyhow::Result<()> {
    let store = ApiKeyStore::new();

    match action {
        KeyAction::Set { api_key } => {
            store.save(&api_key).context("failed to store API key in the keychain")?;
            println!("API key stored in the OS keychain.");
        }
        KeyAction::Clear => {
            store.clear().context("failed to remove API key from the keychain")?;
            println!("API key removed from the OS keychain.");
        }
        KeyAction::Status => match store.resolve() {
            Ok((_, KeySource::Environment)) => println!("API key set via {API_KEY_ENV}."),
            Ok((_, KeySource::Keychain)) => println!("API key stored in the OS keychain."),
            Err(err) => {
                warn!("{err}");
                println!("No API key configured.");
            }
        },
    }
    Ok(())
}
