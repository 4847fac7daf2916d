//! Console channel for the onboarding bot
//!
//! Run with: cargo run --bin onboarding-bot -- [OPTIONS]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use onboarding_engine::{
    config::Config,
    conversation::{ConversationService, Reply},
    metrics,
    presenter::Presenter,
    session::create_store,
    verification::{
        register_actions, HttpVerificationService, SearchRoutes, StaticDirectory, VerificationService,
    },
    workflow::{ActionRegistry, BackNavigation, DefinitionRegistry, SessionRef, StepResult, WorkflowExecutor},
    Error,
};

#[derive(Parser)]
#[command(author, version, about = "Drive an onboarding conversation from the terminal", long_about = None)]
struct Cli {
    /// Log level (debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Session key to resume; a fresh one is generated when omitted
    #[arg(short, long)]
    session: Option<String>,

    /// Locale for messages (defaults to DEFAULT_LOCALE)
    #[arg(long)]
    locale: Option<String>,

    /// Workflow to start right away
    #[arg(short, long)]
    workflow: Option<String>,

    /// YAML list of taxpayer records, used when no verification gateway is configured
    #[arg(long)]
    directory: Option<PathBuf>,

    /// Print metrics on exit
    #[arg(long)]
    metrics: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("onboarding_engine={},info", cli.log_level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Load configuration
    let config = Config::load()?;
    info!("Loaded configuration: {:?}", config);
    metrics::register_metrics()?;

    // Workflow definitions
    let mut definitions = DefinitionRegistry::new();
    let count = definitions.load_dir(&config.content.workflows_dir)?;
    info!("Loaded {} workflow definition(s) from {}", count, config.content.workflows_dir.display());

    // Actions
    let service: Arc<dyn VerificationService> = match (&config.verification.base_url, &cli.directory) {
        (Some(base_url), _) => {
            info!("Using verification gateway at {}", base_url);
            let mut client = HttpVerificationService::new(base_url).with_timeout(config.engine.action_timeout());
            if let Some(token) = &config.verification.auth_token {
                client = client.with_auth_token(token.clone());
            }
            Arc::new(client)
        }
        (None, Some(path)) => Arc::new(StaticDirectory::from_yaml_file(path)?),
        (None, None) => Arc::new(StaticDirectory::default()),
    };
    let mut actions = ActionRegistry::new().with_timeout(config.engine.action_timeout());
    register_actions(&mut actions, service, SearchRoutes::default());

    let executor = Arc::new(WorkflowExecutor::new(
        Arc::new(definitions),
        Arc::new(actions),
        config.engine.executor(),
    ));

    // Initialize store
    let store = create_store(&config.database).await?;
    store.init().await?;

    let mut presenter = Presenter::new(&config.content.default_locale);
    presenter.load_dir(&config.content.locales_dir)?;

    let conversation = ConversationService::new(
        executor,
        store,
        config.commands.clone(),
        config.engine.auto_start_workflow.clone(),
    )?;

    let session_key = cli
        .session
        .clone()
        .unwrap_or_else(|| format!("console-{}", Uuid::new_v4()));
    info!("Using session {}", session_key);
    let session = SessionRef {
        session_key,
        locale: cli.locale.clone(),
    };
    let max_continuations = config.engine.max_auto_steps;
    if let Some(workflow_id) = cli.workflow.as_deref() {
        let reply = conversation
            .start_workflow(&session, workflow_id)
            .await
            .map(Reply::Step);
        show(&conversation, &presenter, &session, reply, max_continuations).await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let reply = conversation.handle_input(&session, &line).await;
        show(&conversation, &presenter, &session, reply, max_continuations).await;
    }

    if cli.metrics {
        println!("{}", metrics::gather_metrics()?);
    }
    info!("Input closed for session {}", session.session_key);
    Ok(())
}

/// Print a reply, continuing through paused messages at most `limit` times
/// in a row. Returns how many continuations were sent.
async fn show(
    conversation: &ConversationService,
    presenter: &Presenter,
    session: &SessionRef,
    mut reply: onboarding_engine::Result<Reply>,
    limit: usize,
) -> usize {
    let locale = session.locale.as_deref();
    let mut continued = 0;
    loop {
        let paused = match &reply {
            Ok(Reply::Step(result)) => {
                for message in presenter.render_result(result, locale) {
                    println!("{}\n", message);
                }
                matches!(result, StepResult::AwaitingInput { prompt, .. } if !prompt.expects_input)
            }
            Ok(Reply::Back(BackNavigation::Moved { prompt })) => {
                println!("{}\n", presenter.render(prompt, locale));
                false
            }
            Ok(Reply::Back(BackNavigation::NotAllowed)) => {
                println!("{}\n", presenter.back_not_allowed(locale));
                false
            }
            Ok(Reply::Cancelled) => {
                println!("{}\n", presenter.cancelled(locale));
                false
            }
            Ok(Reply::Idle) => false,
            Err(e) if e.is_transient() => {
                println!("{}\n", presenter.try_again(locale));
                false
            }
            Err(Error::NoActiveWorkflow) => false,
            Err(e) => {
                error!("Turn failed: {}", e);
                println!("{}\n", presenter.generic_failure(locale));
                false
            }
        };

        if !paused {
            return continued;
        }
        if continued >= limit {
            warn!("Stopped after {} paused messages in a row", limit);
            return continued;
        }
        continued += 1;
        reply = conversation.handle_input(session, "").await;
    }
}
