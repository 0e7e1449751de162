use anyhow::{bail, Context};
use browser_agent::agent::{ActionCall, Agent, Task};
use browser_agent::browser::{ChromeBrowser, NavigationManager};
use browser_agent::llm::{ChatCompletionClient, LanguageModel};
use browser_agent::Config;
use clap::{Arg, ArgAction, Command};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("browser-agent")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Drive a browser with a language model: run a task or log in")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("url")
                .long("url")
                .required(true)
                .help("Page to open first"),
        )
        .arg(
            Arg::new("task")
                .long("task")
                .short('t')
                .help("Natural-language task to carry out"),
        )
        .arg(
            Arg::new("plan")
                .long("plan")
                .help("JSON array of {name, params} registry calls to run as given"),
        )
        .arg(
            Arg::new("email")
                .long("email")
                .env("AGENT_LOGIN_EMAIL")
                .help("Log in with this email or username"),
        )
        .arg(
            Arg::new("password")
                .long("password")
                .env("AGENT_LOGIN_PASSWORD")
                .hide_env_values(true)
                .help("Password for --email"),
        )
        .arg(
            Arg::new("list-actions")
                .long("list-actions")
                .help("Print the registered actions and exit")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("headed")
                .long("headed")
                .help("Show the browser window")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("debug-auth")
                .long("debug-auth")
                .help("Log every login strategy step")
                .action(ArgAction::SetTrue),
        )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let matches = cli().get_matches();

    let mut config = match matches.get_one::<String>("config") {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    config.apply_env();
    if matches.get_flag("headed") {
        config.browser.headless = false;
    }

    let browser = ChromeBrowser::launch(&config.browser)?;
    let page = Arc::new(browser.new_page()?);

    let url = matches
        .get_one::<String>("url")
        .context("--url is required")?;
    let landed = NavigationManager::goto_with_retry(page.as_ref(), url, &config.session).await?;
    info!(url = %landed.url, attempts = landed.attempts, "opened start page");

    let model: Option<Arc<dyn LanguageModel>> = if config.llm.api_key.is_some() {
        Some(Arc::new(ChatCompletionClient::new(config.llm.clone())?))
    } else {
        None
    };
    let agent = Agent::new(page, model, config)?.with_auth_debug(matches.get_flag("debug-auth"));
    if matches.get_flag("list-actions") {
        println!("{}", agent.registry().describe());
        return Ok(());
    }

    if let Some(email) = matches.get_one::<String>("email") {
        let password = matches
            .get_one::<String>("password")
            .context("--password (or AGENT_LOGIN_PASSWORD) is required with --email")?;
        let auth = agent.login(email, password).await;
        println!("{}", serde_json::to_string_pretty(&auth)?);
        if !auth.success {
            error!(causes = %auth.failure_summary(), "login failed");
            bail!("login failed");
        }
    }

    let task = match (matches.get_one::<String>("task"), matches.get_one::<String>("plan")) {
        (Some(_), Some(_)) => bail!("--task and --plan are mutually exclusive"),
        (Some(task), None) => Task::Natural(task.clone()),
        (None, Some(plan)) => {
            let calls: Vec<ActionCall> = serde_json::from_str(plan).context("--plan is not valid JSON")?;
            Task::Structured(calls)
        }
        (None, None) => return Ok(()),
    };

    let outcome = agent.run(task).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if !outcome.success {
        bail!(
            "task failed: {}",
            outcome.failure.unwrap_or_else(|| "unknown cause".to_string())
        );
    }
    Ok(())
}
