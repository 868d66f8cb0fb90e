use pagelens_agent::{browse_web, BrowseOptions};
use pagelens_browser::{reduce, Session};
use pagelens_core::{Config, Paths, Result};
use pagelens_providers::create_provider;
use std::path::PathBuf;
use std::time::Duration;

fn load_config(config_path: Option<&str>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load(std::path::Path::new(path)),
        None => Config::load_or_default(&Paths::new()),
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn run_task(
    config_path: Option<&str>,
    task: &str,
    url: &str,
    model: Option<String>,
    max_steps: Option<u32>,
    headed: bool,
    json: bool,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(model) = model {
        config.agent.model = model;
    }
    if headed {
        config.browser.headless = false;
    }

    let provider = create_provider(&config)?;
    let mut options = BrowseOptions::new(task, url);
    options.max_steps = max_steps;
    if !json {
        options.on_step = Some(Box::new(|entry| {
            println!("[{:>2}] {:<13} {}", entry.step, entry.action, entry.result);
        }));
    }

    let outcome = browse_web(provider.as_ref(), &config, options).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!("\n{}", outcome.result);
        println!(
            "\n({} model calls, {} in / {} out tokens, {} steps)",
            outcome.usage.model_calls,
            outcome.usage.input_tokens,
            outcome.usage.output_tokens,
            outcome.steps.len()
        );
    }
    Ok(())
}

pub async fn snapshot_page(
    config_path: Option<&str>,
    url: &str,
    raw: bool,
    interactive_only: bool,
) -> Result<()> {
    let config = load_config(config_path)?;
    let mut session = Session::launch(&config).await?;

    let result: Result<String> = async {
        session.navigate(url).await?;
        tokio::time::sleep(Duration::from_millis(config.agent.settle_ms)).await;
        let outline = if raw {
            session.take_baseline_outline().await?
        } else {
            session.take_outline().await?
        };
        Ok(if interactive_only {
            reduce::interactive_only(&outline)
        } else {
            outline
        })
    }
    .await;

    session.close().await;
    let outline: String = result?;
    print!("{}", outline);
    Ok(())
}

pub fn doctor(config_path: Option<&str>) -> Result<()> {
    match pagelens_browser::find_browser_binary() {
        Some(path) => println!("browser: {}", path),
        None => println!("browser: NOT FOUND (install Chrome or Chromium, or set browser.binary)"),
    }

    let config = load_config(config_path)?;
    let configured: Vec<&str> = config
        .providers
        .iter()
        .filter(|(_, p)| !p.api_key.is_empty())
        .map(|(name, _)| name.as_str())
        .collect();
    if configured.is_empty() {
        println!("providers: none configured (add an apiKey under providers in config.json)");
    } else {
        println!("providers: {}", configured.join(", "));
    }
    println!("model: {}", config.agent.model);

    let config_file = config_path
        .map(PathBuf::from)
        .unwrap_or_else(|| Paths::new().config_file());
    println!(
        "config: {}{}",
        config_file.display(),
        if config_file.exists() { "" } else { " (defaults)" }
    );
    Ok(())
}
