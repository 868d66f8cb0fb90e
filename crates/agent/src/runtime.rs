//! The agent loop: alternate model turns and browser turns, feeding the
//! model a full outline on the first turn and after large diffs, and a
//! structural diff otherwise.

use pagelens_core::{
    BrowseOutcome, ChatMessage, Config, Error, Result, StepEntry, ToolCallRequest, Usage,
};
use pagelens_browser::diff::diff_outlines;
use pagelens_browser::session::Session;
use pagelens_providers::Provider;
use serde_json::Value;
use std::time::Duration;
use tracing::{info, warn};

use crate::prompt;
use crate::tools::tool_schemas;

/// Step log entries keep at most this many characters of the result.
const STEP_RESULT_LIMIT: usize = 200;
/// Cap on extracted page text handed back to the model.
const EXTRACT_TEXT_LIMIT: usize = 4000;

const STEP_LIMIT_MESSAGE: &str = "Browser task hit step limit. Partial results may be available.";

pub type StepCallback = Box<dyn Fn(&StepEntry) + Send + Sync>;

pub struct BrowseOptions {
    pub task: String,
    pub start_url: String,
    /// Overrides `config.agent.max_steps` when set.
    pub max_steps: Option<u32>,
    pub on_step: Option<StepCallback>,
}

impl BrowseOptions {
    pub fn new(task: impl Into<String>, start_url: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            start_url: start_url.into(),
            max_steps: None,
            on_step: None,
        }
    }
}

/// Run one browse task to completion. The browser is closed on every exit
/// path, including errors.
pub async fn browse_web(
    provider: &dyn Provider,
    config: &Config,
    options: BrowseOptions,
) -> Result<BrowseOutcome> {
    let mut session = Session::launch(config).await?;
    match run_loop(&mut session, provider, config, &options).await {
        Ok(outcome) => Ok(outcome),
        Err(err) => {
            warn!(error = %err, "browse run failed, closing browser");
            session.emit_error(&err.to_string());
            session.close().await;
            Err(err)
        }
    }
}

async fn run_loop(
    session: &mut Session,
    provider: &dyn Provider,
    config: &Config,
    options: &BrowseOptions,
) -> Result<BrowseOutcome> {
    let max_steps = options.max_steps.unwrap_or(config.agent.max_steps);
    let settle = Duration::from_millis(config.agent.settle_ms);

    session.navigate(&options.start_url).await?;
    tokio::time::sleep(settle).await;
    let outline = session.take_outline().await?;

    let mut messages = vec![
        ChatMessage::system(&prompt::system_prompt(&options.task)),
        ChatMessage::user(&prompt::initial_user_message(session.url(), &outline)),
    ];
    let schemas = tool_schemas();
    let mut usage = Usage::default();
    let mut steps: Vec<StepEntry> = Vec::new();

    for step in 1..=max_steps {
        let response = provider.chat(&messages, &schemas).await?;
        usage.record(&response.usage);

        if response.tool_calls.is_empty() {
            let result = response.content.unwrap_or_default();
            info!(step = step, "model finished without tool calls");
            session.close().await;
            return Ok(BrowseOutcome { result, usage, steps });
        }

        for call in response.tool_calls {
            if call.name == "done" {
                let result = call
                    .arguments
                    .get("result")
                    .and_then(|v| v.as_str())
                    .unwrap_or("Task complete.")
                    .to_string();
                let entry = StepEntry {
                    step,
                    action: "done".to_string(),
                    reference: None,
                    text: None,
                    result: truncate_chars(&result, STEP_RESULT_LIMIT),
                };
                if let Some(on_step) = &options.on_step {
                    on_step(&entry);
                }
                steps.push(entry);
                info!(step = step, "task done");
                session.close().await;
                return Ok(BrowseOutcome { result, usage, steps });
            }

            let previous_outline = session.outline().to_string();
            let previous_url = session.url().to_string();

            let prefix = match execute_tool(session, &call).await {
                Ok(result) => format!("Action: {}", result),
                Err(err) if err.is_recoverable() => format!("Error: {}", err),
                Err(err) => return Err(err),
            };

            let entry = StepEntry {
                step,
                action: call.name.clone(),
                reference: call
                    .arguments
                    .get("ref")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string()),
                text: call
                    .arguments
                    .get("text")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string()),
                result: truncate_chars(&prefix, STEP_RESULT_LIMIT),
            };
            if let Some(on_step) = &options.on_step {
                on_step(&entry);
            }
            steps.push(entry);

            tokio::time::sleep(settle).await;
            let outline = session.take_outline().await?;
            let report = diff_outlines(
                &previous_outline,
                &outline,
                &previous_url,
                session.url(),
                session.tables(),
            );

            let observation = build_observation(&prefix, &report, session.url(), &outline);
            messages.push(ChatMessage::assistant_tool_call(call.clone()));
            messages.push(ChatMessage::tool_result(&call.id, &observation));
        }
    }

    info!(max_steps = max_steps, "step budget exhausted");
    session.close().await;
    Ok(BrowseOutcome {
        result: STEP_LIMIT_MESSAGE.to_string(),
        usage,
        steps,
    })
}

/// Empty diff: just the confirmation. Large diff: fresh outline. Anything
/// else: the rendered delta.
fn build_observation(
    prefix: &str,
    report: &pagelens_browser::DiffReport,
    url: &str,
    outline: &str,
) -> String {
    if report.is_empty {
        format!("{}\nNo visible changes on the page.", prefix)
    } else if report.is_large_diff {
        format!("{}\nURL: {}\n\nNew page snapshot:\n{}", prefix, url, outline)
    } else {
        format!("{}\n\nChanges:\n{}", prefix, report.text)
    }
}

async fn execute_tool(session: &mut Session, call: &ToolCallRequest) -> Result<String> {
    let args = &call.arguments;
    match call.name.as_str() {
        "navigate" => {
            let url = required_str(args, "url", "navigate")?;
            session.navigate(url).await
        }
        "click" => session.click(required_str(args, "ref", "click")?).await,
        "fill" => {
            let reference = required_str(args, "ref", "fill")?;
            let text = required_str(args, "text", "fill")?;
            session.fill(reference, text).await
        }
        "hover" => session.hover(required_str(args, "ref", "hover")?).await,
        "select_option" => {
            let reference = required_str(args, "ref", "select_option")?;
            let value = required_str(args, "value", "select_option")?;
            session.select_option(reference, value).await
        }
        "press_key" => session.press_key(required_str(args, "key", "press_key")?).await,
        "scroll" => {
            let direction = args.get("direction").and_then(|v| v.as_str()).unwrap_or("down");
            session.scroll(direction).await
        }
        "screenshot" => {
            let data = session.screenshot().await?;
            Ok(format!("Screenshot captured ({} KB)", data.len() * 3 / 4 / 1024))
        }
        "extract_text" => {
            let text = session.extract_text().await?;
            Ok(truncate_chars(&text, EXTRACT_TEXT_LIMIT))
        }
        other => Err(Error::Tool(format!("Unknown tool: {}", other))),
    }
}

fn required_str<'a>(args: &'a Value, key: &str, tool: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::Tool(format!("{} requires '{}'", tool, key)))
}

/// Truncate at a char boundary, marking the cut.
fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let kept: String = s.chars().take(max_chars).collect();
    format!("{}... (truncated)", kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagelens_browser::RoleTables;
    use serde_json::json;

    fn report_for(previous: &str, current: &str) -> pagelens_browser::DiffReport {
        diff_outlines(previous, current, "http://a", "http://a", &RoleTables::default())
    }

    #[test]
    fn empty_diff_observation_is_exact() {
        let outline = "- heading \"Hi\" [ref=e1]\n";
        let report = report_for(outline, outline);
        let obs = build_observation("Action: Clicked at (10, 20)", &report, "http://a", outline);
        assert_eq!(obs, "Action: Clicked at (10, 20)\nNo visible changes on the page.");
    }

    #[test]
    fn large_diff_observation_carries_the_outline() {
        let previous = "- heading \"Old\" [ref=e1]\n- link \"Gone\" [ref=e2]\n";
        let current = "- heading \"Checkout\" [ref=e1]\n- button \"Pay\" [ref=e2]\n";
        let report = report_for(previous, current);
        assert!(report.is_large_diff);
        let obs = build_observation("Action: Navigated to http://b", &report, "http://b", current);
        assert!(obs.contains("New page snapshot:\n- heading \"Checkout\""));
        assert!(!obs.contains("Changes:"));
    }

    #[test]
    fn small_diff_observation_carries_the_delta() {
        let previous = "\
- heading \"Cart\" [ref=e1]
- link \"a\" [ref=e2]
- link \"b\" [ref=e3]
- link \"c\" [ref=e4]
- button \"0 items\" [ref=e5]
";
        let current = previous.replace("0 items", "1 item");
        let report = report_for(previous, &current);
        assert!(!report.is_empty && !report.is_large_diff);
        let obs = build_observation("Action: Clicked at (5, 5)", &report, "http://a", &current);
        assert!(obs.contains("Changes:\n"));
        assert!(obs.contains("~ button [ref=e5]: \"0 items\" \u{2192} \"1 item\""));
        assert!(!obs.contains("New page snapshot"));
    }

    #[test]
    fn error_observation_leads_with_the_error() {
        let outline = "- heading \"Hi\" [ref=e1]\n";
        let report = report_for(outline, outline);
        let err = Error::unknown_ref("e99", vec!["e1".to_string()]);
        let obs = build_observation(&format!("Error: {}", err), &report, "http://a", outline);
        assert!(obs.starts_with("Error: Unknown ref: e99"));
    }

    #[test]
    fn step_results_are_truncated_to_two_hundred_chars() {
        let long = "x".repeat(500);
        let truncated = truncate_chars(&long, STEP_RESULT_LIMIT);
        assert!(truncated.starts_with(&"x".repeat(200)));
        assert!(truncated.ends_with("... (truncated)"));
        assert_eq!(truncate_chars("short", STEP_RESULT_LIMIT), "short");
    }

    #[test]
    fn missing_tool_args_surface_as_tool_errors() {
        let err = required_str(&json!({}), "ref", "click").unwrap_err();
        assert_eq!(err.to_string(), "Tool error: click requires 'ref'");
        assert!(err.is_recoverable());
    }
}
