//! System prompt and first user turn for a browse run.

/// Declare the task and the snapshot/ref protocol.
pub fn system_prompt(task: &str) -> String {
    format!(
        "You are a web browsing agent. Your task: {task}\n\n\
         You see pages as an indented accessibility outline. Interactive and \
         named elements carry refs like [ref=e5]; pass those refs to the \
         click/fill/hover/select_option tools. Refs belong to the snapshot \
         they appear in: after a page change you will receive either a diff \
         of what changed or a fresh snapshot, and only refs from the latest \
         snapshot are valid.\n\n\
         Work step by step, one or a few tool calls at a time, and observe \
         the result of each action before deciding the next. When the task \
         is complete (or clearly impossible), call the done tool with your \
         answer. Lines like 'N refs hidden' describe truncated content and \
         those refs are not clickable."
    )
}

/// The first user message: current URL plus the full outline.
pub fn initial_user_message(url: &str, outline: &str) -> String {
    format!("URL: {url}\n\nPage snapshot:\n{outline}")
}
