//! Deterministic markdown walkthrough.
//!
//! When no better wording is available, each step's instruction is inferred
//! from what changed: the agent's own action description first, then the
//! URL (a new domain reads as "Navigate to …", a new page on the same
//! domain as "Click on '<Page Name>'"), then the action type.

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use super::{NarrativeGenerator, NarrativeResult, StepNote};
use crate::model::{ActionType, Step, TaskRun};

/// Trailing `-<hex id>` on slugs such as `Project-Plan-1f2e…`
static HEX_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)-[a-f0-9]{32,}$").expect("valid hex suffix pattern"));

/// Action descriptions that say nothing a reader can follow
const GENERIC_DESCRIPTIONS: &[&str] = &["execute action", "executed action", "interact with the page"];

/// Prefixes left over from synthesized state descriptions
const SYNTHETIC_PREFIXES: &[&str] = &["After other: ", "After click: ", "After type: "];

#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateNarrator;

impl TemplateNarrator {
    pub fn new() -> Self {
        Self
    }
}

impl NarrativeGenerator for TemplateNarrator {
    fn generate(&self, run: &TaskRun, steps: &[Step]) -> NarrativeResult<String> {
        Ok(render_tutorial(run, steps, &[]))
    }
}

/// Render the walkthrough. `notes[i]`, when present, replaces the inferred
/// wording for `steps[i]`.
pub fn render_tutorial(run: &TaskRun, steps: &[Step], notes: &[Option<StepNote>]) -> String {
    let mut lines = vec![
        format!("# How to {}", run.task_instruction),
        String::new(),
        format!("**Status:** {}", run.status),
        format!("**Total Steps:** {}", steps.len()),
        String::new(),
        "---".to_string(),
        String::new(),
        "## Instructions".to_string(),
        String::new(),
        "Follow these steps to complete the task:".to_string(),
        String::new(),
    ];

    let mut previous: Option<&Step> = None;
    for (i, step) in steps.iter().enumerate() {
        let number = step.step_index + 1;

        // The starting page is not something the reader has to do
        if step.step_index == 0 && step.state_description.to_lowercase().contains("initial state") {
            previous = Some(step);
            continue;
        }

        let note = notes.get(i).and_then(Option::as_ref);
        let instruction = note
            .map(|n| n.instruction.clone())
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| infer_instruction(step, previous));

        lines.push(format!("### Step {}", number));
        lines.push(String::new());
        lines.push(polish(&instruction));
        lines.push(String::new());
        lines.push(format!("![Step {}]({})", number, step.screenshot_path.display()));
        lines.push(String::new());

        let context = note
            .and_then(|n| n.context.clone())
            .filter(|c| !c.trim().is_empty())
            .or_else(|| location_context(&step.url));
        if let Some(context) = context {
            lines.push(format!("*{}*", context));
            lines.push(String::new());
        }
        lines.push("---".to_string());
        lines.push(String::new());

        previous = Some(step);
    }

    lines.join("\n")
}

/// Best instruction for reaching `step` from `previous` without outside help
pub fn infer_instruction(step: &Step, previous: Option<&Step>) -> String {
    if let Some(description) = step
        .action_from_previous
        .as_ref()
        .map(|a| a.description.trim())
        .filter(|d| is_meaningful(d))
    {
        return description.to_string();
    }

    let previous_url = previous.map(|p| p.url.as_str()).filter(|u| !u.is_empty());
    if let Some(previous_url) = previous_url
        && step.url != previous_url
    {
        if domain(previous_url) != domain(&step.url) {
            return format!("Navigate to {}", domain(&step.url));
        }
        return match page_name(&step.url) {
            Some(page) => format!("Click on '{}'", page),
            None => "Click on a link to navigate".to_string(),
        };
    }

    if previous.is_some() && !step.has_unique_url {
        let hint = match step.action_from_previous.as_ref().map(|a| a.action_type) {
            Some(ActionType::Click) => "Click on an element",
            Some(ActionType::Type) => "Type text into a field",
            Some(ActionType::Scroll) => "Scroll the page",
            Some(ActionType::Navigate | ActionType::Wait | ActionType::Other) | None => {
                "Interact with the page"
            }
        };
        return hint.to_string();
    }

    let description = step.state_description.trim();
    if !description.is_empty() && !description.to_lowercase().contains("initial") {
        description.to_string()
    } else {
        "Navigate to the page".to_string()
    }
}

fn is_meaningful(description: &str) -> bool {
    let lower = description.to_lowercase();
    !description.is_empty()
        && !GENERIC_DESCRIPTIONS.contains(&lower.as_str())
        && !lower.contains("after other:")
}

/// Capitalize and drop synthesized prefixes
fn polish(instruction: &str) -> String {
    let mut text = instruction.trim().to_string();
    for prefix in SYNTHETIC_PREFIXES {
        text = text.replace(prefix, "");
    }
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => "Navigate to the page".to_string(),
    }
}

/// "You should now be on <domain> - <Page>"
fn location_context(url: &str) -> Option<String> {
    let domain = domain(url);
    if domain.is_empty() {
        return None;
    }
    Some(match page_name(url) {
        Some(page) => format!("You should now be on {} - {}", domain, page),
        None => format!("You should now be on {}", domain),
    })
}

/// Host (and port) without a leading `www.`; empty for unparseable URLs
pub fn domain(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return String::new();
    };
    let host = parsed.host_str().unwrap_or("");
    let host = host.strip_prefix("www.").unwrap_or(host);
    match parsed.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

/// Readable name of the last path segment, e.g. `/docs/getting-started` →
/// "Getting Started"
pub fn page_name(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segment = parsed.path().trim_matches('/').rsplit('/').next()?;
    if segment.is_empty() {
        return None;
    }

    let stripped = HEX_SUFFIX.replace(segment, "");
    let titled = title_case(&stripped.replace('-', " "));
    let words: Vec<&str> = titled
        .split_whitespace()
        .filter(|w| !(w.len() > 20 && w.chars().all(|c| c.is_ascii_hexdigit())))
        .collect();

    if words.is_empty() {
        None
    } else {
        Some(words.join(" "))
    }
}

/// Upper-case the first letter of each alphabetic run, lower-case the rest
fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut at_word_start = true;
    for c in text.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Action, TaskStatus};
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn step(index: usize, url: &str, action: Option<Action>, unique: bool, description: &str) -> Step {
        Step {
            step_index: index,
            screenshot_path: PathBuf::from(format!("step_{:03}.png", index)),
            url: url.to_string(),
            has_unique_url: unique,
            action_from_previous: action,
            state_description: description.to_string(),
            timestamp: Utc::now(),
        }
    }

    fn finished_run(task: &str) -> TaskRun {
        let mut run = TaskRun::start(task, "scripted");
        run.finalize(TaskStatus::Success, 0).unwrap();
        run
    }

    #[test]
    fn test_page_name_strips_hex_suffix() {
        assert_eq!(
            page_name("https://www.notion.so/Project-Plan-0123456789abcdef0123456789abcdef").as_deref(),
            Some("Project Plan")
        );
        assert_eq!(
            page_name("https://docs.test/guide/getting-started/").as_deref(),
            Some("Getting Started")
        );
        assert_eq!(page_name("https://docs.test/"), None);
        assert_eq!(page_name("not a url"), None);
    }

    #[test]
    fn test_domain_drops_www() {
        assert_eq!(domain("https://www.linear.app/team"), "linear.app");
        assert_eq!(domain("http://localhost:3000/x"), "localhost:3000");
        assert_eq!(domain(""), "");
    }

    #[test]
    fn test_instruction_prefers_action_description() {
        let prev = step(0, "https://app.test/", None, true, "Home");
        let cur = step(
            1,
            "https://app.test/new",
            Some(Action::new(ActionType::Click, "click on 'New project'")),
            true,
            "",
        );
        assert_eq!(infer_instruction(&cur, Some(&prev)), "click on 'New project'");
        assert_eq!(polish("click on 'New project'"), "Click on 'New project'");
    }

    #[test]
    fn test_instruction_inferred_from_url_change() {
        let prev = step(0, "https://www.google.com/", None, true, "Search");
        let generic = Some(Action::new(ActionType::Other, "Executed action"));

        let cross = step(1, "https://linear.app/", generic.clone(), true, "");
        assert_eq!(infer_instruction(&cross, Some(&prev)), "Navigate to linear.app");

        let same = step(1, "https://www.google.com/advanced-search", generic, true, "");
        assert_eq!(infer_instruction(&same, Some(&prev)), "Click on 'Advanced Search'");
    }

    #[test]
    fn test_instruction_for_revisited_url_uses_action_type() {
        let prev = step(0, "https://app.test/form", None, true, "Form");
        let typed = step(1, "https://app.test/form", Some(Action::new(ActionType::Type, "")), false, "");
        assert_eq!(infer_instruction(&typed, Some(&prev)), "Type text into a field");

        let bare = step(1, "https://app.test/form", None, false, "");
        assert_eq!(infer_instruction(&bare, Some(&prev)), "Interact with the page");
    }

    #[test]
    fn test_render_skips_initial_state_and_uses_notes() {
        let run = finished_run("create a project");
        let steps = vec![
            step(0, "https://app.test/", None, true, "Initial state: create a project"),
            step(1, "https://app.test/projects/roadmap", None, true, ""),
            step(2, "https://app.test/projects/roadmap", None, false, ""),
        ];
        let notes = vec![
            None,
            None,
            Some(StepNote {
                instruction: "press Save".to_string(),
                context: Some("The project appears in the sidebar".to_string()),
            }),
        ];

        let markdown = render_tutorial(&run, &steps, &notes);
        assert!(markdown.starts_with("# How to create a project\n"));
        assert!(markdown.contains("**Status:** success"));
        assert!(markdown.contains("**Total Steps:** 3"));
        assert!(!markdown.contains("### Step 1\n"));
        assert!(markdown.contains("### Step 2\n\nClick on 'Roadmap'\n\n![Step 2](step_001.png)"));
        assert!(markdown.contains("*You should now be on app.test - Roadmap*"));
        assert!(markdown.contains("### Step 3\n\nPress Save\n"));
        assert!(markdown.contains("*The project appears in the sidebar*"));
    }
}
