//! Shared output formatting for crmboard CLI commands.
//!
//! JSON output is wrapped in a versioned envelope; human output is a header,
//! an optional summary and bulleted sections.

use serde::Serialize;

use crate::error::{Error, ErrorCategory, Result};

pub const SCHEMA_VERSION: &str = "crmboard.v1";

#[derive(Debug, Clone, Copy)]
pub struct OutputOptions {
    pub json: bool,
    pub quiet: bool,
}

#[derive(Debug, Clone)]
pub struct HumanOutput {
    header: String,
    summary: Vec<(String, String)>,
    sections: Vec<(String, Vec<String>)>,
    warnings: Vec<String>,
    next_steps: Vec<String>,
}

impl HumanOutput {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            summary: Vec::new(),
            sections: Vec::new(),
            warnings: Vec::new(),
            next_steps: Vec::new(),
        }
    }

    pub fn push_summary(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.summary.push((key.into(), value.into()));
    }

    /// Append a line to the named section, creating it on first use.
    pub fn push_line(&mut self, section: &str, value: impl Into<String>) {
        let value = value.into();
        match self.sections.iter_mut().find(|(title, _)| title == section) {
            Some((_, lines)) => lines.push(value),
            None => self.sections.push((section.to_string(), vec![value])),
        }
    }

    pub fn push_warning(&mut self, value: impl Into<String>) {
        self.warnings.push(value.into());
    }

    pub fn push_next_step(&mut self, value: impl Into<String>) {
        self.next_steps.push(value.into());
    }
}

pub fn emit_success<T: Serialize>(
    options: OutputOptions,
    command: &str,
    data: &T,
    human: Option<&HumanOutput>,
) -> Result<()> {
    if options.json {
        let warnings = human.map(|h| h.warnings.clone()).unwrap_or_default();
        let next_steps = human.map(|h| h.next_steps.clone()).unwrap_or_default();

        #[derive(Serialize)]
        struct Envelope<'a, T: Serialize> {
            schema_version: &'static str,
            command: &'a str,
            status: &'static str,
            data: &'a T,
            #[serde(skip_serializing_if = "Vec::is_empty")]
            warnings: Vec<String>,
            #[serde(skip_serializing_if = "Vec::is_empty")]
            next_steps: Vec<String>,
        }

        let payload = Envelope {
            schema_version: SCHEMA_VERSION,
            command,
            status: "success",
            data,
            warnings,
            next_steps,
        };

        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    if options.quiet {
        return Ok(());
    }

    if let Some(human) = human {
        println!("{}", format_human(human));
    }

    Ok(())
}

pub fn emit_error(command: &str, err: &Error, json: bool) -> Result<()> {
    let next_steps = error_next_steps(err);
    let hint = next_steps.first().map(|step| step.as_str());
    if json {
        #[derive(Serialize)]
        struct ErrorBody<'a> {
            message: &'a str,
            code: i32,
            kind: &'static str,
            #[serde(skip_serializing_if = "Option::is_none")]
            details: Option<serde_json::Value>,
        }

        #[derive(Serialize)]
        struct Envelope<'a> {
            schema_version: &'static str,
            command: &'a str,
            status: &'static str,
            error: ErrorBody<'a>,
            #[serde(skip_serializing_if = "Vec::is_empty")]
            next_steps: Vec<String>,
        }

        let payload = Envelope {
            schema_version: SCHEMA_VERSION,
            command,
            status: "error",
            error: ErrorBody {
                message: &err.to_string(),
                code: err.exit_code(),
                kind: error_kind(err),
                details: err.details(),
            },
            next_steps,
        };

        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    eprintln!("error: {err}");
    if let Some(hint) = hint {
        eprintln!("hint: {hint}");
    }
    Ok(())
}

pub fn format_human(output: &HumanOutput) -> String {
    let mut lines = Vec::new();
    lines.push(output.header.clone());

    push_summary(&mut lines, &output.summary);
    for (title, items) in &output.sections {
        push_section(&mut lines, title, items);
    }
    push_section(&mut lines, "Warnings", &output.warnings);
    push_section(&mut lines, "Next steps", &output.next_steps);

    lines.join("\n")
}

pub fn infer_command_name_from_args() -> String {
    command_name(std::env::args().skip(1))
}

fn command_name(mut args: impl Iterator<Item = String>) -> String {
    let mut command = None;
    let mut subcommand = None;

    for arg in args.by_ref() {
        if arg.starts_with('-') {
            continue;
        }
        command = Some(arg);
        break;
    }

    let command = match command {
        Some(cmd) => cmd,
        None => return "crmboard".to_string(),
    };

    if matches!(command.as_str(), "subtask" | "actor") {
        for arg in args.by_ref() {
            if arg.starts_with('-') {
                continue;
            }
            subcommand = Some(arg);
            break;
        }
    }

    if let Some(sub) = subcommand {
        format!("{command} {sub}")
    } else {
        command
    }
}

fn error_kind(err: &Error) -> &'static str {
    match err.category() {
        ErrorCategory::Validation => "validation",
        ErrorCategory::Subscription => "subscription",
        ErrorCategory::Dispatch => "dispatch",
        ErrorCategory::Resolution => "not_found",
        ErrorCategory::Internal if err.exit_code() == 2 => "user_error",
        ErrorCategory::Internal => "operation_failed",
    }
}

fn error_next_steps(err: &Error) -> Vec<String> {
    match err {
        Error::NotFound { .. } => vec!["crmboard list".to_string()],
        Error::InvalidConfig(_) => vec!["fix .crmboard.toml then retry".to_string()],
        Error::LockFailed(_) => vec!["retry once the other writer is done".to_string()],
        Error::Validation { field, .. } if field == "status" || field == "urgency" => {
            vec!["crmboard labels".to_string()]
        }
        _ => Vec::new(),
    }
}

fn push_summary(lines: &mut Vec<String>, summary: &[(String, String)]) {
    if summary.is_empty() {
        return;
    }

    lines.push(String::new());
    lines.push("Summary:".to_string());
    for (key, value) in summary {
        if value.is_empty() {
            lines.push(format!("- {key}"));
        } else {
            lines.push(format!("- {key}: {value}"));
        }
    }
}

fn push_section(lines: &mut Vec<String>, title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }

    lines.push(String::new());
    lines.push(format!("{title}:"));
    for item in items {
        lines.push(format!("- {item}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> impl Iterator<Item = String> {
        items
            .iter()
            .map(|item| item.to_string())
            .collect::<Vec<_>>()
            .into_iter()
    }

    #[test]
    fn command_name_includes_subcommand_for_groups() {
        assert_eq!(command_name(args(&["--json", "move", "t1", "done"])), "move");
        assert_eq!(command_name(args(&["subtask", "--json", "add", "t1"])), "subtask add");
        assert_eq!(command_name(args(&[])), "crmboard");
    }

    #[test]
    fn human_sections_keep_insertion_order() {
        let mut human = HumanOutput::new("crmboard board");
        human.push_summary("tasks", "2");
        human.push_line("To Do", "t1 Call back");
        human.push_line("Done", "t2 Invoice");
        human.push_line("To Do", "t3 Quote");
        human.push_warning("customers stream stale");

        let text = format_human(&human);
        let todo = text.find("To Do:").expect("todo section");
        let done = text.find("Done:").expect("done section");
        assert!(todo < done);
        assert!(text.contains("- t3 Quote"));
        assert!(text.contains("Warnings:\n- customers stream stale"));
    }

    #[test]
    fn error_kind_follows_category() {
        assert_eq!(error_kind(&Error::validation("title", "title required")), "validation");
        assert_eq!(
            error_kind(&Error::InvalidArgument("bad".to_string())),
            "user_error"
        );
        assert_eq!(error_kind(&Error::Store("down".to_string())), "operation_failed");
    }
}
