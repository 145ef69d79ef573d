//! crmboard labels command
//!
//! Lists every canonical status and urgency with its display label and the
//! aliases that map onto it, including configured ones.

use serde::Serialize;

use crate::error::Result;
use crate::output::{emit_success, HumanOutput};
use crate::taxonomy::{Canonical, CanonicalStatus, CanonicalUrgency, Locale, Taxonomy};

use super::Context;

#[derive(Debug, Serialize, PartialEq)]
struct LabelEntry {
    code: &'static str,
    label: &'static str,
    aliases: Vec<String>,
}

#[derive(Debug, Serialize)]
struct LabelsReport {
    locale: Locale,
    statuses: Vec<LabelEntry>,
    urgencies: Vec<LabelEntry>,
}

pub fn run(ctx: &Context) -> Result<()> {
    let report = build_report(&ctx.taxonomy()?, ctx.locale);

    let mut human = HumanOutput::new("crmboard labels");
    for entry in &report.statuses {
        human.push_line("Statuses", describe(entry));
    }
    for entry in &report.urgencies {
        human.push_line("Urgencies", describe(entry));
    }

    emit_success(ctx.output, "labels", &report, Some(&human))
}

fn build_report(taxonomy: &Taxonomy, locale: Locale) -> LabelsReport {
    LabelsReport {
        locale,
        statuses: CanonicalStatus::ALL
            .iter()
            .map(|status| LabelEntry {
                code: status.code(),
                label: taxonomy.display_status(*status, locale),
                aliases: taxonomy.status_aliases(*status),
            })
            .collect(),
        urgencies: CanonicalUrgency::ALL
            .iter()
            .map(|urgency| LabelEntry {
                code: urgency.code(),
                label: taxonomy.display_urgency(*urgency, locale),
                aliases: taxonomy.urgency_aliases(*urgency),
            })
            .collect(),
    }
}

fn describe(entry: &LabelEntry) -> String {
    format!("{} \"{}\" <- {}", entry.code, entry.label, entry.aliases.join(", "))
}
