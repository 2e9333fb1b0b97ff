//! `linkrec table` and `linkrec reconcile`.

use anyhow::Context;
use serde::Serialize;

use linkrec_core::{
    DeliveryState, ReceiverAction, Role, SettleMode, TransferDirective, reconcile_for_role,
    reconcile_with_mode, sample_states,
};

use crate::cli::{ReconcileOpts, TableOpts};

#[derive(Serialize)]
struct Row {
    local: String,
    remote: String,
    directive: TransferDirective,
    summary: String,
}

/// Parse a record argument; `absent`, `none` and `-` mean no record.
pub(crate) fn parse_record(s: &str) -> anyhow::Result<Option<DeliveryState>> {
    match s.trim().to_ascii_lowercase().as_str() {
        "absent" | "none" | "-" | "" => Ok(None),
        other => other
            .parse()
            .map(Some)
            .with_context(|| format!("invalid delivery state {s:?}")),
    }
}

pub(crate) fn label(state: Option<DeliveryState>) -> String {
    state.map_or_else(|| "absent".to_owned(), |s| s.to_string())
}

/// One-line rendering of a directive.
pub(crate) fn summarize(directive: &TransferDirective) -> String {
    match directive {
        TransferDirective::Skip => "skip".to_owned(),
        TransferDirective::SkipAndForget => "skip+forget".to_owned(),
        TransferDirective::Resend(flags) => {
            let mut parts = Vec::new();
            if flags.resume {
                parts.push("resume".to_owned());
            }
            if flags.aborted {
                parts.push("aborted".to_owned());
            }
            if flags.settled {
                parts.push("settled".to_owned());
            }
            if let Some(state) = flags.state {
                parts.push(format!("state={state}"));
            }
            if parts.is_empty() {
                "resend".to_owned()
            } else {
                format!("resend({})", parts.join(","))
            }
        }
    }
}

fn summarize_action(action: &ReceiverAction) -> String {
    match action {
        ReceiverAction::Discard => "discard".to_owned(),
        ReceiverAction::AwaitTransfer { expected } => format!("await {}", summarize(expected)),
    }
}

pub fn cmd_table(opts: &TableOpts) -> anyhow::Result<()> {
    let settle_mode = SettleMode::from(opts.settle_mode);
    let states = sample_states();
    let rows: Vec<Row> = states
        .iter()
        .flat_map(|&local| states.iter().map(move |&remote| (local, remote)))
        .map(|(local, remote)| {
            let directive = reconcile_with_mode(settle_mode, local, remote);
            Row {
                local: label(local),
                remote: label(remote),
                summary: summarize(&directive),
                directive,
            }
        })
        .collect();

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("{:<14} {:<14} DIRECTIVE", "LOCAL", "REMOTE");
    for row in &rows {
        println!("{:<14} {:<14} {}", row.local, row.remote, row.summary);
    }
    Ok(())
}

pub fn cmd_reconcile(opts: &ReconcileOpts) -> anyhow::Result<()> {
    let local = parse_record(&opts.local)?;
    let remote = parse_record(&opts.remote)?;
    let settle_mode = SettleMode::from(opts.settle_mode);

    match Role::from(opts.role) {
        Role::Sender => {
            let directive = reconcile_with_mode(settle_mode, local, remote);
            if opts.json {
                println!("{}", serde_json::to_string_pretty(&directive)?);
            } else {
                println!("{}", summarize(&directive));
            }
        }
        Role::Receiver => {
            let action = reconcile_for_role(local, remote, settle_mode);
            if opts.json {
                println!("{}", serde_json::to_string_pretty(&action)?);
            } else {
                println!("{}", summarize_action(&action));
            }
        }
    }
    Ok(())
}
