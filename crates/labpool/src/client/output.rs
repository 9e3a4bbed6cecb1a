use std::time::Duration;

use chrono::{DateTime, Utc};
use cli_table::{print_stdout, Cell, CellStruct, Style, Table};
use colored::{Color, Colorize};
use serde::Serialize;

use crate::client::globalsettings::GlobalSettings;
use crate::transfer::messages::{ServerInfo, StatsResponse};
use zamek::allocation::{AllocState, Allocation};
use zamek::pool::{GuestOutcome, RemoveOutcome, RequestOutcome};
use zamek::AllocationId;

#[derive(clap::ValueEnum, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Human readable output.
    Cli,
    /// Machine readable output.
    Json,
}

fn print_json<T: Serialize>(value: &T) {
    // Serializing our own message types cannot fail.
    println!("{}", serde_json::to_string_pretty(value).unwrap());
}

fn print_table(rows: Vec<Vec<CellStruct>>, header: Vec<CellStruct>) {
    let table = rows.table().title(header);
    if let Err(e) = print_stdout(table) {
        log::error!("Cannot print table to stdout: {e:?}");
    }
}

fn state_color(state: AllocState) -> Color {
    match state {
        AllocState::Active => Color::Green,
        AllocState::Queued => Color::Yellow,
        AllocState::Busy | AllocState::Rejected => Color::Red,
        AllocState::RestartNeeded | AllocState::Invalid => Color::BrightRed,
        AllocState::Removed | AllocState::Timedout | AllocState::Overtime => Color::Magenta,
    }
}

fn state_cell(state: AllocState) -> CellStruct {
    state.to_string().as_str().color(state_color(state)).cell()
}

fn ago(time: DateTime<Utc>) -> String {
    let elapsed = (Utc::now() - time).to_std().unwrap_or_default();
    format!(
        "{} ago",
        humantime::format_duration(Duration::from_secs(elapsed.as_secs()))
    )
}

fn format_groups(allocation: &Allocation) -> String {
    allocation
        .groups
        .iter()
        .map(|group| {
            let granted = allocation.granted_group.as_deref() == Some(group.name.as_str());
            let resources = group
                .resources
                .iter()
                .map(|r| r.to_string())
                .collect::<Vec<_>>()
                .join(",");
            format!(
                "{}{}={resources}",
                if granted { "*" } else { "" },
                group.name
            )
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

pub fn print_request_outcome(gsettings: &GlobalSettings, outcome: &RequestOutcome) {
    match gsettings.output_mode() {
        OutputMode::Json => print_json(outcome),
        OutputMode::Cli => {
            let state = outcome
                .state
                .to_string()
                .as_str()
                .color(state_color(outcome.state));
            match &outcome.granted_group {
                Some(group) => {
                    println!("Allocation {}: {state} (group {group})", outcome.id)
                }
                None => println!("Allocation {}: {state}", outcome.id),
            }
        }
    }
}

pub fn print_allocations(gsettings: &GlobalSettings, allocations: &[Allocation]) {
    match gsettings.output_mode() {
        OutputMode::Json => print_json(&allocations),
        OutputMode::Cli => {
            let rows: Vec<Vec<CellStruct>> = allocations
                .iter()
                .map(|a| {
                    vec![
                        a.id.cell(),
                        state_cell(a.state),
                        a.owner.as_str().cell(),
                        a.priority.cell(),
                        (if a.preempt { "yes" } else { "" }).cell(),
                        format_groups(a).cell(),
                        ago(a.last_activity).cell(),
                        a.reason.as_str().cell(),
                    ]
                })
                .collect();
            print_table(
                rows,
                vec![
                    "Id".cell().bold(true),
                    "State".cell().bold(true),
                    "Owner".cell().bold(true),
                    "Priority".cell().bold(true),
                    "Preempt".cell().bold(true),
                    "Groups".cell().bold(true),
                    "Last activity".cell().bold(true),
                    "Reason".cell().bold(true),
                ],
            );
        }
    }
}

pub fn print_keepalive(gsettings: &GlobalSettings, divergent: &[(AllocationId, AllocState)]) {
    match gsettings.output_mode() {
        OutputMode::Json => print_json(&divergent),
        OutputMode::Cli => {
            if divergent.is_empty() {
                println!("All beliefs match the server state");
                return;
            }
            let rows: Vec<Vec<CellStruct>> = divergent
                .iter()
                .map(|(id, state)| vec![id.cell(), state_cell(*state)])
                .collect();
            print_table(
                rows,
                vec!["Id".cell().bold(true), "State".cell().bold(true)],
            );
        }
    }
}

pub fn print_remove_outcome(gsettings: &GlobalSettings, outcome: RemoveOutcome) {
    match gsettings.output_mode() {
        OutputMode::Json => print_json(&outcome),
        OutputMode::Cli => match outcome {
            RemoveOutcome::Removed => println!("Allocation removed"),
            RemoveOutcome::GuestRemoved => {
                println!("You were a guest: only your guest entry was removed")
            }
            RemoveOutcome::Invalid => println!("{}", "Unknown or already dead allocation".red()),
            RemoveOutcome::Denied => {
                println!("{}", "You are not a participant of this allocation".red())
            }
        },
    }
}

pub fn print_guest_outcome(gsettings: &GlobalSettings, outcome: GuestOutcome) {
    match gsettings.output_mode() {
        OutputMode::Json => print_json(&outcome),
        OutputMode::Cli => match outcome {
            GuestOutcome::Done => println!("Guest set updated"),
            GuestOutcome::Invalid => println!("{}", "Unknown allocation or guest".red()),
            GuestOutcome::Denied => println!("{}", "Operation not permitted".red()),
        },
    }
}

pub fn print_authorize(gsettings: &GlobalSettings, user: &str, resource: &str, allowed: bool) {
    match gsettings.output_mode() {
        OutputMode::Json => print_json(&allowed),
        OutputMode::Cli => {
            if allowed {
                println!("{user} may use {resource}: {}", "authorized".green());
            } else {
                println!("{user} may use {resource}: {}", "denied".red());
            }
        }
    }
}

pub fn print_stats(gsettings: &GlobalSettings, response: &StatsResponse) {
    match gsettings.output_mode() {
        OutputMode::Json => print_json(response),
        OutputMode::Cli => {
            let stats = &response.stats;
            let rows = vec![
                vec!["Server uid".cell().bold(true), response.server_uid.as_str().cell()],
                vec!["Targets".cell().bold(true), stats.resources.cell()],
                vec!["Held targets".cell().bold(true), stats.resources_held.cell()],
                vec!["Active".cell().bold(true), stats.active.cell()],
                vec!["Queued".cell().bold(true), stats.queued.cell()],
                vec![
                    "Restart needed".cell().bold(true),
                    stats.restart_needed.cell(),
                ],
                vec!["Total records".cell().bold(true), stats.records.cell()],
            ];
            if let Err(e) = print_stdout(rows.table()) {
                log::error!("Cannot print table to stdout: {e:?}");
            }
        }
    }
}

pub fn print_server_info(gsettings: &GlobalSettings, info: &ServerInfo) {
    match gsettings.output_mode() {
        OutputMode::Json => print_json(info),
        OutputMode::Cli => {
            let rows = vec![
                vec!["Version".cell().bold(true), info.version.as_str().cell()],
                vec!["Server uid".cell().bold(true), info.server_uid.as_str().cell()],
                vec!["Host".cell().bold(true), info.host.as_str().cell()],
                vec!["Port".cell().bold(true), info.port.cell()],
                vec!["Pid".cell().bold(true), info.pid.cell()],
                vec![
                    "Start date".cell().bold(true),
                    info.start_date.format("%Y-%m-%d %H:%M:%S UTC").cell(),
                ],
            ];
            if let Err(e) = print_stdout(rows.table()) {
                log::error!("Cannot print table to stdout: {e:?}");
            }
        }
    }
}
