//! Command execution

use anyhow::{anyhow, Result};
use progress_shared::{ActivityKind, ActivityReport, AwardRequest, SourceType};
use serde::Serialize;

use crate::cli::Commands;
use crate::client::ProgressClient;
use crate::display;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Build the activity report for `progressctl report`
pub fn build_report(
    user: &str,
    kind: &str,
    xp: i64,
    source_id: Option<String>,
    session: Option<String>,
    minutes: u64,
    utc_offset: Option<i32>,
) -> Result<ActivityReport> {
    let kind = ActivityKind::parse(kind).ok_or_else(|| anyhow!("Unknown activity kind '{}'", kind))?;
    let mut report = ActivityReport::new(user, kind, xp);
    if let Some(id) = source_id {
        report = report.with_source_id(id);
    }
    if let Some(id) = session {
        report = report.with_session(id, minutes);
    } else {
        report.context.minutes = minutes;
    }
    if let Some(offset) = utc_offset {
        report = report.with_offset(offset);
    }
    Ok(report)
}

pub async fn run(client: &ProgressClient, command: Commands) -> Result<()> {
    match command {
        Commands::Status { user: None, json } => {
            let health = client.health().await?;
            if json {
                return print_json(&health);
            }
            display::print_health(&health, client.base_url());
        }
        Commands::Status { user: Some(user), json } => {
            let snapshot = client.snapshot(&user).await?;
            if json {
                return print_json(&snapshot);
            }
            display::print_snapshot(&snapshot);
        }
        Commands::Report {
            user,
            kind,
            xp,
            source_id,
            session,
            minutes,
            utc_offset,
            json,
        } => {
            let report = build_report(&user, &kind, xp, source_id, session, minutes, utc_offset)?;
            let outcome = client.report(&report).await?;
            if json {
                return print_json(&outcome);
            }
            display::print_activity(&outcome);
        }
        Commands::Award {
            user,
            amount,
            source,
            source_id,
        } => {
            let source: SourceType = source.parse()?;
            let mut request = AwardRequest::new(source, amount);
            if let Some(id) = source_id {
                request = request.with_source_id(id);
            }
            let outcome = client.award(&user, &request).await?;
            println!();
            display::print_award(&outcome);
            println!();
        }
        Commands::History { user, limit, json } => {
            let transactions = client.transactions(&user, limit).await?;
            if json {
                return print_json(&transactions);
            }
            display::print_history(&transactions);
            display::print_summary(&client.summary(&user).await?);
        }
        Commands::Challenges { user, refresh } => {
            let board = if refresh {
                client.refresh_challenges(&user).await?
            } else {
                client.challenges(&user).await?
            };
            display::print_challenges(&board);
        }
        Commands::Progress { user, id, delta } => {
            let instance = client.progress_challenge(&user, &id, delta).await?;
            display::print_challenges(std::slice::from_ref(&instance));
        }
        Commands::ClaimChallenge { user, id } => {
            let outcome = client.claim_challenge(&user, &id).await?;
            display::print_claim("challenge", &id, &outcome);
        }
        Commands::Achievements { user, json } => {
            let entries = client.achievements(&user).await?;
            if json {
                return print_json(&entries);
            }
            display::print_achievements(&entries);
        }
        Commands::ClaimAchievement { user, id } => {
            let outcome = client.claim_achievement(&user, &id).await?;
            display::print_claim("achievement", &id, &outcome);
        }
        Commands::Sync { user } => {
            let report = client.sync(&user).await?;
            display::print_sync(&report);
        }
    }
    Ok(())
}
