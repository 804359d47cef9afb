//! Terminal rendering for progressctl output

use owo_colors::OwoColorize;
use progress_shared::api::AchievementEntry;
use progress_shared::challenges::ChallengeInstance;
use progress_shared::{
    ActivityOutcome, AwardOutcome, ClaimOutcome, HealthResponse, LedgerSummary,
    ProgressionSnapshot, SuppressReason, SyncReport, XpTransaction,
};

const THIN_SEP: &str = "------------------------------------------------------------";
const BAR_WIDTH: usize = 30;

/// `[#####.....]` style bar for a 0-100 percentage
pub fn progress_bar(percent: u8, width: usize) -> String {
    let filled = (usize::from(percent.min(100)) * width) / 100;
    format!("[{}{}]", "#".repeat(filled), ".".repeat(width - filled))
}

/// Signed XP with explicit `+` for gains
pub fn signed_xp(xp: i64) -> String {
    if xp > 0 {
        format!("+{} XP", xp)
    } else {
        format!("{} XP", xp)
    }
}

fn colored_xp(xp: i64) -> String {
    let text = signed_xp(xp);
    if xp < 0 {
        text.red().to_string()
    } else {
        text.green().to_string()
    }
}

pub fn print_health(health: &HealthResponse, url: &str) {
    println!();
    println!("{}", "  progressd".bold());
    println!("{}", THIN_SEP);
    println!("  URL:            {}", url);
    println!("  Status:         {}", health.status.green());
    println!("  Version:        {}", health.version);
    println!("  Uptime:         {}s", health.uptime_seconds);
    println!("  Open sessions:  {}", health.open_sessions);
    match &health.sync {
        Some(remote) => println!("  Sync:           {}", remote),
        None => println!("  Sync:           {}", "disabled".dimmed()),
    }
    println!();
}

pub fn print_snapshot(snapshot: &ProgressionSnapshot) {
    println!();
    println!(
        "  {} {}",
        snapshot.icon,
        format!("{} - Level {} {}", snapshot.user_id, snapshot.level, snapshot.title).bold()
    );
    println!("{}", THIN_SEP);

    println!("{}", "[LEVEL]".cyan());
    println!("  Tier:           {}", snapshot.tier);
    println!("  Total XP:       {}", snapshot.display_xp);
    if snapshot.total_xp < 0 {
        println!("  Ledger total:   {}", snapshot.total_xp.red());
    }
    match snapshot.progress.next_level {
        Some(next) => println!(
            "  Next level {}:   {} {}/{} ({}%)",
            next,
            progress_bar(snapshot.progress.percent, BAR_WIDTH),
            snapshot.progress.current,
            snapshot.progress.required,
            snapshot.progress.percent
        ),
        None => println!("  Next level:     {}", "max level reached".yellow()),
    }

    println!("{}", "[STREAK]".cyan());
    println!("  Current:        {} days", snapshot.streak.current_streak);
    println!("  Longest:        {} days", snapshot.streak.longest_streak);
    println!("  Active days:    {}", snapshot.streak.active_days);
    if snapshot.streak.at_risk_streak > 0 {
        println!(
            "  {}",
            format!(
                "Study today to keep your {}-day streak",
                snapshot.streak.at_risk_streak
            )
            .yellow()
        );
    }

    if snapshot.unclaimed_count() > 0 {
        println!("{}", "[UNCLAIMED]".cyan());
        for id in &snapshot.unclaimed_challenges {
            println!("  challenge       {}", id);
        }
        for id in &snapshot.unclaimed_achievements {
            println!("  achievement     {}", id);
        }
    }

    println!("{}", "[SYNC]".cyan());
    println!("  Pending:        {}", snapshot.pending_sync);
    match snapshot.last_synced_at {
        Some(at) => println!("  Last synced:    {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("  Last synced:    {}", "never".dimmed()),
    }
    println!();
}

pub fn print_award(outcome: &AwardOutcome) {
    for tx in &outcome.applied {
        println!("  {} {}", colored_xp(tx.amount), tx.source_type.as_str().dimmed());
    }
    for skipped in &outcome.suppressed {
        let reason = match skipped.reason {
            SuppressReason::Cooldown => "cooldown",
            SuppressReason::Duplicate => "already credited",
        };
        println!(
            "  {} {} ({})",
            "skipped".yellow(),
            skipped.source_type.as_str(),
            reason
        );
    }
    for event in &outcome.level_ups {
        let mut line = format!("LEVEL UP {} -> {}", event.previous_level, event.new_level);
        if event.tier_changed {
            line.push_str(&format!(" ({} -> {})", event.previous_tier, event.new_tier));
        }
        println!("  {}", line.bold().magenta());
    }
    println!("  Total:          {}", outcome.total_xp);
}

pub fn print_activity(outcome: &ActivityOutcome) {
    println!();
    if outcome.redelivered {
        println!("  {}", "Already recorded; nothing changed".yellow());
    }
    print_award(&outcome.award);
    println!("  Streak:         {} days", outcome.streak.current_streak);
    for challenge in &outcome.completed_challenges {
        println!(
            "  {} {} (claim {} XP with: progressctl claim-challenge {})",
            "challenge complete".green(),
            challenge.title,
            challenge.xp_reward,
            challenge.id
        );
    }
    for update in outcome.achievement_updates.iter().filter(|u| u.newly_unlocked) {
        println!(
            "  {} {}",
            "achievement unlocked".green(),
            update.achievement_id
        );
    }
    println!(
        "  Level {} {} ({}%)",
        outcome.snapshot.level,
        progress_bar(outcome.snapshot.progress.percent, BAR_WIDTH),
        outcome.snapshot.progress.percent
    );
    println!();
}

pub fn print_history(transactions: &[XpTransaction]) {
    println!();
    if transactions.is_empty() {
        println!("  {}", "No transactions yet".dimmed());
        println!();
        return;
    }
    for tx in transactions {
        println!(
            "  {}  {:>10}  {:<20} {}",
            tx.created_at.format("%Y-%m-%d %H:%M"),
            colored_xp(tx.amount),
            tx.source_type.as_str(),
            tx.source_id.as_deref().unwrap_or("").dimmed()
        );
    }
    println!();
}

pub fn print_summary(summary: &LedgerSummary) {
    println!("{}", "[LEDGER]".cyan());
    println!("  Transactions:   {}", summary.total);
    println!("  Gained:         {}", summary.xp_gained);
    println!("  Lost:           {}", summary.xp_lost);
    println!("  Net:            {}", summary.net_xp);
    for (source, totals) in &summary.by_source {
        println!(
            "    {:<20} {:>4} x  {:>8}",
            source.as_str(),
            totals.count,
            totals.xp
        );
    }
    println!();
}

pub fn print_challenges(board: &[ChallengeInstance]) {
    println!();
    if board.is_empty() {
        println!("  {}", "No active challenges".dimmed());
        println!();
        return;
    }
    for challenge in board {
        let percent = if challenge.target_value == 0 {
            100
        } else {
            ((challenge.current_progress * 100) / challenge.target_value).min(100) as u8
        };
        let state = if challenge.is_claimed {
            "claimed".dimmed().to_string()
        } else if challenge.is_completed {
            "ready to claim".green().to_string()
        } else {
            format!("{}/{}", challenge.current_progress, challenge.target_value)
        };
        println!(
            "  {:<8} {:<32} {} {:>4} XP  {}",
            challenge.cadence.as_str(),
            challenge.title,
            progress_bar(percent, 10),
            challenge.xp_reward,
            state
        );
        println!("           {}", challenge.id.dimmed());
    }
    println!();
}

pub fn print_achievements(entries: &[AchievementEntry]) {
    println!();
    for entry in entries {
        let state = if entry.is_claimed {
            "claimed".dimmed().to_string()
        } else if entry.is_unlocked {
            "ready to claim".green().to_string()
        } else {
            format!("{:.0}%", entry.progress)
        };
        println!(
            "  {} {:<24} {:<10} {:>4} XP  {}",
            entry.badge,
            entry.name,
            entry.rarity.as_str(),
            entry.xp_reward,
            state
        );
        println!("     {}", entry.description.dimmed());
    }
    println!();
}

pub fn print_claim(what: &str, id: &str, outcome: &ClaimOutcome) {
    println!();
    if outcome.claimed {
        println!("  Claimed {} {}", what, id.bold());
        print_award(&outcome.award);
    } else {
        println!(
            "  {}",
            format!("Nothing to claim for {} {}", what, id).yellow()
        );
        println!("  Total:          {}", outcome.award.total_xp);
    }
    println!();
}

pub fn print_sync(report: &SyncReport) {
    println!();
    println!("{}", "[SYNC]".cyan());
    println!("  User:           {}", report.user_id);
    println!("  Pushed:         {}", report.pushed);
    println!("  Acknowledged:   {}", report.acknowledged);
    println!("  Still queued:   {}", report.retained);
    println!("  Remote total:   {}", report.remote_total);
    println!("  Total XP:       {} (level {})", report.total_xp, report.level);
    println!("  Attempts:       {}", report.attempts);
    if report.conflict {
        println!(
            "  {}",
            "Remote total differed from local; remote value adopted".yellow()
        );
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_bar_bounds() {
        assert_eq!(progress_bar(0, 10), "[..........]");
        assert_eq!(progress_bar(50, 10), "[#####.....]");
        assert_eq!(progress_bar(100, 10), "[##########]");
        assert_eq!(progress_bar(250, 4), "[####]");
    }

    #[test]
    fn test_signed_xp() {
        assert_eq!(signed_xp(25), "+25 XP");
        assert_eq!(signed_xp(0), "0 XP");
        assert_eq!(signed_xp(-10), "-10 XP");
    }
}
