// Colored terminal output for feed pages and rebuild reports.
//
// This module handles all terminal-specific formatting. The main.rs
// commands delegate here.

use chrono::Utc;
use colored::Colorize;

use crate::assembly::RenderedFeedItem;
use crate::events::{EventPayload, FeedEvent};
use crate::output::truncate_chars;
use crate::rebuild::RebuildReport;

/// Display a rendered feed page.
pub fn display_feed(user_id: i64, items: &[RenderedFeedItem]) {
    if items.is_empty() {
        println!("Feed for user {} is empty.", user_id);
        println!("  Follow someone and run `fanout consume` to deliver their activity.");
        return;
    }

    println!(
        "\n{}",
        format!("=== Feed for user {} ({} items) ===", user_id, items.len()).bold()
    );
    println!();

    for item in items {
        println!(
            "  {} {} {}",
            format!("[{}]", relative_age(item)).dimmed(),
            item.actor_name.bold(),
            colorize_verb(&item.verb),
        );
        if !item.title.is_empty() {
            println!("      {}", item.title.cyan());
        }
        if !item.summary.is_empty() {
            println!("      {}", item.summary);
        }
        println!("      {}", item.link.dimmed());
    }
    println!();
}

/// Display a user's recorded actions.
pub fn display_activity(user_id: i64, events: &[FeedEvent]) {
    if events.is_empty() {
        println!("No recorded activity for user {}.", user_id);
        return;
    }

    println!(
        "\n{}",
        format!("=== Activity of user {} ({} events) ===", user_id, events.len()).bold()
    );
    for event in events {
        let verb = event.event_type().verb();
        println!(
            "  {} {} {} {}",
            format!("#{}", event.id).dimmed(),
            event.created_at.format("%Y-%m-%d %H:%M"),
            colorize_verb(verb),
            describe_target(&event.payload),
        );
    }
    println!();
}

/// Display what a rebuild did.
pub fn display_rebuild_report(report: &RebuildReport) {
    println!(
        "\n{}",
        format!(
            "=== Rebuilt feed of user {} (last {} days) ===",
            report.user_id, report.since_days
        )
        .bold()
    );
    println!("  Events scanned:   {}", report.events_scanned);
    println!("  Outbox items:     {}", report.outbox_written);
    println!("  Inbox items:      {}", report.inbox_written);
    println!(
        "  Followees:        {} replayed, {} big-V",
        report.push_followees, report.big_v_sources
    );
    if report.unclassified > 0 {
        println!(
            "  {} {} followees could not be classified",
            "!".yellow(),
            report.unclassified
        );
    }
    if report.skipped > 0 {
        println!("  {} {} writes skipped", "!".yellow(), report.skipped);
    }
}

fn describe_target(payload: &EventPayload) -> String {
    match payload {
        EventPayload::Published {
            article_id, title, ..
        } => format!("article {} \"{}\"", article_id, title),
        EventPayload::Followed { followee_id } => format!("user {}", followee_id),
        EventPayload::Commented {
            article_id,
            comment_content,
            ..
        } => format!("article {}: {}", article_id, truncate_chars(comment_content, 40)),
        EventPayload::Liked { article_id, .. } | EventPayload::Collected { article_id, .. } => {
            format!("article {}", article_id)
        }
    }
}

fn colorize_verb(verb: &str) -> colored::ColoredString {
    match verb {
        "published" => verb.green(),
        "liked" => verb.red(),
        "followed" => verb.blue(),
        "commented" => verb.yellow(),
        "collected" => verb.magenta(),
        _ => verb.normal(),
    }
}

fn relative_age(item: &RenderedFeedItem) -> String {
    let age = Utc::now().signed_duration_since(item.timestamp);
    if age.num_days() > 0 {
        format!("{}d ago", age.num_days())
    } else if age.num_hours() > 0 {
        format!("{}h ago", age.num_hours())
    } else if age.num_minutes() > 0 {
        format!("{}m ago", age.num_minutes())
    } else {
        "just now".to_string()
    }
}
