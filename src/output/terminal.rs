// Colored terminal output for feeds, post details and the inbox.
//
// This module handles all terminal-specific formatting. The main.rs command
// handlers delegate here.

use chrono::Utc;
use colored::Colorize;

use super::{plural, relative_time, truncate_chars};
use crate::models::{Comment, Identity, Notification, NotificationKind, Post, UserProfile};
use crate::mutation::LikeState;

/// Longest post body shown in a feed listing.
const FEED_PREVIEW_CHARS: usize = 140;

/// Display a list of posts, newest first, numbered from `start`.
pub fn display_feed(posts: &[Post], start: usize) {
    if posts.is_empty() {
        println!("No posts yet. Run `murmur post \"...\"` to write the first one.");
        return;
    }

    let now = Utc::now();
    for (i, post) in posts.iter().enumerate() {
        println!(
            "{:>4}. {} {} {}",
            start + i + 1,
            post.author_name.bold(),
            relative_time(post.created_at, now).dimmed(),
            format!("[{}]", post.id).dimmed(),
        );
        println!("      {}", truncate_chars(&post.content, FEED_PREVIEW_CHARS));
        if let Some(media) = &post.media {
            println!("      {} {}", "media:".cyan(), media.url);
        }
        println!(
            "      {}  {}",
            plural(post.likes_count, "like").red(),
            plural(post.comments_count, "comment").blue(),
        );
    }
}

/// Display one post in full with its comments.
pub fn display_post_detail(post: &Post, like: LikeState, comments: &[Comment]) {
    let now = Utc::now();
    println!("\n{}", format!("=== Post {} ===", post.id).bold());
    println!(
        "  {} {}",
        post.author_name.bold(),
        relative_time(post.created_at, now).dimmed()
    );
    if let Some(updated) = post.updated_at {
        println!("  {}", format!("edited {}", relative_time(updated, now)).dimmed());
    }
    println!();
    for line in post.content.lines() {
        println!("  {line}");
    }
    if let Some(media) = &post.media {
        println!("\n  {} {}", "media:".cyan(), media.url);
    }

    println!();
    println!("  {}", like_line(like));

    println!(
        "\n  {}",
        format!("Comments ({})", comments.len()).underline()
    );
    if comments.is_empty() {
        println!("  {}", "No comments yet.".dimmed());
    }
    for comment in comments {
        println!(
            "  {} {} {}",
            comment.author_name.bold(),
            relative_time(comment.created_at, now).dimmed(),
            format!("[{}]", comment.id).dimmed(),
        );
        println!("    {}", comment.text);
    }
}

/// "♥ 3 likes (you like this)" style summary of a like state.
pub fn like_line(like: LikeState) -> String {
    let heart = if like.liked {
        "♥".red().bold().to_string()
    } else {
        "♡".normal().to_string()
    };
    let suffix = if like.liked { " (you like this)" } else { "" };
    format!("{heart} {}{suffix}", plural(like.count, "like"))
}

/// Display the inbox, unread entries highlighted.
pub fn display_notifications(notifications: &[Notification]) {
    if notifications.is_empty() {
        println!("No notifications.");
        return;
    }

    let unread = notifications.iter().filter(|n| !n.read).count();
    println!(
        "\n{}",
        format!(
            "=== Notifications ({} total, {} unread) ===",
            notifications.len(),
            unread
        )
        .bold()
    );

    let now = Utc::now();
    for n in notifications {
        let what = match n.kind {
            NotificationKind::Like => format!("{} liked your post {}", n.from, n.post_id),
        };
        let marker = if n.read { " ".normal() } else { "●".yellow().bold() };
        println!(
            "  {} {} {} {}",
            marker,
            what,
            relative_time(n.created_at, now).dimmed(),
            format!("[{}]", n.id).dimmed(),
        );
    }
}

pub fn display_identity(identity: &Identity) {
    println!("{} <{}>", identity.display_label().bold(), identity.email);
    println!("  uid: {}", identity.uid.dimmed());
    if let Some(photo) = &identity.photo_url {
        println!("  photo: {photo}");
    }
}

pub fn display_profile(profile: &UserProfile) {
    println!(
        "{} (@{})",
        profile.display_name.bold(),
        profile.username
    );
    println!("  email: {}", profile.email);
    if let Some(photo) = &profile.photo_url {
        println!("  photo: {photo}");
    }
    println!(
        "  joined: {}",
        profile.created_at.format("%Y-%m-%d")
    );
}
