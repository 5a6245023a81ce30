use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::{debug, info};

use murmur::config::Config;
use murmur::context::{AppContext, Backends};
use murmur::error::FeedError;
use murmur::feed::ErrorHandler;
use murmur::models::{MediaUpload, NewPost, PostUpdate};
use murmur::output::terminal;

/// Murmur: a small social feed with optimistic likes and live updates.
///
/// Runs against a local backend: documents and accounts in a SQLite file,
/// media in a directory.
#[derive(Parser)]
#[command(name = "murmur", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show system status (storage, signed-in user, post counts)
    Status,

    /// Create an account and sign in
    Register {
        email: String,
        /// Display name shown on posts and comments
        #[arg(long)]
        name: String,
        #[arg(long)]
        password: String,
    },

    /// Sign in
    Login {
        email: String,
        #[arg(long)]
        password: String,
    },

    /// Sign out
    Logout,

    /// Show the signed-in account
    Whoami,

    /// Publish a post
    Post {
        content: String,
        /// Attach an image or other file
        #[arg(long)]
        media: Option<PathBuf>,
    },

    /// List posts, newest first
    Feed {
        /// How many pages to load (page size: MURMUR_PAGE_SIZE)
        #[arg(long, default_value = "1")]
        pages: u32,
    },

    /// Print the feed and your notifications every time they change
    Watch,

    /// Show a post with its comments
    Show { post_id: String },

    /// Like or unlike a post
    Like { post_id: String },

    /// Edit one of your posts
    Edit {
        post_id: String,
        #[arg(long)]
        content: Option<String>,
        /// Replace the attached media
        #[arg(long)]
        media: Option<PathBuf>,
    },

    /// Delete one of your posts (and its media)
    Delete { post_id: String },

    /// Comment on a post
    Comment { post_id: String, text: String },

    /// Remove a comment (yours, or any comment on your post)
    Uncomment { post_id: String, comment_id: String },

    /// List your notifications
    Notifications,

    /// Mark notifications read
    Read {
        /// Notification to mark read
        id: Option<String>,
        /// Mark every notification read
        #[arg(long, conflicts_with = "id")]
        all: bool,
    },

    /// Delete notifications (all of them unless --id is given)
    ClearNotifications {
        #[arg(long)]
        id: Option<String>,
    },

    /// Show or change your profile
    Profile {
        /// New display name
        #[arg(long)]
        name: Option<String>,
        /// New profile photo
        #[arg(long)]
        photo: Option<PathBuf>,
    },

    /// Change your email address
    ChangeEmail {
        new_email: String,
        /// Your current password
        #[arg(long)]
        password: String,
    },

    /// Change your password
    ChangePassword {
        #[arg(long)]
        current: String,
        #[arg(long)]
        new: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    // Set up structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("murmur=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;
    let backends = Backends::local(&config)?;
    let ctx = AppContext::new(backends, config.context_options());

    match cli.command {
        Commands::Status => {
            murmur::status::show(&ctx, &config).await?;
        }

        Commands::Register {
            email,
            name,
            password,
        } => {
            let identity = ctx
                .gateway
                .sign_up(&email, &password, &name)
                .await
                .map_err(user_error)?;
            println!("{} Welcome, {}!", "✓".green(), identity.display_label());
        }

        Commands::Login { email, password } => {
            let identity = ctx
                .gateway
                .sign_in(&email, &password)
                .await
                .map_err(user_error)?;
            println!("{} Signed in as {}", "✓".green(), identity.display_label());
        }

        Commands::Logout => {
            ctx.gateway.sign_out().await.map_err(user_error)?;
            println!("Signed out.");
        }

        Commands::Whoami => match ctx.session.current() {
            Some(identity) => terminal::display_identity(&identity),
            None => println!("Not signed in."),
        },

        Commands::Post { content, media } => {
            let media = match media {
                Some(path) => Some(read_upload(&path).await?),
                None => None,
            };
            let id = ctx
                .posts
                .create(NewPost { content, media })
                .await
                .map_err(user_error)?;
            println!("{} Posted [{}]", "✓".green(), id);
        }

        Commands::Feed { pages } => {
            let mut feed = ctx
                .post_feed(Some(print_errors()))
                .await
                .map_err(user_error)?;
            feed.view().wait_for_revision(1).await;
            for _ in 1..pages {
                if feed.load_more().await.map_err(user_error)?.is_empty() {
                    break;
                }
            }
            terminal::display_feed(&feed.posts(), 0);
            feed.unsubscribe();
        }

        Commands::Watch => {
            watch(&ctx).await?;
        }

        Commands::Show { post_id } => {
            let post = ctx
                .gateway
                .get_post(&post_id)
                .await
                .map_err(user_error)?
                .ok_or_else(|| anyhow!("Post {post_id} not found."))?;
            let comments = ctx
                .gateway
                .list_comments(&post_id)
                .await
                .map_err(user_error)?;
            ctx.likes.track(&post);
            let like = ctx.likes.refresh(&post_id).await;
            terminal::display_post_detail(&post, like, &comments);
        }

        Commands::Like { post_id } => {
            let post = ctx
                .gateway
                .get_post(&post_id)
                .await
                .map_err(user_error)?
                .ok_or_else(|| anyhow!("Post {post_id} not found."))?;
            ctx.likes.track(&post);
            ctx.likes.refresh(&post_id).await;

            match ctx.likes.toggle(&post_id, &post.author_id).await {
                Ok(state) => println!("{}", terminal::like_line(state)),
                Err(e) => return Err(anyhow!("{}", e.user_message())),
            }
        }

        Commands::Edit {
            post_id,
            content,
            media,
        } => {
            if content.is_none() && media.is_none() {
                return Err(anyhow!("Nothing to change: pass --content and/or --media."));
            }
            let new_media = match media {
                Some(path) => Some(read_upload(&path).await?),
                None => None,
            };
            ctx.posts
                .update(&post_id, PostUpdate { content, new_media })
                .await
                .map_err(user_error)?;
            println!("{} Updated [{}]", "✓".green(), post_id);
        }

        Commands::Delete { post_id } => {
            let post = ctx
                .gateway
                .get_post(&post_id)
                .await
                .map_err(user_error)?
                .ok_or_else(|| anyhow!("Post {post_id} not found."))?;
            let pending = ctx.posts.delete(&post).map_err(user_error)?;
            println!("{} Deleting [{}]", "✓".green(), post_id);
            // The CLI exits right after, so wait for the background delete
            pending.await.context("Background delete task panicked")?;
        }

        Commands::Comment { post_id, text } => {
            let id = ctx
                .comments
                .add(&post_id, &text)
                .await
                .map_err(user_error)?;
            println!("{} Commented [{}]", "✓".green(), id);
        }

        Commands::Uncomment {
            post_id,
            comment_id,
        } => {
            ctx.comments
                .remove(&post_id, &comment_id)
                .await
                .map_err(user_error)?;
            println!("{} Comment removed", "✓".green());
        }

        Commands::Notifications => {
            let identity = ctx.require_identity().map_err(user_error)?;
            let notifications = ctx
                .gateway
                .list_notifications(&identity.uid)
                .await
                .map_err(user_error)?;
            terminal::display_notifications(&notifications);
        }

        Commands::Read { id, all } => {
            let identity = ctx.require_identity().map_err(user_error)?;
            match (id, all) {
                (_, true) => {
                    let marked = ctx
                        .gateway
                        .mark_all_notifications_read(&identity.uid)
                        .await
                        .map_err(user_error)?;
                    println!("Marked {marked} notification(s) read.");
                }
                (Some(id), false) => {
                    ctx.gateway
                        .mark_notification_read(&identity.uid, &id)
                        .await
                        .map_err(user_error)?;
                    println!("Marked read.");
                }
                (None, false) => return Err(anyhow!("Pass a notification id or --all.")),
            }
        }

        Commands::ClearNotifications { id } => {
            let identity = ctx.require_identity().map_err(user_error)?;
            match id {
                Some(id) => {
                    ctx.gateway
                        .delete_notification(&identity.uid, &id)
                        .await
                        .map_err(user_error)?;
                    println!("Notification deleted.");
                }
                None => {
                    let deleted = ctx
                        .gateway
                        .delete_all_notifications(&identity.uid)
                        .await
                        .map_err(user_error)?;
                    println!("Deleted {deleted} notification(s).");
                }
            }
        }

        Commands::Profile { name, photo } => {
            if name.is_none() && photo.is_none() {
                let identity = ctx.require_identity().map_err(user_error)?;
                match ctx
                    .gateway
                    .get_user_profile(&identity.uid)
                    .await
                    .map_err(user_error)?
                {
                    Some(profile) => terminal::display_profile(&profile),
                    None => terminal::display_identity(&identity),
                }
                return Ok(());
            }

            let photo = match photo {
                Some(path) => Some(read_upload(&path).await?),
                None => None,
            };
            let identity = ctx
                .gateway
                .update_profile(name.as_deref(), photo)
                .await
                .map_err(user_error)?;
            println!("{} Profile updated", "✓".green());
            terminal::display_identity(&identity);
        }

        Commands::ChangeEmail {
            new_email,
            password,
        } => {
            let identity = ctx
                .gateway
                .update_email(&new_email, &password)
                .await
                .map_err(user_error)?;
            println!("{} Email changed to {}", "✓".green(), identity.email);
        }

        Commands::ChangePassword { current, new } => {
            ctx.gateway
                .update_password(&current, &new)
                .await
                .map_err(user_error)?;
            println!("{} Password changed", "✓".green());
        }
    }

    Ok(())
}

/// Print the feed (and the inbox when signed in) on every delivery until
/// Ctrl-C or a subscription error.
///
/// The local backend only pushes writes made by this process, so this shows
/// the current state once and then waits.
async fn watch(ctx: &AppContext) -> Result<()> {
    let feed = ctx
        .post_feed(Some(print_errors()))
        .await
        .map_err(user_error)?;
    let inbox = match ctx.session.current() {
        Some(_) => Some(
            ctx.notification_feed(Some(print_errors()))
                .await
                .map_err(user_error)?,
        ),
        None => None,
    };

    feed.view().wait_for_revision(1).await;
    terminal::display_feed(&feed.posts(), 0);
    println!("{}", "Watching for changes, Ctrl-C to stop.".dimmed());

    let mut posts_changed = feed.view().changes();
    let mut inbox_changed = inbox.as_ref().map(|i| i.view().changes());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping watch");
                break;
            }
            changed = posts_changed.changed() => {
                if changed.is_err() || !feed.view().is_active() {
                    break;
                }
                println!("\n{}", "--- feed updated ---".dimmed());
                terminal::display_feed(&feed.posts(), 0);
            }
            Some(Ok(())) = async {
                match inbox_changed.as_mut() {
                    Some(rx) => Some(rx.changed().await),
                    None => std::future::pending().await,
                }
            } => {
                if let Some(inbox) = &inbox {
                    println!(
                        "\n{}",
                        format!("--- {} unread notification(s) ---", inbox.unread_count()).yellow()
                    );
                }
            }
        }
    }
    Ok(())
}

async fn read_upload(path: &std::path::Path) -> Result<MediaUpload> {
    MediaUpload::from_file(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

/// Print subscription errors as they happen.
fn print_errors() -> ErrorHandler {
    Arc::new(|e: FeedError| eprintln!("{}", e.user_message().red()))
}

/// Turn a feed error into the one-line message the user sees.
fn user_error(err: FeedError) -> anyhow::Error {
    debug!(error = %err, "Command failed");
    anyhow!("{}", err.user_message())
}
