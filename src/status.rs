// System status display: storage locations, who is signed in, feed size.

use anyhow::Result;
use std::path::Path;

use crate::config::Config;
use crate::context::AppContext;

/// Display system status to the terminal.
pub async fn show(ctx: &AppContext, config: &Config) -> Result<()> {
    if !Path::new(&config.db_path).exists() {
        println!("Database: not initialized");
        println!("\nRun `murmur register` to create an account and the database.");
        return Ok(());
    }

    let file_size = std::fs::metadata(&config.db_path)
        .map(|m| format_bytes(m.len()))
        .unwrap_or_else(|_| "unknown".to_string());
    println!("Database: {} ({})", config.db_path, file_size);

    let blob_size = directory_size(&config.blob_dir);
    println!(
        "Media: {} ({})",
        config.blob_dir.display(),
        format_bytes(blob_size)
    );

    let identity = match ctx.session.current() {
        Some(identity) => {
            println!("Signed in: {} <{}>", identity.display_label(), identity.email);
            Some(identity)
        }
        None => {
            println!("Signed in: no");
            println!("  Run `murmur login` or `murmur register`");
            None
        }
    };

    let posts = ctx.gateway.list_posts_page(usize::MAX, None).await?;
    let likes: u64 = posts.iter().map(|p| p.likes_count).sum();
    let comments: u64 = posts.iter().map(|p| p.comments_count).sum();
    println!(
        "Posts: {} ({} likes, {} comments)",
        posts.len(),
        likes,
        comments
    );
    if let Some(latest) = posts.first() {
        println!(
            "  Latest by {} {}",
            latest.author_name,
            crate::output::relative_time(latest.created_at, chrono::Utc::now())
        );
    }

    if let Some(identity) = identity {
        let notifications = ctx.gateway.list_notifications(&identity.uid).await?;
        let unread = notifications.iter().filter(|n| !n.read).count();
        println!(
            "Notifications: {} total, {} unread",
            notifications.len(),
            unread
        );
    }

    Ok(())
}

/// Total size of the files under `dir`, 0 if it doesn't exist.
fn directory_size(dir: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| match entry.metadata() {
            Ok(meta) if meta.is_dir() => directory_size(&entry.path()),
            Ok(meta) => meta.len(),
            Err(_) => 0,
        })
        .sum()
}

pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn test_directory_size_counts_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("posts")).unwrap();
        std::fs::write(dir.path().join("posts/a.png"), vec![0; 100]).unwrap();
        std::fs::write(dir.path().join("b.png"), vec![0; 28]).unwrap();
        assert_eq!(directory_size(dir.path()), 128);
        assert_eq!(directory_size(&dir.path().join("missing")), 0);
    }
}
