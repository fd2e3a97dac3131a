//! Cache management commands.

use crate::args::Session;

pub fn run_list(session: &Session) -> anyhow::Result<()> {
    let entries = session.service()?.cache_entries()?;
    if entries.is_empty() {
        println!("Cache is empty.");
        return Ok(());
    }

    println!("{:<60} {:>10} {:>30}", "URL", "SIZE", "DOWNLOADED");
    println!("{}", "-".repeat(102));

    let mut total_size: u64 = 0;
    for entry in &entries {
        let url = if entry.url.len() > 58 {
            format!("{}...", truncate(&entry.url, 55))
        } else {
            entry.url.clone()
        };
        let downloaded = entry.downloaded_at.as_deref().unwrap_or("-");
        println!(
            "{:<60} {:>10} {:>30}",
            url,
            format_size(entry.size_bytes),
            downloaded
        );
        total_size += entry.size_bytes;
    }

    println!("{}", "-".repeat(102));
    println!(
        "{} entries, {} total",
        entries.len(),
        format_size(total_size)
    );
    Ok(())
}

pub fn run_wipe(session: &Session) -> anyhow::Result<()> {
    session.service()?.wipe_cache()?;
    println!("Wiped {}", session.cache_dir().display());
    Ok(())
}

pub fn run_path(session: &Session) {
    println!("{}", session.cache_dir().display());
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn format_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * 1024;

    if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{} B", bytes)
    }
}
