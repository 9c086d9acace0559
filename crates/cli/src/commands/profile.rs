//! `concierge profile` — Show a stored visitor profile.

use super::load_config;
use concierge_memory::FileProfileStore;
use std::path::{Path, PathBuf};

pub async fn run(config_path: Option<&Path>, visitor: &str, dir: Option<PathBuf>) -> anyhow::Result<()> {
    let dir = match dir {
        Some(dir) => dir,
        None => load_config(config_path)?.profile.resolved_dir(),
    };
    let store = FileProfileStore::new(dir);
    let path = store.path_for(visitor);
    if !path.exists() {
        println!("No profile stored for {visitor} (looked in {})", path.display());
        return Ok(());
    }

    let record = store.record(visitor).await?;

    println!("👤 Visitor {visitor}");
    println!("==================");
    println!("  Profile:");
    match &record.profile {
        Some(text) => print_indented(text),
        None => println!("    (none)"),
    }
    if let Some(text) = &record.inner_voice {
        println!("  Inner voice:");
        print_indented(text);
    }
    if !record.topics.is_empty() {
        println!("  Topics:     {}", record.topics.join(", "));
    }
    if !record.counters.is_empty() {
        println!("  Counters:");
        for (key, value) in &record.counters {
            println!("    {key} = {value}");
        }
    }
    println!("  Sessions:   {}", record.sessions.len());
    for session in &record.sessions {
        println!(
            "    {} [{} turns, {}]",
            session.session_id,
            session.turns,
            session.recorded_at.format("%Y-%m-%d %H:%M")
        );
    }

    Ok(())
}

fn print_indented(text: &str) {
    for line in text.lines() {
        println!("    {line}");
    }
}
