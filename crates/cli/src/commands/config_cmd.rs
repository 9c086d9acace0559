//! `concierge config` — Configuration management commands.

use super::load_config;
use concierge_config::AppConfig;
use std::path::Path;

pub fn show(path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(path)?;
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

pub fn validate(path: Option<&Path>) -> anyhow::Result<()> {
    println!("🔍 Validating configuration...");

    let config = match load_config(path) {
        Ok(config) => config,
        Err(e) => {
            println!("   ❌ Config error: {e:#}");
            return Err(e);
        }
    };
    println!("   ✅ Config parsed successfully");

    let mut warnings = Vec::new();
    if config.scheduler.strict_transitions {
        warnings.push("strict_transitions is on: illegal transitions fail instead of staying");
    }
    if config.context.preserve_recent + 2 > config.context.target {
        warnings.push("context.preserve_recent leaves little room for pinned regions");
    }
    if !config.enrichment.profile_refresh.enabled && !config.enrichment.inner_voice.enabled {
        warnings.push("All enrichment subprocesses are disabled");
    }

    if warnings.is_empty() {
        println!("   ✅ All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   ⚠️  {w}");
        }
    }

    println!();
    println!(
        "   Context:    ceiling {}, target {}, keep {} recent",
        config.context.ceiling, config.context.target, config.context.preserve_recent
    );
    println!("   Timeout:    {}s", config.generation.timeout_secs);
    println!("   Profiles:   {}", config.profile.resolved_dir().display());

    Ok(())
}

pub fn path(path: Option<&Path>) {
    match path {
        Some(path) => println!("{}", path.display()),
        None => println!("{}", AppConfig::config_dir().join("config.toml").display()),
    }
}
