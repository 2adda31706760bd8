//! `ragdesk config` — Configuration management commands.

use std::path::{Path, PathBuf};

use ragdesk_config::AppConfig;

fn resolve(path: Option<&Path>) -> PathBuf {
    path.map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
}

pub fn validate(path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating configuration...");

    match AppConfig::load_with(path) {
        Ok(config) => {
            println!("   ok: config parsed and validated");

            let mut warnings = Vec::new();
            if config.generation.api_key.is_none() && config.generation.api_url.is_none() {
                warnings.push("No generation API key set (set RAGDESK_GENERATION_API_KEY or OPENAI_API_KEY)");
            }
            if config.retrieval.api_url.is_none() {
                warnings.push("retrieval.api_url is not set; answers will carry no citations");
            }
            if config
                .domains
                .iter()
                .any(|d| d.id != config.classifier.general_domain && d.keywords.is_empty())
            {
                warnings.push("A specialist domain has no keywords and can never be selected");
            }

            for w in &warnings {
                println!("   warning: {w}");
            }

            println!();
            println!("   Provider:  {}", config.generation.provider);
            println!("   Model:     {}", config.generation.model);
            println!("   Gateway:   {}:{}", config.gateway.host, config.gateway.port);
            println!("   Domains:   {}", config.domains.len());
            println!("   Session:   ttl {}s, {} turns", config.session.ttl_secs, config.session.max_turns);
        }
        Err(e) => {
            println!("   error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub fn show(path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(path)?;
    println!("{}", config.to_redacted_toml()?);
    Ok(())
}

pub fn path(path: Option<&Path>) {
    println!("{}", resolve(path).display());
}

pub fn init(path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let target = resolve(path);
    if target.exists() {
        println!("Config already exists at {}", target.display());
        return Ok(());
    }
    if let Some(dir) = target.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(&target, AppConfig::default_toml())?;
    println!("Wrote default config to {}", target.display());
    Ok(())
}
