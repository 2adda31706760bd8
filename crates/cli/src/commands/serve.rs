//! `ragdesk serve` — Start the HTTP chat gateway.

use std::path::Path;

pub async fn run(
    config_path: Option<&Path>,
    port_override: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = super::load_config(config_path)?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    let domains: Vec<&str> = config.domains.iter().map(|d| d.id.as_str()).collect();
    println!("RagDesk Gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Model:     {}", config.generation.model);
    println!("   Domains:   {}", domains.join(", "));
    if config.retrieval.api_url.is_none() {
        println!("   Retrieval: not configured (answers will have no sources)");
    }

    ragdesk_gateway::start(config).await?;

    Ok(())
}
