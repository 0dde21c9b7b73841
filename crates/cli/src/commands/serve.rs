//! `ragline serve`: start the HTTP API server.

use ragline_config::AppConfig;

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("ragline gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Engine:    {} ({})", config.engine.kind, config.engine.model);
    println!(
        "   Budget:    {} tokens, {} reserved for output",
        config.budget.context_window, config.budget.reserved_output_tokens
    );

    ragline_gateway::start(config).await?;

    Ok(())
}
