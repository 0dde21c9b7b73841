//! `ragline status`: show configuration and engine status.

use ragline_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");

    println!("ragline status");
    println!("==============");

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            println!("  Config invalid: {e}");
            return Err(e.into());
        }
    };

    println!("  Config dir:      {}", AppConfig::config_dir().display());
    println!("  Engine:          {}", config.engine.kind);
    println!("  Model:           {}", config.engine.model);
    println!("  Temperature:     {}", config.engine.temperature);
    println!("  Context window:  {}", config.budget.context_window);
    println!("  Reserved output: {}", config.budget.reserved_output_tokens);
    println!("  Prompt budget:   {}", config.budget.safe_limit());
    println!("  Max passages:    {}", config.retrieval.max_passages);
    println!("  Persona:         {}", config.persona.directive);
    println!("  Gateway:         {}:{}", config.gateway.host, config.gateway.port);

    let presets = ragline_engine::local_presets().join(", ");
    if cfg!(feature = "local") {
        println!("  Local models:    {presets}");
    } else {
        println!("  Local models:    unavailable (built without the `local` feature)");
    }

    if config_path.exists() {
        println!("\n  Config file found");
    } else {
        println!("\n  No config file, using defaults. Run `ragline init` to create one");
    }

    Ok(())
}
