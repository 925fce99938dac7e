use authgate::{
    config::GateConfig,
    init_gate,
    observability::{init_tracing, shutdown_telemetry},
};
use std::env;
use std::path::PathBuf;
use std::process;

#[tokio::main]
async fn main() {
    // Get config file path from command line or use default
    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "config/authgate.yaml".to_string());

    let config = match GateConfig::from_file(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from {}: {}", config_path, e);
            eprintln!("Usage: authgate [config_file]");
            process::exit(1);
        }
    };

    if let Err(e) = init_tracing(&config.observability) {
        eprintln!("{}", e);
        process::exit(1);
    }

    let otlp_enabled = config.observability.otlp_endpoint.is_some();
    let result = init_gate(config, Some(PathBuf::from(&config_path))).await;

    if otlp_enabled {
        shutdown_telemetry();
    }

    if let Err(e) = result {
        eprintln!("Gate error: {}", e);
        process::exit(1);
    }
}
