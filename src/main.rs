use std::path::Path;

use clap::Parser;
use color_eyre::{Result, eyre::Context};
use panino::{
    App, AppConfig, ClassView, FunctionView, RouteOptions, Signature, WebSocketOptions, adapters,
    config::{AppConfigValidator, load_config},
    metrics, tracing_setup,
};
use serde_json::json;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "panino.toml")]
    config: String,

    /// Log as pretty console output instead of JSON
    #[clap(long)]
    pretty: bool,

    /// Log filter directive, e.g. `debug` or `panino=trace,tower_http=info`
    #[clap(long)]
    log_level: Option<String>,

    /// Include the current span and span list in JSON log lines
    #[clap(long)]
    spans: bool,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "panino.toml")]
        config: String,
    },
    /// Serve the demo application (default)
    Serve {
        /// Configuration file to use
        #[clap(short, long, default_value = "panino.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    let config_path = match args.command {
        Some(Commands::Validate { config }) => return validate_config_command(&config).await,
        Some(Commands::Serve { config }) => config,
        None => args.config,
    };

    match args.log_level.as_deref() {
        Some(level) => tracing_setup::init_tracing_with_config(level, !args.pretty, args.spans)?,
        None if args.pretty => tracing_setup::init_console_tracing()?,
        None => tracing_setup::init_tracing()?,
    }
    metrics::init_metrics();

    let config = if Path::new(&config_path).exists() {
        load_config(&config_path).await?
    } else {
        tracing::warn!("{} not found, using the default configuration", config_path);
        AppConfig::default()
    };

    let app = demo_app(config)?;
    tracing::info!(
        "Serving {} HTTP and {} WebSocket routes",
        app.router().len(),
        app.websocket_router().routes().len()
    );
    adapters::run(app).await?;

    Ok(())
}

fn demo_app(config: AppConfig) -> Result<App> {
    let mut app = App::with_config(config)?;

    app.route(
        "/",
        FunctionView::new("index", |ctx| {
            Box::pin(async move {
                let greet = ctx.url_for("greet", [("person", "world")])?;
                ctx.res.media(&json!({"greet": greet}))?;
                Ok(())
            })
        }),
        RouteOptions::new(),
    )?;
    app.route(
        "/greet/{person}",
        FunctionView::new("greet", |ctx| {
            Box::pin(async move {
                let person = ctx.params.str("person").unwrap_or("stranger").to_string();
                ctx.res.text(format!("Hello, {person}!"));
                Ok(())
            })
        })
        .signature(Signature::new().param("person")),
        RouteOptions::new(),
    )?;
    app.route(
        "/add/{x:d}/{y:d}",
        ClassView::new("Add").get(|ctx| {
            Box::pin(async move {
                let x = ctx.params.int("x").unwrap_or_default();
                let y = ctx.params.int("y").unwrap_or_default();
                ctx.res.media(&json!({"result": x + y}))?;
                Ok(())
            })
        })
        .signature(Signature::new().param("x").param("y")),
        RouteOptions::new().name("add"),
    )
    .wrap_err("Failed to declare the add route")?;
    app.websocket_route(
        "/echo",
        |ws| {
            Box::pin(async move {
                while let Some(message) = ws.next().await? {
                    ws.send(message).await?;
                }
                Ok(())
            })
        },
        WebSocketOptions::new(),
    )?;

    Ok(app)
}

async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = load_config(config_path)
        .await
        .wrap_err_with(|| format!("Failed to load {config_path}"))?;
    AppConfigValidator::validate(&config)?;

    println!("Configuration validation: OK");
    println!();
    println!("Configuration Summary:");
    println!("   Listen Address: {}", config.listen_addr);
    println!("   Debug: {}", config.debug);
    println!("   Media Type: {}", config.media_type);
    println!("   Allowed Hosts: {}", config.allowed_hosts.join(", "));
    println!("   CORS: {}", if config.cors.is_some() { "enabled" } else { "disabled" });
    println!("   Gzip: {}", config.gzip);
    println!("   HSTS: {}", config.hsts);
    Ok(())
}
