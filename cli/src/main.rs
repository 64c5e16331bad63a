//! Command line arguments.
use clap::{Parser, Subcommand};
use lib::{Config, Controller, DerivedKind, Template, Website};
use n0_error::StdResultExt;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

/// Website Controller
#[derive(Parser, Debug)]
struct Args {
    /// YAML configuration file. Defaults are used when unset.
    #[clap(short, long, env = "WEBSITE_CONTROLLER_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides the control plane url of the configuration.
    #[clap(long, env = "WEBSITE_CONTROLLER_CONTROL_PLANE_URL")]
    control_plane_url: Option<Url>,

    /// Directory holding service-template.json and deployment-template.json.
    #[clap(long, env = "WEBSITE_CONTROLLER_TEMPLATE_DIR")]
    template_dir: Option<PathBuf>,

    #[clap(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch websites and reconcile their services and deployments. The default.
    Run,

    /// Print the body that would be submitted for a website.
    Render(RenderArgs),

    /// Write the default configuration to a file.
    InitConfig {
        path: PathBuf,
    },
}

#[derive(Parser, Debug)]
pub struct RenderArgs {
    /// Derived kind to render: service or deployment.
    #[clap(long)]
    pub kind: DerivedKind,

    /// Name of the website.
    #[clap(long)]
    pub name: String,

    #[clap(long, default_value = "default")]
    pub namespace: String,

    #[clap(long)]
    pub git_repo: String,

    #[clap(long)]
    pub display_name: String,
}

#[tokio::main]
async fn main() -> n0_error::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    if let Some(path) = dotenv::dotenv().ok() {
        info!("Loaded environment variables from {}", path.display());
    }

    let args = Args::parse();
    let config = load_config(&args).await?;

    match args.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let controller = Controller::new(&config)?;
            let cancel = CancellationToken::new();
            tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        info!("shutting down");
                    }
                    cancel.cancel();
                }
            });
            controller.run(cancel).await?;
        }
        Commands::Render(args) => {
            println!("{}", render(&config, args).await?);
        }
        Commands::InitConfig { path } => {
            config.write(path.clone()).await?;
            println!("wrote {}", path.display());
        }
    }
    Ok(())
}

/// Renders the body submitted for one derived kind, pretty printed.
async fn render(config: &Config, args: RenderArgs) -> n0_error::Result<String> {
    let Some(path) = config.template_path(args.kind) else {
        n0_error::bail_any!("no template configured for {}", args.kind);
    };
    let website = Website::new(args.name, args.namespace, args.git_repo, args.display_name);
    let template = Template::load(path).await?;
    let body = template.render(&website)?;
    let body: serde_json::Value =
        serde_json::from_slice(&body).std_context("decoding rendered body")?;
    let pretty = serde_json::to_string_pretty(&body).anyerr()?;
    Ok(pretty)
}

async fn load_config(args: &Args) -> n0_error::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path.clone()).await?,
        None => Config::default(),
    };
    if let Some(url) = &args.control_plane_url {
        config.control_plane_url = url.clone();
    }
    if let Some(dir) = &args.template_dir {
        config = config.with_template_dir(dir);
    }
    config.validate()?;
    Ok(config)
}
