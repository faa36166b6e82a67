use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::level_filters::LevelFilter;

use invite_issuer::{
    config::{load_config, Overrides},
    ensure_active_invite_link,
    report::render_report,
    store::{invite_tokens_collection, users_collection},
    token::now_millis,
};

/// Prints a fresh invite link for the agency owner who hasn't accepted
/// their invite yet.
///
/// Any earlier unused invite for that owner stops working. Run it with no
/// arguments from the server directory, the same way the setup scripts run.
#[derive(Parser, Debug)]
#[clap(version)]
struct Opts {
    /// Directory holding users.json and invite-tokens.json [default: data]
    #[clap(long)]
    data_dir: Option<PathBuf>,

    /// Frontend URL the accept-invite page is served from [default: http://localhost:5173]
    #[clap(long)]
    base_url: Option<String>,

    /// How long the new invite stays valid [default: 72]
    #[clap(long)]
    ttl_hours: Option<i64>,

    /// A TOML config file. Without it, ./invite-issuer.toml is used if present
    #[clap(long)]
    config: Option<PathBuf>,

    /// Log each step to stderr
    #[clap(short, long)]
    verbose: bool,
}

// RUST_LOG is read as a plain level. For `target=level` lists the most
// verbose level wins; anything unreadable falls back to warn.
fn log_level(verbose: bool, rust_log: Option<&str>) -> LevelFilter {
    if verbose {
        return LevelFilter::DEBUG;
    }

    rust_log
        .into_iter()
        .flat_map(|raw| raw.split(','))
        .filter_map(|directive| {
            directive
                .rsplit('=')
                .next()
                .and_then(|level| level.trim().parse::<LevelFilter>().ok())
        })
        .max()
        .unwrap_or(LevelFilter::WARN)
}

fn init_logging(verbose: bool) {
    let rust_log = std::env::var("RUST_LOG").ok();

    tracing_subscriber::fmt()
        .with_max_level(log_level(verbose, rust_log.as_deref()))
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let opts: Opts = Opts::parse();
    init_logging(opts.verbose);

    let config = load_config(
        opts.config,
        Overrides {
            data_dir: opts.data_dir,
            base_url: opts.base_url,
            ttl_hours: opts.ttl_hours,
        },
    )
    .context("Failed to load the invite-issuer config")?;

    let mut tokens = invite_tokens_collection(&config.data_dir);
    let mut users = users_collection(&config.data_dir);

    let issued = ensure_active_invite_link(&mut tokens, &mut users, &config, now_millis())?;

    // Not a debug log, this is the output of this command
    print!("{}", render_report(&issued));

    Ok(())
}
