use driftwood::irc::config::Config;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = Config::from_env()?;
    info!(
        server = %config.server_name,
        login_timeout = ?config.login_timeout,
        idle_timeout = ?config.idle_timeout,
        quit_timeout = ?config.quit_timeout,
        "driftwood starting"
    );

    driftwood::irc::server::run(config).await
}
