use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tracing::{error, info};

use guild_jukebox::{
    audio::{voice::SongbirdGateway, ConnectionManager, PlaybackController, QueueRegistry, Volume},
    bot::MusicBot,
    config::Config,
    sources::{MusicSource, SoundCloudClient, TrackResolver, YouTubeClient, YtDlp},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("guild_jukebox=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Guild Jukebox v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Arc::new(Config::load()?);
    info!("{}", config.summary());

    let ytdlp = YtDlp::new(config.ytdlp_path.clone());

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        ytdlp.version().await?;
        println!("OK");
        return Ok(());
    }

    // Motor de reproducción
    let registry = Arc::new(QueueRegistry::new(
        config.max_queue_size,
        Volume::try_from(i64::from(config.default_volume))?,
    ));
    let songbird = Songbird::serenity();
    let gateway = Arc::new(SongbirdGateway::new(
        songbird.clone(),
        ytdlp.clone(),
        config.timeouts.resolve,
    )?);
    let connections = Arc::new(ConnectionManager::new(gateway, registry.clone(), config.timeouts));
    let player = PlaybackController::new(registry.clone(), connections, config.timeouts);

    let youtube: Arc<dyn MusicSource> = Arc::new(YouTubeClient::new(ytdlp.clone()));
    let soundcloud: Arc<dyn MusicSource> = Arc::new(SoundCloudClient::new(ytdlp));
    let resolver = Arc::new(TrackResolver::new(youtube, soundcloud, config.timeouts.resolve));

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    let handler = MusicBot::new(config.clone(), player, resolver);

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        registry.destroy_all().await;
        shard_manager.shutdown_all().await;
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}
