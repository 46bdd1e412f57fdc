use anyhow::Result;
use serenity::{
    builder::{
        CreateInteractionResponse, CreateInteractionResponseFollowup, CreateInteractionResponseMessage,
        EditInteractionResponse,
    },
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use std::time::Duration;
use tracing::info;

use crate::{
    audio::{
        player::{PlayOutcome, Volume},
        queue::{LoopMode, PlayerStatus, QueueSnapshot},
    },
    bot::MusicBot,
    error::{EngineError, EngineResult},
    sources::{SourcePreference, Track},
};

const QUEUE_PAGE: usize = 10;

/// Maneja comandos slash
///
/// Toda orden se difiere antes de tocar el motor: cualquier operación sobre
/// un guild puede esperar a que termine otra (conexión, avance de la cola).
pub async fn handle_command(ctx: &Context, command: CommandInteraction, bot: &MusicBot) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Comando usado fuera de un servidor"))?;

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let reply = dispatch(ctx, &command, bot, guild_id).await;
    respond(ctx, &command, reply).await
}

async fn dispatch(ctx: &Context, command: &CommandInteraction, bot: &MusicBot, guild_id: GuildId) -> EngineResult<String> {
    let player = &bot.player;

    match command.data.name.as_str() {
        "play" => handle_play(ctx, command, bot, guild_id).await,
        "pause" => player.pause(guild_id).await.map(|_| "⏸️ Reproducción pausada".to_string()),
        "resume" => player.resume(guild_id).await.map(|_| "▶️ Reproducción reanudada".to_string()),
        "skip" => player.skip(guild_id).await.map(|title| format!("⏭️ Saltado: **{}**", title)),
        "stop" => {
            player.stop(guild_id).await;
            Ok("⏹️ Reproducción detenida y cola limpiada".to_string())
        }
        "leave" => {
            player.leave(guild_id).await;
            Ok("👋 Desconectado del canal de voz".to_string())
        }
        "clear" => {
            player.registry().clear(guild_id).await;
            Ok("🗑️ Cola limpiada".to_string())
        }
        "queue" => Ok(match player.snapshot(guild_id) {
            Some(snapshot) => render_queue(&snapshot),
            None => "📭 La cola está vacía".to_string(),
        }),
        "nowplaying" => Ok(player
            .snapshot(guild_id)
            .as_ref()
            .and_then(render_now_playing)
            .unwrap_or_else(|| "🔇 No hay nada reproduciéndose".to_string())),
        "volume" => handle_volume(command, bot, guild_id).await,
        "loop" => handle_loop(command, bot, guild_id).await,
        _ => Ok("❌ Comando no reconocido".to_string()),
    }
}

/// Completa la respuesta diferida. Los errores solo los ve quien ejecutó el comando.
async fn respond(ctx: &Context, command: &CommandInteraction, reply: EngineResult<String>) -> Result<()> {
    match reply {
        Ok(content) => {
            command
                .edit_response(&ctx.http, EditInteractionResponse::new().content(content))
                .await?;
        }
        Err(e) => {
            command.delete_response(&ctx.http).await?;
            command
                .create_followup(
                    &ctx.http,
                    CreateInteractionResponseFollowup::new()
                        .content(format!("❌ {}", e))
                        .ephemeral(true),
                )
                .await?;
        }
    }

    Ok(())
}

fn string_option<'a>(command: &'a CommandInteraction, name: &str) -> Option<&'a str> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_str())
}

fn integer_option(command: &CommandInteraction, name: &str) -> Option<i64> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_i64())
}

async fn handle_play(ctx: &Context, command: &CommandInteraction, bot: &MusicBot, guild_id: GuildId) -> EngineResult<String> {
    // El usuario debe estar en un canal de voz antes de tocar el motor
    let voice_channel_id = get_user_voice_channel(ctx, guild_id, command.user.id)?;

    let outcome = play_query(command, bot, guild_id, voice_channel_id).await?;
    Ok(render_play_outcome(&outcome))
}

async fn play_query(
    command: &CommandInteraction,
    bot: &MusicBot,
    guild_id: GuildId,
    channel_id: ChannelId,
) -> EngineResult<PlayOutcome> {
    let query = string_option(command, "query").unwrap_or_default();
    let preference: SourcePreference = string_option(command, "source").unwrap_or_default().parse()?;

    let track = bot.resolver.resolve(query, preference, command.user.id).await?;
    bot.player.play(guild_id, channel_id, track).await
}

async fn handle_volume(command: &CommandInteraction, bot: &MusicBot, guild_id: GuildId) -> EngineResult<String> {
    let level = integer_option(command, "level").ok_or_else(|| EngineError::validation("falta el nivel de volumen"))?;
    // Fuera de [0, 100] se rechaza aquí, antes del controlador
    let volume = Volume::try_from(level)?;

    bot.player.volume(guild_id, volume).await?;
    Ok(format!("🔊 Volumen ajustado a {}%", volume.level()))
}

async fn handle_loop(command: &CommandInteraction, bot: &MusicBot, guild_id: GuildId) -> EngineResult<String> {
    let mode: LoopMode = string_option(command, "mode").unwrap_or("off").parse()?;
    let mode = bot.player.set_loop_mode(guild_id, mode).await?;

    Ok(match mode {
        LoopMode::Off => "➡️ Repetición desactivada".to_string(),
        LoopMode::Track => "🔂 Repitiendo la canción actual".to_string(),
        LoopMode::Queue => "🔁 Repitiendo la cola".to_string(),
    })
}

fn get_user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> EngineResult<ChannelId> {
    let guild = guild_id
        .to_guild_cached(&ctx.cache)
        .ok_or_else(|| EngineError::validation("servidor no encontrado en caché"))?;

    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
        .ok_or_else(|| EngineError::validation("debes estar en un canal de voz"))
}

/// "3:07" o "1:02:03"
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

fn track_line(track: &Track) -> String {
    match track.duration() {
        Some(duration) => format!("**{}** `{}`", track.title(), format_duration(duration)),
        None => format!("**{}**", track.title()),
    }
}

pub fn render_play_outcome(outcome: &PlayOutcome) -> String {
    if outcome.started {
        format!("🎵 Reproduciendo: **{}**", outcome.track_title)
    } else {
        format!(
            "➕ Agregado a la cola: **{}** (posición {})",
            outcome.track_title, outcome.queue_position
        )
    }
}

pub fn render_now_playing(snapshot: &QueueSnapshot) -> Option<String> {
    let current = snapshot.current.as_ref()?;
    let icon = match snapshot.status {
        PlayerStatus::Paused => "⏸️",
        _ => "🎵",
    };

    Some(format!(
        "{} {}\n👤 <@{}> · {} · 🔊 {}%",
        icon,
        track_line(current),
        current.requested_by(),
        current.source(),
        snapshot.volume.level()
    ))
}

pub fn render_queue(snapshot: &QueueSnapshot) -> String {
    if snapshot.is_empty() {
        return "📭 La cola está vacía".to_string();
    }

    let mut lines = Vec::new();
    if let Some(now) = render_now_playing(snapshot) {
        lines.push(now);
    }

    let (shown, remaining) = snapshot.up_next(QUEUE_PAGE);
    if !shown.is_empty() {
        lines.push("📋 **Siguientes:**".to_string());
        for (index, track) in shown.iter().enumerate() {
            lines.push(format!("`{}.` {}", index + 1, track_line(track)));
        }
    }
    if remaining > 0 {
        lines.push(format!("… y {} más", remaining));
    }

    lines.push(format!(
        "🔁 Repetición: {} · ⏱️ Total: {}",
        snapshot.loop_mode,
        format_duration(snapshot.total_duration)
    ));

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::SourceKind;
    use pretty_assertions::assert_eq;

    fn track(name: &str, secs: u64) -> Track {
        Track::new(name, "https://cdn.example.com/a.mp3", SourceKind::Direct, UserId::new(7))
            .unwrap()
            .with_duration(Duration::from_secs(secs))
    }

    fn snapshot(current: Option<Track>, pending: Vec<Track>) -> QueueSnapshot {
        let total_duration = current
            .iter()
            .chain(pending.iter())
            .filter_map(|t| t.duration())
            .sum();

        QueueSnapshot {
            current,
            pending,
            status: PlayerStatus::Playing,
            loop_mode: LoopMode::Off,
            last_error: None,
            volume: Volume::default(),
            total_duration,
        }
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(187)), "3:07");
        assert_eq!(format_duration(Duration::from_secs(3723)), "1:02:03");
        assert_eq!(format_duration(Duration::ZERO), "0:00");
    }

    #[test]
    fn test_render_play_outcome() {
        let started = PlayOutcome {
            track_title: "x".to_string(),
            queue_position: 0,
            started: true,
        };
        let queued = PlayOutcome {
            track_title: "y".to_string(),
            queue_position: 3,
            started: false,
        };

        assert_eq!(render_play_outcome(&started), "🎵 Reproduciendo: **x**");
        assert_eq!(render_play_outcome(&queued), "➕ Agregado a la cola: **y** (posición 3)");
    }

    #[test]
    fn test_render_queue_pages_pending() {
        let pending = (0..12).map(|i| track(&format!("t{}", i), 60)).collect();
        let rendered = render_queue(&snapshot(Some(track("now", 60)), pending));

        assert!(rendered.contains("🎵 **now** `1:00`"));
        assert!(rendered.contains("`10.` **t9**"));
        assert!(!rendered.contains("**t10**"));
        assert!(rendered.contains("… y 2 más"));
        assert!(rendered.contains("⏱️ Total: 13:00"));
    }

    #[test]
    fn test_render_empty_queue() {
        assert_eq!(render_queue(&snapshot(None, Vec::new())), "📭 La cola está vacía");
        assert!(render_now_playing(&snapshot(None, Vec::new())).is_none());
    }
}
