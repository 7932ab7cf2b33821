pub const CRATE_NAME: &str = module_path!();

mod buffer;
mod config;
mod database;
mod download_pool;
mod error;
mod fetch;
mod interactive;
mod logging;
mod misc;
mod pipeline;
mod quota;
mod registry;
mod restart;
mod scanner;
mod subprocess;
mod task;
mod tools;
mod transport;
mod uploader;
mod watchdog;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::{BotCommandScope, Me};
use teloxide::utils::command::BotCommands;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::buffer::Buffer;
use crate::config::EngineConfig;
use crate::database::SurrealQuotaStore;
use crate::fetch::torrent::TorrentRpcClient;
use crate::interactive::{InteractiveRegistry, PromptKind, Prompt, UserResponse};
use crate::misc::die;
use crate::pipeline::TaskInputFetcher;
use crate::registry::TASK_REGISTRY;
use crate::task::config::{AudioCodec, AudioMode, CompressMode, SubtitleMode, ToolConfig};
use crate::task::id::TaskId;
use crate::task::kind::TaskKind;
use crate::task::object::{InputRef, Task};
use crate::task::stage::Stage;
use crate::transport::TeloxideTransport;
use crate::watchdog::Watchdog;

type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Everything a command handler needs, threaded through `dptree::deps!`
/// rather than read from globals — only the Task Registry stays a
/// `lazy_static` (§4.A's own design choice, kept as-is).
struct AppState {
    transport: Arc<TeloxideTransport>,
    fetcher: Arc<TaskInputFetcher<TeloxideTransport>>,
    quota_store: Arc<SurrealQuotaStore>,
    config: Arc<EngineConfig>,
    interactive: Arc<InteractiveRegistry>,
    watchdog: Arc<Mutex<Watchdog>>,
    /// Backs only the "`/leech` issued without a reply" rejection (§12 Q2);
    /// reply-scan (`scanner.rs`) is the shipping mode for the happy path.
    buffer: Arc<Mutex<Buffer>>,
}

impl Clone for AppState {
    fn clone(&self) -> Self {
        AppState {
            transport: self.transport.clone(),
            fetcher: self.fetcher.clone(),
            quota_store: self.quota_store.clone(),
            config: self.config.clone(),
            interactive: self.interactive.clone(),
            watchdog: self.watchdog.clone(),
            buffer: self.buffer.clone(),
        }
    }
}

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
enum Command {
    Start,
    Leech(String),
    Vt,
    Jl(String),
    Qbl(String),
    Upload(String),
    Mediainfo(String),
    Cancel(String),
    Restart,
    Myplan,
    AddFooter(String),
    RemoveFooter,
}

fn today() -> String {
    humantime::format_rfc3339(std::time::SystemTime::now()).to_string()[..10].to_string()
}

#[tokio::main]
async fn main() {
    logging::init();

    for dep in ["ffmpeg", "yt-dlp", "mediainfo"] {
        misc::check_external_binary(dep);
    }

    let config = Arc::new(EngineConfig::from_env());
    let db = database::db_init().await;
    let quota_store = Arc::new(SurrealQuotaStore::new(db));

    let bot = Bot::new(&config.bot_token);
    let transport = Arc::new(TeloxideTransport::new(bot.clone()));

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(360))
        .build()
        .unwrap_or_else(|e| die(format!("failed to build http client: {e}")));

    let torrent = if config.torrent_rpc_user.is_some() || config.torrent_rpc_pass.is_some() || config.torrent_rpc_host != "127.0.0.1" {
        match TorrentRpcClient::new(&config.torrent_rpc_host, config.torrent_rpc_port, config.torrent_rpc_user.clone(), config.torrent_rpc_pass.clone()) {
            Ok(client) => Some(client),
            Err(e) => {
                warn!("torrent RPC client not available: {e}");
                None
            }
        }
    } else {
        None
    };

    let fetcher = Arc::new(TaskInputFetcher::new(transport.clone(), http, torrent));

    let watchdog = Arc::new(Mutex::new(Watchdog::new(config.cpu_threshold_pct, config.ram_threshold_pct, config.idle_timeout)));

    let state = AppState {
        transport: transport.clone(),
        fetcher,
        quota_store,
        config: config.clone(),
        interactive: Arc::new(InteractiveRegistry::new()),
        watchdog: watchdog.clone(),
        buffer: Arc::new(Mutex::new(Buffer::new())),
    };

    let mut commands = Command::bot_commands().to_vec();
    commands.retain(|c| c.command != "start");
    if let Err(e) = bot.set_my_commands(commands).scope(BotCommandScope::Default).await {
        warn!("failed to publish command list: {e}");
    }

    tokio::spawn(watchdog_loop(state.clone()));

    info!("taskforge {} starting", env!("CARGO_PKG_VERSION"));

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(message_handler))
        .branch(Update::filter_callback_query().endpoint(callback_handler));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

/// Background half of the Watchdog (4.K): ticks on `watchdog_interval`,
/// after an initial `watchdog_startup_grace`, and fires the Restart
/// Coordinator whenever a tick returns a reason.
async fn watchdog_loop(state: AppState) {
    tokio::time::sleep(state.config.watchdog_startup_grace).await;
    let mut interval = tokio::time::interval(state.config.watchdog_interval);
    loop {
        interval.tick().await;
        let active = TASK_REGISTRY.len();
        let reason = state.watchdog.lock().unwrap().check(active);
        let Some(reason) = reason else { continue };

        let tokens: Vec<CancellationToken> = TASK_REGISTRY.ids().into_iter().filter_map(|id| TASK_REGISTRY.with_task(id, |t| t.cancel_token.clone())).collect();
        let owner_chat = state.config.owner_ids.first().map(|id| ChatId(*id));
        if let Err(e) = restart::restart(state.transport.as_ref(), &reason.to_string(), None, owner_chat, tokens, std::path::Path::new(task::object::TASKS_ROOT)).await {
            error!("restart coordinator failed: {e}");
            continue;
        }
        std::process::exit(0);
    }
}

#[tracing::instrument(skip_all, fields(user_id = %callback_query.from.id))]
async fn callback_handler(callback_query: CallbackQuery, state: AppState) -> HandlerResult {
    state.watchdog.lock().unwrap().touch_activity();

    let Some(data) = callback_query.data.clone() else { return Ok(()) };
    state.transport.answer_callback(&callback_query.id, None).await?;

    let Some(message) = callback_query.regular_message() else { return Ok(()) };
    let user = callback_query.from.id;

    let matching: Vec<(TaskId, UserId, Stage)> =
        TASK_REGISTRY.ids().into_iter().filter_map(|id| TASK_REGISTRY.with_task(id, |t| (id, t.owner, t.stage))).collect();

    for stage in [Stage::ToolSelectionPending, Stage::WaitingForDone] {
        if let Some(task_id) = interactive::find_owning_task(matching.clone(), user, stage) {
            state.interactive.resolve(task_id, UserResponse::Option(data.clone()));
            return Ok(());
        }
    }

    let _ = message;
    Ok(())
}

#[tracing::instrument(skip_all, fields(chat_id = %msg.chat.id.0))]
async fn message_handler(bot: Bot, msg: Message, me: Me, state: AppState) -> HandlerResult {
    state.transport.remember(&msg);
    state.watchdog.lock().unwrap().touch_activity();

    if let Some(user) = msg.from.as_ref() {
        if msg.video().is_some() || msg.audio().is_some() || msg.voice().is_some() || msg.document().is_some() || msg.photo().is_some() {
            state.buffer.lock().unwrap().push(user.id, msg.id);
        }
    }

    let Some(text) = msg.text() else { return Ok(()) };
    let Ok(command) = Command::parse(text, me.username()) else {
        // Not a recognised command: if this user has a task waiting on a
        // free-text prompt (e.g. `done`, a compress-mode number), deliver it.
        if let Some(user) = msg.from.as_ref() {
            let matching: Vec<(TaskId, UserId, Stage)> =
                TASK_REGISTRY.ids().into_iter().filter_map(|id| TASK_REGISTRY.with_task(id, |t| (id, t.owner, t.stage))).collect();
            if let Some(task_id) = interactive::find_owning_task(matching, user.id, Stage::WaitingForDone) {
                state.interactive.resolve(task_id, UserResponse::Text(text.to_string()));
            }
        }
        return Ok(());
    };

    let Some(user) = msg.from.clone() else { return Ok(()) };
    let chat = msg.chat.id;

    match command {
        Command::Start => {
            bot.send_message(chat, "Send me something to leech.").await?;
        }
        Command::Leech(args) => handle_leech(state, chat, user.id, msg.reply_to_message().map(|m| m.id), &args).await?,
        Command::Vt => handle_vt(state, chat, user.id, msg.reply_to_message().map(|m| m.id)).await?,
        Command::Jl(url) => handle_single_url(state, TaskKind::Jl, chat, user.id, &url).await?,
        Command::Upload(url) => handle_single_url(state, TaskKind::UrlUpload, chat, user.id, &url).await?,
        Command::Qbl(magnet) => handle_magnet(state, chat, user.id, &magnet).await?,
        Command::Mediainfo(arg) => handle_mediainfo(state, chat, user.id, msg.reply_to_message().map(|m| m.id), &arg).await?,
        Command::Cancel(id) => handle_cancel(state, chat, &id).await?,
        Command::Restart => {
            if !state.config.is_owner(user.id.0 as i64) {
                bot.send_message(chat, "Owner only.").await?;
            } else {
                let tokens: Vec<CancellationToken> =
                    TASK_REGISTRY.ids().into_iter().filter_map(|id| TASK_REGISTRY.with_task(id, |t| t.cancel_token.clone())).collect();
                restart::restart(state.transport.as_ref(), "manual /restart", Some(chat), None, tokens, std::path::Path::new(task::object::TASKS_ROOT)).await?;
                std::process::exit(0);
            }
        }
        Command::Myplan => {
            let today = today();
            let quota = quota::QuotaStore::get_or_create(state.quota_store.as_ref(), user.id, &state.config.default_plan, &today).await?;
            let limit = state.config.tier_limit_bytes(&quota.tier);
            let limit_text = limit.map(misc::humanbytes).unwrap_or_else(|| "unlimited".to_string());
            bot.send_message(
                chat,
                format!(
                    "Tier: {}\nUsed today: {} / {}\nTotal processed: {} ({} files)",
                    quota.tier,
                    misc::humanbytes(quota.daily_used_bytes),
                    limit_text,
                    misc::humanbytes(quota.total_used_bytes),
                    quota.files_processed
                ),
            )
            .await?;
        }
        Command::AddFooter(text) => {
            let today = today();
            let mut quota = quota::QuotaStore::get_or_create(state.quota_store.as_ref(), user.id, &state.config.default_plan, &today).await?;
            quota.caption_footer = Some(text);
            quota::QuotaStore::save(state.quota_store.as_ref(), user.id, quota).await?;
            bot.send_message(chat, "Footer saved.").await?;
        }
        Command::RemoveFooter => {
            let today = today();
            let mut quota = quota::QuotaStore::get_or_create(state.quota_store.as_ref(), user.id, &state.config.default_plan, &today).await?;
            quota.caption_footer = None;
            quota::QuotaStore::save(state.quota_store.as_ref(), user.id, quota).await?;
            bot.send_message(chat, "Footer removed.").await?;
        }
    }

    Ok(())
}

/// `/leech -i N -m NAME [-TOOL] [-start HH:MM:SS] [-end HH:MM:SS]` (§6).
/// A small hand-rolled flag parser rather than a crate, matching the scale
/// of the grammar (5 flags, no nesting).
struct LeechArgs {
    count: usize,
    name: String,
    tool: Option<String>,
    start: Option<String>,
    end: Option<String>,
}

fn parse_leech_args(args: &str) -> Option<LeechArgs> {
    let tokens: Vec<&str> = args.split_whitespace().collect();
    let mut count = None;
    let mut name = None;
    let mut tool = None;
    let mut start = None;
    let mut end = None;

    let mut i = 0;
    while i < tokens.len() {
        match tokens[i] {
            "-i" => {
                count = tokens.get(i + 1)?.parse().ok();
                i += 2;
            }
            "-m" => {
                name = Some(tokens.get(i + 1)?.to_string());
                i += 2;
            }
            "-start" => {
                start = Some(tokens.get(i + 1)?.to_string());
                i += 2;
            }
            "-end" => {
                end = Some(tokens.get(i + 1)?.to_string());
                i += 2;
            }
            flag if flag.starts_with('-') && crate::task::kind::ToolTag::from_flag(&flag[1..]).is_some() => {
                tool = Some(flag[1..].to_string());
                i += 1;
            }
            _ => i += 1,
        }
    }

    Some(LeechArgs { count: count?, name: name?, tool, start, end })
}

async fn handle_leech(state: AppState, chat: ChatId, user: UserId, reply_to: Option<teloxide::types::MessageId>, args: &str) -> HandlerResult {
    let Some(parsed) = parse_leech_args(args) else {
        state.transport.send_text(chat, "usage: /leech -i N -m NAME [-TOOL] [-start HH:MM:SS] [-end HH:MM:SS]").await?;
        return Ok(());
    };
    let Some(anchor) = reply_to else {
        // Reply-scan is the shipping mode (§12 Q2); `Buffer` only tells us
        // whether to phrase the rejection as "nothing recent either" or
        // "files came in but a reply is still required", never services
        // the request itself.
        let message = if state.buffer.lock().unwrap().has_recent(user) {
            "/leech must reply to the first file in the batch (files were received, but a reply is still required)."
        } else {
            "/leech must reply to the first file in the batch."
        };
        state.transport.send_text(chat, message).await?;
        return Ok(());
    };

    let found = scanner::scan_for_media(state.transport.as_ref(), chat, anchor, user, parsed.count);
    if found.len() < parsed.count {
        state.transport.send_text(chat, &format!("only found {} of {} requested files near that message", found.len(), parsed.count)).await?;
        return Ok(());
    }

    let id = TASK_REGISTRY.new_id();
    let kind = if parsed.tool.is_some() { TaskKind::Leech } else { TaskKind::Vt };
    let mut task = Task::new(id, user, chat, kind, parsed.name).map_err(|e| format!("failed to create task workspace: {e}"))?;
    task.inputs = found.into_iter().map(|message_id| InputRef::Message { chat_id: chat, message_id }).collect();
    task.requested_count = parsed.count;
    task.advance_stage(Stage::ToolSelectionPending);
    // Registered before the tool-config dialogue starts: `ask_options`/
    // `ask_free_text` resolve through `TASK_REGISTRY`, scanning for a task
    // owned by this user in `ToolSelectionPending` (§4.I).
    TASK_REGISTRY.register(task);

    let config = match build_tool_config(&state, chat, id, parsed.tool.as_deref(), parsed.start.as_deref(), parsed.end.as_deref()).await {
        Ok(config) => config,
        Err(e) => {
            if let Some(task) = TASK_REGISTRY.remove(id) {
                misc::cleanup_dir(&task.work_dir).await;
            }
            state.transport.send_text(chat, &format!("task cancelled: {e}")).await?;
            return Ok(());
        }
    };
    TASK_REGISTRY.with_task_mut(id, |task| {
        task.config = Some(config);
        task.advance_stage(Stage::WaitingForDone);
    });

    let prompt = Prompt { text: "Type `done` once you're ready to start.".to_string(), kind: PromptKind::FreeText, timeout: Duration::from_secs(300) };
    let ready = interactive::await_step(state.transport.as_ref(), &state.interactive, chat, id, &prompt).await;
    if ready.is_err() {
        if let Some(task) = TASK_REGISTRY.remove(id) {
            misc::cleanup_dir(&task.work_dir).await;
        }
        state.transport.send_text(chat, "timed out waiting for `done`.").await?;
        return Ok(());
    }

    spawn_pipeline(state, id);
    Ok(())
}

/// `/vt` (§6): the single-file variant of the same tool set. Unlike `/leech`
/// it carries no `-i`/flag arguments, so its menu is scoped to the tools that
/// take exactly one input and no extra timecode flags (`cv`, `wv`, `rv`,
/// `ev`) — the two/merge-input tools (`vt`, `va`, `aa`, `vs`) and the
/// timecode tools (`tv`, `cut`) stay reachable only through `/leech`.
async fn handle_vt(state: AppState, chat: ChatId, user: UserId, reply_to: Option<teloxide::types::MessageId>) -> HandlerResult {
    let Some(anchor) = reply_to else {
        state.transport.send_text(chat, "/vt must reply to a file.").await?;
        return Ok(());
    };

    let id = TASK_REGISTRY.new_id();
    let mut task = Task::new(id, user, chat, TaskKind::Vt, "vt_output".to_string()).map_err(|e| format!("failed to create task workspace: {e}"))?;
    task.inputs = vec![InputRef::Message { chat_id: chat, message_id: anchor }];
    task.requested_count = 1;
    task.advance_stage(Stage::ToolSelectionPending);
    TASK_REGISTRY.register(task);

    let tool = match ask_options(&state, chat, id, "Pick a tool: compress, watermark, extract audio, or extract video?", &["cv", "wv", "rv", "ev"]).await {
        Ok(tool) => tool,
        Err(e) => {
            if let Some(task) = TASK_REGISTRY.remove(id) {
                misc::cleanup_dir(&task.work_dir).await;
            }
            state.transport.send_text(chat, &format!("task cancelled: {e}")).await?;
            return Ok(());
        }
    };

    let config = match build_tool_config(&state, chat, id, Some(&tool), None, None).await {
        Ok(config) => config,
        Err(e) => {
            if let Some(task) = TASK_REGISTRY.remove(id) {
                misc::cleanup_dir(&task.work_dir).await;
            }
            state.transport.send_text(chat, &format!("task cancelled: {e}")).await?;
            return Ok(());
        }
    };
    TASK_REGISTRY.with_task_mut(id, |task| {
        task.config = Some(config);
        task.advance_stage(Stage::WaitingForDone);
    });

    let prompt = Prompt { text: "Type `done` once you're ready to start.".to_string(), kind: PromptKind::FreeText, timeout: Duration::from_secs(300) };
    let ready = interactive::await_step(state.transport.as_ref(), &state.interactive, chat, id, &prompt).await;
    if ready.is_err() {
        if let Some(task) = TASK_REGISTRY.remove(id) {
            misc::cleanup_dir(&task.work_dir).await;
        }
        state.transport.send_text(chat, "timed out waiting for `done`.").await?;
        return Ok(());
    }

    spawn_pipeline(state, id);
    Ok(())
}

/// Collects the extra parameters a tool needs beyond its flag (§4.I).
/// Tools with no extra parameters (`vt`, `aa`, `ev`) need nothing here.
async fn build_tool_config(
    state: &AppState,
    chat: ChatId,
    task_id: TaskId,
    tool: Option<&str>,
    start: Option<&str>,
    end: Option<&str>,
) -> Result<ToolConfig, String> {
    use crate::task::kind::ToolTag;

    let Some(tool) = tool else { return Ok(ToolConfig::Vt) };
    let tag = ToolTag::from_flag(tool).ok_or_else(|| format!("unknown tool {tool}"))?;

    match tag {
        ToolTag::Vt => Ok(ToolConfig::Vt),
        ToolTag::Aa => Ok(ToolConfig::Aa),
        ToolTag::Ev => Ok(ToolConfig::Ev),
        ToolTag::Va => {
            let reply = ask_options(state, chat, task_id, "Keep the original video's audio track too?", &["drop", "keep"]).await?;
            Ok(ToolConfig::Va { mode: if reply == "keep" { AudioMode::KeepOriginal } else { AudioMode::DropOriginal } })
        }
        ToolTag::Vs => {
            let reply = ask_options(state, chat, task_id, "Burn subtitles in, or keep them as soft tracks?", &["burn", "soft"]).await?;
            Ok(ToolConfig::Vs { mode: if reply == "burn" { SubtitleMode::BurnIn { track_index: 0 } } else { SubtitleMode::SoftAll } })
        }
        ToolTag::Cv => {
            let reply = ask_options(state, chat, task_id, "Compression mode: high_quality, balanced, high_compression, target_size?", &["high_quality", "balanced", "high_compression", "target_size"]).await?;
            let mode = match reply.as_str() {
                "high_quality" => CompressMode::HighQuality,
                "balanced" => CompressMode::Balanced,
                "high_compression" => CompressMode::HighCompression,
                "target_size" => {
                    let mib = ask_free_text(state, chat, task_id, "Target size in MiB?").await?;
                    let mib: u64 = mib.trim().parse().map_err(|_| "not a number".to_string())?;
                    CompressMode::TargetSize { target_bytes: mib * 1024 * 1024 }
                }
                _ => return Err("unrecognised compression mode".to_string()),
            };
            Ok(ToolConfig::Cv { mode })
        }
        ToolTag::Wv => {
            let text = ask_free_text(state, chat, task_id, "Watermark text?").await?;
            Ok(ToolConfig::Wv {
                watermark: crate::task::config::Watermark::Text(text),
                animation: crate::task::config::WatermarkAnimation::Static,
                position: crate::task::config::WatermarkPosition::BottomRight,
            })
        }
        ToolTag::Tv => {
            let start = start.and_then(crate::task::config::Timecode::parse).ok_or("trim needs -start HH:MM:SS")?;
            let end = end.and_then(crate::task::config::Timecode::parse).ok_or("trim needs -end HH:MM:SS")?;
            Ok(ToolConfig::Tv { start, end })
        }
        ToolTag::Cut => {
            let start = start.and_then(crate::task::config::Timecode::parse).ok_or("cut needs -start HH:MM:SS")?;
            let end = end.and_then(crate::task::config::Timecode::parse).ok_or("cut needs -end HH:MM:SS")?;
            Ok(ToolConfig::Cut { start, end })
        }
        ToolTag::Rv => {
            let reply = ask_options(state, chat, task_id, "Output audio codec: mp3, aac, wav, keep?", &["mp3", "aac", "wav", "keep"]).await?;
            let codec = match reply.as_str() {
                "mp3" => AudioCodec::Mp3,
                "aac" => AudioCodec::Aac,
                "wav" => AudioCodec::Wav,
                _ => AudioCodec::KeepOriginal,
            };
            Ok(ToolConfig::Rv { codec })
        }
    }
}

async fn ask_options(state: &AppState, chat: ChatId, task_id: TaskId, text: &str, choices: &[&str]) -> Result<String, String> {
    let prompt = Prompt { text: text.to_string(), kind: PromptKind::Options(choices.iter().map(|c| c.to_string()).collect()), timeout: Duration::from_secs(120) };
    match interactive::await_step(state.transport.as_ref(), &state.interactive, chat, task_id, &prompt).await {
        Ok(UserResponse::Option(reply)) | Ok(UserResponse::Text(reply)) => Ok(reply),
        Err(e) => Err(e.to_string()),
    }
}

async fn ask_free_text(state: &AppState, chat: ChatId, task_id: TaskId, text: &str) -> Result<String, String> {
    let prompt = Prompt { text: text.to_string(), kind: PromptKind::FreeText, timeout: Duration::from_secs(120) };
    match interactive::await_step(state.transport.as_ref(), &state.interactive, chat, task_id, &prompt).await {
        Ok(UserResponse::Text(reply)) | Ok(UserResponse::Option(reply)) => Ok(reply),
        Err(e) => Err(e.to_string()),
    }
}

async fn handle_single_url(state: AppState, kind: TaskKind, chat: ChatId, user: UserId, url: &str) -> HandlerResult {
    let Ok(parsed) = url::Url::parse(url.trim()) else {
        state.transport.send_text(chat, "that doesn't look like a url").await?;
        return Ok(());
    };

    let id = TASK_REGISTRY.new_id();
    let name = parsed.path_segments().and_then(|mut s| s.next_back()).filter(|s| !s.is_empty()).unwrap_or("download").to_string();
    let mut task = Task::new(id, user, chat, kind, name).map_err(|e| format!("failed to create task workspace: {e}"))?;
    task.inputs = vec![InputRef::Url(parsed)];
    task.advance_stage(Stage::ToolSelectionPending);
    task.advance_stage(Stage::WaitingForDone);
    TASK_REGISTRY.register(task);

    spawn_pipeline(state, id);
    Ok(())
}

async fn handle_magnet(state: AppState, chat: ChatId, user: UserId, magnet: &str) -> HandlerResult {
    let magnet = magnet.trim().to_string();
    if !magnet.starts_with("magnet:") && url::Url::parse(&magnet).is_err() {
        state.transport.send_text(chat, "expected a magnet link or a .torrent url").await?;
        return Ok(());
    }

    let id = TASK_REGISTRY.new_id();
    let mut task = Task::new(id, user, chat, TaskKind::Qbl, "torrent".to_string()).map_err(|e| format!("failed to create task workspace: {e}"))?;
    task.inputs = vec![InputRef::Magnet(magnet)];
    task.advance_stage(Stage::ToolSelectionPending);
    task.advance_stage(Stage::WaitingForDone);
    TASK_REGISTRY.register(task);

    spawn_pipeline(state, id);
    Ok(())
}

async fn handle_mediainfo(state: AppState, chat: ChatId, user: UserId, reply_to: Option<teloxide::types::MessageId>, arg: &str) -> HandlerResult {
    let scratch_dir = std::path::PathBuf::from(task::object::TASKS_ROOT).join(format!("probe_{}", TaskId::random()));
    tokio::fs::create_dir_all(&scratch_dir).await?;

    let input_path = if let Ok(parsed) = url::Url::parse(arg.trim()) {
        use crate::download_pool::InputFetcher;
        state.fetcher.fetch(&InputRef::Url(parsed), &scratch_dir, CancellationToken::new()).await?
    } else if let Some(message_id) = reply_to {
        let Some(meta) = state.transport.message(chat, message_id) else {
            state.transport.send_text(chat, "can't see that message anymore").await?;
            misc::cleanup_dir(&scratch_dir).await;
            return Ok(());
        };
        let Some(file_id) = meta.file_id else {
            state.transport.send_text(chat, "that message carries no file").await?;
            misc::cleanup_dir(&scratch_dir).await;
            return Ok(());
        };
        let dest = scratch_dir.join("probe");
        state.transport.download_file(&file_id, &dest).await?;
        dest
    } else {
        state.transport.send_text(chat, "usage: /mediainfo URL, or reply to a file with /mediainfo").await?;
        misc::cleanup_dir(&scratch_dir).await;
        return Ok(());
    };

    let report = tools::mediainfo::probe(&input_path, CancellationToken::new(), &tools::SilentSink).await;
    let _ = user;
    misc::cleanup_dir(&scratch_dir).await;
    let report = report?;
    for chunk in misc::split_text(&report) {
        state.transport.send_text(chat, &chunk).await?;
    }
    Ok(())
}

async fn handle_cancel(state: AppState, chat: ChatId, raw_id: &str) -> HandlerResult {
    let raw_id = raw_id.trim();
    let found = TASK_REGISTRY.ids().into_iter().find(|id| id.as_str() == raw_id);
    let Some(id) = found else {
        state.transport.send_text(chat, "no such task").await?;
        return Ok(());
    };

    let cancelled = TASK_REGISTRY.with_task_mut(id, |task| {
        if task.stage.is_cancellable() {
            task.cancel_token.cancel();
            task.advance_stage(Stage::Cancelling);
            true
        } else {
            false
        }
    });

    match cancelled {
        Some(true) => state.transport.send_text(chat, &format!("Task {raw_id} cancelling...")).await?,
        Some(false) => state.transport.send_text(chat, &format!("Task {raw_id} is no longer cancellable")).await?,
        None => state.transport.send_text(chat, "no such task").await?,
    };
    Ok(())
}

/// Spawns the actual pipeline run for `task_id` on its own task so the
/// handler that kicked it off returns immediately (§5 "one task per
/// admission unit" — the dispatcher keeps servicing other chats while
/// this one downloads/processes/uploads in the background).
fn spawn_pipeline(state: AppState, task_id: TaskId) {
    tokio::spawn(async move {
        let Some(mut task) = TASK_REGISTRY.with_task_mut(task_id, |t| t.clone()) else { return };
        let is_admin = state.config.is_owner(task.owner.0 as i64);
        let today = today();

        let result = pipeline::run(
            &mut task,
            state.transport.as_ref(),
            state.fetcher.clone(),
            state.quota_store.as_ref(),
            state.config.as_ref(),
            is_admin,
            &state.config.default_plan,
            &today,
            state.config.stagger,
        )
        .await;

        TASK_REGISTRY.with_task_mut(task_id, |slot| *slot = task);
        if let Err(e) = result {
            warn!("task {task_id} ended in error: {e}");
        }
        if matches!(TASK_REGISTRY.with_task(task_id, |t| t.stage), Some(stage) if stage.is_terminal()) {
            TASK_REGISTRY.remove(task_id);
        }
    });
}
