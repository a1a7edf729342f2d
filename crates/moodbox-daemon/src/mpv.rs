/// mpv as the audio sink, driven over its JSON IPC socket.
///
/// ```text
///   MpvSink ── ensure_handle() ── MpvDriver::spawn_and_connect()
///                                     │
///                                     ├── writer task ← IpcRequest via mpsc, one JSON line each
///                                     └── reader task ← JSON lines from the socket
///                                            ├── has request_id → matching oneshot reply
///                                            └── unsolicited    → translate_events()
///                                                                   └── SinkNotice → controller
/// ```
///
/// Only `end-file` events with reason `eof` or `error` become
/// [`SinkEvent`]s. Reason `stop` is what mpv reports for items we replaced
/// or stopped ourselves, and must never look like a finished track. Each
/// event is stamped with the item of the file that was loaded when mpv
/// reported it.
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::error::{PlayerError, Result};
use crate::sink::{AudioSink, SinkEvent, SinkNotice, SinkState};

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

const IPC_TIMEOUT: tokio::time::Duration = tokio::time::Duration::from_secs(5);

/// mpv's `--volume-max`; speech clips are played above 100%.
const VOLUME_MAX_PCT: f32 = 200.0;

/// Sentinel for "entry id of the loaded file is unknown".
const NO_ENTRY: i64 = -1;

/// The file mpv is playing: its playlist entry id and the controller's item.
#[derive(Debug, Clone, Copy)]
struct Loaded {
    entry: i64,
    item: u64,
}

type LoadedSlot = Arc<std::sync::Mutex<Loaded>>;

fn read_loaded(slot: &LoadedSlot) -> Loaded {
    *slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_loaded(slot: &LoadedSlot, loaded: Loaded) {
    *slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = loaded;
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct IpcRequest {
    req_id: u64,
    line: String,
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// Unsolicited mpv message (event or property change).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.raw.get(key)?.as_str()
    }
}

/// Cloneable handle to the writer task of one connection.
#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<IpcRequest>,
    connected: Arc<AtomicBool>,
}

impl MpvHandle {
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let mut line = serde_json::to_string(&json!({ "command": command, "request_id": req_id }))?;
        line.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(IpcRequest {
                req_id,
                line,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(IPC_TIMEOUT, reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub async fn set_property(&self, name: &str, value: Value) -> anyhow::Result<()> {
        self.send(json!(["set_property", name, value])).await?;
        Ok(())
    }

    pub async fn get_property(&self, name: &str) -> anyhow::Result<Value> {
        let resp = self.send(json!(["get_property", name])).await?;
        Ok(resp.get("data").cloned().unwrap_or(Value::Null))
    }

    /// `loadfile <uri> replace`. Returns mpv's playlist entry id when the
    /// mpv version reports one.
    pub async fn load_file(&self, uri: &str) -> anyhow::Result<Option<i64>> {
        let resp = self.send(json!(["loadfile", uri, "replace"])).await?;
        Ok(resp
            .get("data")
            .and_then(|d| d.get("playlist_entry_id"))
            .and_then(Value::as_i64))
    }
}

/// Owns the mpv child process.
pub struct MpvDriver {
    socket_path: PathBuf,
    audio_device: Option<String>,
    process: Option<tokio::process::Child>,
}

impl MpvDriver {
    pub fn new(audio_device: Option<String>) -> Self {
        Self {
            socket_path: PathBuf::from(moodbox_proto::platform::mpv_socket_name()),
            audio_device,
            process: None,
        }
    }

    pub fn process_alive(&mut self) -> bool {
        match self.process.as_mut() {
            Some(child) => child.try_wait().ok().flatten().is_none(),
            None => false,
        }
    }

    pub async fn kill(&mut self) {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }
    }

    /// An mpv left behind by a previous daemon instance (e.g. after a
    /// presence-loss exit) keeps playing on its own. Ask it to quit.
    async fn quit_stale_instance(&self) {
        if !self.socket_path.exists() {
            return;
        }
        match UnixStream::connect(&self.socket_path).await {
            Ok(mut stream) => {
                info!("mpv: quitting stale instance on {}", self.socket_path.display());
                let _ = stream.write_all(b"{\"command\":[\"quit\"]}\n").await;
            }
            Err(e) => debug!("mpv: stale socket not connectable: {}", e),
        }
        let _ = tokio::fs::remove_file(&self.socket_path).await;
    }

    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;
        self.quit_stale_instance().await;

        let mpv_binary = moodbox_proto::platform::find_mpv_binary()
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;
        info!("mpv: spawning {}", mpv_binary.display());

        let mut command = tokio::process::Command::new(mpv_binary);
        command
            .arg("--no-video")
            .arg("--idle=yes")
            .arg("--quiet")
            .arg(format!("--volume-max={}", VOLUME_MAX_PCT))
            .arg(moodbox_proto::platform::mpv_socket_arg())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true);
        if let Some(device) = &self.audio_device {
            command.arg(format!("--audio-device={}", device));
        }
        self.process = Some(command.spawn()?);

        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if self.socket_path.exists() {
                break;
            }
        }
        if !self.socket_path.exists() {
            anyhow::bail!("mpv IPC socket did not appear");
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;

        let stream = UnixStream::connect(&self.socket_path).await?;
        info!("mpv: connected to IPC socket");
        Ok(start_io_tasks(stream, event_tx))
    }
}

fn start_io_tasks(stream: UnixStream, event_tx: mpsc::Sender<MpvEvent>) -> MpvHandle {
    let (read_half, write_half) = stream.into_split();
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let connected = Arc::new(AtomicBool::new(true));
    let (cmd_tx, cmd_rx) = mpsc::channel::<IpcRequest>(64);

    tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(
        BufReader::new(read_half),
        pending,
        event_tx,
        connected.clone(),
    ));

    MpvHandle {
        tx: cmd_tx,
        connected,
    }
}

async fn fail_all(pending: &PendingMap, reason: &str) {
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(anyhow::anyhow!("{}", reason)));
    }
}

async fn reader_task<R>(
    mut reader: BufReader<R>,
    pending: PendingMap,
    event_tx: mpsc::Sender<MpvEvent>,
    connected: Arc<AtomicBool>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                fail_all(&pending, "mpv IPC connection closed").await;
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                let Some(req_id) = val.get("request_id").and_then(Value::as_u64) else {
                    debug!("mpv reader: event {}", trimmed);
                    let _ = event_tx.send(MpvEvent { raw: val }).await;
                    continue;
                };

                let Some(tx) = pending.lock().await.remove(&req_id) else {
                    debug!("mpv reader: response for unknown req={}", req_id);
                    continue;
                };
                let result = match val.get("error").and_then(Value::as_str) {
                    Some("success") => Ok(val),
                    other => Err(anyhow::anyhow!(
                        "mpv error: {}",
                        other.unwrap_or("unknown error")
                    )),
                };
                let _ = tx.send(result);
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                fail_all(&pending, "mpv IPC read error").await;
                break;
            }
        }
    }
    connected.store(false, Ordering::Relaxed);
}

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<IpcRequest>, pending: PendingMap)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register before writing so the reader can always find the reply slot.
        pending.lock().await.insert(req.req_id, req.reply);
        debug!("mpv writer: req={} {}", req.req_id, req.line.trim());
        if let Err(e) = writer.write_all(req.line.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

/// Turn raw mpv events into sink notices. `loaded` holds the file we loaded
/// last; end-file events for any other entry are leftovers from a replaced
/// file.
async fn translate_events(
    mut rx: mpsc::Receiver<MpvEvent>,
    sink_tx: mpsc::Sender<SinkNotice>,
    loaded: LoadedSlot,
) {
    while let Some(evt) = rx.recv().await {
        let Loaded { entry, item } = read_loaded(&loaded);
        if let Some(event) = classify_end_file(&evt, entry) {
            if sink_tx.send(SinkNotice { item, event }).await.is_err() {
                break;
            }
        }
    }
}

fn classify_end_file(evt: &MpvEvent, loaded_entry: i64) -> Option<SinkEvent> {
    if evt.event_name() != Some("end-file") {
        return None;
    }
    let reason = evt.str_field("reason").unwrap_or("unknown");
    let sink_event = match reason {
        "eof" => SinkEvent::EndOfStream,
        "error" => SinkEvent::Error(evt.str_field("file_error").unwrap_or("unknown").to_string()),
        other => {
            debug!("mpv: end-file reason={} ignored", other);
            return None;
        }
    };
    if let Some(entry) = evt.raw.get("playlist_entry_id").and_then(Value::as_i64) {
        if loaded_entry != NO_ENTRY && entry != loaded_entry {
            debug!("mpv: stale end-file for entry {} (loaded {})", entry, loaded_entry);
            return None;
        }
    }
    info!("mpv: end-file reason={}", reason);
    Some(sink_event)
}

fn sink_err(e: anyhow::Error) -> PlayerError {
    PlayerError::Sink(e.to_string())
}

/// [`AudioSink`] backed by an mpv child process. The process is spawned on
/// first use and respawned on the next command after it dies.
pub struct MpvSink {
    driver: MpvDriver,
    handle: Option<MpvHandle>,
    /// The last spawn attempt failed; cleared by the next successful one.
    spawn_failed: bool,
    sink_tx: mpsc::Sender<SinkNotice>,
    loaded: LoadedSlot,
    next_uri: Option<(String, u64)>,
}

impl MpvSink {
    pub fn new(audio_device: Option<String>, sink_tx: mpsc::Sender<SinkNotice>) -> Self {
        Self {
            driver: MpvDriver::new(audio_device),
            handle: None,
            spawn_failed: false,
            sink_tx,
            loaded: Arc::new(std::sync::Mutex::new(Loaded {
                entry: NO_ENTRY,
                item: 0,
            })),
            next_uri: None,
        }
    }

    async fn ensure_handle(&mut self) -> Result<MpvHandle> {
        if let Some(handle) = &self.handle {
            if handle.is_connected() && self.driver.process_alive() {
                return Ok(handle.clone());
            }
            warn!("mpv: process gone, respawning");
            self.handle = None;
        }

        let (event_tx, event_rx) = mpsc::channel::<MpvEvent>(64);
        tokio::spawn(translate_events(
            event_rx,
            self.sink_tx.clone(),
            self.loaded.clone(),
        ));
        let handle = match self.driver.spawn_and_connect(event_tx).await {
            Ok(handle) => handle,
            Err(e) => {
                self.spawn_failed = true;
                return Err(sink_err(e));
            }
        };
        self.spawn_failed = false;
        let item = read_loaded(&self.loaded).item;
        write_loaded(&self.loaded, Loaded { entry: NO_ENTRY, item });
        self.handle = Some(handle.clone());
        Ok(handle)
    }
}

#[async_trait]
impl AudioSink for MpvSink {
    async fn set_uri(&mut self, uri: &str, item: u64) -> Result<()> {
        self.next_uri = Some((uri.to_string(), item));
        Ok(())
    }

    async fn set_volume(&mut self, volume: f32) -> Result<()> {
        let pct = (volume * 100.0).clamp(0.0, VOLUME_MAX_PCT);
        let handle = self.ensure_handle().await?;
        handle
            .set_property("volume", json!(pct))
            .await
            .map_err(sink_err)
    }

    async fn play(&mut self) -> Result<()> {
        let handle = self.ensure_handle().await?;
        handle
            .set_property("pause", json!(false))
            .await
            .map_err(sink_err)?;
        if let Some((uri, item)) = self.next_uri.take() {
            let entry = handle.load_file(&uri).await.map_err(sink_err)?;
            write_loaded(
                &self.loaded,
                Loaded {
                    entry: entry.unwrap_or(NO_ENTRY),
                    item,
                },
            );
            debug!("mpv: loaded {} entry={:?} item={}", uri, entry, item);
        }
        Ok(())
    }

    async fn pause(&mut self) -> Result<()> {
        let handle = self.ensure_handle().await?;
        handle
            .set_property("pause", json!(true))
            .await
            .map_err(sink_err)
    }

    async fn stop(&mut self) -> Result<()> {
        // Nothing to stop before mpv has ever been started, or after it died;
        // the next play respawns it.
        let Some(handle) = self.handle.clone() else {
            return Ok(());
        };
        if !(handle.is_connected() && self.driver.process_alive()) {
            return Ok(());
        }
        handle.send(json!(["stop"])).await.map_err(sink_err)?;
        Ok(())
    }

    async fn current_state(&mut self) -> Result<SinkState> {
        let Some(handle) = self.handle.clone() else {
            return Ok(SinkState::Idle);
        };
        let idle = handle
            .get_property("idle-active")
            .await
            .map_err(sink_err)?;
        if idle.as_bool().unwrap_or(true) {
            return Ok(SinkState::Idle);
        }
        let paused = handle.get_property("pause").await.map_err(sink_err)?;
        Ok(if paused.as_bool().unwrap_or(false) {
            SinkState::Paused
        } else {
            SinkState::Playing
        })
    }

    fn is_alive(&mut self) -> bool {
        match &self.handle {
            Some(h) => h.is_connected() && self.driver.process_alive(),
            None => !self.spawn_failed,
        }
    }

    async fn shutdown(&mut self) {
        info!("mpv: shutting down");
        if let Some(handle) = self.handle.take() {
            let _ = handle.send(json!(["quit"])).await;
        }
        self.driver.kill().await;
    }
}
