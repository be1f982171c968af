// ===============================
// src/recorder.rs
// ===============================
//
// Lightweight JSONL event log:
// - appends every Event to a .jsonl file
// - BufWriter to keep syscalls down, flushed every 1s or every 1000 events
// - creates the parent directory if missing
// - on a failed write, reopens the file once and carries on
//
// Enabled by RECORD_FILE=/path/to/events.jsonl (see main.rs).

use std::path::Path;
use tokio::{
    fs::{self, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{error, info};

use crate::domain::Event;

const FLUSH_EVERY_N_EVENTS: u32 = 1000;

async fn open_writer(path: &str) -> BufWriter<tokio::fs::File> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = fs::create_dir_all(parent).await {
                error!(?e, %path, "recorder: create_dir_all failed");
            }
        }
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .unwrap_or_else(|e| panic!("recorder: open {} failed: {}", path, e));

    BufWriter::new(file)
}

pub async fn run(mut rx: mpsc::Receiver<Event>, path: String) {
    info!(%path, "recorder: started");
    let mut writer = open_writer(&path).await;

    let mut tick = interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut since_last_flush: u32 = 0;

    loop {
        tokio::select! {
            maybe_ev = rx.recv() => {
                match maybe_ev {
                    Some(ev) => {
                        let line = match serde_json::to_string(&ev) {
                            Ok(s) => s,
                            Err(e) => {
                                error!(?e, "recorder: serialize error, skip event");
                                continue;
                            }
                        };

                        if let Err(e) = writer.write_all(line.as_bytes()).await {
                            error!(?e, "recorder: write failed, attempting reopen");
                            writer = open_writer(&path).await;
                            if let Err(e2) = writer.write_all(line.as_bytes()).await {
                                error!(?e2, "recorder: write failed again after reopen, drop event");
                                continue;
                            }
                        }
                        if let Err(e) = writer.write_all(b"\n").await {
                            error!(?e, "recorder: newline write failed, attempting reopen");
                            writer = open_writer(&path).await;
                            let _ = writer.write_all(b"\n").await;
                        }

                        since_last_flush += 1;
                        if since_last_flush >= FLUSH_EVERY_N_EVENTS {
                            let _ = writer.flush().await;
                            since_last_flush = 0;
                        }
                    }
                    None => {
                        let _ = writer.flush().await;
                        info!("recorder: channel closed, stopped");
                        break;
                    }
                }
            }

            _ = tick.tick() => {
                let _ = writer.flush().await;
                since_last_flush = 0;
            }
        }
    }
}
