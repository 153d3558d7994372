//! Line oriented operator console.
//!
//! Reads commands from stdin, hands them to the scheduler and prints
//! notices and readouts as they arrive. Stdin is read on a plain thread so a
//! blocked read never holds up runtime shutdown.

use std::io::BufRead;
use std::path::Path;
use std::thread;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio_graceful_shutdown::SubsystemHandle;

use crate::command::{parse_line, Command, CommandError};
use crate::event::SyncEvent;
use crate::storage;
use crate::SyncError;

const LINE_BUFFER: usize = 16;

pub struct Console {
    commands: mpsc::Sender<Command>,
    events: broadcast::Receiver<SyncEvent>,
}

impl Console {
    pub fn new(commands: mpsc::Sender<Command>, events: broadcast::Receiver<SyncEvent>) -> Self {
        Console { commands, events }
    }

    pub async fn run(mut self, subsys: SubsystemHandle) -> Result<(), SyncError> {
        let mut lines = spawn_stdin_reader();
        let mut stdin_open = true;

        loop {
            tokio::select! {
                _ = subsys.on_shutdown_requested() => {
                    log::debug!("Console: shutdown requested");
                    break;
                }
                line = lines.recv(), if stdin_open => match line {
                    Some(line) => {
                        if let Some(command) = interpret(&line) {
                            if self.commands.send(command).await.is_err() {
                                log::debug!("Console: scheduler has gone away");
                                break;
                            }
                        }
                    }
                    None => {
                        log::info!("Console: end of input, commands disabled");
                        stdin_open = false;
                    }
                },
                event = self.events.recv() => match event {
                    Ok(event) => print_event(&event),
                    Err(RecvError::Lagged(n)) => log::debug!("Console: skipped {} events", n),
                    Err(RecvError::Closed) => break,
                },
            }
        }
        Ok(())
    }
}

fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(LINE_BUFFER);
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Turn one input line into a command, reporting problems to the operator.
fn interpret(line: &str) -> Option<Command> {
    match parse_line(line) {
        Ok(command) => command,
        Err(CommandError::NeedsFile) => {
            let Some(path) = line.split_whitespace().nth(1) else {
                println!("usage: import <file>");
                return None;
            };
            match storage::import_from(Path::new(path)) {
                Ok(params) => Some(Command::ImportParams(params)),
                Err(e) => {
                    println!("import failed: {}", e);
                    None
                }
            }
        }
        Err(e) => {
            println!("{}", e);
            None
        }
    }
}

fn print_event(event: &SyncEvent) {
    match event {
        SyncEvent::Notice(notice) => println!("! {}", notice),
        SyncEvent::NoticeCleared => println!("notice cleared"),
        SyncEvent::RunState { running } => {
            println!("{}", if *running { "running" } else { "stopped" })
        }
        SyncEvent::AppMismatch { reported } => println!(
            "server runs {}",
            reported.as_deref().unwrap_or("an unknown application")
        ),
        SyncEvent::Readouts(readouts) => match serde_json::to_string(readouts) {
            Ok(text) => println!("readouts {}", text),
            Err(e) => log::debug!("Console: cannot format readouts: {}", e),
        },
        SyncEvent::ParamsStored => println!("parameters stored"),
        SyncEvent::ParamsLoaded { factory: true } => println!("factory parameters loaded"),
        SyncEvent::ParamsLoaded { factory: false } => println!("parameters loaded"),
        SyncEvent::Exported(path) => println!("exported to {}", path.display()),
        SyncEvent::NamedSaved(name) => println!("saved '{}'", name),
        SyncEvent::NamedRecalled(name) => println!("recalled '{}'", name),
        SyncEvent::NamedDeleted { name, existed: true } => println!("deleted '{}'", name),
        SyncEvent::NamedDeleted { name, existed: false } => println!("no set named '{}'", name),
        SyncEvent::NamedSets(names) if names.is_empty() => println!("no saved sets"),
        SyncEvent::NamedSets(names) => println!("sets: {}", names.join(", ")),
        SyncEvent::StateChanged(state) => log::trace!("Console: state {}", state),
        SyncEvent::ParamsAdopted { .. } | SyncEvent::RangeControls(_) => {}
    }
}
