//! Scripted command runner for unit tests.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::cmd::{argv, Output, Runner, SUCCESS};
use crate::error::Error;
use crate::package::CommandResult;

struct Stream {
    argv: Vec<String>,
    lines: Vec<String>,
    result: CommandResult,
}

/// Replays canned outputs and records every argv it was asked to run.
///
/// Unscripted commands behave like a binary missing from PATH.
#[derive(Default)]
pub struct ScriptedRunner {
    programs: Vec<String>,
    outputs: Vec<(Vec<String>, Output)>,
    streams: Vec<Stream>,
    gate: Option<Arc<Notify>>,
    started: Notify,
    calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `program` visible to [`Runner::locate`]
    pub fn with_program(mut self, program: &str) -> Self {
        self.programs.push(program.to_string());
        self
    }

    /// Answer `run(cmd)` with the given exit code and output. Scripting the
    /// same command again answers its later runs; the last answer repeats.
    pub fn with_output(mut self, cmd: &[&str], exit_code: i32, stdout: &str, stderr: &str) -> Self {
        let result = if exit_code == 0 {
            CommandResult::ok(SUCCESS)
        } else {
            crate::cmd::finished(exit_code, stderr)
        };
        self.outputs.push((
            argv(cmd),
            Output {
                result,
                stdout: stdout.to_string(),
            },
        ));
        self
    }

    /// Answer `run_streaming(cmd)` by emitting `lines`, then `result`
    pub fn with_stream(mut self, cmd: &[&str], lines: &[&str], result: CommandResult) -> Self {
        self.streams.push(Stream {
            argv: argv(cmd),
            lines: argv(lines),
            result,
        });
        self
    }

    /// Hold every streaming command after its lines until `gate` is notified
    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Resolves once a streaming command is parked on the gate
    pub async fn started(&self) {
        self.started.notified().await;
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, argv: &[String]) {
        self.calls.lock().unwrap().push(argv.to_vec());
    }
}

fn missing(argv: &[String]) -> CommandResult {
    let program = argv.first().map(String::as_str).unwrap_or_default();
    Error::Spawn(format!("{} not found", program)).into()
}

#[async_trait]
impl Runner for ScriptedRunner {
    async fn run(&self, argv: &[String]) -> Output {
        self.record(argv);
        let scripted: Vec<&Output> = self
            .outputs
            .iter()
            .filter(|(cmd, _)| cmd.as_slice() == argv)
            .map(|(_, output)| output)
            .collect();
        let earlier = self.calls().iter().filter(|c| c.as_slice() == argv).count() - 1;

        match scripted.get(earlier.min(scripted.len().saturating_sub(1))) {
            Some(output) => (*output).clone(),
            None => Output {
                result: missing(argv),
                stdout: String::new(),
            },
        }
    }

    async fn run_streaming(
        &self,
        argv: &[String],
        on_line: &mut (dyn for<'l> FnMut(&'l str) + Send),
        cancel: &CancellationToken,
    ) -> CommandResult {
        self.record(argv);
        let Some(stream) = self.streams.iter().find(|s| s.argv.as_slice() == argv) else {
            return missing(argv);
        };

        for line in &stream.lines {
            on_line(line);
        }

        if let Some(gate) = &self.gate {
            self.started.notify_one();
            tokio::select! {
                _ = gate.notified() => {}
                _ = cancel.cancelled() => return Error::Cancelled.into(),
            }
        }

        stream.result.clone()
    }

    fn locate(&self, program: &str) -> Option<PathBuf> {
        self.programs
            .iter()
            .any(|p| p == program)
            .then(|| PathBuf::from("/usr/bin").join(program))
    }
}
