//! Test doubles for the diagnosis pipeline.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::diagnosis::executor::{CommandExecutor, CommandResult};
use crate::error::Result;

/// What the fake diag script does with its output directory.
#[derive(Debug, Clone, Copy)]
pub enum FakeScript {
    /// Write `<out>/<subdir>/<file>` and exit 0.
    Bundle(&'static str, &'static str),
    /// Exit 0 without writing anything.
    Empty,
    /// Write a bundle anyway, then exit with the code and output given.
    FailWithBundle(i32, &'static str),
    /// Never finish on its own.
    Hang,
}

/// Records every command line and plays out a `FakeScript` instead of spawning.
pub struct RecordingExecutor {
    behavior: FakeScript,
    calls: Mutex<Vec<String>>,
}

impl RecordingExecutor {
    pub fn new(behavior: FakeScript) -> Self {
        Self {
            behavior,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn spawn_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

fn write_bundle(out_dir: &Path, subdir: &str, file: &str) {
    let dir = out_dir.join(subdir);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(file), b"PK\x05\x06").unwrap();
}

#[async_trait]
impl CommandExecutor for RecordingExecutor {
    async fn execute(&self, command_line: &str, cancel: CancellationToken) -> Result<CommandResult> {
        self.calls.lock().unwrap().push(command_line.to_string());

        let argv = shell_words::split(command_line).unwrap();
        let out_dir = PathBuf::from(&argv[2]);

        let done = |exit_code: i32, output: &str| CommandResult {
            exit_code: Some(exit_code),
            output: output.to_string(),
            cancelled: false,
        };

        match self.behavior {
            FakeScript::Bundle(subdir, file) => {
                write_bundle(&out_dir, subdir, file);
                Ok(done(0, "diagnosis done"))
            }
            FakeScript::Empty => Ok(done(0, "")),
            FakeScript::FailWithBundle(code, output) => {
                write_bundle(&out_dir, "pkg1", "diag.zip");
                Ok(done(code, output))
            }
            FakeScript::Hang => {
                cancel.cancelled().await;
                Ok(CommandResult {
                    exit_code: None,
                    output: String::new(),
                    cancelled: true,
                })
            }
        }
    }
}

/// Install an executable `bin/diag.sh` under `home` with the given body.
pub fn install_script(home: &Path, body: &str) -> PathBuf {
    let bin = home.join("bin");
    std::fs::create_dir_all(&bin).unwrap();
    let script = bin.join("diag.sh");
    std::fs::write(&script, format!("#!/bin/bash\n{body}\n")).unwrap();

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    script
}
