#![allow(dead_code)]

use aip_updater::config::{ProfileStore, Settings};
use aip_updater::services::process::{
    ProcessError, ProcessRunner, StreamExit, StreamSource, StreamingChild, ToolCommand, ToolOutput,
};
use async_trait::async_trait;
use camino::Utf8PathBuf;
use std::fs;
use std::sync::Mutex;
use tempfile::TempDir;

/// One scripted response, matched by substring against the rendered argv.
#[derive(Debug, Clone, Default)]
pub struct ScriptedCall {
    matcher: String,
    exit_code: i32,
    stdout: String,
    stderr: String,
    lines: Vec<String>,
    touch: Option<Utf8PathBuf>,
    fail_spawn: bool,
}

impl ScriptedCall {
    pub fn new<S: Into<String>>(matcher: S) -> Self {
        Self {
            matcher: matcher.into(),
            ..Self::default()
        }
    }

    pub fn exit_code(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    pub fn stdout<S: Into<String>>(mut self, stdout: S) -> Self {
        self.stdout = stdout.into();
        self
    }

    pub fn stderr<S: Into<String>>(mut self, stderr: S) -> Self {
        self.stderr = stderr.into();
        self
    }

    /// Lines delivered through the streamed source.
    pub fn lines<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lines = lines.into_iter().map(Into::into).collect();
        self
    }

    /// File created (with placeholder content) when this call runs, standing
    /// in for the artifact the real tool would write.
    pub fn touch(mut self, path: Utf8PathBuf) -> Self {
        self.touch = Some(path);
        self
    }

    /// Make the invocation fail as if the program were missing.
    pub fn fail_spawn(mut self) -> Self {
        self.fail_spawn = true;
        self
    }
}

/// Scripted stand-in for the external tools. Calls are matched against the
/// scripts in order; an unscripted call fails like a missing program, which
/// surfaces as a per-profile exception rather than a panic.
#[derive(Debug, Default)]
pub struct FakeRunner {
    scripts: Vec<ScriptedCall>,
    invocations: Mutex<Vec<String>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, call: ScriptedCall) -> Self {
        self.scripts.push(call);
        self
    }

    /// Every argv this runner has seen, in order.
    pub fn invocations(&self) -> Vec<String> {
        self.invocations.lock().unwrap().clone()
    }

    /// How many recorded invocations contain `needle`.
    pub fn count(&self, needle: &str) -> usize {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .filter(|argv| argv.contains(needle))
            .count()
    }

    fn dispatch(&self, cmd: &ToolCommand) -> Result<&ScriptedCall, ProcessError> {
        let argv = cmd.display();
        self.invocations.lock().unwrap().push(argv.clone());

        let script = self
            .scripts
            .iter()
            .find(|s| argv.contains(&s.matcher))
            .ok_or_else(|| ProcessError::Spawn {
                program: cmd.program.clone(),
                source: std::io::Error::other(format!("no script for: {argv}")),
            })?;

        if script.fail_spawn {
            return Err(ProcessError::Spawn {
                program: cmd.program.clone(),
                source: std::io::Error::other("scripted spawn failure"),
            });
        }
        if let Some(path) = &script.touch {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent.as_std_path()).unwrap();
            }
            fs::write(path.as_std_path(), b"%PDF-fake").unwrap();
        }
        Ok(script)
    }
}

#[async_trait]
impl ProcessRunner for FakeRunner {
    async fn run(&self, cmd: &ToolCommand) -> Result<ToolOutput, ProcessError> {
        let script = self.dispatch(cmd)?;
        Ok(ToolOutput {
            exit_code: script.exit_code,
            stdout: script.stdout.clone(),
            stderr: script.stderr.clone(),
        })
    }

    async fn stream(
        &self,
        cmd: &ToolCommand,
        source: StreamSource,
    ) -> Result<StreamingChild, ProcessError> {
        let script = self.dispatch(cmd)?;
        let captured = match source {
            StreamSource::Stdout => script.stderr.clone(),
            StreamSource::Stderr => script.stdout.clone(),
        };
        Ok(StreamingChild::scripted(
            script.lines.clone(),
            StreamExit {
                exit_code: script.exit_code,
                captured,
            },
        ))
    }
}

/// Isolated settings plus profile store rooted in a temp directory.
pub struct TestEnv {
    pub dir: TempDir,
    pub settings: Settings,
    pub store: ProfileStore,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();

        let mut settings = Settings::default();
        settings.output_dir = root.join("output");
        settings.cache_dir = root.join("cache");
        settings.data_dir = root.join("data");
        settings.ocr_jobs = 2;
        settings.ensure_directories().unwrap();

        let store = ProfileStore::new(settings.profiles_file());
        Self {
            dir,
            settings,
            store,
        }
    }

    /// Expected artifact paths for a profile name and AIRAC cycle.
    pub fn artifact_paths(&self, name: &str, cycle: &str) -> (Utf8PathBuf, Utf8PathBuf) {
        let dir = self.settings.output_dir.join(name);
        (
            dir.join(format!("{name}_{cycle}.pdf")),
            dir.join(format!("{name}_{cycle}_ocr.pdf")),
        )
    }

    /// Pre-create both artifacts so the pipeline skips the profile.
    pub fn create_artifacts(&self, name: &str, cycle: &str) {
        let (pdf, ocr) = self.artifact_paths(name, cycle);
        fs::create_dir_all(pdf.parent().unwrap().as_std_path()).unwrap();
        fs::write(pdf.as_std_path(), b"%PDF-fake").unwrap();
        fs::write(ocr.as_std_path(), b"%PDF-fake").unwrap();
    }
}
