//! Scripted stand-ins for the external compression engine.
//!
//! Each fake is a POSIX shell script run through `/bin/sh`, so the script file
//! never needs the executable bit. The argument template mirrors the production
//! one: `{preset} {input} {output}`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use pdfsqueeze_config::EngineConfig;

const SHELL: &str = "/bin/sh";
const SCRIPT_NAME: &str = "fake-engine.sh";
const INVOCATION_LOG: &str = "invocations.log";
const PID_FILE: &str = "engine.pid";

/// What the fake engine does when invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeEngineBehavior {
    /// Copy a preset-dependent prefix of the input: a quarter for `screen`,
    /// half for `ebook`, everything otherwise.
    Shrink,
    /// Exit with status 1 without writing output.
    Fail,
    /// Exit zero but leave an empty output file.
    EmptyOutput,
    /// Record its pid and sleep far longer than any test timeout.
    Hang,
}

/// A fake engine installed into a scratch directory.
#[derive(Debug, Clone)]
pub struct FakeEngine {
    dir: PathBuf,
    behavior: FakeEngineBehavior,
}

impl FakeEngine {
    /// Write the fake engine script into `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or script cannot be written.
    pub fn install(dir: impl AsRef<Path>, behavior: FakeEngineBehavior) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create fake engine dir {}", dir.display()))?;
        let engine = Self { dir, behavior };
        fs::write(engine.script_path(), engine.script())
            .with_context(|| "failed to write fake engine script")?;
        Ok(engine)
    }

    /// Engine configuration pointing at this fake with the given timeout.
    #[must_use]
    pub fn config(&self, timeout: Duration, max_concurrent: usize) -> EngineConfig {
        let mut config = EngineConfig::new(
            SHELL,
            [
                self.script_path().display().to_string(),
                "{preset}".to_string(),
                "{input}".to_string(),
                "{output}".to_string(),
            ],
        );
        config.timeout = timeout;
        config.max_concurrent = max_concurrent;
        config
    }

    /// Behaviour this fake was installed with.
    #[must_use]
    pub const fn behavior(&self) -> FakeEngineBehavior {
        self.behavior
    }

    /// Preset arguments of every invocation so far, in order.
    #[must_use]
    pub fn invocations(&self) -> Vec<String> {
        fs::read_to_string(self.dir.join(INVOCATION_LOG))
            .map(|log| log.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Pid recorded by the most recent [`FakeEngineBehavior::Hang`] invocation.
    #[must_use]
    pub fn recorded_pid(&self) -> Option<i32> {
        fs::read_to_string(self.dir.join(PID_FILE))
            .ok()
            .and_then(|raw| raw.trim().parse().ok())
    }

    fn script_path(&self) -> PathBuf {
        self.dir.join(SCRIPT_NAME)
    }

    fn script(&self) -> String {
        let log = self.dir.join(INVOCATION_LOG);
        let header = format!(
            "set -eu\npreset=\"$1\"\ninput=\"$2\"\noutput=\"$3\"\necho \"$preset\" >> '{}'\n",
            log.display()
        );
        let body = match self.behavior {
            FakeEngineBehavior::Shrink => concat!(
                "size=$(wc -c < \"$input\")\n",
                "case \"$preset\" in\n",
                "  *screen*) keep=$((size / 4)) ;;\n",
                "  *ebook*) keep=$((size / 2)) ;;\n",
                "  *) keep=$size ;;\n",
                "esac\n",
                "if [ \"$keep\" -lt 1 ]; then keep=1; fi\n",
                "head -c \"$keep\" \"$input\" > \"$output\"\n",
            )
            .to_string(),
            FakeEngineBehavior::Fail => {
                "echo 'simulated engine failure' >&2\nexit 1\n".to_string()
            }
            FakeEngineBehavior::EmptyOutput => ": > \"$output\"\n".to_string(),
            FakeEngineBehavior::Hang => format!(
                "echo $$ > '{}'\nexec sleep 30\n",
                self.dir.join(PID_FILE).display()
            ),
        };
        format!("{header}{body}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "pdfsqueeze-test-support-{name}-{}",
            std::process::id()
        ))
    }

    #[test]
    fn shrink_engine_keeps_a_quarter_for_screen() -> Result<()> {
        let dir = scratch("shrink");
        let engine = FakeEngine::install(&dir, FakeEngineBehavior::Shrink)?;
        let input = dir.join("in.pdf");
        let output = dir.join("out.pdf");
        fs::write(&input, vec![b'x'; 4_000])?;

        let status = Command::new(SHELL)
            .arg(engine.script_path())
            .arg("-dPDFSETTINGS=/screen")
            .arg(&input)
            .arg(&output)
            .status()?;
        assert!(status.success());
        assert_eq!(fs::metadata(&output)?.len(), 1_000);
        assert_eq!(engine.invocations(), vec!["-dPDFSETTINGS=/screen"]);

        fs::remove_dir_all(&dir)?;
        Ok(())
    }

    #[test]
    fn failing_engine_exits_nonzero() -> Result<()> {
        let dir = scratch("fail");
        let engine = FakeEngine::install(&dir, FakeEngineBehavior::Fail)?;
        let status = Command::new(SHELL)
            .arg(engine.script_path())
            .args(["-dPDFSETTINGS=/ebook", "in", "out"])
            .status()?;
        assert!(!status.success());
        assert_eq!(engine.behavior(), FakeEngineBehavior::Fail);
        fs::remove_dir_all(&dir)?;
        Ok(())
    }

    #[test]
    fn config_uses_shell_template() -> Result<()> {
        let dir = scratch("config");
        let engine = FakeEngine::install(&dir, FakeEngineBehavior::Shrink)?;
        let config = engine.config(Duration::from_secs(3), 4);
        assert_eq!(config.program, PathBuf::from(SHELL));
        assert_eq!(config.args.len(), 4);
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert_eq!(config.max_concurrent, 4);
        assert!(engine.recorded_pid().is_none());
        fs::remove_dir_all(&dir)?;
        Ok(())
    }
}
