//! Post-processing of written PNG tiles with external compressors.

use std::{
    env,
    ffi::OsStr,
    fs,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use anyhow::{Context, Result, bail};
use log::{trace, warn};

const PNGCRUSH: &str = "pngcrush";
const ADVDEF: &str = "advdef";

/// Every program is required from the given optimisation level upwards.
const PROGRAMS: [(&str, u8); 2] = [(PNGCRUSH, 1), (ADVDEF, 2)];

/// Runs the external optimizers matching an optimisation level on freshly written images.
#[derive(Clone, Copy, Debug)]
pub struct ImageOptimizer {
    level: u8,
}

impl ImageOptimizer {
    /// Creates an optimizer after verifying that all required programs are installed.
    /// Returns `None` for level 0.
    ///
    /// # Errors
    ///
    /// Fails if a required program can't be found in `PATH`.
    pub fn new(level: u8) -> Result<Option<Self>> {
        let search_path = env::var_os("PATH").unwrap_or_default();
        check_programs(level, &search_path)?;
        Ok((level > 0).then_some(Self { level }))
    }

    #[must_use]
    pub fn level(&self) -> u8 {
        self.level
    }

    /// Optimizes a PNG file in place. Failures are logged and otherwise ignored.
    pub fn optimize(&self, path: &Path) {
        if let Err(error) = self.try_optimize(path) {
            warn!("could not optimize {}: {error:#}", path.display());
        }
    }

    fn try_optimize(&self, path: &Path) -> Result<()> {
        if self.level >= 1 {
            let mut crushed = path.as_os_str().to_owned();
            crushed.push(".crushed");
            let crushed = PathBuf::from(crushed);
            run(Command::new(PNGCRUSH).arg("-q").arg(path).arg(&crushed))?;
            fs::rename(&crushed, path)
                .with_context(|| format!("replacing {}", path.display()))?;
        }
        if self.level >= 2 {
            let recompression = if self.level == 2 { "-z2" } else { "-z4" };
            run(Command::new(ADVDEF).arg(recompression).arg(path))?;
        }
        trace!("optimized {}", path.display());
        Ok(())
    }
}

fn run(command: &mut Command) -> Result<()> {
    let program = command.get_program().to_string_lossy().into_owned();
    let status = command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .with_context(|| format!("running {program}"))?;
    if !status.success() {
        bail!("{program} failed with {status}");
    }
    Ok(())
}

fn exists_in_path(program: &str, search_path: &OsStr) -> bool {
    env::split_paths(search_path).any(|dir| {
        dir.join(program).is_file() || dir.join(format!("{program}.exe")).is_file()
    })
}

/// Verifies that all programs needed for the given optimisation level are installed.
fn check_programs(level: u8, search_path: &OsStr) -> Result<()> {
    for (program, required_from) in PROGRAMS {
        if level >= required_from && !exists_in_path(program, search_path) {
            bail!("optimization program {program} required for level {level} was not found");
        }
    }
    Ok(())
}
