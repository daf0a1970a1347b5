//! Conversion through an external command-line converter.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use plant_core::{Error, Result};
use tracing::{debug, info, warn};

use crate::converter::{ConversionOptions, ModelConverter};

pub const DEFAULT_PROGRAM: &str = "tensorflowjs_converter";
pub const DEFAULT_INSTALL_COMMAND: &str = "python3 -m pip install tensorflowjs";
pub const DEFAULT_INPUT_FORMAT: &str = "keras";

/// Runs `<program> --input_format=<in> --output_format=tfjs_layers_model
/// [--quantize_uint8] <artifact> <output>`.
///
/// The input format defaults to `keras`. The program must be able to read
/// the artifact it is handed; a stock `tensorflowjs_converter` cannot read
/// burn records, so pair it with a wrapper that accepts them or set the
/// format the artifact actually has.
#[derive(Debug, Clone)]
pub struct ExternalConverter {
    program: String,
    input_format: String,
    install_command: Option<String>,
}

impl Default for ExternalConverter {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM)
    }
}

impl ExternalConverter {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            input_format: DEFAULT_INPUT_FORMAT.to_string(),
            install_command: Some(DEFAULT_INSTALL_COMMAND.to_string()),
        }
    }

    pub fn with_input_format(mut self, format: impl Into<String>) -> Self {
        self.input_format = format.into();
        self
    }

    /// Shell command tried once when the program is missing; `None` disables it
    pub fn with_install_command(mut self, command: Option<String>) -> Self {
        self.install_command = command;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn input_format(&self) -> &str {
        &self.input_format
    }

    /// `Some(version)` when `<program> --version` starts and exits successfully
    pub fn probe(&self) -> Result<Option<String>> {
        match Command::new(&self.program).arg("--version").output() {
            Ok(output) if output.status.success() => {
                let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
                Ok(Some(version))
            }
            Ok(output) => {
                debug!(
                    "{} --version exited with {}: {}",
                    self.program,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                Ok(None)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Toolchain(format!("Failed to start {}: {e}", self.program))),
        }
    }

    /// Probes, installs once if missing, probes again.
    pub fn ensure_available(&self) -> Result<String> {
        if let Some(version) = self.probe()? {
            info!("{} found: {}", self.program, version);
            return Ok(version);
        }

        warn!("{} not found", self.program);
        if let Some(command) = &self.install_command {
            info!("Installing converter: {command}");
            match run_shell(command) {
                Ok(output) if output.status.success() => debug!("Install command finished"),
                Ok(output) => warn!(
                    "Install command exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
                Err(e) => warn!("Install command could not be started: {e}"),
            }
        }

        self.probe()?.ok_or_else(|| {
            Error::Toolchain(format!(
                "{} is not available. Install it manually and retry.",
                self.program
            ))
        })
    }

    fn arguments(&self, artifact: &Path, output_dir: &Path, options: &ConversionOptions) -> Vec<String> {
        let mut args = vec![
            format!("--input_format={}", self.input_format),
            "--output_format=tfjs_layers_model".to_string(),
        ];
        if options.quantize {
            args.push("--quantize_uint8".to_string());
        }
        args.push(artifact.display().to_string());
        args.push(output_dir.display().to_string());
        args
    }
}

impl ModelConverter for ExternalConverter {
    fn name(&self) -> &str {
        &self.program
    }

    fn convert(&self, artifact: &Path, output_dir: &Path, options: &ConversionOptions) -> Result<PathBuf> {
        self.ensure_available()?;

        let args = self.arguments(artifact, output_dir, options);
        info!("Running converter: {} {}", self.program, args.join(" "));

        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|e| Error::Toolchain(format!("Failed to start {}: {e}", self.program)))?;

        if !output.status.success() {
            return Err(Error::Toolchain(String::from_utf8_lossy(&output.stderr).into_owned()));
        }

        Ok(output_dir.join("model.json"))
    }
}

#[cfg(unix)]
fn run_shell(command: &str) -> std::io::Result<Output> {
    Command::new("sh").arg("-c").arg(command).output()
}

#[cfg(windows)]
fn run_shell(command: &str) -> std::io::Result<Output> {
    Command::new("cmd").arg("/C").arg(command).output()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn write_script(path: &Path, body: &str) {
        fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn test_missing_program_installs_once() {
        let dir = TempDir::new().unwrap();
        let attempts = dir.path().join("attempts.log");
        let converter = ExternalConverter::new(dir.path().join("missing-converter").display().to_string())
            .with_install_command(Some(format!("echo attempt >> {}", attempts.display())));

        let result = converter.convert(dir.path(), dir.path(), &ConversionOptions::default());
        assert!(matches!(result, Err(Error::Toolchain(_))));
        assert_eq!(fs::read_to_string(&attempts).unwrap().lines().count(), 1);
    }

    #[test]
    fn test_failing_version_check_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let program = dir.path().join("converter");
        write_script(&program, "echo 'broken install' >&2\nexit 1");
        let converter = ExternalConverter::new(program.display().to_string()).with_install_command(None);

        assert_eq!(converter.probe().unwrap(), None);
        let result = converter.convert(dir.path(), dir.path(), &ConversionOptions::default());
        match result {
            Err(Error::Toolchain(message)) => assert!(message.contains("not available"), "{message}"),
            other => panic!("expected toolchain error, got {other:?}"),
        }
    }

    #[test]
    fn test_install_makes_program_available() {
        let dir = TempDir::new().unwrap();
        let program = dir.path().join("converter");
        let install = format!(
            "printf '#!/bin/sh\\necho 4.0.0\\n' > {p} && chmod +x {p}",
            p = program.display()
        );
        let converter = ExternalConverter::new(program.display().to_string()).with_install_command(Some(install));

        assert_eq!(converter.probe().unwrap(), None);
        assert_eq!(converter.ensure_available().unwrap(), "4.0.0");
    }

    #[test]
    fn test_failure_surfaces_stderr_verbatim() {
        let dir = TempDir::new().unwrap();
        let program = dir.path().join("converter");
        write_script(
            &program,
            "[ \"$1\" = \"--version\" ] && { echo 1.0; exit 0; }\nprintf 'ValueError: bad input\\n  at line 3\\n' >&2\nexit 2",
        );
        let converter = ExternalConverter::new(program.display().to_string()).with_install_command(None);

        match converter.convert(dir.path(), dir.path(), &ConversionOptions::default()) {
            Err(Error::Toolchain(stderr)) => assert_eq!(stderr, "ValueError: bad input\n  at line 3\n"),
            other => panic!("expected toolchain error, got {other:?}"),
        }
    }

    #[test]
    fn test_arguments_passed_to_converter() {
        let dir = TempDir::new().unwrap();
        let program = dir.path().join("converter");
        let args_file = dir.path().join("args.txt");
        write_script(&program, &format!("echo \"$@\" >> {}", args_file.display()));
        let converter = ExternalConverter::new(program.display().to_string()).with_input_format("burn_mpk");

        let artifact = dir.path().join("model.mpk");
        let out = dir.path().join("out");
        let bundle = converter
            .convert(&artifact, &out, &ConversionOptions { quantize: true })
            .unwrap();
        assert_eq!(bundle, out.join("model.json"));

        let calls = fs::read_to_string(&args_file).unwrap();
        let last = calls.lines().last().unwrap();
        assert_eq!(
            last,
            format!(
                "--input_format=burn_mpk --output_format=tfjs_layers_model --quantize_uint8 {} {}",
                artifact.display(),
                out.display()
            )
        );
    }
}
