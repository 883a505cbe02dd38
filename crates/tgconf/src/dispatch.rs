//! descriptor dispatch
//!
//! The resolved configuration only describes work: [CommandDescriptor]s for hooks and extra commands,
//! [FileImport]s for import-files rules. The functions here hand them, in order, to the injected
//! [ProcessRunner]/[FileStager].
use crate::collaborators::{Cancellation, CollaboratorError, FileStager, ProcessRunner};
use indexmap::IndexMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct CommandDescriptor {
    /// Name of the item the command comes from
    pub name: String,
    pub command: String,
    pub arguments: Vec<String>,
    /// Environment overlay
    pub env: IndexMap<String, String>,
    pub working_dir: PathBuf,
    pub ignore_error: bool,
    /// Run through a shell
    pub shell: bool,
    pub expand_args: bool,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct FileImport {
    pub source: PathBuf,
    pub target: PathBuf,
    pub required: bool,
    pub mode: Option<u32>,
}

#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
    #[error("{name}: command failed")]
    Command {
        name: String,
        #[source]
        source: CollaboratorError,
    },
    #[error("unable to stage {}", source_path.display())]
    Stage {
        source_path: PathBuf,
        #[source]
        source: CollaboratorError,
    },
    #[error("dispatch cancelled")]
    Cancelled,
}

/// Run `commands` in order
///
/// A failing command with `ignore_error` is logged and the next command runs.
pub fn run_commands(
    runner: &dyn ProcessRunner,
    commands: &[CommandDescriptor],
    cancellation: &Cancellation,
) -> Result<(), DispatchError> {
    for command in commands {
        if cancellation.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }
        tracing::debug!(name = command.name, command = command.command, "running command");
        match runner.run(command, cancellation) {
            Ok(()) => {}
            Err(CollaboratorError::Cancelled) => return Err(DispatchError::Cancelled),
            Err(err) if command.ignore_error => {
                tracing::warn!(name = command.name, %err, "command failed, error ignored");
            }
            Err(source) => {
                return Err(DispatchError::Command {
                    name: command.name.clone(),
                    source,
                })
            }
        }
    }
    Ok(())
}

/// Stage `imports` in order
///
/// Failures of imports that are not required are logged.
pub fn stage_files(
    stager: &dyn FileStager,
    imports: &[FileImport],
    cancellation: &Cancellation,
) -> Result<(), DispatchError> {
    for import in imports {
        if cancellation.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }
        tracing::debug!(source=%import.source.display(), target=%import.target.display(), "staging file");
        match stager.stage(import, cancellation) {
            Ok(()) => {}
            Err(CollaboratorError::Cancelled) => return Err(DispatchError::Cancelled),
            Err(err) if !import.required => {
                tracing::warn!(source=%import.source.display(), %err, "optional file not staged");
            }
            Err(source) => {
                return Err(DispatchError::Stage {
                    source_path: import.source.clone(),
                    source,
                })
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingRunner {
        ran: RefCell<Vec<String>>,
        failing: Vec<&'static str>,
        cancel_after: Option<(usize, Cancellation)>,
    }

    impl ProcessRunner for RecordingRunner {
        fn run(&self, command: &CommandDescriptor, _: &Cancellation) -> Result<(), CollaboratorError> {
            self.ran.borrow_mut().push(command.name.clone());
            if let Some((count, cancellation)) = &self.cancel_after {
                if self.ran.borrow().len() >= *count {
                    cancellation.cancel();
                }
            }
            if self.failing.contains(&command.name.as_str()) {
                return Err(CollaboratorError::Failed(format!("{} exited with 1", command.name)));
            }
            Ok(())
        }
    }

    fn command(name: &str, ignore_error: bool) -> CommandDescriptor {
        CommandDescriptor {
            name: name.to_string(),
            command: "true".to_string(),
            ignore_error,
            ..Default::default()
        }
    }

    #[test]
    fn ignore_error() {
        let runner = RecordingRunner {
            failing: vec!["a", "b"],
            ..Default::default()
        };
        let commands = vec![command("a", true), command("b", false), command("c", false)];

        let err = run_commands(&runner, &commands, &Cancellation::new()).expect_err("must error");
        assert!(matches!(err, DispatchError::Command { ref name, .. } if name == "b"));
        assert_eq!(*runner.ran.borrow(), vec!["a", "b"]);
    }

    #[test]
    fn cancellation_between_commands() {
        let cancellation = Cancellation::new();
        let runner = RecordingRunner {
            cancel_after: Some((1, cancellation.clone())),
            ..Default::default()
        };
        let commands = vec![command("a", false), command("b", false)];

        let err = run_commands(&runner, &commands, &cancellation).expect_err("must error");
        assert!(matches!(err, DispatchError::Cancelled));
        assert_eq!(*runner.ran.borrow(), vec!["a"]);
    }

    struct FailingStager;

    impl FileStager for FailingStager {
        fn stage(&self, _: &FileImport, _: &Cancellation) -> Result<(), CollaboratorError> {
            Err(CollaboratorError::Failed("no space left".to_string()))
        }
    }

    #[test]
    fn optional_files() {
        let import = |required| FileImport {
            source: PathBuf::from("/src/a.tf"),
            target: PathBuf::from("/work/a.tf"),
            required,
            mode: None,
        };

        stage_files(&FailingStager, &[import(false)], &Cancellation::new()).expect("optional failure ignored");
        let err = stage_files(&FailingStager, &[import(false), import(true)], &Cancellation::new())
            .expect_err("must error");
        assert!(matches!(err, DispatchError::Stage { .. }));
    }
}
