use crate::concurrency::CancelToken;
use crate::CoreError;
use igloo_runtime::Backend;
use std::fs;
use std::io;
use std::path::Path;
use tracing::info;

/// Files carrying this suffix are templates and never run.
pub const EXAMPLE_SUFFIX: &str = ".example";

/// Runnable script names in `dir`, sorted lexicographically.
///
/// Non-recursive. Directories, hidden files and `*.example` templates are
/// skipped. A missing directory yields an empty list.
pub fn discover(dir: &Path) -> Result<Vec<String>, CoreError> {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        if name.starts_with('.') || name.ends_with(EXAMPLE_SUFFIX) {
            continue;
        }
        names.push(name);
    }
    names.sort();
    Ok(names)
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Run `names` in order as root, from `guest_dir` inside the instance.
///
/// Fail-fast: the first failing script aborts the rest and is named in the
/// error. Nothing is recorded about partial success.
pub fn run(
    backend: &dyn Backend,
    instance: &str,
    guest_dir: &str,
    names: &[String],
    cancel: &CancelToken,
) -> Result<(), CoreError> {
    for name in names {
        cancel.check()?;
        let path = format!("{}/{name}", guest_dir.trim_end_matches('/'));
        info!("running init script {name}");
        let script_err = |source: igloo_runtime::RuntimeError| CoreError::Script {
            name: name.clone(),
            source,
        };
        backend
            .exec_as_admin(instance, &["chmod", "+x", path.as_str()])
            .map_err(script_err)?;
        backend
            .exec_as_admin(instance, &["/bin/sh", "-c", shell_quote(&path).as_str()])
            .map_err(script_err)?;
    }
    Ok(())
}
