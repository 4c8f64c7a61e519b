// src/job/verify.rs

//! Post-hoc verification hooks.
//!
//! A job names its hook by identifier (`verify = "output_exists"`). The
//! caller owns a [`HookRegistry`] mapping identifiers to predicates; the
//! result aggregator resolves and runs them once the batch is over.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use globset::{Glob, GlobMatcher};

use crate::fs::FileSystem;
use crate::job::Job;

/// Prefix of the parameterised built-in `output_glob:<pattern>` hook.
pub const OUTPUT_GLOB_PREFIX: &str = "output_glob:";

/// A predicate over a finished job's artifacts. `Err` carries the reason.
pub trait VerificationHook: Send + Sync {
    fn verify(&self, job: &Job, fs: &dyn FileSystem) -> Result<(), String>;
}

impl<F> VerificationHook for F
where
    F: Fn(&Job, &dyn FileSystem) -> Result<(), String> + Send + Sync,
{
    fn verify(&self, job: &Job, fs: &dyn FileSystem) -> Result<(), String> {
        self(job, fs)
    }
}

/// Identifier → hook table.
#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: BTreeMap<String, Arc<dyn VerificationHook>>,
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("hooks", &self.hooks.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl HookRegistry {
    /// Registry preloaded with `output_exists` and `output_non_empty`.
    /// `output_glob:<pattern>` is always available.
    pub fn with_builtins() -> Self {
        let mut reg = Self::default();
        reg.register("output_exists", output_exists);
        reg.register("output_non_empty", output_non_empty);
        reg
    }

    /// Register (or replace) a hook under `id`.
    pub fn register(&mut self, id: impl Into<String>, hook: impl VerificationHook + 'static) {
        self.hooks.insert(id.into(), Arc::new(hook));
    }

    pub fn contains(&self, id: &str) -> bool {
        self.resolve(id).is_some()
    }

    pub fn resolve(&self, id: &str) -> Option<Arc<dyn VerificationHook>> {
        if let Some(hook) = self.hooks.get(id) {
            return Some(Arc::clone(hook));
        }
        let pattern = id.strip_prefix(OUTPUT_GLOB_PREFIX)?;
        let matcher = Glob::new(pattern).ok()?.compile_matcher();
        Some(Arc::new(OutputGlob { matcher }))
    }
}

fn expected_output(job: &Job) -> Result<&Path, String> {
    job.output
        .as_deref()
        .ok_or_else(|| format!("job '{}' declares no output artifact", job.id))
}

fn output_exists(job: &Job, fs: &dyn FileSystem) -> Result<(), String> {
    let out = expected_output(job)?;
    if fs.is_file(out) {
        Ok(())
    } else {
        Err(format!("output {:?} does not exist", out))
    }
}

fn output_non_empty(job: &Job, fs: &dyn FileSystem) -> Result<(), String> {
    let out = expected_output(job)?;
    match fs.file_len(out) {
        Some(len) if len > 0 => Ok(()),
        Some(_) => Err(format!("output {:?} is empty", out)),
        None => Err(format!("output {:?} does not exist", out)),
    }
}

/// Passes when at least one file directly in the job's working directory
/// matches the pattern (matched against the file name).
struct OutputGlob {
    matcher: GlobMatcher,
}

impl VerificationHook for OutputGlob {
    fn verify(&self, job: &Job, fs: &dyn FileSystem) -> Result<(), String> {
        let dir = &job.command.working_dir;
        let entries = fs.read_dir(dir).map_err(|e| e.to_string())?;
        let found = entries.iter().any(|p| {
            fs.is_file(p)
                && p.file_name()
                    .map(|name| self.matcher.is_match(Path::new(name)))
                    .unwrap_or(false)
        });
        if found {
            Ok(())
        } else {
            Err(format!(
                "no file in {:?} matches '{}'",
                dir,
                self.matcher.glob()
            ))
        }
    }
}
