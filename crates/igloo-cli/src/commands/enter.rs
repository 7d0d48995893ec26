use super::{
    describe_report, load_project, lock_env, provision_error, spin_fail, spin_ok, spinner,
    EXIT_FAILURE,
};
use dialoguer::Confirm;
use igloo_core::{DriftNotice, DriftPolicy, Engine};
use std::io::{stderr, stdin, IsTerminal};
use tracing::warn;

/// How `enter` resolves configuration drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftChoice {
    Ask,
    Rebuild,
    Keep,
}

impl DriftChoice {
    pub fn from_flags(rebuild: bool, no_rebuild: bool) -> Self {
        match (rebuild, no_rebuild) {
            (true, _) => Self::Rebuild,
            (false, true) => Self::Keep,
            (false, false) => Self::Ask,
        }
    }
}

fn confirm_rebuild(notice: &DriftNotice) -> bool {
    Confirm::new()
        .with_prompt(format!(
            "configuration in .igloo/ changed since {} was provisioned. Rebuild it?",
            notice.name
        ))
        .default(false)
        .interact()
        .unwrap_or(false)
}

pub fn run(engine: &Engine<'_>, choice: DriftChoice) -> Result<u8, String> {
    let (project, env) = load_project()?;
    let lock = lock_env(engine, &env)?;

    let pb = spinner(&format!("preparing {}...", env.name));
    let prompt_pb = pb.clone();
    let is_tty = stdin().is_terminal() && stderr().is_terminal();
    let mut policy = match choice {
        DriftChoice::Rebuild => DriftPolicy::AlwaysRebuild,
        DriftChoice::Keep => DriftPolicy::NeverRebuild,
        DriftChoice::Ask if is_tty => DriftPolicy::Prompt(Box::new(move |notice: &DriftNotice| {
            prompt_pb.suspend(|| confirm_rebuild(notice))
        })),
        DriftChoice::Ask => DriftPolicy::Prompt(Box::new(|notice: &DriftNotice| {
            warn!(
                "configuration of {} changed; keeping it (pass --rebuild to recreate)",
                notice.name
            );
            false
        })),
    };

    let report = match engine.reconcile(&env, &project, &mut policy) {
        Ok(report) => {
            spin_ok(&pb, &describe_report(&report));
            report
        }
        Err(e) => {
            spin_fail(&pb, &format!("could not prepare {}", env.name));
            return Err(provision_error(&e));
        }
    };
    drop(policy);
    // Other shells may enter the same environment while this one is open.
    drop(lock);

    let code = engine.open_shell(&env, &project).map_err(|e| e.to_string())?;
    tracing::debug!("shell in {} exited with {code}", report.name);
    Ok(u8::try_from(code).unwrap_or(EXIT_FAILURE))
}
