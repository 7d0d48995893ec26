use super::{json_pretty, load_project, lock_env, EXIT_SUCCESS};
use igloo_core::Engine;

pub fn run(engine: &Engine<'_>, force: bool, keep_config: bool, json: bool) -> Result<u8, String> {
    let (project, env) = load_project()?;
    let _lock = lock_env(engine, &env)?;
    let outcome = engine
        .destroy(env.name.as_str(), &project, force, keep_config)
        .map_err(|e| e.to_string())?;
    if json {
        let payload = serde_json::json!({
            "name": env.name,
            "instance_removed": outcome.existed,
            "config_removed": outcome.config_removed,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        if outcome.existed {
            println!("destroyed {}", env.name);
        }
        if outcome.config_removed {
            println!("removed {}", project.config_dir().display());
        }
    }
    Ok(EXIT_SUCCESS)
}
