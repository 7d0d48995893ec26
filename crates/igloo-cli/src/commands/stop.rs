use super::{json_pretty, load_project, lock_env, EXIT_SUCCESS};
use igloo_core::Engine;

pub fn run(engine: &Engine<'_>, json: bool) -> Result<u8, String> {
    let (_project, env) = load_project()?;
    let _lock = lock_env(engine, &env)?;
    let stopped = engine.stop(env.name.as_str()).map_err(|e| e.to_string())?;
    if json {
        let payload = serde_json::json!({
            "name": env.name,
            "status": if stopped { "stopped" } else { "already-stopped" },
        });
        println!("{}", json_pretty(&payload)?);
    } else if stopped {
        println!("stopped {}", env.name);
    } else {
        println!("{} is already stopped", env.name);
    }
    Ok(EXIT_SUCCESS)
}
