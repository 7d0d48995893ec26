use super::{json_pretty, load_project, lock_env, EXIT_SUCCESS};
use igloo_core::Engine;

pub fn run(engine: &Engine<'_>, force: bool, json: bool) -> Result<u8, String> {
    let (_project, env) = load_project()?;
    let _lock = lock_env(engine, &env)?;
    let existed = engine
        .remove(env.name.as_str(), force)
        .map_err(|e| e.to_string())?;
    if json {
        let payload = serde_json::json!({
            "name": env.name,
            "status": if existed { "removed" } else { "not-found" },
        });
        println!("{}", json_pretty(&payload)?);
    } else if existed {
        println!("removed {} (.igloo preserved)", env.name);
    }
    Ok(EXIT_SUCCESS)
}
