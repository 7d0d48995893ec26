use super::{colorize_state, json_pretty, load_project, EXIT_SUCCESS};
use console::Style;
use igloo_core::{Engine, EnvStatus, InstanceState};

fn on_off(flag: bool) -> &'static str {
    if flag {
        "enabled"
    } else {
        "disabled"
    }
}

fn print_human(status: &EnvStatus) {
    let label = Style::new().bold();
    let header = Style::new().cyan().bold();
    println!("{}", header.apply_to("igloo environment"));
    println!("  {} {}", label.apply_to("name:   "), status.name);
    println!("  {} {}", label.apply_to("image:  "), status.image);
    println!(
        "  {} {}",
        label.apply_to("state:  "),
        colorize_state(&status.state.to_string())
    );
    match status.drift {
        Some(true) => println!(
            "  {} {}",
            label.apply_to("config: "),
            Style::new().yellow().apply_to("changed since last provision")
        ),
        Some(false) => println!("  {} up to date", label.apply_to("config: ")),
        None if status.state != InstanceState::NotCreated => {
            println!("  {} not yet recorded", label.apply_to("config: "));
        }
        None => {}
    }

    println!();
    println!("{}", header.apply_to("mounts"));
    println!("  {} {}", label.apply_to("home -> ~/host:     "), on_off(status.mounts.home));
    println!(
        "  {} {}",
        label.apply_to("project -> ~/workspace:"),
        on_off(status.mounts.project)
    );

    println!();
    println!("{}", header.apply_to("display"));
    println!("  {} {}", label.apply_to("passthrough:"), on_off(status.display.enabled));
    println!("  {} {}", label.apply_to("gpu:        "), on_off(status.display.gpu));
    println!("  {} {}", label.apply_to("host:       "), status.display_server);

    if !status.packages.is_empty() {
        println!();
        println!("{}", header.apply_to("packages"));
        println!("  {}", status.packages.join(", "));
    }
    if !status.scripts.is_empty() {
        println!();
        println!("{}", header.apply_to("init scripts"));
        for script in &status.scripts {
            println!("  {script}");
        }
    }
}

pub fn run(engine: &Engine<'_>, json: bool) -> Result<u8, String> {
    let (project, env) = load_project()?;
    let status = engine.status(&env, &project).map_err(|e| e.to_string())?;
    if json {
        println!("{}", json_pretty(&status)?);
    } else {
        print_human(&status);
    }
    Ok(EXIT_SUCCESS)
}
