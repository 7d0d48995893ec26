use std::io::Write;

const OSC_START: &str = "\x1b]777;";
const OSC_END: &str = "\x1b\\";

/// Tell OSC-777 aware terminals (e.g. ptyxis) that a container shell starts.
pub fn emit_container_push(instance: &str) {
    if is_interactive_terminal() {
        let marker = format!("{OSC_START}container;push;{instance};igloo;{instance}{OSC_END}");
        let _ = std::io::stderr().write_all(marker.as_bytes());
        let _ = std::io::stderr().flush();
    }
}

pub fn emit_container_pop() {
    if is_interactive_terminal() {
        let marker = format!("{OSC_START}container;pop;;{OSC_END}");
        let _ = std::io::stderr().write_all(marker.as_bytes());
        let _ = std::io::stderr().flush();
    }
}

pub fn print_enter_banner(instance: &str, image: &str, workdir: &str) {
    if is_interactive_terminal() {
        eprintln!(
            "\x1b[1;36m[igloo]\x1b[0m entering \x1b[1m{instance}\x1b[0m ({image}) at {workdir}"
        );
    }
}

pub fn print_exit_banner(instance: &str) {
    if is_interactive_terminal() {
        eprintln!("\x1b[1;36m[igloo]\x1b[0m left {instance}");
    }
}

#[allow(unsafe_code)]
fn is_interactive_terminal() -> bool {
    // SAFETY: isatty() only inspects the descriptor, no side effects.
    unsafe { libc::isatty(libc::STDERR_FILENO) != 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markers_and_banners_dont_panic() {
        emit_container_push("igloo-demo");
        print_enter_banner("igloo-demo", "images:debian/trixie/cloud", "/home/a/workspace/demo");
        print_exit_banner("igloo-demo");
        emit_container_pop();
    }
}
