use super::{json_pretty, lock_env, provision_error, spin_fail, spin_ok, spinner, EXIT_SUCCESS};
use igloo_core::Engine;
use igloo_schema::{
    default_release, detect_host_os, image_reference, validate_distro, write_manifest_file,
    ContainerSection, DisplaySection, EnvironmentManifest, MountsSection, PackagesSection,
    ProjectPaths, SymlinksSection, CONFIG_DIR,
};
use std::fs;

const EXAMPLE_SCRIPT_NAME: &str = "00-example.sh.example";

const EXAMPLE_SCRIPT: &str = r#"#!/bin/bash
# igloo init script
#
# Files in .igloo/scripts/ run as root, in lexicographic order, whenever the
# container is provisioned from scratch (igloo init, or igloo enter after a
# rebuild). The project is mounted at ~/workspace/<project>/.
#
# Use numbered prefixes to order them: 01-packages.sh, 02-config.sh, ...
# Files ending in .example and dotfiles are ignored. To enable this one:
#   mv 00-example.sh.example 00-example.sh

echo "hello from igloo"
echo "user: $USER"
echo "cwd: $(pwd)"
"#;

#[derive(Debug, Default)]
pub struct InitArgs<'a> {
    pub distro: Option<&'a str>,
    pub release: Option<&'a str>,
    pub name: Option<&'a str>,
    pub packages: Option<&'a str>,
}

/// Resolve distro and release, falling back to the host OS.
///
/// An explicit distro without a release gets that distro's newest release
/// unless it matches the host distro.
fn resolve_image(
    args: &InitArgs<'_>,
    host_os: impl FnOnce() -> (String, String),
) -> Result<(String, String), String> {
    let (distro, release) = match (args.distro, args.release) {
        (Some(d), Some(r)) => (d.to_owned(), r.to_owned()),
        (distro, release) => {
            let (host_distro, host_release) = host_os();
            let distro = distro.map_or(host_distro.clone(), str::to_owned);
            let release = match release {
                Some(r) => r.to_owned(),
                None if distro == host_distro => host_release,
                None => default_release(&distro)
                    .map(str::to_owned)
                    .unwrap_or(host_release),
            };
            (distro, release)
        }
    };
    validate_distro(&distro, &release).map_err(|e| format!("configuration error: {e}"))?;
    Ok((distro, release))
}

fn build_manifest(
    project: &ProjectPaths,
    args: &InitArgs<'_>,
    distro: &str,
    release: &str,
) -> Result<EnvironmentManifest, String> {
    let manifest = EnvironmentManifest {
        container: ContainerSection {
            name: args
                .name
                .map_or_else(|| project.default_env_name(), str::to_owned),
            image: image_reference(distro, release),
        },
        packages: PackagesSection {
            install: args.packages.unwrap_or_default().to_owned(),
        },
        mounts: MountsSection::default(),
        display: DisplaySection {
            enabled: true,
            gpu: true,
        },
        symlinks: SymlinksSection::default(),
    };
    manifest
        .validate()
        .map_err(|e| format!("manifest error: {e}"))?;
    Ok(manifest)
}

fn write_project_files(
    project: &ProjectPaths,
    manifest: &EnvironmentManifest,
) -> Result<(), String> {
    write_manifest_file(&project.manifest_path(), manifest)
        .map_err(|e| format!("manifest error: {e}"))?;
    let scripts = project.scripts_dir();
    fs::create_dir_all(&scripts)
        .map_err(|e| format!("failed to create {}: {e}", scripts.display()))?;
    let example = scripts.join(EXAMPLE_SCRIPT_NAME);
    fs::write(&example, EXAMPLE_SCRIPT)
        .map_err(|e| format!("failed to write {}: {e}", example.display()))?;
    Ok(())
}

pub fn run(engine: &Engine<'_>, args: &InitArgs<'_>, json: bool) -> Result<u8, String> {
    let project = ProjectPaths::from_current_dir()
        .map_err(|e| format!("cannot determine current directory: {e}"))?;
    if project.config_dir().exists() {
        return Err(format!(
            "configuration error: {CONFIG_DIR} already exists in this project"
        ));
    }

    let (distro, release) = resolve_image(args, detect_host_os)?;
    let manifest = build_manifest(&project, args, &distro, &release)?;
    write_project_files(&project, &manifest)?;
    let env = manifest
        .normalize()
        .map_err(|e| format!("manifest error: {e}"))?;
    if !json {
        println!("wrote {}", project.manifest_path().display());
    }

    let _lock = lock_env(engine, &env)?;
    let pb = (!json).then(|| spinner(&format!("provisioning {} ({distro}/{release})...", env.name)));
    let report = match engine.provision(&env, &project) {
        Ok(report) => {
            if let Some(ref pb) = pb {
                spin_ok(pb, &format!("{} is ready", env.name));
            }
            report
        }
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "provisioning failed");
            }
            return Err(provision_error(&e));
        }
    };

    if json {
        let payload = serde_json::json!({
            "status": "initialized",
            "name": env.name,
            "image": env.image,
            "config": project.manifest_path(),
            "report": report,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("run `igloo enter` to start working");
    }
    Ok(EXIT_SUCCESS)
}
