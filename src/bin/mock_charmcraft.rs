//! Mock packing tool for integration testing
//!
//! Implements `init`, `pack` and `clean` on disk the way the real tool
//! lays out projects and artifacts, without building anything. Setting
//! `MOCK_CHARMCRAFT_FAIL=<subcommand>` makes that subcommand exit 1.

use std::fs;
use std::path::{Path, PathBuf};

use charm_smoke::host::host_arch;

const SCAFFOLD_CHANNEL: &str = "20.04";

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let code = match run(&args) {
        Ok(()) => 0,
        Err(msg) => {
            eprintln!("mock-charmcraft: {msg}");
            1
        }
    };
    std::process::exit(code);
}

fn run(args: &[String]) -> Result<(), String> {
    let (command, rest) = args.split_first().ok_or("missing command")?;

    if std::env::var("MOCK_CHARMCRAFT_FAIL").ok().as_deref() == Some(command.as_str()) {
        return Err(format!("{command} failed on request"));
    }

    let cwd = std::env::current_dir().map_err(|e| e.to_string())?;
    let project = match option_value(rest, "--project-dir") {
        Some(dir) => cwd.join(dir),
        None => cwd.clone(),
    };

    match command.as_str() {
        "version" | "--version" => {
            println!("mock-charmcraft 0.0.0");
            Ok(())
        }
        "init" => init(&project, option_value(rest, "--author").unwrap_or("unknown")),
        "pack" => pack(&cwd, &project),
        "clean" => clean(&project),
        other => Err(format!("unknown command '{other}'")),
    }
}

fn option_value<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    let prefix = format!("{name}=");
    args.iter().enumerate().find_map(|(i, arg)| {
        if arg == name {
            args.get(i + 1).map(String::as_str)
        } else {
            arg.strip_prefix(&prefix)
        }
    })
}

fn init(project: &Path, author: &str) -> Result<(), String> {
    if project.join("charmcraft.yaml").exists() {
        return Err(format!("{} is not empty", project.display()));
    }
    let name = project
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or("project directory has no name")?;

    fs::create_dir_all(project.join("src")).map_err(|e| e.to_string())?;
    write(
        &project.join("metadata.yaml"),
        &format!("name: {name}\ndisplay-name: {name}\nmaintainers:\n  - {author}\n"),
    )?;
    write(
        &project.join("charmcraft.yaml"),
        &format!(
            "type: charm\nbases:\n  - build-on:\n      - name: \"ubuntu\"\n        channel: \"{SCAFFOLD_CHANNEL}\"\n    run-on:\n      - name: \"ubuntu\"\n        channel: \"{SCAFFOLD_CHANNEL}\"\n"
        ),
    )?;
    write(&project.join("src").join("charm.py"), "#!/usr/bin/env python3\n")?;
    println!("Charmed operator package file and directory tree initialised.");
    Ok(())
}

fn pack(cwd: &Path, project: &Path) -> Result<(), String> {
    let name = yaml_value(&project.join("metadata.yaml"), "name")?;
    let channel = yaml_value(&project.join("charmcraft.yaml"), "channel")?;

    fs::create_dir_all(project.join("build")).map_err(|e| e.to_string())?;
    let artifact: PathBuf = cwd.join(format!("{name}_ubuntu-{channel}-{}.charm", host_arch()));
    write(&artifact, "charm")?;
    println!("Created '{}'.", artifact.display());
    Ok(())
}

fn clean(project: &Path) -> Result<(), String> {
    if !project.join("metadata.yaml").exists() {
        return Err(format!("{} is not a charm project", project.display()));
    }
    let build = project.join("build");
    if build.exists() {
        fs::remove_dir_all(&build).map_err(|e| e.to_string())?;
    }
    println!("Cleaned project '{}'.", project.display());
    Ok(())
}

/// First `key: value` in a file, unquoted
fn yaml_value(path: &Path, key: &str) -> Result<String, String> {
    let content =
        fs::read_to_string(path).map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    content
        .lines()
        .filter_map(|line| line.trim().split_once(':'))
        .find(|(k, _)| k.trim() == key)
        .map(|(_, v)| v.trim().trim_matches('"').to_string())
        .ok_or_else(|| format!("no '{key}' in {}", path.display()))
}

fn write(path: &Path, content: &str) -> Result<(), String> {
    fs::write(path, content).map_err(|e| format!("cannot write {}: {e}", path.display()))
}
