use crate::{
    catalog::{Catalog, ManifestDoc},
    database::ModDatabase,
    depends::ReverseDependencySearch,
    download::{CancelToken, HttpFetcher, ModProgress},
    installer::{Installer, ReinstallPolicy},
    settings::{self, Settings},
    state::ModState,
    store::InstalledMods,
};
use anyhow::{bail, Context, Result};
use std::io::Write;

const MANIFEST_URI: &str =
    "https://raw.githubusercontent.com/hollowsmith/manifest/main/manifest.json";
const FALLBACK_MANIFEST_URI: &str =
    "https://cdn.jsdelivr.net/gh/hollowsmith/manifest@latest/manifest.json";

enum Command {
    List,
    Install { name: String, disabled: bool },
    Uninstall { name: String, force: bool },
    Enable { name: String },
    Disable { name: String, force: bool },
    Update { name: String },
    Api { force: bool },
    Reset,
    Help,
    Version,
}

pub fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = parse_args(&args)?;

    match command {
        Command::Help => {
            print_help();
            Ok(())
        }
        Command::Version => {
            println!("hollowsmith v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        command => {
            let installer = build_installer()?;
            execute(&installer, command)
        }
    }
}

fn parse_args(args: &[String]) -> Result<Command> {
    let mut words = args.iter().map(|arg| arg.as_str());
    let Some(command) = words.next() else {
        return Ok(Command::Help);
    };

    let rest: Vec<&str> = words.collect();
    let name = || -> Result<String> {
        rest.iter()
            .find(|arg| !arg.starts_with('-'))
            .map(|arg| arg.to_string())
            .with_context(|| format!("'{command}' requires a mod name"))
    };
    let flag = |flag: &str| rest.iter().any(|arg| *arg == flag);

    let command = match command {
        "list" | "ls" => Command::List,
        "install" => Command::Install {
            name: name()?,
            disabled: flag("--disabled"),
        },
        "uninstall" | "remove" => Command::Uninstall {
            name: name()?,
            force: flag("--force"),
        },
        "enable" => Command::Enable { name: name()? },
        "disable" => Command::Disable {
            name: name()?,
            force: flag("--force"),
        },
        "update" => Command::Update { name: name()? },
        "api" => Command::Api {
            force: flag("--force"),
        },
        "reset" => Command::Reset,
        "--help" | "-h" | "help" => Command::Help,
        "--version" | "-V" | "version" => Command::Version,
        other => bail!("unknown command: {other} (try 'hollowsmith help')"),
    };

    Ok(command)
}

fn build_installer() -> Result<Installer> {
    let settings = Settings::load_or_create()?;
    if settings.managed_folder.as_os_str().is_empty() || !settings.managed_folder.is_dir() {
        bail!(
            "the game's Managed folder is not configured; set \"managed_folder\" in the settings file"
        );
    }

    let doc = ManifestDoc::fetch(MANIFEST_URI, FALLBACK_MANIFEST_URI)?;
    let catalog = Catalog::new(doc.mods).context("invalid manifest")?;
    let store = InstalledMods::load(settings::store_path()?, &settings, &catalog);
    let db = ModDatabase::new(&catalog, doc.api, &store);

    Ok(Installer::new(
        settings,
        db,
        store,
        Box::new(HttpFetcher::new()),
    ))
}

fn execute(installer: &Installer, command: Command) -> Result<()> {
    let cancel = CancelToken::new();

    match command {
        Command::List => {
            for item in installer.mods() {
                let marker = match &item.state {
                    ModState::Installed(state) if state.enabled => "enabled ",
                    ModState::Installed(_) => "disabled",
                    ModState::NotInstalled { .. } => "        ",
                };
                let update = if item.update_available() {
                    " (update available)"
                } else {
                    ""
                };
                println!("{marker}  {} {}{update}", item.name, item.version);
            }
        }
        Command::Install { name, disabled } => {
            installer.install(&name, &mut print_progress(&name), !disabled, &cancel)?;
            println!("Installed {name}");
        }
        Command::Uninstall { name, force } => {
            warn_dependents(installer, &name, force, "Uninstalling")?;
            installer.uninstall(&name)?;
            println!("Uninstalled {name}");
        }
        Command::Enable { name } => {
            match installer.mod_state(&name) {
                Some(state) if state.is_enabled() => println!("{name} is already enabled"),
                Some(state) if state.is_installed() => {
                    installer.toggle(&name)?;
                    println!("Enabled {name}");
                }
                Some(_) => bail!("{name} is not installed"),
                None => bail!("unknown mod: {name}"),
            };
        }
        Command::Disable { name, force } => {
            match installer.mod_state(&name) {
                Some(state) if state.is_enabled() => {
                    warn_dependents(installer, &name, force, "Disabling")?;
                    installer.toggle(&name)?;
                    println!("Disabled {name}");
                }
                Some(state) if state.is_installed() => println!("{name} is already disabled"),
                Some(_) => bail!("{name} is not installed"),
                None => bail!("unknown mod: {name}"),
            };
        }
        Command::Update { name } => {
            installer.update(&name, &mut print_progress(&name), &cancel)?;
            println!("Updated {name}");
        }
        Command::Api { force } => {
            let policy = if force {
                ReinstallPolicy::ForceReinstall
            } else {
                ReinstallPolicy::SkipUpToDate
            };
            installer.install_api(policy, &cancel)?;
            println!("Modding API installed");
        }
        Command::Reset => {
            installer.reset_records()?;
            println!("Cleared installed-mods records; state will be rescanned from disk");
        }
        Command::Help | Command::Version => unreachable!("handled in run"),
    }

    Ok(())
}

/// Refuses to touch a mod that enabled mods still depend on, unless forced.
fn warn_dependents(installer: &Installer, name: &str, force: bool, action: &str) -> Result<()> {
    if installer.mod_state(name).is_none() {
        bail!("unknown mod: {name}");
    }

    let db = installer.database_snapshot();
    let search = ReverseDependencySearch::new(&db);
    let dependents: Vec<String> = search
        .enabled_dependents(name)
        .into_iter()
        .map(|item| item.name.clone())
        .collect();

    if !dependents.is_empty() && !force {
        bail!(
            "{action} {name} would break: {} (use --force to proceed)",
            dependents.join(", ")
        );
    }

    Ok(())
}

fn print_progress(name: &str) -> impl FnMut(ModProgress) + '_ {
    move |progress| {
        if progress.completed {
            eprintln!("\r{name}: done        ");
        } else if let Some(download) = progress.download {
            match download.percent() {
                Some(percent) => eprint!("\r{name}: {percent:>5.1}%"),
                None => eprint!("\r{name}: {} bytes", download.bytes_read),
            }
            let _ = std::io::stderr().flush();
        }
    }
}

fn print_help() {
    println!("hollowsmith - mod installer for Hollow Knight");
    println!();
    println!("Usage: hollowsmith <command> [args]");
    println!();
    println!("Commands:");
    println!("  list                      List mods and their state");
    println!("  install <mod> [--disabled]  Install a mod (and its dependencies)");
    println!("  uninstall <mod> [--force]   Remove a mod");
    println!("  enable <mod>              Move a mod into the active mods folder");
    println!("  disable <mod> [--force]   Move a mod into the disabled folder");
    println!("  update <mod>              Reinstall an out-of-date mod");
    println!("  api [--force]             Install the modding API");
    println!("  reset                     Clear the installed-mods records");
    println!("  help, version");
}
