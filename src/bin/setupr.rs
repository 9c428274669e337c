use anyhow::{bail, Result};
use std::env;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use setupr::catalog::ALL;
use setupr::{distro, CommandResult, Config, InstallProgress, Package, PackageManager};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load_default()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut args: Vec<String> = env::args().skip(1).collect();
    let json = args.iter().any(|a| a == "--json");
    args.retain(|a| a != "--json");

    let Some(command) = args.first().cloned() else {
        print_usage();
        return Ok(());
    };
    let rest = &args[1..];

    if matches!(command.as_str(), "help" | "--help" | "-h") {
        print_usage();
        return Ok(());
    }

    let manager = Arc::new(PackageManager::detect(&config)?);
    watch_interrupt(manager.clone());

    match command.as_str() {
        "list" => {
            manager.reload().await;
            let category = rest.first().map(String::as_str).unwrap_or(ALL);
            print_packages(&manager.category(category), json)
        }
        "categories" => {
            for category in manager.catalog().categories() {
                println!(
                    "{} {:<20} {:>3}  {}",
                    category.icon,
                    category.name,
                    category.packages.len(),
                    category.description
                );
            }
            Ok(())
        }
        "search" => {
            if rest.is_empty() {
                bail!("Usage: setupr search <query>");
            }
            manager.reload().await;
            print_packages(&manager.search(&rest.join(" ")), json)
        }
        "info" => {
            let Some(name) = rest.first() else {
                bail!("Usage: setupr info <package>");
            };
            let package = manager.info(name).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&package)?);
            } else {
                print_info(&package, manager.catalog().icon(&package.category));
            }
            Ok(())
        }
        "install" => finish(manager.install(rest, &mut |p| print_progress(p)).await),
        "remove" => finish(manager.remove(rest, &mut |p| print_progress(p)).await),
        "update" | "upgrade" => finish(manager.update(rest, &mut |p| print_progress(p)).await),
        "refresh" => finish(manager.refresh(&mut |p| print_progress(p)).await),
        "distro" => {
            let host = distro::host();
            println!("Distribution: {}", host.display_name());
            if !host.id.is_empty() {
                println!("ID:           {}", host.id);
            }
            if !host.id_like.is_empty() {
                println!("ID_LIKE:      {}", host.id_like.join(" "));
            }
            println!("Backend:      {}", manager.kind());
            println!("Escalation:   {}", manager.escalation().program());
            if let Some(timeout) = manager.timeout() {
                println!("Timeout:      {}s", timeout.as_secs());
            }
            Ok(())
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            std::process::exit(1);
        }
    }
}

/// Ctrl-C cancels the running operation, or exits when there is none
fn watch_interrupt(manager: Arc<PackageManager>) {
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            if !manager.cancel() {
                std::process::exit(130);
            }
        }
    });
}

fn finish(result: CommandResult) -> Result<()> {
    if !result.success {
        bail!("{}", result.message);
    }
    println!("{}", result.message);
    Ok(())
}

fn print_progress(progress: &InstallProgress) {
    println!(
        "[{:>3}%] {:<11} {}",
        progress.percentage,
        progress.status.label(),
        progress.detail
    );
}

fn print_packages(packages: &[Package], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(packages)?);
        return Ok(());
    }
    if packages.is_empty() {
        println!("No packages found");
        return Ok(());
    }

    for package in packages {
        let mark = match (package.installed, package.update_available) {
            (true, true) => "↑",
            (true, false) => "✓",
            _ => " ",
        };
        println!(
            "{} {:<26} {:<28} {:<12} {}",
            mark, package.name, package.display_name, package.size, package.category
        );
    }
    Ok(())
}

fn print_info(package: &Package, icon: &str) {
    println!("{} {} ({})", icon, package.display_name, package.name);
    if !package.category.is_empty() {
        println!("Category:    {}", package.category);
    }
    println!("Version:     {}", package.version);
    println!("Size:        {}", package.size);
    println!(
        "Installed:   {}",
        match (package.installed, package.update_available) {
            (true, true) => "yes (update available)",
            (true, false) => "yes",
            _ => "no",
        }
    );
    if !package.description.is_empty() {
        println!("\n{}", package.description);
    }
}

fn print_usage() {
    println!(
        r#"setupr - Browse, search and install packages

Usage:
    setupr list [category]     List catalog packages with their status
    setupr categories          List catalog categories
    setupr search <query>      Search packages by name, description or category
    setupr info <package>      Show version, size and description of a package
    setupr install <pkg...>    Install packages
    setupr remove <pkg...>     Remove packages
    setupr update [pkg...]     Upgrade packages, or the whole system
    setupr refresh             Refresh the package database
    setupr distro              Show the detected distribution and backend
    setupr help                Show this help message

Options:
    --json                     Print list, search and info results as JSON

Examples:
    setupr list Databases      # Status of every database package
    setupr search editor       # Find editors in the catalog
    setupr install git vim     # Install with progress (Ctrl-C cancels)

Configuration is read from $SETUPR_CONFIG or ~/.config/setupr/config.toml.
"#
    );
}
