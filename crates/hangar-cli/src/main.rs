//! Hangar - app and runtime installer
//!
//! Usage:
//!   hangar remote-add flathub https://example.org/repo
//!   hangar install flathub org.example.App
//!   hangar list --updates
//!   hangar update

mod progress;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hangar_core::prelude::*;

use crate::progress::ProgressLine;

#[derive(Parser)]
#[command(name = "hangar")]
#[command(about = "App and runtime installer", long_about = None)]
struct Cli {
    #[command(flatten)]
    installation: InstallationArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct InstallationArgs {
    /// Work on the per-user installation (default)
    #[arg(long, global = true, conflicts_with_all = ["system", "installation"])]
    user: bool,

    /// Work on the system-wide installation
    #[arg(long, global = true, conflicts_with = "installation")]
    system: bool,

    /// Work on the installation rooted at PATH
    #[arg(long, global = true, value_name = "PATH")]
    installation: Option<PathBuf>,
}

/// Identifies an app or runtime: a name, or a full `kind/name/arch/branch` ref.
#[derive(Args)]
struct RefArgs {
    /// App or runtime name, or a full ref
    name: String,

    /// Look for a runtime instead of an app
    #[arg(long)]
    runtime: bool,

    /// Architecture (defaults to the host's)
    #[arg(long)]
    arch: Option<String>,

    /// Branch (defaults to master)
    #[arg(long)]
    branch: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured remotes
    Remotes {
        /// Include remotes hidden from browsing
        #[arg(long)]
        all: bool,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Add a remote repository
    RemoteAdd {
        name: String,
        /// Repository location (path, file://, http:// or https://)
        url: String,
        #[arg(long)]
        title: Option<String>,
        /// Higher priorities are listed first
        #[arg(long)]
        prio: Option<i32>,
        /// Key that bundle signatures for this remote must verify against
        #[arg(long)]
        signing_key: Option<String>,
        /// Hide the remote from browsing
        #[arg(long)]
        no_enumerate: bool,
    },

    /// Delete a remote
    RemoteDelete {
        name: String,
        /// Delete even if installed refs come from it
        #[arg(long, short)]
        force: bool,
    },

    /// List the refs a remote offers
    RemoteLs {
        remote: String,
        /// Only apps
        #[arg(long)]
        app: bool,
        /// Only runtimes
        #[arg(long)]
        runtime: bool,
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// List installed apps and runtimes
    List {
        /// Only apps
        #[arg(long)]
        app: bool,
        /// Only runtimes
        #[arg(long)]
        runtime: bool,
        /// Only refs with updates available
        #[arg(long)]
        updates: bool,
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Show details of an installed ref
    Info {
        #[command(flatten)]
        target: RefArgs,
        /// Print the deployed metadata instead
        #[arg(long, short)]
        show_metadata: bool,
    },

    /// Install an app or runtime from a remote
    Install {
        remote: String,
        #[command(flatten)]
        target: RefArgs,
    },

    /// Install the ref carried by a bundle file
    InstallBundle { file: PathBuf },

    /// Update installed refs (all with pending updates when no name is given)
    Update {
        name: Option<String>,
        #[arg(long)]
        runtime: bool,
        #[arg(long)]
        arch: Option<String>,
        #[arg(long)]
        branch: Option<String>,
        /// Deploy what was pulled earlier without contacting the remote
        #[arg(long)]
        no_pull: bool,
        /// Pull only, don't deploy
        #[arg(long)]
        no_deploy: bool,
    },

    /// Uninstall an app or runtime
    #[command(alias = "rm")]
    Uninstall {
        #[command(flatten)]
        target: RefArgs,
    },

    /// Make an installed branch of an app the one that runs by default
    MakeCurrent {
        name: String,
        branch: String,
        #[arg(long)]
        arch: Option<String>,
    },

    /// Refresh appstream data from a remote
    UpdateAppstream {
        remote: String,
        #[arg(long)]
        arch: Option<String>,
    },

    /// Commit a directory into a repository and advertise it
    BuildExport {
        /// Repository directory (created if missing)
        repo: PathBuf,
        /// Directory whose contents become the ref's files
        dir: PathBuf,
        /// App or runtime name, or a full ref
        #[arg(required_unless_present = "appstream")]
        name: Option<String>,
        #[arg(long)]
        runtime: bool,
        #[arg(long)]
        arch: Option<String>,
        #[arg(long)]
        branch: Option<String>,
        /// File holding the ref's metadata
        #[arg(long)]
        metadata: Option<PathBuf>,
        /// Publish the directory as appstream data instead
        #[arg(long, conflicts_with = "name")]
        appstream: bool,
    },

    /// Pack a ref from a repository into a bundle file
    BuildBundle {
        repo: PathBuf,
        file: PathBuf,
        #[command(flatten)]
        target: RefArgs,
        /// Repository to pull later updates from
        #[arg(long)]
        origin: Option<String>,
        #[arg(long)]
        title: Option<String>,
        /// Sign the bundle with this key
        #[arg(long)]
        signing_key: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// Machine-readable JSON
    Json,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hangar=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    let Cli {
        installation: installation_args,
        command,
    } = cli;
    let open = || open_installation(&installation_args);
    let cancel = CancellationToken::new();

    match command {
        Commands::Remotes { all, format } => run_remotes(&open()?, all, format)?,
        Commands::RemoteAdd {
            name,
            url,
            title,
            prio,
            signing_key,
            no_enumerate,
        } => {
            let mut remote = RemoteConfig::new(&name, url);
            if let Some(title) = title {
                remote = remote.with_title(title);
            }
            if let Some(prio) = prio {
                remote = remote.with_priority(prio);
            }
            if let Some(key) = signing_key {
                remote = remote.with_signing_key(key);
            }
            remote.noenumerate = no_enumerate;
            open()?.add_remote(remote)?;
            println!("Added remote '{name}'");
        }
        Commands::RemoteDelete { name, force } => {
            open()?.remove_remote(&name, force)?;
            println!("Removed remote '{name}'");
        }
        Commands::RemoteLs {
            remote,
            app,
            runtime,
            format,
        } => run_remote_ls(&open()?, &remote, kind_filter(app, runtime), format, &cancel)?,
        Commands::List {
            app,
            runtime,
            updates,
            format,
        } => run_list(&open()?, kind_filter(app, runtime), updates, format, &cancel)?,
        Commands::Info {
            target,
            show_metadata,
        } => run_info(&open()?, &target, show_metadata)?,
        Commands::Install { remote, target } => {
            let r = target.to_ref()?;
            let installation = open()?;
            let mut line = ProgressLine::new();
            let installed = installation.install(
                &remote,
                r.kind(),
                r.name(),
                Some(r.arch()),
                Some(r.branch()),
                Some(&mut line),
                &cancel,
            )?;
            line.finish();
            println!("Installed {} ({})", installed.reference, short(&installed.commit));
        }
        Commands::InstallBundle { file } => {
            let installation = open()?;
            let mut line = ProgressLine::new();
            let installed = installation.install_bundle(&file, Some(&mut line), &cancel)?;
            line.finish();
            println!(
                "Installed {} ({}) from {}",
                installed.reference,
                short(&installed.commit),
                file.display()
            );
        }
        Commands::Update {
            name,
            runtime,
            arch,
            branch,
            no_pull,
            no_deploy,
        } => {
            let flags = UpdateFlags { no_pull, no_deploy };
            run_update(&open()?, name, runtime, arch, branch, flags, &cancel)?;
        }
        Commands::Uninstall { target } => {
            let r = target.to_ref()?;
            open()?.uninstall(
                r.kind(),
                r.name(),
                Some(r.arch()),
                Some(r.branch()),
                None,
                &cancel,
            )?;
            println!("Uninstalled {r}");
        }
        Commands::MakeCurrent { name, branch, arch } => {
            open()?.make_current_app(&name, arch.as_deref(), Some(&branch))?;
            println!("{name} now runs from branch {branch}");
        }
        Commands::UpdateAppstream { remote, arch } => {
            if open()?.update_appstream(&remote, arch.as_deref(), &cancel)? {
                println!("Updated appstream data from '{remote}'");
            } else {
                println!("Appstream data from '{remote}' is up to date");
            }
        }
        Commands::BuildExport {
            repo,
            dir,
            name,
            runtime,
            arch,
            branch,
            metadata,
            appstream,
        } => run_build_export(repo, dir, name, runtime, arch, branch, metadata, appstream)?,
        Commands::BuildBundle {
            repo,
            file,
            target,
            origin,
            title,
            signing_key,
        } => run_build_bundle(repo, file, &target, origin, title, signing_key)?,
    }
    Ok(())
}

fn open_installation(args: &InstallationArgs) -> Result<Installation> {
    let installation = match &args.installation {
        Some(path) => Installation::new_for_path(path.clone(), false),
        None if args.system => Installation::new_system()?,
        None => Installation::new_user()?,
    };
    tracing::debug!(path = %installation.path().display(), "using installation");
    Ok(installation)
}

impl RefArgs {
    fn to_ref(&self) -> Result<Ref> {
        resolve_ref(&self.name, self.runtime, self.arch.as_deref(), self.branch.as_deref())
    }
}

fn resolve_ref(name: &str, runtime: bool, arch: Option<&str>, branch: Option<&str>) -> Result<Ref> {
    if name.contains('/') {
        return Ok(decompose(name)?);
    }
    let kind = if runtime { RefKind::Runtime } else { RefKind::App };
    Ok(Ref::compose(kind, name, branch, arch)?)
}

fn kind_filter(app: bool, runtime: bool) -> Vec<RefKind> {
    match (app, runtime) {
        (true, false) => vec![RefKind::App],
        (false, true) => vec![RefKind::Runtime],
        _ => RefKind::ALL.to_vec(),
    }
}

fn run_remotes(installation: &Installation, all: bool, format: OutputFormat) -> Result<()> {
    let remotes: Vec<Remote> = installation
        .list_remotes()?
        .into_iter()
        .filter(|remote| all || !remote.noenumerate)
        .collect();

    match format {
        OutputFormat::Table => {
            if remotes.is_empty() {
                println!("No remotes configured.");
                println!("Add one with: hangar remote-add <name> <url>");
                return Ok(());
            }
            println!("{:<20} {:<24} {:<6} {:<10} URL", "Name", "Title", "Prio", "Options");
            println!("{}", "-".repeat(80));
            for remote in &remotes {
                let mut options = Vec::new();
                if remote.noenumerate {
                    options.push("hidden");
                }
                if remote.signed {
                    options.push("signed");
                }
                println!(
                    "{:<20} {:<24} {:<6} {:<10} {}",
                    truncate(&remote.name, 20),
                    truncate(remote.title.as_deref().unwrap_or("-"), 24),
                    remote.priority,
                    options.join(","),
                    remote.url.as_deref().unwrap_or("-")
                );
            }
        }
        OutputFormat::Json => {
            let output: Vec<_> = remotes
                .iter()
                .map(|remote| {
                    serde_json::json!({
                        "name": remote.name,
                        "url": remote.url,
                        "title": remote.title,
                        "priority": remote.priority,
                        "noenumerate": remote.noenumerate,
                        "signed": remote.signed,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

fn run_remote_ls(
    installation: &Installation,
    remote: &str,
    kinds: Vec<RefKind>,
    format: OutputFormat,
    cancel: &CancellationToken,
) -> Result<()> {
    let refs: Vec<RemoteRef> = installation
        .list_remote_refs(remote, cancel)?
        .into_iter()
        .filter(|entry| kinds.contains(&entry.reference.kind()))
        .collect();

    match format {
        OutputFormat::Table => {
            if refs.is_empty() {
                println!("Remote '{remote}' offers nothing matching.");
                return Ok(());
            }
            println!("{:<60} Commit", "Ref");
            println!("{}", "-".repeat(74));
            for entry in &refs {
                println!("{:<60} {}", entry.reference.to_string(), short(&entry.commit));
            }
        }
        OutputFormat::Json => {
            let output: Vec<_> = refs
                .iter()
                .map(|entry| {
                    serde_json::json!({
                        "ref": entry.reference.to_string(),
                        "commit": entry.commit,
                        "remote": entry.remote,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

fn run_list(
    installation: &Installation,
    kinds: Vec<RefKind>,
    updates: bool,
    format: OutputFormat,
    cancel: &CancellationToken,
) -> Result<()> {
    let refs: Vec<InstalledRef> = if updates {
        installation.list_installed_refs_for_update(cancel)?
    } else {
        installation.list_installed_refs()?
    }
    .into_iter()
    .filter(|installed| kinds.contains(&installed.reference.kind()))
    .collect();

    match format {
        OutputFormat::Table => print_installed_table(&refs, updates),
        OutputFormat::Json => {
            let output: Vec<_> = refs
                .iter()
                .map(|installed| {
                    serde_json::json!({
                        "ref": installed.reference.to_string(),
                        "commit": installed.commit,
                        "latest_commit": installed.latest_commit,
                        "origin": installed.origin,
                        "installed_size": installed.installed_size,
                        "current": installed.is_current,
                        "path": installed.deploy_path,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

fn print_installed_table(refs: &[InstalledRef], updates: bool) {
    if refs.is_empty() {
        if updates {
            println!("Nothing to update.");
        } else {
            println!("Nothing installed.");
        }
        return;
    }

    println!(
        "{:<32} {:<8} {:<10} {:<14} {:<10} {:>10}",
        "Name", "Kind", "Branch", "Origin", "Commit", "Size"
    );
    println!("{}", "-".repeat(90));
    for installed in refs {
        let marker = if installed.is_current { "*" } else { "" };
        println!(
            "{:<32} {:<8} {:<10} {:<14} {:<10} {:>10}",
            truncate(&format!("{}{marker}", installed.name()), 32),
            installed.reference.kind().as_str(),
            truncate(installed.branch(), 10),
            truncate(&installed.origin, 14),
            short(&installed.commit),
            format_size(installed.installed_size)
        );
    }
}

fn run_info(installation: &Installation, target: &RefArgs, show_metadata: bool) -> Result<()> {
    let r = target.to_ref()?;
    let installed =
        installation.get_installed_ref(r.kind(), r.name(), Some(r.arch()), Some(r.branch()))?;

    if show_metadata {
        let path = installed.deploy_path.join("metadata");
        let metadata = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read metadata: {}", path.display()))?;
        print!("{metadata}");
        return Ok(());
    }

    println!("Ref:       {}", installed.reference);
    println!("Origin:    {}", installed.origin);
    println!("Commit:    {}", installed.commit);
    match &installed.latest_commit {
        Some(latest) if installed.has_pending_update() => {
            println!("Latest:    {latest} (update pending)");
        }
        Some(latest) => println!("Latest:    {latest}"),
        None => println!("Latest:    unknown"),
    }
    println!("Location:  {}", installed.deploy_path.display());
    println!("Installed: {}", format_size(installed.installed_size));
    if !installed.subpaths.is_empty() {
        println!("Subpaths:  {}", installed.subpaths.join(", "));
    }
    if installed.reference.is_app() {
        println!("Current:   {}", if installed.is_current { "yes" } else { "no" });
    }
    Ok(())
}

fn run_update(
    installation: &Installation,
    name: Option<String>,
    runtime: bool,
    arch: Option<String>,
    branch: Option<String>,
    flags: UpdateFlags,
    cancel: &CancellationToken,
) -> Result<()> {
    let targets = match name {
        Some(name) => vec![resolve_ref(&name, runtime, arch.as_deref(), branch.as_deref())?],
        None => installation
            .list_installed_refs_for_update(cancel)?
            .into_iter()
            .map(|installed| installed.reference)
            .collect(),
    };
    if targets.is_empty() {
        println!("Nothing to update.");
        return Ok(());
    }

    for r in targets {
        let before = installation
            .get_installed_ref(r.kind(), r.name(), Some(r.arch()), Some(r.branch()))?
            .commit;
        let mut line = ProgressLine::new();
        let updated = installation.update(
            flags,
            r.kind(),
            r.name(),
            Some(r.arch()),
            Some(r.branch()),
            Some(&mut line),
            cancel,
        )?;
        line.finish();
        if updated.commit != before {
            println!(
                "Updated {} ({} -> {})",
                updated.reference,
                short(&before),
                short(&updated.commit)
            );
        } else if updated.has_pending_update() {
            println!("Pulled {}; deploy pending", updated.reference);
        } else {
            println!("{} is up to date", updated.reference);
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_build_export(
    repo: PathBuf,
    dir: PathBuf,
    name: Option<String>,
    runtime: bool,
    arch: Option<String>,
    branch: Option<String>,
    metadata: Option<PathBuf>,
    appstream: bool,
) -> Result<()> {
    let repo = ObjectRepo::new(repo);
    if appstream {
        let arch = arch.unwrap_or_else(|| default_arch().to_string());
        let commit = repo.publish_appstream(&dir, &arch)?;
        println!("Published appstream/{arch} as {}", short(&commit));
        return Ok(());
    }

    let name = name.context("A name is required unless --appstream is given")?;
    let r = resolve_ref(&name, runtime, arch.as_deref(), branch.as_deref())?;
    let metadata = match metadata {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read metadata: {}", path.display()))?,
        None => default_metadata(&r),
    };
    let commit = repo.publish(&dir, &r, &metadata)?;
    println!("Published {r} as {}", short(&commit));
    Ok(())
}

fn default_metadata(r: &Ref) -> String {
    let group = if r.is_app() { "Application" } else { "Runtime" };
    format!("[{group}]\nname={}\n", r.name())
}

fn run_build_bundle(
    repo: PathBuf,
    file: PathBuf,
    target: &RefArgs,
    origin: Option<String>,
    title: Option<String>,
    signing_key: Option<String>,
) -> Result<()> {
    let r = target.to_ref()?;
    let repo = ObjectRepo::new(repo);
    let summary = repo.load_summary()?;
    let commit = summary
        .refs
        .get(&r.to_string())
        .with_context(|| format!("{r} is not in {}", repo.root().display()))?;

    let mut writer = BundleWriter::new();
    if let Some(origin) = origin {
        writer = writer.with_origin(origin);
    }
    if let Some(title) = title {
        writer = writer.with_title(title);
    }
    if let Some(key) = signing_key {
        writer = writer.with_signing_key(key);
    }
    writer.write(&repo, commit, &file)?;
    println!("Wrote {r} ({}) to {}", short(commit), file.display());
    Ok(())
}

fn short(commit: &str) -> &str {
    commit.get(..10).unwrap_or(commit)
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}
