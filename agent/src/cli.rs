//! Command-line front end.
//!
//! Each subcommand drives the core the way the folder view would: open a
//! watch on the directory, build a [`CurrentDir`] from the published state,
//! then hand it to the [`Coordinator`].

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{debug, info};

use filedeck_core::config::{ChannelConfig, Settings, Sort, ViewMode};
use filedeck_core::context::{AlertVariant, Clipboard};
use filedeck_core::files::listing::{can_open_in_editor, folder_entries, visible_entries};
use filedeck_core::files::{mode, FolderEntry};
use filedeck_core::ops::{
    Conflict, ConflictAction, ConflictResolver, CreateFile, CurrentDir, Destructive, LinkMode,
    OwnerChoice, PasteOutcome, PermissionChange, Privileges, Resolution, SymlinkRequest,
    UploadReport, UploadSource,
};
use filedeck_core::{
    Coordinator, DirectoryWatchSession, EditorSession, FileError, FilesContext, Host, OpError,
};

use crate::host::{current_identity, LocalCommandRunner, LocalDirectoryChannel, LocalFileChannel};
use crate::state::settings::JsonFileStore;

#[derive(Debug, Parser)]
#[command(name = "filedeck", version, about = "Browse and manage files on this machine")]
pub struct Cli {
    /// Use elevated privileges (non-interactive sudo) where possible.
    #[arg(long, global = true)]
    pub admin: bool,

    /// How often watched directories and files are re-read, in milliseconds.
    #[arg(long, global = true, default_value_t = 1000)]
    pub poll_ms: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List a directory.
    Ls {
        #[arg(default_value = ".")]
        path: String,
        /// Show hidden files regardless of the saved setting.
        #[arg(short, long)]
        all: bool,
        #[arg(long, value_enum)]
        sort: Option<SortArg>,
        /// Only show names containing this text.
        #[arg(long, default_value = "")]
        filter: String,
    },
    /// Follow a directory and print changes until interrupted.
    Watch {
        #[arg(default_value = ".")]
        path: String,
    },
    /// Create a directory.
    Mkdir {
        dir: String,
        name: String,
        /// `user:group` to hand the directory to.
        #[arg(long)]
        owner: Option<String>,
    },
    /// Create a file.
    Touch {
        dir: String,
        name: String,
        /// Initial content.
        #[arg(long)]
        content: Option<String>,
        #[arg(long)]
        owner: Option<String>,
    },
    /// Rename an entry.
    Rename {
        dir: String,
        name: String,
        new_name: String,
        /// Replace an existing regular file of the new name.
        #[arg(long)]
        overwrite: bool,
        #[command(flatten)]
        confirm: ConfirmArgs,
    },
    /// Delete entries.
    Rm {
        dir: String,
        #[arg(required = true)]
        names: Vec<String>,
        /// Delete with `rm -rf` right away.
        #[arg(short, long)]
        force: bool,
        #[command(flatten)]
        confirm: ConfirmArgs,
    },
    /// Copy entries of one directory into another.
    Paste {
        /// Directory the entries are copied from.
        #[arg(long)]
        from: String,
        /// Destination directory.
        #[arg(long)]
        into: String,
        #[arg(required = true)]
        names: Vec<String>,
        /// `user:group` for the copies when a plain copy is refused.
        #[arg(long, conflicts_with = "keep_owners")]
        owner: Option<String>,
        /// Keep the original owners when a plain copy is refused.
        #[arg(long)]
        keep_owners: bool,
    },
    /// Upload local files into a directory.
    Upload {
        dir: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// What to do when a name is taken.
        #[arg(long, value_enum, default_value_t = OnConflict::Ask)]
        on_conflict: OnConflict,
    },
    /// Change permissions, ownership or name.
    Chmod {
        dir: String,
        /// Octal mode, e.g. 644.
        mode: String,
        #[arg(required = true)]
        names: Vec<String>,
        /// Apply the mode to everything inside the named directories.
        #[arg(short = 'R', long, conflicts_with_all = ["owner", "group", "rename"])]
        recursive: bool,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        group: Option<String>,
        /// New name (single entry only).
        #[arg(long)]
        rename: Option<String>,
    },
    /// Create a symbolic link to an entry.
    Ln {
        dir: String,
        target: String,
        /// Link name; defaults to "link to <target>".
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        absolute: bool,
    },
    /// Replace a file's content, guarded against concurrent changes.
    Edit {
        path: String,
        /// Read the new content from this file instead of stdin.
        #[arg(long)]
        from: Option<PathBuf>,
        /// Write even if the file changed on disk.
        #[arg(long)]
        force: bool,
    },
    /// Show or change the display settings.
    Settings {
        #[arg(long, value_enum)]
        view: Option<ViewArg>,
        #[arg(long, value_enum)]
        sort: Option<SortArg>,
        #[arg(long)]
        show_hidden: Option<bool>,
    },
}

#[derive(Debug, Clone, Copy, Args)]
pub struct ConfirmArgs {
    /// Do not ask for confirmation.
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OnConflict {
    Ask,
    Replace,
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ViewArg {
    Grid,
    List,
}

impl From<ViewArg> for ViewMode {
    fn from(view: ViewArg) -> Self {
        match view {
            ViewArg::Grid => ViewMode::Grid,
            ViewArg::List => ViewMode::List,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SortArg {
    Az,
    Za,
    FirstModified,
    LastModified,
    LargestSize,
    SmallestSize,
}

impl From<SortArg> for Sort {
    fn from(sort: SortArg) -> Self {
        match sort {
            SortArg::Az => Sort::Az,
            SortArg::Za => Sort::Za,
            SortArg::FirstModified => Sort::FirstModified,
            SortArg::LastModified => Sort::LastModified,
            SortArg::LargestSize => Sort::LargestSize,
            SortArg::SmallestSize => Sort::SmallestSize,
        }
    }
}

/// Services shared by the subcommands.
struct App {
    host: Host,
    coordinator: Coordinator,
    store: JsonFileStore,
}

impl App {
    async fn new(cli: &Cli) -> Self {
        let config = ChannelConfig {
            poll_interval_ms: cli.poll_ms,
            ..ChannelConfig::default()
        };
        let runner = Arc::new(LocalCommandRunner::new());
        let superuser_allowed = cli.admin && runner.can_elevate().await;
        if cli.admin && !superuser_allowed {
            info!("Elevated privileges requested but sudo is not available without a password");
        }

        let host = Host::new(
            runner,
            Arc::new(LocalDirectoryChannel::new(config.clone())),
            Arc::new(LocalFileChannel::new(config.clone())),
        );
        let privileges = Privileges {
            superuser_allowed,
            user: current_identity(),
        };
        let coordinator =
            Coordinator::new(host.clone(), privileges, FilesContext::new()).with_config(config);

        Self {
            host,
            coordinator,
            store: JsonFileStore::open_default(),
        }
    }

    async fn open(&self, path: &str) -> Result<DirectoryWatchSession> {
        let path = absolute(path)?;
        let session = DirectoryWatchSession::open_directory(Arc::clone(&self.host.directories), &path).await;
        let state = session.loaded().await;
        if let Some(error) = &state.error {
            bail!("{}", error.display_message());
        }
        Ok(session)
    }

    /// The published state of `path`, for one operation.
    async fn current_dir(&self, path: &str) -> Result<CurrentDir> {
        let mut session = self.open(path).await?;
        let cwd = CurrentDir::from_session(&session);
        session.close();
        Ok(cwd)
    }
}

fn absolute(path: &str) -> Result<String> {
    let path = PathBuf::from(path);
    let path = if path.is_absolute() {
        path
    } else {
        std::env::current_dir()
            .context("Cannot determine the working directory")?
            .join(path)
    };
    Ok(path.to_string_lossy().into_owned())
}

fn op(err: OpError) -> anyhow::Error {
    debug!(?err, "Operation failed");
    anyhow!(err.user_message())
}

async fn ask(question: String) -> Result<String> {
    tokio::task::spawn_blocking(move || {
        use std::io::Write;
        eprint!("{question} ");
        std::io::stderr().flush()?;
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        Ok::<_, std::io::Error>(line.trim().to_string())
    })
    .await
    .context("Prompt task failed")?
    .context("Cannot read answer")
}

async fn confirm<T: Destructive>(plan: &T, args: ConfirmArgs) -> Result<bool> {
    if args.yes {
        return Ok(true);
    }
    let answer = ask(format!("{} [y/N]", plan.confirmation_title())).await?;
    Ok(matches!(answer.as_str(), "y" | "Y" | "yes"))
}

pub async fn run(cli: Cli) -> Result<()> {
    let app = App::new(&cli).await;

    match cli.command {
        Command::Ls {
            path,
            all,
            sort,
            filter,
        } => ls(&app, &path, all, sort, &filter).await,
        Command::Watch { path } => watch(&app, &path).await,
        Command::Mkdir { dir, name, owner } => {
            let cwd = app.current_dir(&dir).await?;
            app.coordinator
                .create_directory(&cwd, &name, owner.as_deref())
                .await
                .map_err(op)
        }
        Command::Touch {
            dir,
            name,
            content,
            owner,
        } => {
            let cwd = app.current_dir(&dir).await?;
            let request = CreateFile {
                content,
                owner,
                ..CreateFile::named(name)
            };
            app.coordinator.create_file(&cwd, &request).await.map_err(op)
        }
        Command::Rename {
            dir,
            name,
            new_name,
            overwrite,
            confirm: confirm_args,
        } => {
            let cwd = app.current_dir(&dir).await?;
            if !overwrite {
                return app.coordinator.rename(&cwd, &name, &new_name).await.map_err(op);
            }
            let plan = app
                .coordinator
                .plan_overwrite(&cwd, &name, &new_name)
                .map_err(op)?;
            if !confirm(&plan, confirm_args).await? {
                return Ok(());
            }
            app.coordinator
                .rename_overwrite(&plan.confirm())
                .await
                .map_err(op)
        }
        Command::Rm {
            dir,
            names,
            force,
            confirm: confirm_args,
        } => rm(&app, &dir, &names, force, confirm_args).await,
        Command::Paste {
            from,
            into,
            names,
            owner,
            keep_owners,
        } => paste(&app, &from, &into, names, owner, keep_owners).await,
        Command::Upload {
            dir,
            files,
            on_conflict,
        } => upload(&app, &dir, files, on_conflict).await,
        Command::Chmod {
            dir,
            mode,
            names,
            recursive,
            owner,
            group,
            rename,
        } => {
            let mode = u32::from_str_radix(&mode, 8)
                .ok()
                .filter(|m| *m <= 0o7777)
                .ok_or_else(|| anyhow!("Invalid mode {mode:?}, expected octal like 644"))?;
            let change = PermissionChange {
                mode: Some(mode),
                owner,
                group,
                new_name: rename,
            };
            chmod(&app, &dir, &names, change, recursive).await
        }
        Command::Ln {
            dir,
            target,
            name,
            absolute,
        } => {
            let cwd = app.current_dir(&dir).await?;
            let mut request = SymlinkRequest::to(&target);
            if let Some(name) = name {
                request.link_name = name;
            }
            if absolute {
                request.mode = LinkMode::Absolute;
            }
            app.coordinator
                .create_symlink(&cwd, &request)
                .await
                .map_err(op)
        }
        Command::Edit { path, from, force } => edit(&app, &path, from, force).await,
        Command::Settings {
            view,
            sort,
            show_hidden,
        } => settings(&app, view, sort, show_hidden),
    }
}

async fn ls(app: &App, path: &str, all: bool, sort: Option<SortArg>, filter: &str) -> Result<()> {
    let settings = Settings::load(&app.store);
    let session = app.open(path).await?;
    let state = session.state();
    let rows = visible_entries(
        &folder_entries(&state),
        sort.map(Sort::from).unwrap_or(settings.sort),
        all || settings.show_hidden,
        filter,
    );
    for row in &rows {
        println!("{}", format_row(row));
    }
    Ok(())
}

fn format_row(row: &FolderEntry) -> String {
    let info = &row.info;
    let kind = match info.file_type {
        Some(file_type) => file_type.description(),
        None => "-",
    };
    let perms = info.mode.map(mode::short_str).unwrap_or_default();
    let owner = info.owner_spec().unwrap_or_default();
    let size = info.size.map(|s| s.to_string()).unwrap_or_default();
    let modified = info
        .mtime
        .and_then(|secs| DateTime::from_timestamp(secs as i64, 0))
        .map(|utc| utc.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default();
    let mut name = row.name.clone();
    if let Some(target) = &info.target {
        name.push_str(" -> ");
        name.push_str(target);
    }
    if can_open_in_editor(row) {
        if let Some(category) = row.category {
            name.push_str(&format!("  [{}]", category.name()));
        }
    }
    format!("{kind:<14} {perms:<11} {owner:<20} {size:>10} {modified:<16} {name}")
}

async fn watch(app: &App, path: &str) -> Result<()> {
    let path = absolute(path)?;
    let session = DirectoryWatchSession::open_directory(Arc::clone(&app.host.directories), &path).await;
    let mut updates = session.updates();
    let mut known: BTreeSet<String> = BTreeSet::new();
    let mut had_error = false;

    loop {
        {
            let state = updates.borrow_and_update().clone();
            if let Some(error) = &state.error {
                if !had_error {
                    println!("! {}", error.display_message());
                }
                had_error = true;
                known.clear();
            } else if !state.loading {
                had_error = false;
                let current: BTreeSet<String> = state.entries().keys().cloned().collect();
                for added in current.difference(&known) {
                    println!("+ {added}");
                }
                for removed in known.difference(&current) {
                    println!("- {removed}");
                }
                known = current;
            }
        }

        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

async fn rm(app: &App, dir: &str, names: &[String], force: bool, args: ConfirmArgs) -> Result<()> {
    let cwd = app.current_dir(dir).await?;
    let mut plan = app.coordinator.plan_delete(&cwd, names).map_err(op)?;
    if force {
        if let Some(forced) = plan.escalate() {
            plan = forced;
        }
    }
    if !confirm(&plan, args).await? {
        return Ok(());
    }

    let Err(err) = app.coordinator.delete(&plan.clone().confirm()).await else {
        return Ok(());
    };
    let Some(forced) = plan.escalate() else {
        return Err(op(err));
    };
    eprintln!("{}", err.user_message());
    if args.yes || !confirm(&forced, args).await? {
        return Err(op(err));
    }
    app.coordinator.delete(&forced.confirm()).await.map_err(op)
}

async fn paste(
    app: &App,
    from: &str,
    into: &str,
    names: Vec<String>,
    owner: Option<String>,
    keep_owners: bool,
) -> Result<()> {
    let context = app.coordinator.context();
    context.set_clipboard(Clipboard::new(&absolute(from)?, names));
    let cwd = app.current_dir(into).await?;

    match app.coordinator.paste(&cwd).await.map_err(op)? {
        PasteOutcome::Pasted => Ok(()),
        PasteOutcome::NeedsOwner(options) => {
            let choice = match (owner, keep_owners) {
                (Some(owner), _) => OwnerChoice::Owner(owner),
                (None, true) => OwnerChoice::Original,
                (None, false) => {
                    eprintln!("Copying needs elevated privileges. Choose an owner:");
                    for option in &options {
                        eprintln!("  {}", option.label);
                    }
                    bail!("Run again with --owner <user:group> or --keep-owners");
                }
            };
            app.coordinator
                .paste_as_owner(&cwd, &choice)
                .await
                .map_err(op)
        }
    }
}

/// Asks on the terminal about every name collision.
struct PromptResolver;

#[async_trait]
impl ConflictResolver for PromptResolver {
    async fn resolve(&mut self, conflict: &Conflict<'_>) -> Option<Resolution> {
        let modified = conflict
            .existing
            .mtime
            .and_then(|secs| DateTime::from_timestamp(secs as i64, 0))
            .map(|utc| utc.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let choices = if conflict.multi {
            "[r]eplace, [s]kip, [R]eplace all, [S]kip all, [c]ancel"
        } else {
            "[r]eplace, [c]ancel"
        };
        let question = format!(
            "{}{} already exists ({} bytes, modified {modified}). {choices}?",
            conflict.directory,
            conflict.name,
            conflict.existing.size.unwrap_or(0),
        );

        loop {
            let answer = ask(question.clone()).await.ok()?;
            let (action, apply_to_all) = match (answer.as_str(), conflict.multi) {
                ("r", _) => (ConflictAction::Replace, false),
                ("R", true) => (ConflictAction::Replace, true),
                ("s", true) => (ConflictAction::Skip, false),
                ("S", true) => (ConflictAction::Skip, true),
                ("c" | "", _) => return None,
                _ => continue,
            };
            return Some(Resolution {
                action,
                apply_to_all,
            });
        }
    }
}

async fn upload(app: &App, dir: &str, files: Vec<PathBuf>, on_conflict: OnConflict) -> Result<()> {
    let cwd = app.current_dir(dir).await?;

    let mut sources = Vec::with_capacity(files.len());
    for path in &files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow!("{} has no file name", path.display()))?;
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("Cannot open {}", path.display()))?;
        let meta = file.metadata().await?;
        let mut source = UploadSource::new(name, meta.len(), Box::new(file));
        if let Ok(modified) = meta.modified() {
            source = source.with_modified(modified);
        }
        sources.push(source);
    }

    let report = match on_conflict {
        OnConflict::Ask => {
            app.coordinator
                .upload(&cwd, sources, &mut PromptResolver)
                .await
        }
        OnConflict::Replace | OnConflict::Skip => {
            let mut fixed = Resolution {
                action: if on_conflict == OnConflict::Replace {
                    ConflictAction::Replace
                } else {
                    ConflictAction::Skip
                },
                apply_to_all: true,
            };
            app.coordinator.upload(&cwd, sources, &mut fixed).await
        }
    }
    .map_err(op)?;

    print_alerts(app);
    summarize_upload(&report)
}

fn print_alerts(app: &App) {
    for alert in app.coordinator.context().alerts() {
        let marker = match alert.variant {
            AlertVariant::Success => "ok",
            AlertVariant::Info => "info",
            AlertVariant::Warning => "warning",
            AlertVariant::Danger => "error",
        };
        match &alert.detail {
            Some(detail) => eprintln!("[{marker}] {}: {}", alert.title, detail.replace('\n', "; ")),
            None => eprintln!("[{marker}] {}", alert.title),
        }
    }
}

fn summarize_upload(report: &UploadReport) -> Result<()> {
    if report.batch_cancelled {
        bail!("Upload cancelled");
    }
    for name in &report.skipped {
        println!("skipped {name}");
    }
    for name in &report.uploaded {
        println!("uploaded {name}");
    }
    if report.failed.is_empty() {
        Ok(())
    } else {
        bail!("{} of the files could not be uploaded", report.failed.len())
    }
}

async fn chmod(
    app: &App,
    dir: &str,
    names: &[String],
    change: PermissionChange,
    recursive: bool,
) -> Result<()> {
    let cwd = app.current_dir(dir).await?;
    let mode = change.mode.unwrap_or(0);
    let single = change.owner.is_some() || change.group.is_some() || change.new_name.is_some();

    if recursive {
        for name in names {
            app.coordinator
                .chmod_recursive(&cwd, name, mode)
                .await
                .map_err(op)?;
        }
        return Ok(());
    }

    match names {
        [name] => {
            let applied = app
                .coordinator
                .edit_permissions(&cwd, name, &change)
                .await
                .map_err(|err| {
                    if let OpError::Step { completed, .. } = &err {
                        for step in completed {
                            eprintln!("{step} applied");
                        }
                    }
                    op(err)
                })?;
            debug!(?applied, "Permissions edited");
            let current = change.new_name.as_deref().unwrap_or(name);
            if let Some(context) = app.coordinator.selinux_context(&cwd, current).await {
                println!("SELinux context: {context}");
            }
            Ok(())
        }
        _ if single => bail!("--owner, --group and --rename apply to a single entry"),
        _ => {
            let report = app.coordinator.chmod_batch(&cwd, names, mode).await;
            for (name, err) in &report.failed {
                eprintln!("{name}: {}", err.user_message());
            }
            if report.is_complete() {
                Ok(())
            } else {
                bail!("{} of {} entries were not changed", report.failed.len(), names.len())
            }
        }
    }
}

async fn edit(app: &App, path: &str, from: Option<PathBuf>, force: bool) -> Result<()> {
    let path = absolute(path)?;
    let content = match from {
        Some(file) => tokio::fs::read_to_string(&file)
            .await
            .with_context(|| format!("Cannot read {}", file.display()))?,
        None => tokio::task::spawn_blocking(|| {
            let mut buffer = String::new();
            std::io::Read::read_to_string(&mut std::io::stdin(), &mut buffer).map(|_| buffer)
        })
        .await
        .context("Reading stdin failed")??,
    };

    let mut session = EditorSession::open(
        Arc::clone(&app.host.files),
        Arc::clone(&app.host.commands),
        &path,
    )
    .await;
    let state = session.state();
    if let Some(failure) = state.visible_error() {
        bail!("{}", failure.message());
    }

    session.modify(content);
    let saved = if force {
        session.overwrite().await
    } else {
        session.save().await
    };
    session.close();

    match saved {
        Ok(()) => Ok(()),
        Err(err) => {
            if matches!(&err, filedeck_core::errors::EditorError::File(FileError::Conflict(_))) {
                eprintln!("{path} changed on disk; run again with --force to replace it");
            }
            Err(err.into())
        }
    }
}

fn settings(
    app: &App,
    view: Option<ViewArg>,
    sort: Option<SortArg>,
    show_hidden: Option<bool>,
) -> Result<()> {
    let mut settings = Settings::load(&app.store);
    let before = settings;
    if let Some(view) = view {
        settings.view = view.into();
    }
    if let Some(sort) = sort {
        settings.sort = sort.into();
    }
    if let Some(show_hidden) = show_hidden {
        settings.show_hidden = show_hidden;
    }
    if settings != before {
        settings.save(&app.store)?;
        info!(path = %app.store.path().display(), "Settings saved");
    }
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}
