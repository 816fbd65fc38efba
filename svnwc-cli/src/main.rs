//! svnwc working-copy administration CLI

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use svnwc_core::{
    AccessLevel, CancellationToken, Depth, Kind, NodeInfo, OpenMode, PathBasedAccess, ReposLocation, Status,
    WcConfig, WcDb, executor_from_config, run_work_queue,
};
use svnwc_dav::{Dialect, EditorHandler, WcUpdateEditor};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "svnwc")]
#[command(author = "svnwc Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Subversion working-copy metadata tool")]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create an empty working copy
    Init {
        path: PathBuf,
        /// Repository root URL
        #[arg(long)]
        url: String,
        /// Repository UUID
        #[arg(long)]
        uuid: String,
        /// Path below the repository root mirrored by the working copy root
        #[arg(long, default_value = "")]
        repos_path: String,
        #[arg(short, long, default_value_t = 0)]
        revision: i64,
    },

    /// Show what the working copy records about a node
    Info { path: PathBuf },

    /// List locally changed nodes
    Status { path: PathBuf },

    /// Drive an update or replay report into the working copy
    Replay {
        path: PathBuf,
        #[arg(short, long)]
        report: PathBuf,
        #[arg(short, long, value_enum, default_value_t = ReportDialect::Update)]
        dialect: ReportDialect,
    },

    /// Run pending work-queue items
    Cleanup { path: PathBuf },

    /// Take the write lock on a directory
    Lock {
        path: PathBuf,
        /// Levels below the directory to cover; negative for the whole subtree
        #[arg(short, long, default_value_t = -1, allow_negative_numbers = true)]
        levels: i64,
    },

    /// Release a directory's write lock
    Unlock { path: PathBuf },

    /// Check every stored pristine against its checksum
    VerifyPristines { path: PathBuf },

    /// Print the access a user has to a repository path
    AuthzCheck {
        file: PathBuf,
        /// User name, or `$anonymous`
        user: String,
        path: String,
        /// Repository name for `[repo:/path]` sections
        #[arg(long)]
        repository: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ReportDialect {
    Update,
    Replay,
}

impl From<ReportDialect> for Dialect {
    fn from(dialect: ReportDialect) -> Self {
        match dialect {
            ReportDialect::Update => Dialect::Update,
            ReportDialect::Replay => Dialect::Replay,
        }
    }
}

fn init_logging(debug: bool) {
    let env_filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };
    tracing_subscriber::registry().with(fmt::layer().with_writer(std::io::stderr)).with(env_filter).init();
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).with_context(|| format!("cannot resolve '{}'", path.display()))
}

fn open(path: &Path, mode: OpenMode) -> Result<WcDb> {
    WcDb::open(path, mode).with_context(|| format!("cannot open working copy at '{}'", path.display()))
}

fn format_date(micros: i64) -> String {
    chrono::DateTime::from_timestamp_micros(micros)
        .map(|d| d.to_rfc3339())
        .unwrap_or_else(|| micros.to_string())
}

fn print_info(abspath: &Path, info: &NodeInfo) {
    println!("Path: {}", abspath.display());
    println!("Node Kind: {}", info.kind);
    println!("Status: {:?}", info.status);
    if let Some(repos) = &info.repos {
        println!("URL: {}", repos.url());
        println!("Repository Root: {}", repos.root_url);
        println!("Repository UUID: {}", repos.uuid);
    }
    if let Some(rev) = info.revision {
        println!("Revision: {}", rev);
    }
    if let Some(depth) = info.depth {
        println!("Depth: {}", depth);
    }
    if let Some(author) = &info.changed.author {
        println!("Last Changed Author: {}", author);
    }
    if let Some(rev) = info.changed.rev {
        println!("Last Changed Rev: {}", rev);
    }
    if let Some(date) = info.changed.date {
        println!("Last Changed Date: {}", format_date(date));
    }
    if let Some(checksum) = &info.checksum {
        println!("Checksum: {}", checksum);
    }
    if let Some(source) = &info.original_repos_relpath {
        println!("Copied From: {}@{}", source, info.original_revision.unwrap_or(-1));
    }
    if let Some(changelist) = &info.changelist {
        println!("Changelist: {}", changelist);
    }
    if let Some(lock) = &info.lock {
        println!("Lock Token: {}", lock.token);
        if let Some(owner) = &lock.owner {
            println!("Lock Owner: {}", owner);
        }
    }
    if info.conflicted {
        println!("Conflicted: yes");
    }
}

/// Two-column status code, or `None` for nodes with nothing to report.
fn status_code(info: &NodeInfo) -> Option<String> {
    let node = match info.status {
        Status::Absent | Status::Excluded | Status::NotPresent => return None,
        Status::Added | Status::Copied | Status::MovedHere => 'A',
        Status::Deleted | Status::BaseDeleted | Status::ObstructedDelete => 'D',
        Status::Incomplete | Status::Obstructed | Status::ObstructedAdd => '!',
        Status::Normal if info.text_mod => 'M',
        Status::Normal => ' ',
    };
    let node = if info.conflicted { 'C' } else { node };
    let props = if info.props_mod { 'M' } else { ' ' };
    (node != ' ' || props != ' ').then(|| format!("{}{}", node, props))
}

fn walk_status(db: &WcDb, abspath: &Path) -> Result<usize> {
    let info = db.read_info(abspath)?;
    let mut reported = 0;
    if let Some(code) = status_code(&info) {
        println!("{}      {}", code, abspath.display());
        reported += 1;
    }
    if info.kind == Kind::Dir {
        for name in db.read_children(abspath)? {
            reported += walk_status(db, &abspath.join(name))?;
        }
    }
    Ok(reported)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    match cli.command {
        Commands::Init { path, url, uuid, repos_path, revision } => {
            let repos = ReposLocation::new(repos_path, url, uuid);
            let db = WcDb::init(&path, &repos, revision, Depth::Infinity, WcConfig::default())
                .with_context(|| format!("cannot create working copy at '{}'", path.display()))?;
            db.config().save(&db.admin_dir())?;
            println!("Working copy created at {} ({}@{})", db.root().display(), repos.url(), revision);
        }

        Commands::Info { path } => {
            let abspath = absolute(&path)?;
            let db = open(&abspath, OpenMode::ReadOnly)?;
            let info = db.read_info(&abspath)?;
            print_info(&abspath, &info);
        }

        Commands::Status { path } => {
            let abspath = absolute(&path)?;
            let db = open(&abspath, OpenMode::ReadOnly)?;
            let reported = walk_status(&db, &abspath)?;
            info!("{} nodes with local changes", reported);
        }

        Commands::Replay { path, report, dialect } => {
            let db = open(&path, OpenMode::ReadWrite)?;
            let cancel = CancellationToken::new();
            let editor = WcUpdateEditor::new(&db).with_cancellation(cancel.clone());
            let mut handler = EditorHandler::new(editor, dialect.into()).with_cancellation(cancel);
            let file = File::open(&report).with_context(|| format!("cannot read '{}'", report.display()))?;
            handler.feed(BufReader::new(file)).context("report rejected")?;
            let editor = handler.finish().context("report ended early")?;
            println!("Applied report: {} files changed", editor.files_changed());
        }

        Commands::Cleanup { path } => {
            let db = open(&path, OpenMode::Cleanup)?;
            let ran = run_work_queue(&db, &CancellationToken::new())?;
            let removed = db.cleanup_pristines()?;
            println!("Ran {} work items, removed {} unreferenced pristines", ran, removed);
            if db.config().validate_pristines_on_cleanup {
                let executor = executor_from_config(&db.config().executor)?;
                let corrupt = db.validate_all(executor.as_ref())?;
                if !corrupt.is_empty() {
                    bail!("{} corrupt pristine texts found", corrupt.len());
                }
            }
        }

        Commands::Lock { path, levels } => {
            let abspath = absolute(&path)?;
            let db = open(&abspath, OpenMode::ReadWrite)?;
            db.set_wc_lock(&abspath, levels)?;
            println!("Locked {}", abspath.display());
        }

        Commands::Unlock { path } => {
            let abspath = absolute(&path)?;
            let db = open(&abspath, OpenMode::ReadWrite)?;
            db.remove_wc_lock(&abspath)?;
            println!("Unlocked {}", abspath.display());
        }

        Commands::VerifyPristines { path } => {
            let db = open(&path, OpenMode::ReadOnly)?;
            let executor = executor_from_config(&db.config().executor)?;
            info!("Validating pristines with the {} executor", executor.name());
            let corrupt = db.validate_all(executor.as_ref())?;
            for checksum in &corrupt {
                println!("corrupt: {}", checksum);
            }
            if !corrupt.is_empty() {
                bail!("{} corrupt pristine texts found", corrupt.len());
            }
            println!("All pristine texts verified");
        }

        Commands::AuthzCheck { file, user, path, repository } => {
            let mut authz = PathBasedAccess::from_file(&file)
                .with_context(|| format!("cannot load access file '{}'", file.display()))?;
            if let Some(name) = repository {
                authz = authz.with_repository(&name);
            }
            let username = (user != "$anonymous").then_some(user.as_str());
            let level = match authz.access_level(username, &path) {
                AccessLevel::None => "no access",
                AccessLevel::Read => "r",
                AccessLevel::Write => "rw",
            };
            println!("{}", level);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use svnwc_core::ChangedInfo;
    use tempfile::TempDir;

    fn node(status: Status) -> NodeInfo {
        NodeInfo {
            status,
            kind: Kind::File,
            revision: Some(1),
            repos: None,
            changed: ChangedInfo::default(),
            last_mod_time: None,
            depth: None,
            checksum: None,
            translated_size: None,
            symlink_target: None,
            changelist: None,
            original_repos_relpath: None,
            original_root_url: None,
            original_uuid: None,
            original_revision: None,
            text_mod: false,
            props_mod: false,
            base_shadowed: false,
            conflicted: false,
            lock: None,
        }
    }

    #[test]
    fn test_status_code() {
        assert_eq!(status_code(&node(Status::Normal)), None);
        assert_eq!(status_code(&node(Status::NotPresent)), None);
        assert_eq!(status_code(&node(Status::Added)).as_deref(), Some("A "));
        assert_eq!(status_code(&node(Status::Deleted)).as_deref(), Some("D "));
        assert_eq!(status_code(&node(Status::Incomplete)).as_deref(), Some("! "));

        let mut modified = node(Status::Normal);
        modified.text_mod = true;
        modified.props_mod = true;
        assert_eq!(status_code(&modified).as_deref(), Some("MM"));

        modified.conflicted = true;
        assert_eq!(status_code(&modified).as_deref(), Some("CM"));
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::parse_from(["svnwc", "lock", "wc", "--levels", "2"]);
        assert!(matches!(cli.command, Commands::Lock { levels: 2, .. }));

        let cli = Cli::parse_from(["svnwc", "--debug", "replay", "wc", "--report", "r.xml", "--dialect", "replay"]);
        assert!(cli.debug);
        assert!(matches!(cli.command, Commands::Replay { dialect: ReportDialect::Replay, .. }));

        let cli = Cli::parse_from(["svnwc", "init", "wc", "--url", "http://h/r", "--uuid", "u"]);
        assert!(matches!(cli.command, Commands::Init { revision: 0, .. }));
    }

    #[test]
    fn test_format_date() {
        assert_eq!(format_date(0), "1970-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_walk_status_reports_local_changes() {
        let dir = TempDir::new().unwrap();
        let repos = ReposLocation::new("trunk", "http://svn.example.com/repo", "3f2f1c9d-7e11-4c2b-9a0e-9b6b8bf63e3c");
        let db = WcDb::init(dir.path(), &repos, 0, Depth::Infinity, WcConfig::default()).unwrap();
        let root = db.root().to_path_buf();
        assert_eq!(walk_status(&db, &root).unwrap(), 0);

        db.op_add_directory(&root.join("A")).unwrap();
        db.op_add_file(&root.join("A/new.txt")).unwrap();
        assert_eq!(walk_status(&db, &root).unwrap(), 2);
        assert_eq!(status_code(&db.read_info(&root.join("A/new.txt")).unwrap()).as_deref(), Some("A "));
    }
}
