use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use shark::{
    ChangeState, Config, FileStatus, GitError, GitFacade, PullOutcome, RepositoryRegistry,
    ResetMode, config, identity::ManualUser, init_logger, init_tracing_to_file,
};
use std::path::{Path, PathBuf};
use std::process::exit;

#[derive(Parser)]
#[command(version, author, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
    /// Repository working directory
    #[arg(global = true, short = 'C', long, default_value = ".")]
    repo: PathBuf,
    /// Write JSON logs to this directory instead of stderr
    #[arg(global = true, long)]
    log_dir: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Soft,
    Mixed,
    Hard,
}

impl From<Mode> for ResetMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Soft => Self::Soft,
            Mode::Mixed => Self::Mixed,
            Mode::Hard => Self::Hard,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Create a repository in the working directory
    Init,
    /// Clone a repository into a new directory
    Clone { url: String, dest: PathBuf },
    /// Show staged and unstaged changes
    Status,
    /// Show history, newest first
    Log {
        /// Revision range such as `main..feature`
        range: Option<String>,
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        skip: usize,
    },
    /// Show one commit and the files it changed
    Show {
        #[arg(default_value = "HEAD")]
        revision: String,
    },
    /// Stage files
    Add {
        files: Vec<String>,
        #[arg(short, long)]
        all: bool,
    },
    /// Unstage files
    Unstage { files: Vec<String> },
    /// Discard working tree changes in files
    Discard { files: Vec<String> },
    /// Move the current branch to a revision
    Reset {
        revision: String,
        #[arg(long, value_enum, default_value = "mixed")]
        mode: Mode,
    },
    /// Commit staged changes as the configured identity
    Commit {
        #[arg(short, long)]
        message: String,
        /// Author as `Name <email>` when it differs from the committer
        #[arg(long)]
        author: Option<String>,
    },
    /// Manage branches
    Branch {
        #[command(subcommand)]
        action: Option<BranchAction>,
    },
    /// Manage remotes
    Remote {
        #[command(subcommand)]
        action: Option<RemoteAction>,
    },
    Fetch {
        #[arg(default_value = "origin")]
        remote: String,
    },
    Pull {
        #[arg(default_value = "origin")]
        remote: String,
    },
    Push {
        #[arg(default_value = "origin")]
        remote: String,
        branch: Option<String>,
        #[arg(short = 'u', long)]
        set_upstream: bool,
    },
    /// Show or set the commit identity
    Identity {
        /// Manual user name; needs an email too
        #[arg(requires = "email")]
        name: Option<String>,
        email: Option<String>,
        /// Sign commits with the GitHub account
        #[arg(long)]
        github: Option<bool>,
    },
    /// Store the HTTPS token for the configured username in the OS keyring
    Token { token: String },
    /// Manage the list of known repositories
    Repos {
        #[command(subcommand)]
        action: Option<ReposAction>,
    },
}

#[derive(Subcommand)]
enum BranchAction {
    List,
    Create {
        name: String,
        start_point: Option<String>,
        #[arg(short, long)]
        checkout: bool,
    },
    Delete { name: String },
    Rename { old: String, new: String },
    Checkout { name: String },
}

#[derive(Subcommand)]
enum RemoteAction {
    List,
    Add { name: String, url: String },
}

#[derive(Subcommand)]
enum ReposAction {
    List,
    Add {
        path: PathBuf,
    },
    Rename {
        path: PathBuf,
        name: String,
    },
    /// Forget a repository, optionally deleting it from disk
    Remove {
        path: PathBuf,
        #[arg(long)]
        delete_files: bool,
    },
}

fn state_label(state: ChangeState) -> &'static str {
    match state {
        ChangeState::Added => "added",
        ChangeState::Modified => "modified",
        ChangeState::Deleted => "deleted",
        ChangeState::Untracked => "untracked",
        ChangeState::Conflicted => "conflicted",
    }
}

fn print_status(files: &[FileStatus]) {
    if files.is_empty() {
        println!("{}", "Nothing to commit, working tree clean".green());
        return;
    }
    for file in files.iter().filter(|f| f.staged.is_some()) {
        if let Some(state) = file.staged {
            println!("  {} {}", format!("{:>10}", state_label(state)).green(), file.path);
        }
    }
    for file in files.iter().filter(|f| f.unstaged.is_some()) {
        if let Some(state) = file.unstaged {
            println!("  {} {}", format!("{:>10}", state_label(state)).red(), file.path);
        }
    }
}

fn parse_person(raw: &str) -> Result<shark::Person> {
    let (name, rest) = raw
        .split_once('<')
        .ok_or_else(|| anyhow!("Expected `Name <email>`, got '{raw}'"))?;
    let email = rest.trim_end().trim_end_matches('>');
    let user = ManualUser::validate(name, email)
        .map_err(|e| anyhow!("Invalid author: {}", e.name.or(e.email).unwrap_or_default()))?;
    Ok(shark::Person::new(user.name, user.email))
}

async fn run_repos(
    action: Option<ReposAction>,
    config: &Config,
    facade: &GitFacade,
) -> Result<()> {
    let mut registry = match config.registry_path() {
        Some(path) => RepositoryRegistry::load(path)?,
        None => RepositoryRegistry::open_default()?,
    };
    match action.unwrap_or(ReposAction::List) {
        ReposAction::List => {
            for repo in registry.list() {
                println!(
                    "{} {} {}",
                    repo.name.bold(),
                    format!("[{}]", repo.current_branch).cyan(),
                    repo.path.display()
                );
            }
            return Ok(());
        }
        ReposAction::Add { path } => {
            let info = facade.repository_info(&path).await?;
            registry.add(&info.path, &info.name, &info.current_branch)?;
        }
        ReposAction::Rename { path, name } => registry.rename(&path, &name)?,
        ReposAction::Remove { path, delete_files } => {
            if delete_files {
                facade.delete_repository(&path).await?;
            }
            registry.remove(&path)?;
        }
    }
    registry.save()
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load()?;
    let facade = GitFacade::from_config(&config);
    let repo: &Path = &cli.repo;

    match cli.command {
        Command::Init => {
            let info = facade.init(repo).await?;
            println!(
                "Initialized {} on branch {}",
                info.name.bold(),
                info.current_branch.cyan()
            );
        }
        Command::Clone { url, dest } => {
            let info = facade.clone_repository(&url, &dest).await?;
            println!("Cloned into {} ({})", info.name.bold(), info.current_branch.cyan());
        }
        Command::Status => {
            let branch = facade.current_branch(repo).await?;
            println!("On branch {}", branch.cyan());
            print_status(&facade.status(repo).await?);
        }
        Command::Log { range, limit, skip } => {
            for commit in facade.log_page(repo, range.as_deref(), skip, limit).await? {
                println!(
                    "{} {} {}",
                    commit.short_sha().yellow(),
                    commit.title,
                    format!("({})", commit.effective_author().name).dimmed()
                );
            }
        }
        Command::Show { revision } => {
            let commit = facade.read_commit(repo, &revision).await?;
            println!("{} {}", "commit".yellow(), commit.sha.yellow());
            if commit.has_single_author() {
                println!("Author: {} <{}>", commit.committer.name, commit.committer.email);
            } else {
                let author = commit.effective_author();
                println!("Author:    {} <{}>", author.name, author.email);
                println!("Committer: {} <{}>", commit.committer.name, commit.committer.email);
            }
            println!("Date:   {}\n", commit.author_time.to_rfc2822());
            let header = commit.header();
            println!("    {}", header.title.bold());
            if !header.body.is_empty() {
                println!("\n    {}", header.body.replace('\n', "\n    "));
            }
            println!();
            for change in facade.commit_changes(repo, &commit.sha).await? {
                match change.old_path {
                    Some(old) => println!("  renamed {old} -> {}", change.path),
                    None => println!("  {:>10} {}", state_label(change.state), change.path),
                }
            }
        }
        Command::Add { files, all } => {
            if all {
                facade.stage_all(repo).await?;
            } else {
                facade.stage(repo, &files).await?;
            }
        }
        Command::Unstage { files } => facade.unstage(repo, &files).await?,
        Command::Discard { files } => facade.reset_files(repo, &files).await?,
        Command::Reset { revision, mode } => facade.reset(repo, &revision, mode.into()).await?,
        Command::Commit { message, author } => {
            let author = author.as_deref().map(parse_person).transpose()?;
            let commit = facade.commit(repo, &message, &config.identity, author).await?;
            println!("[{}] {}", commit.short_sha().yellow(), commit.title);
        }
        Command::Branch { action } => match action.unwrap_or(BranchAction::List) {
            BranchAction::List => {
                for branch in facade.list_branches(repo).await? {
                    let marker = if branch.is_head { "*" } else { " " };
                    let name = if branch.is_remote {
                        branch.full_name().red()
                    } else if branch.is_head {
                        branch.full_name().green()
                    } else {
                        branch.full_name().normal()
                    };
                    match &branch.upstream {
                        Some(upstream) => println!("{marker} {name} -> {upstream}"),
                        None => println!("{marker} {name}"),
                    }
                }
            }
            BranchAction::Create {
                name,
                start_point,
                checkout,
            } => {
                facade
                    .create_branch(repo, &name, start_point.as_deref(), checkout)
                    .await?;
            }
            BranchAction::Delete { name } => facade.delete_local_branch(repo, &name).await?,
            BranchAction::Rename { old, new } => {
                facade.rename_branch(repo, &old, &new).await?;
            }
            BranchAction::Checkout { name } => {
                let branch = facade.checkout_branch(repo, &name).await?;
                println!("Switched to branch {}", branch.name.cyan());
            }
        },
        Command::Remote { action } => match action.unwrap_or(RemoteAction::List) {
            RemoteAction::List => {
                for remote in facade.list_remotes(repo).await? {
                    println!("{}\t{}", remote.name.bold(), remote.url);
                }
            }
            RemoteAction::Add { name, url } => {
                facade.create_remote(repo, &name, &url).await?;
            }
        },
        Command::Fetch { remote } => facade.fetch(repo, &remote).await?,
        Command::Pull { remote } => match facade.pull(repo, &remote, &config.identity).await? {
            PullOutcome::UpToDate => println!("{}", "Already up to date".green()),
            PullOutcome::FastForward { to } => println!("Fast-forwarded to {}", to.yellow()),
            PullOutcome::Merged { commit } => println!("Merged as {}", commit.yellow()),
        },
        Command::Push {
            remote,
            branch,
            set_upstream,
        } => {
            facade
                .push(repo, &remote, branch.as_deref(), set_upstream)
                .await?;
            if let Some(counts) = facade
                .push_pull_counts(repo, &facade.current_branch(repo).await?)
                .await
                .ok()
                .flatten()
            {
                println!("{} to push, {} to pull", counts.to_push, counts.to_pull);
            }
        }
        Command::Identity {
            name,
            email,
            github,
        } => {
            if let (Some(name), Some(email)) = (&name, &email) {
                config.identity.set_manual(name, email).map_err(|e| {
                    anyhow!(
                        "{}",
                        [e.name.map(|m| format!("name: {m}")), e.email.map(|m| format!("email: {m}"))]
                            .into_iter()
                            .flatten()
                            .collect::<Vec<_>>()
                            .join(", ")
                    )
                })?;
            }
            if let Some(github) = github {
                if github != config.identity.use_github && !config.identity.toggle_github() {
                    return Err(anyhow!("Sign in with GitHub before switching to it"));
                }
            }
            if name.is_some() || github.is_some() {
                config.save()?;
            }
            let person = config.identity.active().context("No identity configured")?;
            let source = if config.identity.is_github_active() { "GitHub" } else { "manual" };
            println!("{} <{}> ({source})", person.name.bold(), person.email);
        }
        Command::Token { token } => {
            let username = config
                .username
                .as_deref()
                .context("Set shark.username before storing a token")?;
            config::store_token(username, &token)?;
            println!("{}", "Token saved".green());
        }
        Command::Repos { action } => run_repos(action, &config, &facade).await?,
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    match &cli.log_dir {
        Some(dir) => {
            if let Err(e) = init_tracing_to_file(dir) {
                eprintln!("{}", format!("{e}").red());
                exit(1);
            }
        }
        None => init_logger(),
    }

    if let Err(e) = run(cli).await {
        for (i, line) in error_report(&e).iter().enumerate() {
            if i == 0 {
                eprintln!("{}", line.red());
            } else {
                eprintln!("  {line}");
            }
        }
        exit(1);
    }
}

/// Lines printed for a failed command: the explanation first, then details.
fn error_report(e: &anyhow::Error) -> Vec<String> {
    let Some(git) = e.downcast_ref::<GitError>() else {
        return vec![format!("Error: {e:#}")];
    };
    let shown = git.user_facing();
    let mut lines = vec![format!("Error: {}", shown.explain_message), format!("{e:#}")];
    if let GitError::MergeConflict { files, .. } = git {
        lines.extend(files.iter().map(|file| format!("conflict {file}")));
    }
    lines
}
