use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use git_stagehand::linemap::{LayoutOptions, Row, RowType};
use git_stagehand::view::{StatusView, StatusViewOptions};
use git_stagehand::{
    Config, DiffRequest, DiffView, FileSelection, Operation, RepoRegistry, Stagehand,
};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "git-stagehand", version)]
#[command(about = "Line-level git staging with a live status view")]
struct Cli {
    /// Run as if started in this directory
    #[arg(short = 'C', global = true, default_value = ".")]
    directory: PathBuf,

    /// Configuration file [default: $CONFIG/git-stagehand/config.toml]
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show branch, changes and recent commits
    Status,
    /// Show changes with the line numbers selections refer to
    Diff {
        /// Show staged changes
        #[arg(long)]
        cached: bool,
        /// Show old and new side by side
        #[arg(long)]
        side_by_side: bool,
        paths: Vec<String>,
    },
    /// Stage lines by reference (e.g., file.nix:10..15,-20)
    Stage {
        /// File and line references (e.g., "flake.nix:137" or "flake.nix:h2")
        #[arg(required = true)]
        selections: Vec<String>,
    },
    /// Unstage lines by reference, numbered as in `diff --cached`
    Unstage {
        #[arg(required = true)]
        selections: Vec<String>,
    },
    /// Throw away worktree lines by reference
    Discard {
        #[arg(required = true)]
        selections: Vec<String>,
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Print the status and refresh it whenever the repository changes
    Watch,
    /// Print shell completions
    Completions { shell: Shell },
    /// Print the man page
    Man,
}

fn init_tracing(verbose: bool) {
    let level = if verbose {
        "git_stagehand=debug"
    } else {
        "git_stagehand=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn parse_selections(raw: &[String]) -> Result<Vec<FileSelection>, git_stagehand::SelectorError> {
    raw.iter().map(|selection| selection.parse()).collect()
}

fn confirm(prompt: &str) -> bool {
    eprint!("{prompt} [y/N] ");
    let _ = std::io::stderr().flush();
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer).is_ok()
        && matches!(answer.trim(), "y" | "Y" | "yes")
}

fn side_by_side(rows: (&[Row], &[Row])) -> String {
    let cell = |row: &Row| match row.kind {
        RowType::Header => row.text.clone(),
        RowType::Filler => String::new(),
        kind => format!("{}{}", marker(kind), row.text),
    };
    let width = rows
        .0
        .iter()
        .map(|row| cell(row).chars().count())
        .max()
        .unwrap_or(0)
        .min(80);

    let mut output = String::new();
    for (left, right) in rows.0.iter().zip(rows.1) {
        if left.kind == RowType::Header {
            output.push_str(&format!("{}\n", left.text));
            continue;
        }
        let left: String = cell(left).chars().take(width).collect();
        output.push_str(&format!("{left:<width$} | {}\n", cell(right)));
    }
    output
}

fn marker(kind: RowType) -> char {
    match kind {
        RowType::Add => '+',
        RowType::Delete => '-',
        RowType::Context | RowType::Filler | RowType::Header => ' ',
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "git-stagehand", &mut std::io::stdout());
            return Ok(());
        }
        Commands::Man => {
            clap_mangen::Man::new(Cli::command()).render(&mut std::io::stdout())?;
            return Ok(());
        }
        _ => {}
    }

    let config = Config::load(cli.config.as_deref())?;
    let mut registry = RepoRegistry::default();
    let stagehand = Stagehand::open(&mut registry, &cli.directory, config).await?;

    match cli.command {
        Commands::Status => {
            let options = StatusViewOptions {
                watch: None,
                ..StatusViewOptions::from(stagehand.config())
            };
            let view = StatusView::open(stagehand.repo().clone(), options).await?;
            print!("{}", view.tree());
        }
        Commands::Diff {
            cached,
            side_by_side: true,
            paths,
        } => {
            let request = if cached {
                DiffRequest::staged()
            } else {
                DiffRequest::unstaged()
            }
            .with_context(stagehand.config().diff.context.0)
            .with_paths(paths);
            let view =
                DiffView::open(stagehand.repo().clone(), request, LayoutOptions::default()).await?;
            let buffers = view.buffers();
            print!(
                "{}",
                side_by_side((buffers.left.rows(), buffers.right.rows()))
            );
        }
        Commands::Diff { cached, paths, .. } => {
            let output = stagehand.diff(&paths, cached).await?;
            if output.is_empty() {
                println!("No changes");
            } else {
                print!("{output}");
            }
        }
        Commands::Stage { selections } => {
            let lines = stagehand
                .apply(Operation::Stage, &parse_selections(&selections)?)
                .await?;
            eprintln!("Staged {lines} line(s)");
        }
        Commands::Unstage { selections } => {
            let lines = stagehand
                .apply(Operation::Unstage, &parse_selections(&selections)?)
                .await?;
            eprintln!("Unstaged {lines} line(s)");
        }
        Commands::Discard { selections, yes } => {
            let selections = parse_selections(&selections)?;
            if !yes && !confirm("Discard the selected worktree changes?") {
                eprintln!("Nothing discarded");
                return Ok(());
            }
            let lines = stagehand.apply(Operation::Discard, &selections).await?;
            eprintln!("Discarded {lines} line(s)");
        }
        Commands::Watch => {
            let watcher = &stagehand.config().watcher;
            let mut watch = watcher.options();
            // Redraw on every change, not only when auto refresh is configured
            watch.auto_refresh = Some(Duration::from_millis(watcher.auto_refresh_debounce_ms));
            let options = StatusViewOptions {
                watch: Some(watch),
                ..StatusViewOptions::from(stagehand.config())
            };

            let mut view = StatusView::open(stagehand.repo().clone(), options).await?;
            if !view.is_watching() {
                return Err("could not watch the repository".into());
            }
            print!("{}", view.tree());

            loop {
                tokio::select! {
                    signal = view.next_signal() => {
                        let Some(signal) = signal else { break };
                        let was_stale = view.is_stale();
                        view.handle_signal(signal).await?;
                        if view.is_stale() && !was_stale {
                            eprintln!("-- repository changed --");
                        } else if !view.is_stale() {
                            println!();
                            print!("{}", view.tree());
                        }
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        }
        Commands::Completions { .. } | Commands::Man => {}
    }

    Ok(())
}
