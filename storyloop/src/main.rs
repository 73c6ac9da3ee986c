//! Test-first story loop CLI.
//!
//! Reads PRDs from `prds/`, drives each story through tests, implementation
//! and the regression gate, and records progress in `state.json` and
//! `history.md`.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};

use storyloop::archive::{AdvanceOutcome, ArchiveStatus};
use storyloop::core::phase::{InMemoryPhaseTracker, PhaseTracker};
use storyloop::exit_codes;
use storyloop::init::{InitOptions, init_project};
use storyloop::io::agent::CliAgent;
use storyloop::io::config::load_config;
use storyloop::io::git::Git;
use storyloop::io::paths::ProjectPaths;
use storyloop::io::phase_store::FilePhaseTracker;
use storyloop::io::prd::list_pending_prds;
use storyloop::io::state_store::{check_state_file, load_state};
use storyloop::io::test_runner::CommandTestRunner;
use storyloop::logging;
use storyloop::looping::{LoopEvent, LoopStop, run_loop};

#[derive(Parser)]
#[command(
    name = "storyloop",
    version,
    about = "Test-first story loop driven by a code agent"
)]
struct Cli {
    /// Project root.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create prds/, tests/, .storyloop/config.toml, history.md and state.json if missing.
    Init {
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
    /// Work through the PRD backlog until it is empty or a story blocks.
    Run,
    /// Print the current position in the backlog.
    Status,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force } => cmd_init(&cli.root, force),
        Command::Run => cmd_run(&cli.root),
        Command::Status => cmd_status(&cli.root),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_project(root, &InitOptions { force })?;
    println!("initialised {}", paths.root.display());
    Ok(exit_codes::OK)
}

fn cmd_run(root: &Path) -> Result<i32> {
    let paths = ProjectPaths::new(root);
    let config = load_config(&paths.config_path)?;
    let runner = CommandTestRunner::new(
        root,
        config.tests.command.clone(),
        config.tests.no_tests_exit_code,
        config.output_limit_bytes,
    );
    let agent = CliAgent::new(root, &paths.sessions_dir, &config)?;
    let git = Git::new(root);
    let mut phases: Box<dyn PhaseTracker> = if config.persist_phases {
        Box::new(FilePhaseTracker::open(&paths.phases_path)?)
    } else {
        Box::new(InMemoryPhaseTracker::new())
    };

    let outcome = run_loop(
        &paths,
        &config,
        &runner,
        &agent,
        &git,
        phases.as_mut(),
        print_event,
    )?;

    match outcome.stop {
        LoopStop::QueueEmpty => {
            println!(
                "backlog empty, {} stories completed",
                outcome.stories_completed
            );
            Ok(exit_codes::OK)
        }
        LoopStop::Blocked(blocked) => {
            if !blocked.output.is_empty() {
                eprintln!("{}", blocked.output);
            }
            eprintln!("{blocked}");
            Ok(exit_codes::BLOCKED)
        }
        LoopStop::Held { prd, incomplete } => {
            eprintln!(
                "{prd} not archived, incomplete stories: {}; requeue or complete them first",
                incomplete.join(", ")
            );
            Ok(exit_codes::HELD)
        }
    }
}

fn print_event(event: &LoopEvent) {
    match event {
        LoopEvent::Advanced(report) => {
            match &report.archive {
                ArchiveStatus::NothingToArchive => {}
                ArchiveStatus::Archived(path) => println!("archived {}", path.display()),
                ArchiveStatus::Skipped(reason) => eprintln!("warning: archive skipped: {reason}"),
                ArchiveStatus::Failed(failure) => eprintln!("warning: archive failed: {failure}"),
            }
            if let AdvanceOutcome::Loaded {
                prd, story_count, ..
            } = &report.outcome
            {
                println!("loaded {prd} ({story_count} stories)");
            }
        }
        LoopEvent::StoryStarted {
            story_id,
            title,
            session,
        } => println!("[session {session}] {story_id}: {title}"),
        LoopEvent::TestsGenerated {
            story_id,
            test_count,
        } => println!("{story_id}: {test_count} tests generated"),
        LoopEvent::StoryCommitted {
            story_id,
            commit_id,
            migrated,
        } => {
            println!("{story_id}: committed {commit_id}");
            if !migrated {
                eprintln!("warning: tests for {story_id} were not moved to the regression suite");
            }
        }
    }
}

fn cmd_status(root: &Path) -> Result<i32> {
    let paths = ProjectPaths::new(root);
    let state = load_state(&paths.state_path)?;
    let pending = list_pending_prds(&paths.prds_dir)?;

    println!(
        "current prd:   {}",
        state.current_prd.as_deref().unwrap_or("-")
    );
    println!(
        "current story: {}",
        state.current_story.as_deref().unwrap_or("-")
    );
    println!("remaining:     {}", state.remaining_stories.len());
    println!("completed:     {}", state.completed_stories.len());
    println!("sessions:      {}", state.session_count);
    println!("pending prds:  {}", pending.len());

    if paths.state_path.exists() {
        let problems = check_state_file(&paths.state_path);
        if !problems.is_empty() {
            eprintln!("state problems:\n- {}", problems.join("\n- "));
            return Ok(exit_codes::INVALID);
        }
    }
    Ok(exit_codes::OK)
}
