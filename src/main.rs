//! Storyloom - 分支叙事客户端
//!
//! 入口：加载配置、初始化日志、创建编排器，在标准输入上运行行式命令循环。

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use storyloom::api::{HttpStoryApi, StoryApi};
use storyloom::config::{load_config, AppConfig};
use storyloom::core::{Command, NoticeLevel, Orchestrator, OrchestratorEvent, OrchestratorState, Outcome};
use storyloom::model::StoryDraft;
use storyloom::observability;
use tokio::io::{AsyncBufReadExt, BufReader};

const HELP: &str = "commands: list | new <title> | delete <id> | load <id> | open | choose <n> | end | goto <node> | path | branches | cancel | exit | quit";

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let (cfg, config_error) = match load_config(config_path) {
        Ok(cfg) => (cfg, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };
    observability::init(&cfg.logging.filter);
    if let Some(e) = config_error {
        tracing::warn!("Config load failed ({}), using defaults", e);
    }
    tracing::info!(base_url = %cfg.api.base_url, transport = ?cfg.generation.transport, "Starting storyloom");

    let api: Arc<dyn StoryApi> = Arc::new(HttpStoryApi::new(&cfg.api));
    let orchestrator = Arc::new(Orchestrator::new(api, &cfg.generation));

    spawn_event_printer(&orchestrator);

    println!("{}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (cmd, arg) = match line.split_once(' ') {
            Some((c, a)) => (c, a.trim()),
            None => (line, ""),
        };
        match cmd {
            "quit" | "q" => break,
            "help" => println!("{}", HELP),
            "list" => list_stories(&orchestrator).await,
            "new" => create_story(&orchestrator, arg).await,
            "delete" => match arg.parse() {
                Ok(id) => match orchestrator.api().delete_story(id).await {
                    Ok(()) => println!("deleted story {}", id),
                    Err(e) => println!("delete failed: {}", e),
                },
                Err(_) => println!("usage: delete <id>"),
            },
            "load" => match arg.parse() {
                Ok(id) => {
                    let outcome = orchestrator.load_story(id).await;
                    if outcome == Outcome::Completed {
                        render_current(&orchestrator.snapshot());
                    }
                }
                Err(_) => println!("usage: load <id>"),
            },
            "open" => run_in_background(&orchestrator, Command::Opening),
            "end" => run_in_background(&orchestrator, Command::Ending),
            "choose" => match arg.parse::<usize>() {
                Ok(n) if n >= 1 => run_in_background(
                    &orchestrator,
                    Command::Continue {
                        choice_index: n - 1,
                    },
                ),
                _ => println!("usage: choose <n>  (1-based)"),
            },
            "goto" => match arg.parse() {
                Ok(id) => {
                    if orchestrator.go_to_node(id) == Outcome::Completed {
                        render_current(&orchestrator.snapshot());
                    }
                }
                Err(_) => println!("usage: goto <node>"),
            },
            "path" => println!("{}", orchestrator.snapshot().path_text()),
            "branches" => {
                if orchestrator.load_branches().await == Outcome::Completed {
                    render_branches(&orchestrator.snapshot());
                }
            }
            "cancel" => {
                if !orchestrator.cancel_generation() {
                    println!("nothing to cancel");
                }
            }
            "exit" => {
                orchestrator.exit_story();
                println!("left story");
            }
            other => println!("unknown command '{}'; {}", other, HELP),
        }
    }

    orchestrator.exit_story();
    Ok(())
}

/// 生成命令在后台执行，命令循环可以继续接收 cancel
fn run_in_background(orchestrator: &Arc<Orchestrator>, command: Command) {
    let handle = orchestrator.dispatch(command);
    let orchestrator = Arc::clone(orchestrator);
    tokio::spawn(async move {
        match handle.await {
            Ok(Outcome::Completed) => {
                println!();
                render_current(&orchestrator.snapshot());
            }
            Ok(Outcome::Busy) => println!("a generation is already running"),
            Ok(_) => {}
            Err(e) => tracing::error!("Generation task failed: {}", e),
        }
    });
}

fn spawn_event_printer(orchestrator: &Arc<Orchestrator>) {
    let mut events = orchestrator.events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(OrchestratorEvent::Token { content }) => {
                    print!("{}", content);
                    let _ = std::io::stdout().flush();
                }
                Ok(OrchestratorEvent::Notice(notice)) => {
                    let tag = match notice.level {
                        NoticeLevel::Info => "info",
                        NoticeLevel::Warning => "warning",
                        NoticeLevel::Error => "error",
                    };
                    println!("\n[{}] {}", tag, notice.message);
                }
                Ok(OrchestratorEvent::Progress { label }) => tracing::debug!("{}", label),
                Ok(OrchestratorEvent::NodeCommitted { node_id }) => {
                    tracing::debug!(node_id, "Node committed")
                }
                Ok(OrchestratorEvent::StoryLoaded { story_id }) => {
                    tracing::debug!(story_id, "Story loaded")
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Event printer lagged by {} events", n)
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

async fn list_stories(orchestrator: &Orchestrator) {
    match orchestrator.api().list_stories(1, 20).await {
        Ok(page) => {
            for story in &page.items {
                let status = if story.is_completed { "completed" } else { "in progress" };
                println!("{:>4}  {}  ({})", story.id, story.title, status);
            }
            println!("{} of {} stories", page.items.len(), page.total);
        }
        Err(e) => println!("list failed: {}", e),
    }
}

async fn create_story(orchestrator: &Orchestrator, title: &str) {
    if title.is_empty() {
        println!("usage: new <title>");
        return;
    }
    match orchestrator.api().create_story(&StoryDraft::new(title)).await {
        Ok(story) => println!("created story {} '{}'; load it with: load {}", story.id, story.title, story.id),
        Err(e) => println!("create failed: {}", e),
    }
}

fn render_current(state: &OrchestratorState) {
    let Some(story) = &state.current_story else {
        return;
    };
    println!("== {} ==", story.title);
    let Some(node) = &state.current_node else {
        println!("(no content yet; type 'open' to generate the opening)");
        return;
    };
    println!("{}", node.content);
    if node.is_ending {
        println!("-- The End --");
        return;
    }
    for (i, choice) in node.choices.iter().enumerate() {
        println!("  {}. {}", i + 1, choice.text);
    }
}

fn render_branches(state: &OrchestratorState) {
    let Some(set) = &state.branches else {
        return;
    };
    for branch in &set.branches {
        let ids: Vec<String> = branch.node_ids().iter().map(|id| id.to_string()).collect();
        let tag = if branch.is_complete { "ending" } else { "open" };
        println!("{} [{}]: {}", branch.id, tag, ids.join(" -> "));
    }
    println!("{} branches", set.total_branches);
}
