//! Example of stepping through a Coq file with the background send driver
//!
//! Usage: `cargo run --example step_file -- path/to/file.v`

use anyhow::{bail, Context};
use coqtop_codes::{project, CommandState, Engine, Position, SendSignal};
use std::path::PathBuf;

/// Split `source` into sentences ending with a `.` followed by whitespace.
/// Comments and strings are not understood; this is a demo.
fn sentences(source: &str) -> Vec<(String, Position)> {
    let mut out = Vec::new();
    let mut start = 0;
    let (mut line, mut column, mut byte) = (0, 0, 0);
    let mut chars = source.char_indices().peekable();
    while let Some((idx, c)) = chars.next() {
        if c == '\n' {
            line += 1;
            column = 0;
            byte = 0;
        } else {
            column += 1;
            byte += c.len_utf8();
        }
        let ends_sentence = c == '.'
            && chars
                .peek()
                .map_or(true, |(_, next)| next.is_whitespace());
        if ends_sentence {
            let text = source[start..=idx].trim();
            if !text.is_empty() {
                out.push((text.to_string(), Position::new(line, column, byte)));
            }
            start = idx + 1;
        }
    }
    out
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let Some(path) = std::env::args().nth(1).map(PathBuf::from) else {
        bail!("usage: step_file <file.v>");
    };
    let source = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;

    let engine = Engine::new();
    engine.restart(project::project_args_for(&path)?)?;

    let batch = sentences(&source);
    println!("Sending {} sentence(s)...", batch.len());
    engine.send_async(batch)?;
    loop {
        let signal = engine.wait_for_result();
        if signal.contains(SendSignal::MESSAGE_RECEIVED) {
            println!("{}", engine.get_messages());
        }
        if signal.contains(SendSignal::SEND_FINISHED) {
            break;
        }
    }
    engine.finish_send();

    let goals = engine.goals(|| {})?;
    engine.wait_until_checked(|| {})?;

    let commands = engine.commands();
    let checked = commands[..engine.active_count()]
        .iter()
        .filter(|c| c.state == CommandState::Processed)
        .count();
    println!(
        "{} of {} command(s) checked",
        checked,
        engine.active_count().saturating_sub(1)
    );
    match goals.into_value().map(|v| v.into_goals()) {
        Some(Ok(Some(goals))) => {
            for goal in goals.fg {
                for hyp in &goal.hyp {
                    println!("  {}", hyp);
                }
                println!("  ============================");
                println!("  {}", goal.ccl);
            }
        }
        Some(Ok(None)) => println!("No goals."),
        Some(Err(e)) => eprintln!("Unexpected goal payload: {}", e),
        None => eprintln!("{}", engine.get_messages()),
    }

    engine.kill();
    Ok(())
}
