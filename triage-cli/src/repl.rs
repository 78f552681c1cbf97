//! Simple line-based REPL: each line is a set of seed URNs to run
//! through the current framework.

use std::io::{BufRead, Write};

use triage_core::RcaEngine;

use crate::output;

const HELP: &str = "\
commands:
  <urn> [<urn>...]   run the current framework over the given seed URNs
  use <framework>    switch frameworks
  frameworks         list configured frameworks
  help               show this help
  exit | quit        leave the REPL";

pub async fn run(engine: &RcaEngine, framework: &str, group_k: usize) -> anyhow::Result<()> {
    let mut framework = framework.to_string();
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();

    println!("triage REPL — framework '{framework}', 'help' for commands");
    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line.split_whitespace().collect::<Vec<_>>().as_slice() {
            ["exit"] | ["quit"] => break,
            ["help"] => println!("{HELP}"),
            ["frameworks"] => {
                for name in engine.framework_names() {
                    println!("{name}");
                }
            }
            ["use", name] => {
                if engine.framework_names().contains(name) {
                    framework = name.to_string();
                    println!("framework '{framework}'");
                } else {
                    println!("unknown framework '{name}'");
                }
            }
            urns => {
                let urns: Vec<String> = urns.iter().map(|s| s.to_string()).collect();
                match engine.run_urns(&framework, &urns, 1.0).await {
                    Ok(result) => print!("{}", output::render(&result.results, group_k)),
                    Err(e) => println!("error: {e}"),
                }
            }
        }
    }
    Ok(())
}
