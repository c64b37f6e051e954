mod commands;
mod helper;

use std::sync::Arc;
use std::time::Instant;

use commands::{all_commands_info, Command};
use helper::CliHelper;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::Editor;
use serde::Serialize;

use crate::catalog::{CatalogError, CatalogSession, TableError};
use crate::context::ShardlineContext;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error("Failed formatting output: {0}")]
    Output(#[from] serde_json::Error),
}

type Result<T, E = CliError> = std::result::Result<T, E>;

pub struct ShardlineCli {
    ctx: Arc<ShardlineContext>,
    session: CatalogSession,
}

impl ShardlineCli {
    // Instantiate new CLI instance, holding one session for its lifetime
    pub async fn new(ctx: Arc<ShardlineContext>) -> Result<Self> {
        let session = ctx.session().await?;
        Ok(ShardlineCli { ctx, session })
    }

    fn prompt(&self) -> String {
        format!("{}> ", self.session.database().unwrap_or(""))
    }

    // Interactive loop for running commands from a CLI
    pub async fn repl_loop(&mut self) -> rustyline::Result<()> {
        let mut rl = Editor::<CliHelper, DefaultHistory>::new()?;
        rl.set_helper(Some(CliHelper {}));
        rl.load_history(".history").ok();

        loop {
            match rl.readline(&self.prompt()) {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => {
                    rl.add_history_entry(line.trim_end())?;
                    let command = line.split_whitespace().collect::<Vec<_>>().join(" ");
                    match command.strip_prefix('\\').map(str::parse::<Command>) {
                        Some(Ok(Command::Quit)) => break,
                        Some(Ok(cmd)) => {
                            let now = Instant::now();
                            match self.handle_command(&cmd).await {
                                Ok(()) => println!("Time: {:.3}s", now.elapsed().as_secs_f64()),
                                Err(e) => eprintln!("{e}"),
                            }
                        }
                        _ => eprintln!("'{}' is not a valid command", line.trim()),
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("^C");
                    continue;
                }
                Err(ReadlineError::Eof) => {
                    println!("\\q");
                    break;
                }
                Err(err) => {
                    eprintln!("Error while reading input: {err:?}",);
                    break;
                }
            }
        }

        rl.save_history(".history")
    }

    // Handle a client command
    async fn handle_command(&mut self, cmd: &Command) -> Result<()> {
        let manager = self.ctx.table_manager();

        match cmd {
            Command::Help => {
                for (usage, description) in all_commands_info() {
                    println!("{usage:<16}{description}");
                }
                Ok(())
            }
            Command::ListDatabases => print_json(&manager.list_databases().await?),
            Command::OpenDatabase(name) => {
                Ok(manager.open_database(&mut self.session, name).await?)
            }
            Command::CreateDatabase(name) => {
                Ok(manager.create_database(&mut self.session, name).await?)
            }
            Command::DropDatabase(name) => {
                Ok(manager.drop_database(&mut self.session, name).await?)
            }
            Command::ListTables => print_json(&manager.list_tables(&self.session)?),
            Command::DescribeTable(name) => {
                print_json(&manager.describe_table(&self.session, name)?)
            }
            Command::DropTable(name) => Ok(manager.drop_table(&self.session, name).await?),
            Command::Quit => {
                panic!("Unexpected quit, this should be handled in the repl loop")
            }
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
