//! Command-line surface over the inventory.

use anyhow::{anyhow, bail, Context, Result};
use reqwest::Client;
use serde_json::Value;
use std::{env, path::PathBuf};
use tokio::task;
use tracing::{info, warn};

use crate::agent::GroqAgent;
use crate::auth::UserStore;
use crate::config::Config;
use crate::inventory::Inventory;
use crate::rows::Values;
use crate::schema::{ColumnDef, ColumnType};

pub const USAGE: &str = "\
usage: stockroom [--config <path>] <command>

commands:
  signup <username> <email> <password>
  passwd <username> <current> <new>
  columns
  add-column <name> <type> [option ...]
  rename-column <old> <new>
  retype-column <name> <type>
  set-options <name> [option ...]
  delete-column <name>
  categories
  add-category <name> [column ...]
  list
  add [--category <name>] <column=value> ...
  update <id> <column=value> ...
  delete <id>
  ask <question ...>

column types: text, number, date, boolean, dropdown
every command except signup and passwd reads STOCKROOM_USER and STOCKROOM_PASSWORD";

#[derive(Debug, PartialEq)]
pub struct Invocation {
    pub config: Option<PathBuf>,
    pub command: Command,
}

#[derive(Debug, PartialEq)]
pub enum Command {
    Signup {
        username: String,
        email: String,
        password: String,
    },
    Passwd {
        username: String,
        current: String,
        new: String,
    },
    Columns,
    AddColumn {
        name: String,
        ty: ColumnType,
        options: Vec<String>,
    },
    RenameColumn {
        from: String,
        to: String,
    },
    RetypeColumn {
        name: String,
        ty: ColumnType,
    },
    SetOptions {
        name: String,
        options: Vec<String>,
    },
    DeleteColumn {
        name: String,
    },
    Categories,
    AddCategory {
        name: String,
        columns: Vec<String>,
    },
    List,
    Add {
        category: Option<String>,
        values: Values,
    },
    Update {
        id: String,
        values: Values,
    },
    Delete {
        id: String,
    },
    Ask {
        question: String,
    },
}

/// Parse process arguments (without the program name).
pub fn parse<I: IntoIterator<Item = String>>(args: I) -> Result<Invocation> {
    let mut args: Vec<String> = args.into_iter().collect();
    let mut config = None;
    if args.first().map(String::as_str) == Some("--config") {
        if args.len() < 2 {
            bail!("--config needs a path");
        }
        config = Some(PathBuf::from(args.remove(1)));
        args.remove(0);
    }

    let (name, rest) = args
        .split_first()
        .ok_or_else(|| anyhow!("missing command"))?;
    let command = match (name.as_str(), rest) {
        ("signup", [username, email, password]) => Command::Signup {
            username: username.clone(),
            email: email.clone(),
            password: password.clone(),
        },
        ("passwd", [username, current, new]) => Command::Passwd {
            username: username.clone(),
            current: current.clone(),
            new: new.clone(),
        },
        ("columns", []) => Command::Columns,
        ("add-column", [name, ty, options @ ..]) => Command::AddColumn {
            name: name.clone(),
            ty: parse_type(ty)?,
            options: options.to_vec(),
        },
        ("rename-column", [from, to]) => Command::RenameColumn {
            from: from.clone(),
            to: to.clone(),
        },
        ("retype-column", [name, ty]) => Command::RetypeColumn {
            name: name.clone(),
            ty: parse_type(ty)?,
        },
        ("set-options", [name, options @ ..]) => Command::SetOptions {
            name: name.clone(),
            options: options.to_vec(),
        },
        ("delete-column", [name]) => Command::DeleteColumn { name: name.clone() },
        ("categories", []) => Command::Categories,
        ("add-category", [name, columns @ ..]) => Command::AddCategory {
            name: name.clone(),
            columns: columns.to_vec(),
        },
        ("list", []) => Command::List,
        ("add", [flag, category, assignments @ ..])
            if flag == "--category" && !assignments.is_empty() =>
        {
            Command::Add {
                category: Some(category.clone()),
                values: parse_assignments(assignments)?,
            }
        }
        ("add", assignments) if !assignments.is_empty() => Command::Add {
            category: None,
            values: parse_assignments(assignments)?,
        },
        ("update", [id, assignments @ ..]) if !assignments.is_empty() => Command::Update {
            id: id.clone(),
            values: parse_assignments(assignments)?,
        },
        ("delete", [id]) => Command::Delete { id: id.clone() },
        ("ask", words) if !words.is_empty() => Command::Ask {
            question: words.join(" "),
        },
        (other, _) => bail!("unknown command or wrong arguments: `{}`", other),
    };
    Ok(Invocation { config, command })
}

fn parse_type(raw: &str) -> Result<ColumnType> {
    raw.parse::<ColumnType>().map_err(|e| anyhow!(e))
}

/// `column=value` pairs; values stay strings and are coerced per column type.
pub fn parse_assignments(args: &[String]) -> Result<Values> {
    let mut values = Values::new();
    for arg in args {
        let (k, v) = arg
            .split_once('=')
            .ok_or_else(|| anyhow!("expected column=value, got `{}`", arg))?;
        if k.is_empty() {
            bail!("empty column name in `{}`", arg);
        }
        values.insert(k.to_string(), Value::String(v.to_string()));
    }
    Ok(values)
}

pub async fn run(invocation: Invocation) -> Result<()> {
    let cfg = Config::load(invocation.config.as_deref())?;
    let users = UserStore::new(cfg.users_path());

    match invocation.command {
        Command::Signup {
            username,
            email,
            password,
        } => {
            users.signup(&username, &email, &password)?;
            println!("user `{}` created", username);
            Ok(())
        }
        Command::Passwd {
            username,
            current,
            new,
        } => {
            users.change_password(&username, &current, &new)?;
            println!("password updated");
            Ok(())
        }
        command => {
            let user = login(&users)?;
            info!(user = %user, "logged in");
            let inventory = task::block_in_place(|| Inventory::open(&cfg))?;
            execute(&cfg, &inventory, command).await
        }
    }
}

fn login(users: &UserStore) -> Result<String> {
    let username = env::var("STOCKROOM_USER").context("STOCKROOM_USER is not set")?;
    let password = env::var("STOCKROOM_PASSWORD").context("STOCKROOM_PASSWORD is not set")?;
    if !users.verify(&username, &password)? {
        warn!(user = %username, "login rejected");
        bail!("invalid username or password");
    }
    Ok(username)
}

async fn execute(cfg: &Config, inventory: &Inventory, command: Command) -> Result<()> {
    if let Command::Ask { question } = command {
        let agent = GroqAgent::new(Client::new(), &cfg.agent)?;
        let answer = inventory
            .ask(&agent, &question, cfg.agent_timeout())
            .await?;
        println!("{}", answer);
        return Ok(());
    }
    // store calls block (file I/O, retry backoff); keep them off the async workers
    let out = task::block_in_place(|| apply(inventory, command))?;
    print!("{}", out);
    Ok(())
}

/// Run a non-agent command and return what to print.
fn apply(inventory: &Inventory, command: Command) -> Result<String> {
    let out = match command {
        Command::Columns => inventory
            .list_columns()
            .iter()
            .map(|col| format!("{}\n", describe_column(col)))
            .collect(),
        Command::AddColumn { name, ty, options } => {
            if ty == ColumnType::Dropdown {
                inventory.add_dropdown_column(&name, options)?;
            } else {
                if !options.is_empty() {
                    bail!("options are only allowed for dropdown columns");
                }
                inventory.add_column(&name, ty)?;
            }
            format!("column `{}` added\n", name)
        }
        Command::RenameColumn { from, to } => {
            inventory.rename_column(&from, &to)?;
            format!("column `{}` renamed to `{}`\n", from, to)
        }
        Command::RetypeColumn { name, ty } => {
            inventory.retype_column(&name, ty)?;
            format!("column `{}` is now {}\n", name, ty)
        }
        Command::SetOptions { name, options } => {
            inventory.set_column_options(&name, options)?;
            format!("options for `{}` updated\n", name)
        }
        Command::DeleteColumn { name } => {
            inventory.delete_column(&name)?;
            format!("column `{}` deleted\n", name)
        }
        Command::Categories => inventory
            .list_categories()
            .iter()
            .map(|cat| format!("{}: {}\n", cat.name, cat.columns.join(", ")))
            .collect(),
        Command::AddCategory { name, columns } => {
            inventory.add_category(&name, columns)?;
            format!("category `{}` added\n", name)
        }
        Command::List => {
            let snapshot = inventory.snapshot();
            if snapshot.is_empty() {
                "no items found\n".to_string()
            } else {
                snapshot.render()
            }
        }
        Command::Add { category, values } => {
            let row = match category {
                Some(cat) => inventory.add_item_in(&cat, values)?,
                None => inventory.add_item(values)?,
            };
            format!("item added with ID# {}\n", row.id)
        }
        Command::Update { id, values } => {
            inventory.update_item(&id, values)?;
            format!("item {} updated\n", id)
        }
        Command::Delete { id } => {
            inventory.delete_item(&id)?;
            format!("deleted item with ID# {}\n", id)
        }
        Command::Ask { .. } | Command::Signup { .. } | Command::Passwd { .. } => {
            bail!("not an inventory command")
        }
    };
    Ok(out)
}

fn describe_column(col: &ColumnDef) -> String {
    if col.options.is_empty() {
        format!("{} ({})", col.name, col.ty)
    } else {
        format!("{} ({}: {})", col.name, col.ty, col.options.join(", "))
    }
}
