//! Available commands, dispatch and autocomplete logic

use chrono::{NaiveDate, NaiveDateTime};
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use forgetasks::forge::{FileStatus, Folder, SubscriptionMode};
use forgetasks::{Connection, Project};

use crate::db::CredentialStore;

/// Everything a command handler works with.
pub struct Context<'a> {
  pub connection: &'a Connection,
  pub project: Option<String>,
  pub password: Option<String>,
  /// Print machine-readable JSON instead of text
  pub json: bool,
  pub out: &'a mut dyn Write,
}

impl Context<'_> {
  fn project(&self) -> Result<Arc<Project>> {
    let name = self
      .project
      .as_deref()
      .ok_or_else(|| eyre!("No project selected. Pass --project or set default_project in the config."))?;
    Ok(self.connection.project(name))
  }
}

type Handler = fn(&mut Context<'_>, &[String]) -> Result<()>;

pub struct Command {
  pub name: &'static str,
  pub aliases: &'static [&'static str],
  pub usage: &'static str,
  pub description: &'static str,
  pub min_args: usize,
  pub handler: Handler,
}

/// All available commands
pub const COMMANDS: &[Command] = &[
  Command {
    name: "login",
    aliases: &[],
    usage: "login",
    description: "Log in and remember the password digest",
    min_args: 0,
    handler: login,
  },
  Command {
    name: "ls",
    aliases: &["dir", "list-folder"],
    usage: "ls [PATH]",
    description: "List sub-folders and files of a folder",
    min_args: 0,
    handler: list_folder,
  },
  Command {
    name: "mkdir",
    aliases: &["md"],
    usage: "mkdir PATH [DESCRIPTION]",
    description: "Create a folder",
    min_args: 1,
    handler: make_folder,
  },
  Command {
    name: "rmdir",
    aliases: &["rd"],
    usage: "rmdir PATH",
    description: "Delete a folder",
    min_args: 1,
    handler: remove_folder,
  },
  Command {
    name: "upload",
    aliases: &["put"],
    usage: "upload LOCAL_FILE [FOLDER] [STATUS] [DESCRIPTION]",
    description: "Upload a file into a folder",
    min_args: 1,
    handler: upload,
  },
  Command {
    name: "rm",
    aliases: &["del"],
    usage: "rm PATH",
    description: "Delete a file",
    min_args: 1,
    handler: remove_file,
  },
  Command {
    name: "issues",
    aliases: &["i", "issue"],
    usage: "issues ID...",
    description: "Show issues by id",
    min_args: 1,
    handler: show_issues,
  },
  Command {
    name: "changed",
    aliases: &["since"],
    usage: "changed FROM TO",
    description: "List issues changed in [FROM, TO)",
    min_args: 2,
    handler: changed_issues,
  },
  Command {
    name: "comment",
    aliases: &[],
    usage: "comment ID TEXT...",
    description: "Add a comment to an issue",
    min_args: 2,
    handler: comment,
  },
  Command {
    name: "lists",
    aliases: &["l"],
    usage: "lists",
    description: "List mailing lists",
    min_args: 0,
    handler: show_lists,
  },
  Command {
    name: "list-info",
    aliases: &["info"],
    usage: "list-info LIST",
    description: "Show description and message counts of a list",
    min_args: 1,
    handler: list_info,
  },
  Command {
    name: "subscribers",
    aliases: &["subs"],
    usage: "subscribers LIST [MODE]",
    description: "List subscribers (mode: normal, digest, moderator)",
    min_args: 1,
    handler: show_subscribers,
  },
  Command {
    name: "subscribe",
    aliases: &["sub"],
    usage: "subscribe LIST MODE ADDRESS...",
    description: "Subscribe addresses to a list",
    min_args: 3,
    handler: subscribe,
  },
  Command {
    name: "unsubscribe",
    aliases: &["unsub"],
    usage: "unsubscribe LIST MODE ADDRESS...",
    description: "Unsubscribe addresses from a list",
    min_args: 3,
    handler: unsubscribe,
  },
  Command {
    name: "create-list",
    aliases: &[],
    usage: "create-list NAME [DESCRIPTION]",
    description: "Create a mailing list",
    min_args: 1,
    handler: create_list,
  },
  Command {
    name: "delete-list",
    aliases: &[],
    usage: "delete-list NAME",
    description: "Delete a mailing list",
    min_args: 1,
    handler: delete_list,
  },
  Command {
    name: "forums",
    aliases: &["f"],
    usage: "forums",
    description: "List discussion forums",
    min_args: 0,
    handler: show_forums,
  },
  Command {
    name: "create-forum",
    aliases: &[],
    usage: "create-forum NAME [DESCRIPTION]",
    description: "Create a forum",
    min_args: 1,
    handler: create_forum,
  },
  Command {
    name: "delete-forum",
    aliases: &[],
    usage: "delete-forum NAME",
    description: "Delete a forum",
    min_args: 1,
    handler: delete_forum,
  },
  Command {
    name: "members",
    aliases: &["m"],
    usage: "members",
    description: "List project members and their roles",
    min_args: 0,
    handler: show_members,
  },
  Command {
    name: "grant",
    aliases: &[],
    usage: "grant USER ROLE",
    description: "Grant a project role",
    min_args: 2,
    handler: grant,
  },
  Command {
    name: "revoke",
    aliases: &[],
    usage: "revoke USER ROLE",
    description: "Revoke a project role",
    min_args: 2,
    handler: revoke,
  },
  Command {
    name: "help",
    aliases: &["h", "?"],
    usage: "help",
    description: "Show this help",
    min_args: 0,
    handler: help,
  },
];

/// The command named `input`, by name or alias.
pub fn find(input: &str) -> Option<&'static Command> {
  let input = input.to_lowercase();
  COMMANDS
    .iter()
    .find(|cmd| cmd.name == input || cmd.aliases.contains(&input.as_str()))
}

/// Get autocomplete suggestions for a given input
pub fn get_suggestions(input: &str) -> Vec<&'static Command> {
  let input_lower = input.to_lowercase();

  if input_lower.is_empty() {
    return COMMANDS.iter().collect();
  }

  let mut matches: Vec<(&Command, u32)> = Vec::new();

  for cmd in COMMANDS {
    if cmd.name == input_lower {
      matches.push((cmd, 0));
      continue;
    }

    if cmd.aliases.contains(&input_lower.as_str()) {
      matches.push((cmd, 1));
      continue;
    }

    if cmd.name.starts_with(&input_lower) {
      matches.push((cmd, 2));
      continue;
    }

    if cmd.aliases.iter().any(|a| a.starts_with(&input_lower)) {
      matches.push((cmd, 3));
      continue;
    }

    if cmd.name.contains(&input_lower) {
      matches.push((cmd, 4));
      continue;
    }

    if cmd.aliases.iter().any(|a| a.contains(&input_lower)) {
      matches.push((cmd, 5));
    }
  }

  matches.sort_by_key(|(_, priority)| *priority);

  matches.into_iter().map(|(cmd, _)| cmd).collect()
}

/// Run the command named `name` with `args`.
pub fn dispatch(ctx: &mut Context<'_>, name: &str, args: &[String]) -> Result<()> {
  let Some(cmd) = find(name) else {
    let suggestions: Vec<&str> = get_suggestions(name).iter().map(|c| c.name).take(3).collect();
    return Err(if suggestions.is_empty() {
      eyre!("Unknown command '{}'. Run 'forgetasks help' for a list.", name)
    } else {
      eyre!("Unknown command '{}'. Did you mean: {}?", name, suggestions.join(", "))
    });
  };

  if args.len() < cmd.min_args {
    return Err(eyre!("Usage: forgetasks {}", cmd.usage));
  }

  debug!(command = cmd.name, ?args, "dispatching");
  (cmd.handler)(ctx, args)
}

pub fn print_help(out: &mut dyn Write) -> Result<()> {
  writeln!(out, "Usage: forgetasks [--config PATH] [--project NAME] [-v] [--json] COMMAND [ARGS...]\n")?;
  writeln!(out, "Commands:")?;
  for cmd in COMMANDS {
    writeln!(out, "  {:<44} {}", cmd.usage, cmd.description)?;
  }
  Ok(())
}

/// Log in unless the stored digest shows `password` already worked.
///
/// The transport sends basic credentials with every request, so a matching
/// digest makes the form login unnecessary.
pub fn authenticate(connection: &Connection, store: &CredentialStore, password: &str) -> Result<()> {
  let username = connection
    .username()
    .ok_or_else(|| eyre!("No user name configured (site.username)"))?;

  if store.matches(username, password)? {
    debug!(user = username, "password digest matches, skipping login form");
    return Ok(());
  }

  if let Err(err) = connection.login(password) {
    store.forget(username)?;
    return Err(err.into());
  }
  store.remember(username, password)?;
  Ok(())
}

fn help(ctx: &mut Context<'_>, _args: &[String]) -> Result<()> {
  print_help(ctx.out)
}

fn login(ctx: &mut Context<'_>, _args: &[String]) -> Result<()> {
  let password = ctx
    .password
    .as_deref()
    .ok_or_else(|| eyre!("Password not found. Set the FORGETASKS_PASSWORD environment variable."))?;
  let username = ctx
    .connection
    .username()
    .ok_or_else(|| eyre!("No user name configured (site.username)"))?;

  ctx.connection.login(password)?;
  CredentialStore::open()?.remember(username, password)?;
  writeln!(ctx.out, "Logged in to {} as {}", ctx.connection.site(), username)?;
  Ok(())
}

/// Split `a/b/c` into (`a/b`, `c`).
fn split_path(path: &str) -> Result<(&str, &str)> {
  let trimmed = path.trim_end_matches('/');
  let (parent, name) = trimmed.rsplit_once('/').unwrap_or(("", trimmed));
  if name.is_empty() {
    return Err(eyre!("'{}' does not name an entry", path));
  }
  Ok((parent, name))
}

fn folder(project: &Project, path: &str) -> Result<Folder> {
  project
    .folder(path)?
    .ok_or_else(|| eyre!("No folder {} in project {}", path, project.name()))
}

fn list_folder(ctx: &mut Context<'_>, args: &[String]) -> Result<()> {
  let project = ctx.project()?;
  let folder = folder(&project, args.first().map_or("/", String::as_str))?;
  let sub_folders = folder.sub_folders()?;
  let files = folder.files()?;

  if ctx.json {
    let value = serde_json::json!({
      "path": folder.path(),
      "folders": sub_folders.keys().collect::<Vec<_>>(),
      "files": files.values().collect::<Vec<_>>(),
    });
    writeln!(ctx.out, "{}", serde_json::to_string_pretty(&value)?)?;
    return Ok(());
  }

  for (name, sub) in sub_folders.iter() {
    writeln!(ctx.out, "{:>8}  {}/", sub.id(), name)?;
  }
  for entry in files.values() {
    writeln!(
      ctx.out,
      "{:>8}  {}  [{}] {} {}",
      entry.id,
      entry.name,
      entry.status,
      entry.modified.format("%Y-%m-%d %H:%M"),
      entry.modified_by
    )?;
  }
  Ok(())
}

fn make_folder(ctx: &mut Context<'_>, args: &[String]) -> Result<()> {
  let project = ctx.project()?;
  let (parent, name) = split_path(&args[0])?;
  let description = args.get(1).map_or("", String::as_str);

  let created = folder(&project, parent)?.create_folder(name, description)?;
  writeln!(ctx.out, "Created folder {} (id {})", created.path(), created.id())?;
  Ok(())
}

fn remove_folder(ctx: &mut Context<'_>, args: &[String]) -> Result<()> {
  let project = ctx.project()?;
  let target = folder(&project, &args[0])?;
  let path = target.path();
  target.delete()?;
  writeln!(ctx.out, "Deleted folder {}", path)?;
  Ok(())
}

fn upload(ctx: &mut Context<'_>, args: &[String]) -> Result<()> {
  let project = ctx.project()?;
  let source = Path::new(&args[0]);
  let name = source
    .file_name()
    .and_then(|n| n.to_str())
    .ok_or_else(|| eyre!("'{}' has no file name", source.display()))?;
  let target = folder(&project, args.get(1).map_or("/", String::as_str))?;
  let status: FileStatus = match args.get(2) {
    Some(raw) => raw.parse()?,
    None => FileStatus::Draft,
  };
  let description = args.get(3).map_or("", String::as_str);

  let entry = target.upload_file(name, status, description, source)?;
  writeln!(ctx.out, "Uploaded {} to {} (id {})", entry.name, target.path(), entry.id)?;
  Ok(())
}

fn remove_file(ctx: &mut Context<'_>, args: &[String]) -> Result<()> {
  let project = ctx.project()?;
  let (parent, name) = split_path(&args[0])?;
  let target = folder(&project, parent)?;
  let entry = target
    .file(name)?
    .ok_or_else(|| eyre!("No file {} in {}", name, target.path()))?;

  target.delete_file(&entry)?;
  writeln!(ctx.out, "Deleted {}", args[0])?;
  Ok(())
}

fn parse_ids(args: &[String]) -> Result<Vec<u32>> {
  args
    .iter()
    .map(|raw| {
      raw
        .trim_start_matches('#')
        .parse()
        .map_err(|_| eyre!("'{}' is not an issue id", raw))
    })
    .collect()
}

/// Accepts `YYYY-MM-DD` or `YYYY-MM-DD HH:MM[:SS]`.
fn parse_when(raw: &str) -> Result<NaiveDateTime> {
  let raw = raw.trim();
  for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"] {
    if let Ok(when) = NaiveDateTime::parse_from_str(raw, format) {
      return Ok(when);
    }
  }
  NaiveDate::parse_from_str(raw, "%Y-%m-%d")
    .ok()
    .and_then(|date| date.and_hms_opt(0, 0, 0))
    .ok_or_else(|| eyre!("'{}' is not a date (YYYY-MM-DD [HH:MM[:SS]])", raw))
}

fn write_issue_line(out: &mut dyn Write, issue: &forgetasks::forge::Issue) -> Result<()> {
  writeln!(
    out,
    "#{:<6} {:<10} {:<12} {}",
    issue.id(),
    issue.status().unwrap_or("-"),
    issue.assignee().unwrap_or("-"),
    issue.summary().unwrap_or("")
  )?;
  Ok(())
}

fn show_issues(ctx: &mut Context<'_>, args: &[String]) -> Result<()> {
  let project = ctx.project()?;
  let ids = parse_ids(args)?;
  let found = project.issues().issues(&ids)?;

  if ctx.json {
    let issues: Vec<_> = found.values().map(|issue| issue.as_ref()).collect();
    writeln!(ctx.out, "{}", serde_json::to_string_pretty(&issues)?)?;
    return Ok(());
  }

  for id in &ids {
    match found.get(id) {
      Some(issue) => write_issue_line(ctx.out, issue)?,
      None => writeln!(ctx.out, "#{:<6} not found", id)?,
    }
  }
  Ok(())
}

fn changed_issues(ctx: &mut Context<'_>, args: &[String]) -> Result<()> {
  let project = ctx.project()?;
  let start = parse_when(&args[0])?;
  let end = parse_when(&args[1])?;
  let changed = project.issues().changed_between(start, end)?;

  if ctx.json {
    let issues: Vec<_> = changed.iter().map(|issue| issue.as_ref()).collect();
    writeln!(ctx.out, "{}", serde_json::to_string_pretty(&issues)?)?;
    return Ok(());
  }
  for issue in &changed {
    write_issue_line(ctx.out, issue)?;
  }
  Ok(())
}

fn comment(ctx: &mut Context<'_>, args: &[String]) -> Result<()> {
  let project = ctx.project()?;
  let id = parse_ids(&args[..1])?[0];
  project.issues().add_comment(id, &args[1..].join(" "))?;
  writeln!(ctx.out, "Commented on #{}", id)?;
  Ok(())
}

fn show_lists(ctx: &mut Context<'_>, _args: &[String]) -> Result<()> {
  let project = ctx.project()?;
  for name in project.mailing_lists()?.keys() {
    writeln!(ctx.out, "{}", name)?;
  }
  Ok(())
}

fn mailing_list(project: &Project, name: &str) -> Result<Arc<forgetasks::forge::MailingList>> {
  project
    .mailing_list(name)?
    .ok_or_else(|| eyre!("No mailing list {} in project {}", name, project.name()))
}

fn list_info(ctx: &mut Context<'_>, args: &[String]) -> Result<()> {
  let project = ctx.project()?;
  let summary = mailing_list(&project, &args[0])?.summary()?;

  if ctx.json {
    writeln!(ctx.out, "{}", serde_json::to_string_pretty(summary.as_ref())?)?;
    return Ok(());
  }

  writeln!(ctx.out, "{}", summary.description)?;
  writeln!(ctx.out, "Messages: {}", summary.total_messages)?;
  for (month, count) in &summary.histogram {
    writeln!(ctx.out, "  {}  {:>6}", month, count)?;
  }
  Ok(())
}

fn mode_arg(args: &[String], index: usize) -> Result<SubscriptionMode> {
  match args.get(index) {
    Some(raw) => Ok(raw.parse()?),
    None => Ok(SubscriptionMode::Normal),
  }
}

fn show_subscribers(ctx: &mut Context<'_>, args: &[String]) -> Result<()> {
  let project = ctx.project()?;
  let mode = mode_arg(args, 1)?;
  for address in mailing_list(&project, &args[0])?.subscribers(mode)?.iter() {
    writeln!(ctx.out, "{}", address)?;
  }
  Ok(())
}

fn subscribe(ctx: &mut Context<'_>, args: &[String]) -> Result<()> {
  change_subscriptions(ctx, args, true)
}

fn unsubscribe(ctx: &mut Context<'_>, args: &[String]) -> Result<()> {
  change_subscriptions(ctx, args, false)
}

fn change_subscriptions(ctx: &mut Context<'_>, args: &[String], subscribe: bool) -> Result<()> {
  let project = ctx.project()?;
  let list = mailing_list(&project, &args[0])?;
  let mode = mode_arg(args, 1)?;
  let addresses = &args[2..];
  let progress = |done: usize, total: usize| debug!(done, total, "subscription progress");

  let changed = if subscribe {
    list.mass_subscribe(addresses, mode, progress)?
  } else {
    list.mass_unsubscribe(addresses, mode, progress)?
  };
  writeln!(
    ctx.out,
    "{} {} of {} addresses ({})",
    if subscribe { "Subscribed" } else { "Unsubscribed" },
    changed,
    addresses.len(),
    mode
  )?;
  Ok(())
}

fn create_list(ctx: &mut Context<'_>, args: &[String]) -> Result<()> {
  let project = ctx.project()?;
  let list = project.create_mailing_list(&args[0], args.get(1).map_or("", String::as_str))?;
  writeln!(ctx.out, "Created mailing list {}", list.name())?;
  Ok(())
}

fn delete_list(ctx: &mut Context<'_>, args: &[String]) -> Result<()> {
  let project = ctx.project()?;
  mailing_list(&project, &args[0])?.delete()?;
  writeln!(ctx.out, "Deleted mailing list {}", args[0])?;
  Ok(())
}

fn show_forums(ctx: &mut Context<'_>, _args: &[String]) -> Result<()> {
  let project = ctx.project()?;
  for forum in project.forums()?.values() {
    writeln!(ctx.out, "{:>6}  {:<24} {}", forum.id(), forum.name(), forum.description())?;
  }
  Ok(())
}

fn create_forum(ctx: &mut Context<'_>, args: &[String]) -> Result<()> {
  let project = ctx.project()?;
  let forum = project.create_forum(&args[0], args.get(1).map_or("", String::as_str))?;
  writeln!(ctx.out, "Created forum {} (id {})", forum.name(), forum.id())?;
  Ok(())
}

fn delete_forum(ctx: &mut Context<'_>, args: &[String]) -> Result<()> {
  let project = ctx.project()?;
  let forum = project
    .forum(&args[0])?
    .ok_or_else(|| eyre!("No forum {} in project {}", args[0], project.name()))?;
  forum.delete()?;
  writeln!(ctx.out, "Deleted forum {}", args[0])?;
  Ok(())
}

fn show_members(ctx: &mut Context<'_>, _args: &[String]) -> Result<()> {
  let project = ctx.project()?;
  let members = project.members()?;

  if ctx.json {
    let all: Vec<_> = members.values().collect();
    writeln!(ctx.out, "{}", serde_json::to_string_pretty(&all)?)?;
    return Ok(());
  }

  for membership in members.values() {
    let me = ctx.connection.user(&membership.user);
    let marker = if me.is_current { "*" } else { " " };
    writeln!(ctx.out, "{}{:<20} {}", marker, membership.user, membership.roles.join(", "))?;
  }
  Ok(())
}

fn grant(ctx: &mut Context<'_>, args: &[String]) -> Result<()> {
  let project = ctx.project()?;
  let user = ctx.connection.user(&args[0]);
  let role = ctx.connection.role(&args[1]);
  project.grant_role(&user, &role)?;
  writeln!(ctx.out, "Granted {} to {}", role.name, user.name)?;
  Ok(())
}

fn revoke(ctx: &mut Context<'_>, args: &[String]) -> Result<()> {
  let project = ctx.project()?;
  let user = ctx.connection.user(&args[0]);
  let role = ctx.connection.role(&args[1]);
  project.revoke_role(&user, &role)?;
  writeln!(ctx.out, "Revoked {} from {}", role.name, user.name)?;
  Ok(())
}
