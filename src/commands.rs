/// Shell commands and name resolution

#[derive(Debug, Clone)]
pub struct Command {
  pub name: &'static str,
  pub aliases: &'static [&'static str],
  pub usage: &'static str,
  pub description: &'static str,
}

/// All available commands
pub const COMMANDS: &[Command] = &[
  Command {
    name: "get",
    aliases: &["g", "read"],
    usage: "get <key>",
    description: "Print a stored value",
  },
  Command {
    name: "set",
    aliases: &["s", "write"],
    usage: "set <key> <json>",
    description: "Store a value (synced datasets go to the cloud)",
  },
  Command {
    name: "rm",
    aliases: &["remove", "del"],
    usage: "rm <key>",
    description: "Remove a value from local storage",
  },
  Command {
    name: "keys",
    aliases: &["k", "ls"],
    usage: "keys",
    description: "List stored keys",
  },
  Command {
    name: "online",
    aliases: &["up"],
    usage: "online",
    description: "Report connectivity restored",
  },
  Command {
    name: "offline",
    aliases: &["down"],
    usage: "offline",
    description: "Report connectivity lost",
  },
  Command {
    name: "sync",
    aliases: &["flush"],
    usage: "sync",
    description: "Replay pending operations now",
  },
  Command {
    name: "status",
    aliases: &["st", "info"],
    usage: "status",
    description: "Show connectivity, queue and cache state",
  },
  Command {
    name: "clear",
    aliases: &["wipe"],
    usage: "clear",
    description: "Clear ALL local data (asks first)",
  },
  Command {
    name: "help",
    aliases: &["h", "?"],
    usage: "help",
    description: "List commands",
  },
  Command {
    name: "quit",
    aliases: &["q", "exit"],
    usage: "quit",
    description: "Sync what is possible and exit",
  },
];

fn spellings(cmd: &Command) -> impl Iterator<Item = &'static str> + '_ {
  std::iter::once(cmd.name).chain(cmd.aliases.iter().copied())
}

/// Commands `input` may refer to: an exact name or alias on its own,
/// otherwise every command with a name or alias starting with `input`.
pub fn matching_commands(input: &str) -> Vec<&'static Command> {
  let input = input.to_lowercase();

  if let Some(cmd) = COMMANDS.iter().find(|c| spellings(c).any(|s| s == input)) {
    return vec![cmd];
  }

  COMMANDS
    .iter()
    .filter(|c| spellings(c).any(|s| s.starts_with(&input)))
    .collect()
}

/// A parsed shell line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
  Get(String),
  Set { key: String, value: String },
  Remove(String),
  Keys,
  Online,
  Offline,
  Sync,
  Status,
  Clear,
  Help,
  Quit,
}

/// Parse one input line. `Ok(None)` for blank lines.
pub fn parse_line(line: &str) -> Result<Option<ShellCommand>, String> {
  let line = line.trim();
  if line.is_empty() {
    return Ok(None);
  }

  let (word, rest) = match line.split_once(char::is_whitespace) {
    Some((word, rest)) => (word, rest.trim()),
    None => (line, ""),
  };

  let cmd = match matching_commands(word).as_slice() {
    [] => return Err(format!("Unknown command: {} (try `help`)", word)),
    [cmd] => *cmd,
    several => {
      let names: Vec<&str> = several.iter().map(|c| c.name).collect();
      return Err(format!("Ambiguous command: {} ({})", word, names.join(", ")));
    }
  };

  let one_arg = || {
    if rest.is_empty() || rest.contains(char::is_whitespace) {
      Err(format!("Usage: {}", cmd.usage))
    } else {
      Ok(rest.to_string())
    }
  };

  let parsed = match cmd.name {
    "get" => ShellCommand::Get(one_arg()?),
    "rm" => ShellCommand::Remove(one_arg()?),
    "set" => match rest.split_once(char::is_whitespace) {
      Some((key, value)) if !value.trim().is_empty() => ShellCommand::Set {
        key: key.to_string(),
        value: value.trim().to_string(),
      },
      _ => return Err(format!("Usage: {}", cmd.usage)),
    },
    "keys" => ShellCommand::Keys,
    "online" => ShellCommand::Online,
    "offline" => ShellCommand::Offline,
    "sync" => ShellCommand::Sync,
    "status" => ShellCommand::Status,
    "clear" => ShellCommand::Clear,
    "help" => ShellCommand::Help,
    _ => ShellCommand::Quit,
  };
  Ok(Some(parsed))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_input_matches_all() {
    assert_eq!(matching_commands("").len(), COMMANDS.len());
  }

  #[test]
  fn test_exact_name_and_alias() {
    assert_eq!(matching_commands("sync")[0].name, "sync");
    assert_eq!(matching_commands("q")[0].name, "quit");
    assert_eq!(matching_commands("offline").len(), 1);
  }

  #[test]
  fn test_unique_prefix_resolves() {
    let found = matching_commands("stat");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name, "status");
    assert_eq!(parse_line("onl"), Ok(Some(ShellCommand::Online)));
  }

  #[test]
  fn test_ambiguous_prefix_is_reported() {
    let err = parse_line("o").unwrap_err();
    assert!(err.starts_with("Ambiguous command: o"));
    assert!(err.contains("online") && err.contains("offline"));
  }

  #[test]
  fn test_parse_set_keeps_value_whitespace() {
    let parsed = parse_line(r#"set starcity_stock [{"name": "Screen A"}]"#).unwrap();
    assert_eq!(
      parsed,
      Some(ShellCommand::Set {
        key: "starcity_stock".to_string(),
        value: r#"[{"name": "Screen A"}]"#.to_string(),
      })
    );
  }

  #[test]
  fn test_parse_errors() {
    assert!(parse_line("get").is_err());
    assert!(parse_line("set starcity_stock").is_err());
    assert!(parse_line("frobnicate").is_err());
    assert_eq!(parse_line("   "), Ok(None));
  }

  #[test]
  fn test_parse_aliases() {
    assert_eq!(
      parse_line("g starcity_users"),
      Ok(Some(ShellCommand::Get("starcity_users".to_string())))
    );
    assert_eq!(parse_line("exit"), Ok(Some(ShellCommand::Quit)));
    assert_eq!(parse_line("down"), Ok(Some(ShellCommand::Offline)));
  }
}
