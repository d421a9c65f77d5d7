//! Console command parsing.
//!
//! Lines are split on whitespace; double quotes group a value that contains
//! spaces. Record fields are given as `field=value` pairs.

use catalog_core::{CreateRecordInput, RecordId, RecordStatus, UpdateRecordInput};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    List,
    Add(CreateRecordInput),
    Edit { id: RecordId, input: UpdateRecordInput },
    Toggle(RecordId),
    Delete(RecordId),
    Stats,
    Refresh,
    Resubscribe,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("Unknown command: {0} (try `help`)")]
    Unknown(String),
    #[error("{command} needs {argument}")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },
    #[error("Invalid {argument}: {reason}")]
    InvalidArgument { argument: String, reason: String },
    #[error("Unterminated quote")]
    UnterminatedQuote,
}

pub const HELP: &str = "\
commands:
  list                                   show the current records
  add name=<name> price=<n> [status=<active|inactive>] [category=<c>] [stock=<n>]
  edit <id> [name=..] [price=..] [status=..] [category=..] [stock=..]
  toggle <id>                            flip active/inactive
  delete <id>
  stats                                  aggregate statistics
  refresh                                refetch the list
  resubscribe                            reopen the live subscription
  quit";

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<Command>, CommandError> {
    let tokens = tokenize(line)?;
    let Some((head, args)) = tokens.split_first() else {
        return Ok(None);
    };

    let command = match head.to_lowercase().as_str() {
        "list" | "ls" => Command::List,
        "add" | "new" => Command::Add(parse_create(args)?),
        "edit" => {
            let (id, rest) = split_id("edit", args)?;
            Command::Edit {
                id,
                input: parse_update(rest)?,
            }
        }
        "toggle" => Command::Toggle(split_id("toggle", args)?.0),
        "delete" | "rm" => Command::Delete(split_id("delete", args)?.0),
        "stats" => Command::Stats,
        "refresh" => Command::Refresh,
        "resubscribe" => Command::Resubscribe,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

fn tokenize(line: &str) -> Result<Vec<String>, CommandError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;

    for c in line.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    tokens.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if in_quotes {
        return Err(CommandError::UnterminatedQuote);
    }
    if has_token {
        tokens.push(current);
    }
    Ok(tokens)
}

fn split_id<'a>(
    command: &'static str,
    args: &'a [String],
) -> Result<(RecordId, &'a [String]), CommandError> {
    match args.split_first() {
        Some((id, rest)) if !id.contains('=') => Ok((RecordId::new(id.as_str()), rest)),
        _ => Err(CommandError::MissingArgument {
            command,
            argument: "a record id",
        }),
    }
}

fn pairs(args: &[String]) -> Result<Vec<(String, &str)>, CommandError> {
    args.iter()
        .map(|arg| match arg.split_once('=') {
            Some((field, value)) => Ok((field.to_lowercase(), value)),
            None => Err(CommandError::InvalidArgument {
                argument: arg.clone(),
                reason: "expected field=value".to_string(),
            }),
        })
        .collect()
}

fn invalid(field: &str, reason: impl ToString) -> CommandError {
    CommandError::InvalidArgument {
        argument: field.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_price(value: &str) -> Result<f64, CommandError> {
    value.parse::<f64>().map_err(|err| invalid("price", err))
}

fn parse_stock(value: &str) -> Result<u64, CommandError> {
    value.parse::<u64>().map_err(|err| invalid("stock", err))
}

fn parse_status(value: &str) -> Result<RecordStatus, CommandError> {
    value.parse::<RecordStatus>().map_err(|err| invalid("status", err))
}

fn parse_create(args: &[String]) -> Result<CreateRecordInput, CommandError> {
    let mut name = None;
    let mut price = None;
    let mut input = CreateRecordInput::new("", 0.0);

    for (field, value) in pairs(args)? {
        match field.as_str() {
            "name" => name = Some(value.to_string()),
            "price" => price = Some(parse_price(value)?),
            "status" => input.status = parse_status(value)?,
            "category" => input.category = Some(value.to_string()),
            "stock" => input.stock = Some(parse_stock(value)?),
            other => return Err(invalid(other, "unknown field")),
        }
    }

    // name validity is checked by the gateway; only presence is syntax
    input.name = name.ok_or(CommandError::MissingArgument {
        command: "add",
        argument: "name=<name>",
    })?;
    input.price = price.ok_or(CommandError::MissingArgument {
        command: "add",
        argument: "price=<n>",
    })?;
    Ok(input)
}

fn parse_update(args: &[String]) -> Result<UpdateRecordInput, CommandError> {
    let mut input = UpdateRecordInput::default();
    for (field, value) in pairs(args)? {
        match field.as_str() {
            "name" => input.name = Some(value.to_string()),
            "price" => input.price = Some(parse_price(value)?),
            "status" => input.status = Some(parse_status(value)?),
            "category" => input.category = Some(value.to_string()),
            "stock" => input.stock = Some(parse_stock(value)?),
            other => return Err(invalid(other, "unknown field")),
        }
    }
    Ok(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_line_is_ignored() {
        assert_eq!(parse_line("   ").unwrap(), None);
    }

    #[test]
    fn test_add_with_quoted_name() {
        let command = parse_line(r#"add name="Blue Widget" price=9.99 category=tools stock=3"#)
            .unwrap()
            .unwrap();
        let Command::Add(input) = command else {
            panic!("expected add, got {command:?}");
        };
        assert_eq!(input.name, "Blue Widget");
        assert_eq!(input.price, 9.99);
        assert_eq!(input.status, RecordStatus::Active);
        assert_eq!(input.category.as_deref(), Some("tools"));
        assert_eq!(input.stock, Some(3));
    }

    #[test]
    fn test_add_requires_price() {
        assert_eq!(
            parse_line("add name=Widget").unwrap_err(),
            CommandError::MissingArgument {
                command: "add",
                argument: "price=<n>",
            }
        );
    }

    #[test]
    fn test_edit_collects_fields() {
        let command = parse_line("edit 42 price=12.5 status=inactive").unwrap().unwrap();
        assert_eq!(
            command,
            Command::Edit {
                id: RecordId::new("42"),
                input: UpdateRecordInput {
                    price: Some(12.5),
                    status: Some(RecordStatus::Inactive),
                    ..UpdateRecordInput::default()
                },
            }
        );
    }

    #[test]
    fn test_edit_without_fields_parses_to_empty_update() {
        let Some(Command::Edit { input, .. }) = parse_line("edit 42").unwrap() else {
            panic!("expected edit");
        };
        assert!(input.is_empty());
    }

    #[test]
    fn test_id_commands() {
        assert_eq!(
            parse_line("toggle abc").unwrap(),
            Some(Command::Toggle(RecordId::new("abc")))
        );
        assert_eq!(
            parse_line("rm abc").unwrap(),
            Some(Command::Delete(RecordId::new("abc")))
        );
        assert!(matches!(
            parse_line("delete").unwrap_err(),
            CommandError::MissingArgument { command: "delete", .. }
        ));
    }

    #[test]
    fn test_bad_values() {
        assert!(matches!(
            parse_line("add name=x price=cheap").unwrap_err(),
            CommandError::InvalidArgument { .. }
        ));
        assert!(matches!(
            parse_line("edit 1 status=archived").unwrap_err(),
            CommandError::InvalidArgument { .. }
        ));
        assert_eq!(
            parse_line("add name=\"x price=1").unwrap_err(),
            CommandError::UnterminatedQuote
        );
        assert!(matches!(parse_line("frobnicate").unwrap_err(), CommandError::Unknown(_)));
    }
}
