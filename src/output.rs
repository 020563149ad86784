use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;

use crate::error::Result;
use crate::model::{Message, MessageKind, Thread};
use crate::store::hierarchy::TreeNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Json,
    Pretty,
    Minimal,
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

pub fn print_message(message: &Message, format: Format) -> Result<()> {
    match format {
        Format::Json => print_json(message)?,
        Format::Pretty => {
            let id = format!("[{}]", message.id);
            let id = if message.kind == MessageKind::Tombstone {
                id.yellow().bold()
            } else {
                id.magenta().bold()
            };
            println!(
                "{} {} {}",
                id,
                message.author.cyan(),
                format!("in {}", message.home).dimmed()
            );
            println!("  {}", message.body);
            if let Some(ref parent) = message.reply_to {
                println!("  {} {}", "reply to:".dimmed(), parent);
            }
            if message.edit_count > 0 {
                println!(
                    "  {} {} time(s)",
                    "edited:".dimmed(),
                    message.edit_count
                );
            }
            if message.has_reactions() {
                let labels: Vec<String> = message
                    .reactions
                    .iter()
                    .map(|(label, agents)| format!("{label}x{}", agents.len()))
                    .collect();
                println!("  {} {}", "reactions:".dimmed(), labels.join(", "));
            }
            println!("  {}", message.ts.to_rfc3339().dimmed());
        }
        Format::Minimal => println!("{}", minimal_line(message)),
    }
    Ok(())
}

fn minimal_line(message: &Message) -> String {
    format!(
        "{:14} {:12} {:10} {}",
        message.id,
        truncate(&message.home, 12),
        truncate(&message.author, 10),
        truncate(&message.body, 48)
    )
}

pub fn truncate(text: &str, max_len: usize) -> String {
    let first_line = text.lines().next().unwrap_or("");
    if first_line.chars().count() > max_len || first_line.len() < text.len() {
        let truncated: String = first_line.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", truncated)
    } else {
        first_line.to_string()
    }
}

pub fn print_messages(messages: &[Message], format: Format) -> Result<()> {
    match format {
        Format::Json => print_json(messages)?,
        Format::Pretty => {
            if messages.is_empty() {
                println!("{}", "No messages.".dimmed());
            }
            for message in messages {
                print_message(message, Format::Pretty)?;
                println!();
            }
        }
        Format::Minimal => {
            println!("{:14} {:12} {:10} BODY", "ID", "HOME", "AUTHOR");
            println!("{}", "-".repeat(60));
            for message in messages {
                println!("{}", minimal_line(message));
            }
        }
    }
    Ok(())
}

pub fn print_thread(thread: &Thread, path: &str, format: Format) -> Result<()> {
    match format {
        Format::Json => print_json(&serde_json::json!({
            "thread": thread,
            "path": path,
        }))?,
        Format::Pretty => {
            println!(
                "{} {} ({})",
                format!("[{}]", thread.id).magenta().bold(),
                path,
                thread.status
            );
            if let Some(ref anchor) = thread.anchor {
                println!("  {} {}", "anchor:".dimmed(), anchor);
            }
            println!("  {} {}", "created by:".dimmed(), thread.created_by);
        }
        Format::Minimal => println!("{:12} {:10} {}", thread.id, thread.status, path),
    }
    Ok(())
}

pub fn print_tree(nodes: &[TreeNode], format: Format) -> Result<()> {
    match format {
        Format::Json => print_json(nodes)?,
        _ => {
            if nodes.is_empty() {
                println!("{}", "No threads.".dimmed());
            }
            for (i, node) in nodes.iter().enumerate() {
                print_tree_node(node, "", i == nodes.len() - 1, true, format);
            }
        }
    }
    Ok(())
}

fn print_tree_node(node: &TreeNode, prefix: &str, is_last: bool, is_root: bool, format: Format) {
    let connector = if is_root {
        ""
    } else if is_last {
        "\u{2514}\u{2500}\u{2500} "
    } else {
        "\u{251c}\u{2500}\u{2500} "
    };
    match format {
        Format::Minimal => println!("{prefix}{connector}{}", node.thread.name),
        _ => println!(
            "{}{}{} {} ({})",
            prefix,
            connector,
            node.thread.name.bold(),
            format!("[{}]", node.thread.id).dimmed(),
            node.thread.status
        ),
    }

    let child_prefix = if is_root {
        prefix.to_string()
    } else if is_last {
        format!("{}    ", prefix)
    } else {
        format!("{}\u{2502}   ", prefix)
    };
    for (i, child) in node.children.iter().enumerate() {
        let last = i == node.children.len() - 1;
        print_tree_node(child, &child_prefix, last, false, format);
    }
}

/// Print a serializable report: JSON as-is, otherwise one `key: value`
/// line per top-level field.
pub fn print_report<T: Serialize>(report: &T, format: Format) -> Result<()> {
    if format == Format::Json {
        return print_json(report);
    }
    let value = serde_json::to_value(report)?;
    if let serde_json::Value::Object(map) = value {
        for (key, value) in map {
            let rendered = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Null => "-".to_string(),
                other => other.to_string(),
            };
            match format {
                Format::Pretty => println!("{} {}", format!("{key}:").dimmed(), rendered),
                _ => println!("{key}={rendered}"),
            }
        }
    }
    Ok(())
}
