use std::io::Write;
use std::path::Path;

use colored::*;
use terminal_size::{Width, Height, terminal_size};

fn rule() -> ColoredString {
    let (width, _) = terminal_size().unwrap_or((Width(80), Height(24)));
    "─".repeat(width.0 as usize).black().bold()
}

/// Session banner shown when the REPL starts.
pub fn print_banner(model: &str, base_url: &str, auth_mode: &str, working_dir: &Path, correlation_id: &str) {
    println!("{}", rule());
    for line in banner_lines(model, base_url, auth_mode, working_dir, correlation_id) {
        println!("{}", line);
    }
    println!("{}", rule());
    println!("  {}", "Type /help for commands, Ctrl+C to interrupt a turn.".black().bold());
}

fn banner_lines(
    model: &str,
    base_url: &str,
    auth_mode: &str,
    working_dir: &Path,
    correlation_id: &str,
) -> Vec<String> {
    let name = "auto-coder".yellow().bold();
    let version = format!("v{}", env!("CARGO_PKG_VERSION")).black().bold();

    vec![
        format!("  {} {}", name, version),
        format!("  {}  •  {}  •  auth: {}", model, base_url, auth_mode).cyan().to_string(),
        format!("  {}", working_dir.to_string_lossy().black().bold()),
        format!("  {} {}", "session".black().bold(), correlation_id.black().bold()),
    ]
}

pub fn print_header(title: &str, subtitle: &str) {
    println!("{}", rule());
    println!("  {}  {}", title.yellow().bold(), subtitle.black().bold());
    println!("{}", rule());
}

pub fn print_step(msg: &str) {
    println!("  {} {}", "•".green(), msg);
}

pub fn print_success(msg: &str) {
    println!("  {} {}", "✓".green().bold(), msg.green());
}

pub fn print_warning(msg: &str) {
    println!("  {} {}", "⚠️ ".yellow().bold(), msg.yellow());
}

pub fn print_error(kind: &str, msg: &str) {
    println!("  {} {} {}", "❌".red().bold(), kind.red().bold(), msg.red());
}

pub fn print_thinking(msg: &str) {
    println!("  {} {}...", "∴".magenta(), msg);
}

/// One line per tool invocation: name and a shortened argument preview.
pub fn print_tool_call(name: &str, arguments: &str, failed: bool) {
    let preview: String = arguments.chars().take(80).collect();
    let marker = if failed { "✗".red().bold() } else { "⚙".blue() };
    println!("  {} {} {}", marker, name.bold(), preview.black().bold());
}

pub fn print_response(content: &str) {
    println!("\n{}\n", content);
}

/// Write streamed assistant text without a line break.
pub fn print_stream_chunk(chunk: &str) {
    print!("{}", chunk);
    let _ = std::io::stdout().flush();
}

/// Explain why a command needs confirmation before the prompt is shown.
pub fn print_dangerous_command(command: &str, reason: &str) {
    println!("  {} {}", "⚠️ ".yellow().bold(), "Dangerous command".yellow().bold());
    println!("    {} {}", "command:".black().bold(), command);
    println!("    {} {}", "reason:".black().bold(), reason.yellow());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_banner_shows_configured_working_dir() {
        let lines = banner_lines(
            "llama3.2",
            "http://localhost:11434/v1",
            "none",
            Path::new("/work/elsewhere"),
            "abc-123",
        );
        let banner = lines.join("\n");

        assert!(banner.contains("/work/elsewhere"));
        assert!(banner.contains("abc-123"));
        assert!(banner.contains("auth: none"));
    }
}
