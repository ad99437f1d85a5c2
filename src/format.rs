use std::fmt::Write;

use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::system::process::{ProcessInfo, ProcessTreeNode, ProcessTreeSummary};

const COMMAND_WIDTH: usize = 48;

pub fn truncate_unicode(s: &str, max_width: usize) -> String {
    if s.width() <= max_width {
        return s.to_string();
    }
    let mut result = String::new();
    let mut width = 0;
    for ch in s.chars() {
        let ch_width = ch.width().unwrap_or(0);
        if width + ch_width > max_width.saturating_sub(1) {
            result.push('\u{2026}');
            break;
        }
        result.push(ch);
        width += ch_width;
    }
    result
}

pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;
    const GB: u64 = 1024 * 1024 * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.0} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

fn process_line(info: &ProcessInfo) -> String {
    let command = if info.command_line.is_empty() {
        String::new()
    } else {
        format!("  {}", truncate_unicode(&info.command_line, COMMAND_WIDTH))
    };
    format!(
        "{} {} [{}] cpu {:.1}% rss {} threads {}{}",
        info.pid,
        info.name,
        info.status.as_str(),
        info.cpu_percent,
        format_bytes(info.memory_rss_bytes),
        info.thread_count,
        command
    )
}

pub fn render_summary(summary: &ProcessTreeSummary) -> String {
    format!(
        "{} processes, cpu {:.1}%, rss {}, {} threads",
        summary.total_processes,
        summary.total_cpu_percent,
        format_bytes(summary.total_memory_rss_bytes),
        summary.total_threads
    )
}

/// Indented one-line-per-process rendering of a tree.
pub fn render_tree(tree: &ProcessTreeNode) -> String {
    let mut out = String::new();
    let mut stack = vec![(tree, 0usize)];
    while let Some((node, depth)) = stack.pop() {
        let _ = writeln!(out, "{}{}", "  ".repeat(depth), process_line(&node.info));
        stack.extend(node.children.iter().rev().map(|child| (child, depth + 1)));
    }
    out
}

pub fn render_family(processes: &[ProcessInfo]) -> String {
    let mut out = String::new();
    for info in processes {
        let _ = writeln!(out, "{}", process_line(info));
    }
    out
}
