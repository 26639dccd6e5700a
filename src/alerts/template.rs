use std::collections::BTreeMap;

use anyhow::{Context, Result};
use regex::Regex;

pub const SUBJECT_TEMPLATE: &str = "[{level}] System Monitoring Alert - {sitename}";

pub const HTML_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="UTF-8">
<style>
body { font-family: Arial, sans-serif; line-height: 1.6; color: #333; }
table { border-collapse: collapse; }
th, td { padding: 8px; border: 1px solid #dee2e6; }
th { background-color: #f2f2f2; }
.alert-critical { background: #ffebee; border-left: 4px solid #c62828; }
.alert-high { background: #fff3e0; border-left: 4px solid #ef6c00; }
.alert-medium { background: #fff8e1; border-left: 4px solid #f9a825; }
.alert-normal { background: #e8f5e9; border-left: 4px solid #2e7d32; }
</style>
</head>
<body>
<h1>System Status Report - {sitename}</h1>
<p>Overall level: <strong>{level}</strong></p>
<div class="alert-{disk_level_class}">
<h2>Disk Usage</h2>
<p>Total usage: {diskusage} of {quotadisk} ({diskpercent})</p>
<p>Database size: {databasesize}</p>
</div>
<div class="alert-{user_level_class}">
<h2>Daily Users</h2>
<p>Users on {reportdate}: {users} of {userthreshold} ({userpercent})</p>
<p>Users active in the last 24 hours: {users_last_24h}</p>
<p>Highest daily users in the last 90 days: {peak_90d}</p>
</div>
<h2>Recent Daily Users</h2>
{recent_table}
<h2>Top Daily Users</h2>
{top_table}
<p>Courses: {coursescount}</p>
<p><a href="{siteurl}">{siteurl}</a></p>
</body>
</html>
"#;

/// Substitute `{name}` placeholders. Unknown placeholders are left untouched.
pub fn render(template: &str, values: &BTreeMap<&str, String>) -> String {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        output.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        match after.find('}') {
            Some(close) if is_placeholder(&after[..close]) => {
                let name = &after[..close];
                match values.get(name) {
                    Some(value) => output.push_str(value),
                    None => {
                        output.push('{');
                        output.push_str(name);
                        output.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            _ => {
                output.push('{');
                rest = after;
            }
        }
    }

    output.push_str(rest);
    output
}

fn is_placeholder(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Escape text for inclusion in an HTML body.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Two-column HTML table.
pub fn html_table(headers: (&str, &str), rows: &[(String, String)]) -> String {
    let mut table = String::from("<table>\n");
    table.push_str(&format!("<tr><th>{}</th><th>{}</th></tr>\n", escape_html(headers.0), escape_html(headers.1)));
    for (left, right) in rows {
        table.push_str(&format!("<tr><td>{}</td><td>{}</td></tr>\n", escape_html(left), escape_html(right)));
    }
    table.push_str("</table>");
    table
}

/// Plain-text rendition of an HTML body for the alternative mail part.
pub fn html_to_text(html: &str) -> Result<String> {
    let head = Regex::new(r"(?is)<(head|style|script)[^>]*>.*?</(head|style|script)>").context("Failed to compile head pattern")?;
    let cell = Regex::new(r"(?i)</t[dh]>\s*<t[dh][^>]*>").context("Failed to compile cell pattern")?;
    let block = Regex::new(r"(?i)<br\s*/?>|</(p|div|h[1-6]|tr|table|li)>").context("Failed to compile block pattern")?;
    let tag = Regex::new(r"<[^>]+>").context("Failed to compile tag pattern")?;

    let text = head.replace_all(html, "");
    let text = cell.replace_all(&text, " | ");
    let text = block.replace_all(&text, "\n");
    let text = tag.replace_all(&text, "");

    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&amp;", "&");

    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    Ok(lines.join("\n"))
}
