use std::path::Path;

use anyhow::Context;
use tokio::fs::read_to_string;

/// HTML-escape a string so user-supplied values can never inject markup.
pub fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Substitute every literal `{name}` token with its bound value.
///
/// Substitution is raw: callers escape user-supplied values (via
/// [`html_escape`]) before binding them, and bind pre-built HTML fragments
/// as-is.
pub fn render(template: &str, bindings: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (name, value) in bindings {
        out = out.replace(&format!("{{{name}}}"), value);
    }
    out
}

/// Load a template from the templates directory and render it.
///
/// Templates are re-read on every request so edits take effect live.
pub async fn render_file(
    template_dir: &Path,
    name: &str,
    bindings: &[(&str, &str)],
) -> anyhow::Result<String> {
    let path = template_dir.join(name);
    let text = read_to_string(&path)
        .await
        .with_context(|| format!("failed to read template {}", path.display()))?;
    Ok(render(&text, bindings))
}
