// src/job/template.rs

//! Command template rendering.
//!
//! Supported placeholders: `{job}`, `{workdir}`, `{log}`, `{output}`,
//! `{input}` (first input) and `{inputs}` (all inputs, space separated).
//! Substituted values are shell-quoted; unknown placeholders are left as-is.

/// Values substituted into a command template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateVars {
    pub job: String,
    pub workdir: String,
    pub log: String,
    pub output: Option<String>,
    pub inputs: Vec<String>,
}

impl TemplateVars {
    fn lookup(&self, name: &str) -> Option<String> {
        match name {
            "job" => Some(shell_quote(&self.job)),
            "workdir" => Some(shell_quote(&self.workdir)),
            "log" => Some(shell_quote(&self.log)),
            "output" => Some(self.output.as_deref().map(shell_quote).unwrap_or_default()),
            "input" => Some(self.inputs.first().map(|s| shell_quote(s)).unwrap_or_default()),
            "inputs" => Some(
                self.inputs
                    .iter()
                    .map(|s| shell_quote(s))
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
            _ => None,
        }
    }
}

/// Render `template`, replacing every known `{name}` exactly once.
pub fn render(template: &str, vars: &TemplateVars) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let name = &after[..close];
                match vars.lookup(name) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push('{');
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Quote `s` for a POSIX shell unless it is made of safe characters only.
pub fn shell_quote(s: &str) -> String {
    let safe = !s.is_empty()
        && s.chars().all(|c| {
            c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | ':' | '=' | '@' | '%' | '+' | ',')
        });
    if safe {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}
