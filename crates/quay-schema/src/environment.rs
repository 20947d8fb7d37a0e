use crate::SchemaError;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

/// Resolved variables, ordered by name.
pub type EnvMap = BTreeMap<String, String>;

/// One `KEY=value` line of an env file. A bare `KEY` line carries no value and is
/// resolved against the surrounding environment by the caller.
pub type EnvEntry = (String, Option<String>);

/// Parse dotenv-style content.
///
/// Supports comments, blank lines, an optional `export ` prefix, double-quoted
/// values with `\n`, `\t`, `\"` and `\\` escapes, literal single-quoted values, and
/// trailing ` #` comments on unquoted values.
pub fn parse_env_str(content: &str, origin: &Path) -> Result<Vec<EnvEntry>, SchemaError> {
    let mut entries = Vec::new();

    for (idx, raw_line) in content.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line).trim_start();

        let (key, value) = match line.split_once('=') {
            Some((k, v)) => (k.trim(), Some(v.trim())),
            None => (line, None),
        };

        if !is_valid_key(key) {
            return Err(SchemaError::EnvFile {
                path: origin.to_path_buf(),
                line: idx + 1,
                reason: format!("invalid variable name '{key}'"),
            });
        }

        let value = match value {
            Some(v) => Some(unquote(v).map_err(|reason| SchemaError::EnvFile {
                path: origin.to_path_buf(),
                line: idx + 1,
                reason,
            })?),
            None => None,
        };
        entries.push((key.to_owned(), value));
    }

    Ok(entries)
}

pub fn read_env_file(path: &Path) -> Result<Vec<EnvEntry>, SchemaError> {
    let content = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_env_str(&content, path)
}

fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

fn unquote(value: &str) -> Result<String, String> {
    if let Some(rest) = value.strip_prefix('"') {
        let Some(end) = rest.rfind('"') else {
            return Err("unterminated double-quoted value".to_owned());
        };
        let mut out = String::with_capacity(end);
        let mut chars = rest[..end].chars();
        while let Some(c) = chars.next() {
            if c != '\\' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('"') => out.push('"'),
                Some('\\') | None => out.push('\\'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
            }
        }
        return Ok(out);
    }

    if let Some(rest) = value.strip_prefix('\'') {
        let Some(end) = rest.rfind('\'') else {
            return Err("unterminated single-quoted value".to_owned());
        };
        return Ok(rest[..end].to_owned());
    }

    let unquoted = match value.find(" #") {
        Some(pos) => &value[..pos],
        None => value,
    };
    Ok(unquoted.trim_end().to_owned())
}

/// Layers variables in precedence order; later layers win.
#[derive(Debug, Default)]
pub struct EnvironmentBuilder {
    vars: EnvMap,
}

impl EnvironmentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an env file. Bare keys take their value from what is already layered
    /// and are skipped when nothing is.
    pub fn layer_file(&mut self, path: &Path) -> Result<&mut Self, SchemaError> {
        for (key, value) in read_env_file(path)? {
            let resolved = value.or_else(|| self.vars.get(&key).cloned());
            if let Some(v) = resolved {
                self.vars.insert(key, v);
            }
        }
        Ok(self)
    }

    pub fn layer_vars<I, K, V>(&mut self, vars: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in vars {
            self.vars.insert(k.into(), v.into());
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn build(self) -> EnvMap {
        self.vars
    }
}

/// Expand `$VAR`, `${VAR}`, `${VAR:-default}`, `${VAR-default}`, `${VAR:+alt}`,
/// `${VAR+alt}`, `${VAR:?message}` and `${VAR?message}` against `env`.
/// `$$` yields a literal `$`. Unset variables without a default expand to an
/// empty string.
pub fn interpolate(input: &str, env: &EnvMap) -> Result<String, SchemaError> {
    if !input.contains('$') {
        return Ok(input.to_owned());
    }

    let mut out = String::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'$' {
            let next = input[i..].find('$').map_or(input.len(), |p| i + p);
            out.push_str(&input[i..next]);
            i = next;
            continue;
        }

        match bytes.get(i + 1) {
            Some(b'$') => {
                out.push('$');
                i += 2;
            }
            Some(b'{') => {
                let close = matching_brace(input, i + 1)
                    .ok_or_else(|| SchemaError::InvalidInterpolation(input.to_owned()))?;
                let expr = &input[i + 2..close];
                out.push_str(&expand_braced(expr, env, input)?);
                i = close + 1;
            }
            Some(c) if c.is_ascii_alphabetic() || *c == b'_' => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len()
                    && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_')
                {
                    end += 1;
                }
                let name = &input[start..end];
                out.push_str(&lookup(name, env));
                i = end;
            }
            _ => {
                out.push('$');
                i += 1;
            }
        }
    }

    Ok(out)
}

fn matching_brace(input: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (offset, c) in input[open..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + offset);
                }
            }
            _ => {}
        }
    }
    None
}

fn expand_braced(expr: &str, env: &EnvMap, whole: &str) -> Result<String, SchemaError> {
    let name_end = expr
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(expr.len());
    let name = &expr[..name_end];
    if name.is_empty() {
        return Err(SchemaError::InvalidInterpolation(whole.to_owned()));
    }
    let rest = &expr[name_end..];
    let value = env.get(name);
    let set_non_empty = value.is_some_and(|v| !v.is_empty());

    let (op, arg) = if let Some(arg) = rest.strip_prefix(":-") {
        (":-", arg)
    } else if let Some(arg) = rest.strip_prefix(":?") {
        (":?", arg)
    } else if let Some(arg) = rest.strip_prefix(":+") {
        (":+", arg)
    } else if let Some(arg) = rest.strip_prefix('-') {
        ("-", arg)
    } else if let Some(arg) = rest.strip_prefix('?') {
        ("?", arg)
    } else if let Some(arg) = rest.strip_prefix('+') {
        ("+", arg)
    } else if rest.is_empty() {
        ("", "")
    } else {
        return Err(SchemaError::InvalidInterpolation(whole.to_owned()));
    };

    match op {
        "" => Ok(lookup(name, env)),
        ":-" if set_non_empty => Ok(value.cloned().unwrap_or_default()),
        ":-" => interpolate(arg, env),
        "-" => match value {
            Some(v) => Ok(v.clone()),
            None => interpolate(arg, env),
        },
        ":+" if set_non_empty => interpolate(arg, env),
        ":+" => Ok(String::new()),
        "+" => match value {
            Some(_) => interpolate(arg, env),
            None => Ok(String::new()),
        },
        ":?" if set_non_empty => Ok(value.cloned().unwrap_or_default()),
        "?" if value.is_some() => Ok(value.cloned().unwrap_or_default()),
        _ => Err(SchemaError::MissingVariable {
            name: name.to_owned(),
            message: interpolate(arg, env)?,
        }),
    }
}

fn lookup(name: &str, env: &EnvMap) -> String {
    if let Some(v) = env.get(name) {
        return v.clone();
    }
    warn!("variable '{name}' is not set, defaulting to a blank string");
    String::new()
}

/// Interpolate every string scalar in a YAML tree in place. Mapping keys are left
/// untouched.
pub fn interpolate_value(value: &mut serde_yaml::Value, env: &EnvMap) -> Result<(), SchemaError> {
    match value {
        serde_yaml::Value::String(s) => {
            *s = interpolate(s, env)?;
        }
        serde_yaml::Value::Sequence(seq) => {
            for item in seq {
                interpolate_value(item, env)?;
            }
        }
        serde_yaml::Value::Mapping(map) => {
            for (_, item) in map.iter_mut() {
                interpolate_value(item, env)?;
            }
        }
        serde_yaml::Value::Tagged(tagged) => interpolate_value(&mut tagged.value, env)?,
        serde_yaml::Value::Null | serde_yaml::Value::Bool(_) | serde_yaml::Value::Number(_) => {}
    }
    Ok(())
}
