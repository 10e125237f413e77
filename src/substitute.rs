//! Variable substitution for job command lines and shortcut fields
//!
//! `$NAME` and `${NAME}` are replaced by install variables. Unbraced names
//! start with a letter and continue with letters, digits, `_`, `.` or `-`.
//! `${ENV[NAME]}` reads the process environment (empty when unset).
//! References to undefined variables are copied through unchanged.

use crate::install_data::InstallContext;

/// Expands variable references against an install context.
pub struct VariableSubstitutor<'a> {
    ctx: &'a dyn InstallContext,
}

impl<'a> VariableSubstitutor<'a> {
    pub fn new(ctx: &'a dyn InstallContext) -> Self {
        Self { ctx }
    }

    /// Substitute every resolvable reference in `input`.
    pub fn substitute(&self, input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        let mut chars = input.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '$' {
                out.push(c);
                continue;
            }

            if chars.peek() == Some(&'{') {
                chars.next();
                let mut name = String::new();
                let mut closed = false;
                for n in chars.by_ref() {
                    if n == '}' {
                        closed = true;
                        break;
                    }
                    name.push(n);
                }
                let value = if closed && !name.is_empty() {
                    self.lookup(&name, true)
                } else {
                    None
                };
                match value {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push_str("${");
                        out.push_str(&name);
                        if closed {
                            out.push('}');
                        }
                    }
                }
                continue;
            }

            let mut name = String::new();
            while let Some(&n) = chars.peek() {
                let accepted = n.is_ascii_alphabetic()
                    || (!name.is_empty() && (n.is_ascii_digit() || matches!(n, '_' | '.' | '-')));
                if !accepted {
                    break;
                }
                name.push(n);
                chars.next();
            }
            let value = if name.is_empty() { None } else { self.lookup(&name, false) };
            match value {
                Some(value) => out.push_str(&value),
                None => {
                    out.push('$');
                    out.push_str(&name);
                }
            }
        }
        out
    }

    /// Substitute each element of a list.
    pub fn substitute_all<S: AsRef<str>>(&self, items: &[S]) -> Vec<String> {
        items.iter().map(|item| self.substitute(item.as_ref())).collect()
    }

    fn lookup(&self, name: &str, braced: bool) -> Option<String> {
        if braced {
            if let Some(env) = name.strip_prefix("ENV[").and_then(|rest| rest.strip_suffix(']')) {
                return Some(std::env::var(env).unwrap_or_default());
            }
        }
        let value = self.ctx.variable(name);
        if value.is_none() {
            log::debug!("Variable '{}' is undefined, left as is", name);
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::install_data::InstallData;

    fn data() -> InstallData {
        InstallData::new()
            .with_variable("INSTALL_PATH", "/opt/app")
            .with_variable("APP_NAME", "Demo")
            .with_variable("app.version", "1.2")
    }

    #[test]
    fn test_plain_and_braced_references() {
        let data = data();
        let subst = VariableSubstitutor::new(&data);
        assert_eq!(subst.substitute("$INSTALL_PATH/bin"), "/opt/app/bin");
        assert_eq!(subst.substitute("${APP_NAME}Launcher"), "DemoLauncher");
        assert_eq!(subst.substitute("v$app.version"), "v1.2");
    }

    #[test]
    fn test_undefined_references_are_kept() {
        let data = data();
        let subst = VariableSubstitutor::new(&data);
        assert_eq!(subst.substitute("$MISSING/x"), "$MISSING/x");
        assert_eq!(subst.substitute("${MISSING}/x"), "${MISSING}/x");
        assert_eq!(subst.substitute("${unterminated"), "${unterminated");
    }

    #[test]
    fn test_lone_dollar_signs() {
        let data = data();
        let subst = VariableSubstitutor::new(&data);
        assert_eq!(subst.substitute("cost: 5$"), "cost: 5$");
        assert_eq!(subst.substitute("$1 and $"), "$1 and $");
        assert_eq!(subst.substitute("${}"), "${}");
    }

    #[test]
    fn test_environment_reference() {
        let data = data();
        let subst = VariableSubstitutor::new(&data);
        assert_eq!(subst.substitute("${ENV[WIZARD_PANELS_SURELY_UNSET]}x"), "x");
        if let Ok(path) = std::env::var("PATH") {
            assert_eq!(subst.substitute("${ENV[PATH]}"), path);
        }
    }

    #[test]
    fn test_substitute_all() {
        let data = data();
        let subst = VariableSubstitutor::new(&data);
        let argv = subst.substitute_all(&["$INSTALL_PATH/bin/tool", "--name=${APP_NAME}"]);
        assert_eq!(argv, vec!["/opt/app/bin/tool", "--name=Demo"]);
    }
}
