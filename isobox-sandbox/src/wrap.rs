//! Turns caller code into a self-contained worker module.
//!
//! The module's default export has a `fetch(request, env, ctx)` handler that
//! runs the caller's script once and answers with a JSON `ExecutionResult`.
//! Script code is spliced in as statements of an async function. Module code
//! goes through [`sanitize_for_embedding`] and is compiled with
//! `new Function` inside a template literal, since direct `eval` is not
//! available on execution hosts.

use std::fmt::Write as _;

use crate::capability::INIT_FUNCTION;
use crate::detect::{has_top_level_return, starts_with_statement, trailing_line_comment};
use crate::sanitize::sanitize_for_embedding;
use crate::error::SandboxError;
use crate::validate::Validator;
use crate::Result;

/// Built-ins whose prototypes are frozen before caller code runs
pub const FROZEN_PROTOTYPES: [&str; 6] = ["Object", "Array", "Function", "String", "Number", "Boolean"];

/// Console methods replaced while capture is active
pub const CAPTURED_CONSOLE_LEVELS: [&str; 5] = ["log", "error", "warn", "info", "debug"];

/// Options controlling the generated module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrapOptions {
    /// Record console calls and return them with the result
    pub capture_console: bool,

    /// Turn a script without a top-level `return` into `return (<script>)`
    pub auto_return: bool,

    /// Capability prelude from [`crate::capability::generate_capability_source`]
    pub capability_source: String,

    /// Binding names removed from the `env` caller code sees; capabilities
    /// are reachable only through their proxies
    pub hidden_bindings: Vec<String>,
}

impl Default for WrapOptions {
    fn default() -> Self {
        Self {
            capture_console: true,
            auto_return: true,
            capability_source: String::new(),
            hidden_bindings: Vec::new(),
        }
    }
}

impl WrapOptions {
    pub fn with_capture_console(mut self, enabled: bool) -> Self {
        self.capture_console = enabled;
        self
    }

    pub fn with_auto_return(mut self, enabled: bool) -> Self {
        self.auto_return = enabled;
        self
    }

    pub fn with_capability_source(mut self, source: impl Into<String>) -> Self {
        self.capability_source = source.into();
        self
    }

    pub fn with_hidden_bindings<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hidden_bindings = names.into_iter().map(Into::into).collect();
        self
    }
}

/// Generated worker module source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedModule(String);

impl WrappedModule {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_source(self) -> String {
        self.0
    }
}

impl std::fmt::Display for WrappedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Script body with auto-return applied when asked for.
fn script_body(script: &str, auto_return: bool) -> String {
    if auto_return && !has_top_level_return(script) && !starts_with_statement(script) {
        // A trailing line comment would swallow the closing paren.
        let code = match trailing_line_comment(script) {
            Some(at) => &script[..at],
            None => script,
        };
        let expression = code.trim_end().trim_end_matches(';').trim_end();
        format!("return ({})", expression)
    } else {
        script.to_string()
    }
}

fn indent(code: &str, prefix: &str) -> String {
    let mut out = String::with_capacity(code.len() + 16);
    for line in code.lines() {
        if !line.is_empty() {
            out.push_str(prefix);
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

const HELPERS: &str = r#"function __isoboxErrorMessage(error) {
  if (error && typeof error.message === 'string') {
    return error.message;
  }
  return String(error);
}

function __isoboxRespond(status, payload) {
  return new Response(JSON.stringify(payload), {
    status,
    headers: { 'Content-Type': 'application/json' },
  });
}
"#;

fn console_install(out: &mut String, pad: &str) {
    let levels: Vec<String> = CAPTURED_CONSOLE_LEVELS
        .iter()
        .map(|level| format!("'{}'", level))
        .collect();
    let _ = writeln!(out, "{pad}const __levels = [{}];", levels.join(", "));
    let _ = writeln!(out, "{pad}const __originalConsole = {{}};");
    let _ = writeln!(out, "{pad}for (const level of __levels) {{");
    let _ = writeln!(out, "{pad}  __originalConsole[level] = console[level];");
    let _ = writeln!(
        out,
        "{pad}  console[level] = (...args) => {{ __logs.push([level, ...args]); }};"
    );
    let _ = writeln!(out, "{pad}}}");
}

fn console_restore(out: &mut String, pad: &str) {
    let _ = writeln!(out, "{pad}for (const level of __levels) {{");
    let _ = writeln!(out, "{pad}  console[level] = __originalConsole[level];");
    let _ = writeln!(out, "{pad}}}");
}

fn freeze_prototypes(out: &mut String, pad: &str) {
    for builtin in FROZEN_PROTOTYPES {
        let _ = writeln!(out, "{pad}Object.freeze({}.prototype);", builtin);
    }
}

/// Shallow copy of `env` without the binding objects.
fn caller_env_helper(out: &mut String, hidden: &[String]) -> Result<()> {
    let names = serde_json::to_string(hidden)?;
    let _ = writeln!(out, "function __isoboxCallerEnv(env) {{");
    out.push_str("  const visible = Object.assign({}, env);\n");
    let _ = writeln!(out, "  for (const name of {names}) {{");
    out.push_str("    delete visible[name];\n  }\n  return visible;\n}\n\n");
    Ok(())
}

/// Validate and wrap caller code into a worker module.
///
/// Fails with the validator's error before any source is generated.
pub fn wrap_module(
    validator: &Validator,
    script: &str,
    module: Option<&str>,
    options: &WrapOptions,
) -> Result<WrappedModule> {
    validator.validate_script(script)?;
    validator.validate_module(module)?;

    let module = module.filter(|code| !code.is_empty());
    let capture = options.capture_console;
    let body = script_body(script, options.auto_return);
    let mut out = String::with_capacity(script.len() + options.capability_source.len() + 2048);

    if !options.capability_source.is_empty() {
        out.push_str(&options.capability_source);
        out.push('\n');
    }
    out.push_str(HELPERS);
    out.push('\n');
    let caller_env = if options.hidden_bindings.is_empty() {
        "env"
    } else {
        caller_env_helper(&mut out, &options.hidden_bindings)?;
        "__isoboxCallerEnv(env)"
    };

    // Runs the caller's code once. Console shims live only inside the
    // try/finally around the call.
    let logs_param = if capture { ", __logs" } else { "" };
    let _ = writeln!(out, "async function __isoboxInvoke(env{logs_param}) {{");
    if capture {
        console_install(&mut out, "  ");
    }
    out.push_str("  try {\n");
    freeze_prototypes(&mut out, "    ");
    if let Some(module_code) = module {
        out.push_str("    const __module = { exports: {} };\n");
        out.push_str("    const __moduleFactory = new Function('module', 'exports', `");
        out.push_str(&sanitize_for_embedding(module_code));
        out.push_str("`);\n");
        out.push_str("    __moduleFactory(__module, __module.exports);\n");
    }
    out.push_str("    const __result = await (async () => {\n");
    out.push_str(&indent(&body, "      "));
    out.push_str("    })();\n");
    out.push_str("    const __payload = { result: __result };\n");
    if module.is_some() {
        out.push_str("    __payload.exports = __module.exports;\n");
    }
    if capture {
        out.push_str("    __payload.console = __logs;\n");
    }
    out.push_str("    return __payload;\n");
    out.push_str("  } finally {\n");
    if capture {
        console_restore(&mut out, "    ");
    }
    out.push_str("  }\n}\n\n");

    out.push_str("export default {\n  async fetch(request, env, ctx) {\n");
    let _ = writeln!(out, "    if (typeof {INIT_FUNCTION} === 'function') {{");
    let _ = writeln!(out, "      {INIT_FUNCTION}(env);");
    out.push_str("    }\n");
    if capture {
        out.push_str("    const __logs = [];\n");
    }
    out.push_str("    try {\n");
    let _ = writeln!(
        out,
        "      return __isoboxRespond(200, await __isoboxInvoke({caller_env}{logs_param}));"
    );
    out.push_str("    } catch (error) {\n");
    out.push_str("      const __failure = { error: __isoboxErrorMessage(error) };\n");
    if capture {
        out.push_str("      __failure.console = __logs;\n");
    }
    out.push_str("      return __isoboxRespond(500, __failure);\n");
    out.push_str("    }\n  },\n};\n");

    Ok(WrappedModule(out))
}

/// Validate and wrap code for the simple path: no module, no capabilities,
/// synchronous execution inside an immediately-invoked function.
pub fn wrap_simple(validator: &Validator, code: &str, capture_console: bool) -> Result<WrappedModule> {
    validator.validate_script(code)?;

    let body = script_body(code, true);
    let mut out = String::with_capacity(code.len() + 1024);
    out.push_str(HELPERS);
    out.push('\n');

    out.push_str("export default {\n  async fetch(request, env, ctx) {\n");
    if capture_console {
        out.push_str("    const __logs = [];\n");
        console_install(&mut out, "    ");
    }
    out.push_str("    try {\n");
    out.push_str("      const __result = (function () {\n");
    out.push_str(&indent(&body, "        "));
    out.push_str("      })();\n");
    out.push_str("      const __payload = { result: __result };\n");
    if capture_console {
        out.push_str("      __payload.console = __logs;\n");
    }
    out.push_str("      return __isoboxRespond(200, __payload);\n");
    out.push_str("    } catch (error) {\n");
    out.push_str("      const __failure = { error: __isoboxErrorMessage(error) };\n");
    if capture_console {
        out.push_str("      __failure.console = __logs;\n");
    }
    out.push_str("      return __isoboxRespond(500, __failure);\n");
    out.push_str("    }");
    if capture_console {
        out.push_str(" finally {\n");
        console_restore(&mut out, "      ");
        out.push_str("    }");
    }
    out.push_str("\n  },\n};\n");

    Ok(WrappedModule(out))
}

/// [`wrap_module`] on tokio's blocking pool.
///
/// Syntax checkers may build a whole isolate and the source scans are
/// proportional to the code size, so neither runs on an async worker thread.
pub async fn wrap_module_blocking(
    validator: Validator,
    script: String,
    module: Option<String>,
    options: WrapOptions,
) -> Result<WrappedModule> {
    tokio::task::spawn_blocking(move || wrap_module(&validator, &script, module.as_deref(), &options))
        .await
        .map_err(|e| SandboxError::Runtime(format!("Wrapping task failed: {}", e)))?
}

/// [`wrap_simple`] on tokio's blocking pool.
pub async fn wrap_simple_blocking(
    validator: Validator,
    code: String,
    capture_console: bool,
) -> Result<WrappedModule> {
    tokio::task::spawn_blocking(move || wrap_simple(&validator, &code, capture_console))
        .await
        .map_err(|e| SandboxError::Runtime(format!("Wrapping task failed: {}", e)))?
}
