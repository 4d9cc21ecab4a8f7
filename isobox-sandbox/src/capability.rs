//! Generated JavaScript that exposes service bindings to caller code.
//!
//! Caller code sees plain proxy objects (`ai`, `db`, ...). Every method call
//! on a proxy becomes `POST .../rpc/<method>` with `{ args }` against the
//! binding, which answers `{ success, data, error }`. The binding object
//! itself stays inside a closure.
//!
//! Bindings only exist inside a live invocation, so the generated code
//! defines an initializer that the wrapped module calls with `env`.

use regex::Regex;
use std::sync::OnceLock;

use crate::types::BindingMap;

/// Binding name that switches to gateway mode
pub const RPC_BINDING: &str = "RPC";

/// Capability globals every wrapped module can reference
pub const WELL_KNOWN_CAPABILITIES: [&str; 9] = [
    "ai", "api", "db", "mcp", "pipeline", "user", "on", "send", "every",
];

/// Global holding every gateway proxy
pub const CAPABILITY_NAMESPACE: &str = "$";

/// Name of the generated initializer
pub const INIT_FUNCTION: &str = "__isoboxInitCapabilities";

const RPC_ORIGIN: &str = "https://rpc.internal";
const SERVICE_ORIGIN: &str = "https://service.internal";

/// How capabilities will be exposed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityMode {
    /// One `RPC` binding fronts every well-known capability
    Gateway,
    /// One proxy per named binding
    PerService(Vec<String>),
    /// Nothing bound; globals are `null`
    None,
}

pub fn capability_mode(bindings: &BindingMap) -> CapabilityMode {
    if bindings.contains_key(RPC_BINDING) {
        CapabilityMode::Gateway
    } else if bindings.is_empty() {
        CapabilityMode::None
    } else {
        CapabilityMode::PerService(bindings.keys().cloned().collect())
    }
}

const PROXY_FACTORY: &str = r#"function __isoboxCapabilityProxy(binding, label, endpoint) {
  return new Proxy({}, {
    get(_target, method) {
      if (typeof method !== 'string' || method === 'then') {
        return undefined;
      }
      return async (...args) => {
        const response = await binding.fetch(endpoint(method), {
          method: 'POST',
          headers: { 'Content-Type': 'application/json' },
          body: JSON.stringify({ args }),
        });
        const payload = await response.json();
        if (!payload || !payload.success) {
          throw new Error((payload && payload.error) || `${label}.${method} failed`);
        }
        return payload.data;
      };
    },
  });
}
"#;

fn js_string(value: &str) -> String {
    // serde_json string escaping is a valid JS string literal
    serde_json::Value::String(value.to_string()).to_string()
}

fn js_name_list() -> String {
    let names: Vec<String> = WELL_KNOWN_CAPABILITIES
        .iter()
        .map(|name| js_string(name))
        .collect();
    format!("[{}]", names.join(", "))
}

fn js_identifier() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").expect("static regex is valid"))
}

/// Global name for a per-service binding: drop `_SERVICE`, lower-case.
pub fn service_global_name(binding: &str) -> String {
    binding
        .strip_suffix("_SERVICE")
        .unwrap_or(binding)
        .to_lowercase()
}

/// Generate the capability prelude for a wrapped module.
pub fn generate_capability_source(bindings: &BindingMap) -> String {
    match capability_mode(bindings) {
        CapabilityMode::Gateway => gateway_source(),
        CapabilityMode::PerService(names) => per_service_source(&names),
        CapabilityMode::None => null_source(),
    }
}

fn gateway_source() -> String {
    let mut src = String::from("// capabilities: RPC gateway\n");
    src.push_str(PROXY_FACTORY);
    src.push_str(&format!(
        r#"let __isoboxCapabilitiesReady = false;
function {init}(env) {{
  if (__isoboxCapabilitiesReady) {{
    return;
  }}
  __isoboxCapabilitiesReady = true;
  const names = {names};
  const gateway = env ? env[{rpc}] : undefined;
  if (gateway == null) {{
    for (const name of names) {{
      globalThis[name] = null;
    }}
    return;
  }}
  const namespace = {{}};
  for (const name of names) {{
    const proxy = __isoboxCapabilityProxy(gateway, name, (method) => `{origin}/rpc/${{name}}.${{method}}`);
    namespace[name] = proxy;
    globalThis[name] = proxy;
  }}
  globalThis[{ns}] = Object.freeze(namespace);
}}
"#,
        init = INIT_FUNCTION,
        names = js_name_list(),
        rpc = js_string(RPC_BINDING),
        origin = RPC_ORIGIN,
        ns = js_string(CAPABILITY_NAMESPACE),
    ));
    src
}

fn per_service_source(bindings: &[String]) -> String {
    let mut src = String::from("// capabilities: per-service bindings\n");
    src.push_str(PROXY_FACTORY);
    src.push_str(&format!("function {}(env) {{\n", INIT_FUNCTION));
    src.push_str("  if (!env) {\n    return;\n  }\n");

    for binding in bindings {
        let global = service_global_name(binding);
        if !js_identifier().is_match(&global) {
            tracing::warn!(binding = %binding, "Skipping binding whose name is not a JS identifier");
            continue;
        }
        let binding_lit = js_string(binding);
        let global_lit = js_string(&global);
        src.push_str(&format!(
            "  if (env[{b}] != null) {{\n    globalThis[{g}] = __isoboxCapabilityProxy(env[{b}], {g}, (method) => `{origin}/rpc/${{method}}`);\n  }}\n",
            b = binding_lit,
            g = global_lit,
            origin = SERVICE_ORIGIN,
        ));
    }

    src.push_str("}\n");
    src
}

fn null_source() -> String {
    format!(
        r#"// WARNING: no capability bindings were provided; capability globals are null.
function {init}(_env) {{
  for (const name of {names}) {{
    globalThis[name] = null;
  }}
}}
"#,
        init = INIT_FUNCTION,
        names = js_name_list(),
    )
}
