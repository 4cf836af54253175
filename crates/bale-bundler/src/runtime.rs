//! Bootstrap code synthesis.
//!
//! Chunks register themselves by pushing `[id, modules, startup?]` onto the
//! global `__bale_chunks__` array. The runtime drains that array when it
//! starts and replaces `push` afterwards, so chunk and runtime files may load
//! in any order. Only the helpers a runtime's chunks need are emitted.

use std::collections::BTreeSet;

use crate::codegen::{RuntimeRequirement, with_implied};

/// Global array chunks push themselves onto.
pub const CHUNK_REGISTRY: &str = "__bale_chunks__";

/// Mixed into the etag of every chunk that hosts a runtime.
pub const RUNTIME_FINGERPRINT: &str = "bale-runtime-v1";

const PRELUDE: &str = r#"var __bale_modules__ = {};
var __bale_cache__ = {};
var __bale_installed__ = {};
var __bale_waiting__ = [];
function __bale_require__(id) {
  var cached = __bale_cache__[id];
  if (cached !== undefined) return cached.exports;
  var factory = __bale_modules__[id];
  if (factory === undefined) throw new Error("Cannot find module '" + id + "'");
  var module = (__bale_cache__[id] = { exports: {} });
  factory(module, module.exports, __bale_require__);
  return module.exports;
}
"#;

const DEFINE_EXPORTS: &str = r#"__bale_require__.d = (exports, getters) => {
  for (var key in getters) {
    if (!Object.prototype.hasOwnProperty.call(exports, key)) {
      Object.defineProperty(exports, key, { enumerable: true, get: getters[key] });
    }
  }
};
"#;

const PUBLIC_PATH: &str = "__bale_require__.p = \"\";\n";

const LOAD_CHUNK: &str = r#"__bale_require__.e = (files) => Promise.all(Object.keys(files).map((id) => {
  if (__bale_installed__[id]) return undefined;
  return new Promise((resolve, reject) => {
    __bale_waiting__.push([[id], resolve]);
    var script = document.createElement("script");
    script.src = __bale_require__.p + files[id];
    script.onerror = () => reject(new Error("Loading chunk " + id + " failed"));
    document.head.appendChild(script);
  });
}));
"#;

const INTEROP_REQUIRE: &str = r#"__bale_require__.n = (exports) => {
  if (exports && exports.__esModule) return exports;
  var ns = Object.create(null);
  if (exports) for (var key in exports) ns[key] = exports[key];
  ns.default = exports;
  return ns;
};
"#;

const INJECT_STYLE: &str = r#"__bale_require__.s = (css) => {
  var style = document.createElement("style");
  style.textContent = css;
  document.head.appendChild(style);
};
"#;

const EXTERNAL: &str = r#"__bale_require__.g = (name) => {
  var value = globalThis[name];
  if (value === undefined) throw new Error("External '" + name + "' is not defined");
  return value;
};
"#;

const STARTUP: &str = r#"__bale_require__.x = (chunkIds, entry) => new Promise((resolve) => {
  __bale_waiting__.push([chunkIds, resolve]);
  __bale_flush__();
}).then(() => __bale_require__(entry));
"#;

const REGISTRY: &str = r#"function __bale_flush__() {
  __bale_waiting__ = __bale_waiting__.filter(([ids, resolve]) => {
    if (!ids.every((id) => __bale_installed__[id])) return true;
    resolve();
    return false;
  });
}
function __bale_install__([id, modules, startup]) {
  for (var key in modules) __bale_modules__[key] = modules[key];
  __bale_installed__[id] = true;
  __bale_flush__();
  if (startup) startup(__bale_require__);
}
var __bale_queue__ = (self.__bale_chunks__ = self.__bale_chunks__ || []);
__bale_queue__.forEach(__bale_install__);
__bale_queue__.push = (chunk) => __bale_install__(chunk);
"#;

/// Render the bootstrap for `requirements` and everything they imply.
///
/// Helpers appear in a fixed order, so equal requirement sets render to the
/// same source.
///
/// ```
/// use std::collections::BTreeSet;
/// use bale_bundler::codegen::RuntimeRequirement;
/// use bale_bundler::runtime::render_runtime;
///
/// let source = render_runtime(&BTreeSet::from([RuntimeRequirement::LoadChunk]));
/// assert!(source.contains("__bale_require__.e ="));
/// assert!(source.contains("__bale_require__.p ="));
/// assert!(!source.contains("__bale_require__.s ="));
/// ```
pub fn render_runtime(requirements: &BTreeSet<RuntimeRequirement>) -> String {
    let all = with_implied(requirements);
    let mut source = String::from("(() => {\n");
    source.push_str(PRELUDE);
    for requirement in &all {
        let snippet = match requirement {
            RuntimeRequirement::Require => continue,
            RuntimeRequirement::DefineExports => DEFINE_EXPORTS,
            RuntimeRequirement::LoadChunk => LOAD_CHUNK,
            RuntimeRequirement::PublicPath => PUBLIC_PATH,
            RuntimeRequirement::InteropRequire => INTEROP_REQUIRE,
            RuntimeRequirement::InjectStyle => INJECT_STYLE,
            RuntimeRequirement::External => EXTERNAL,
            RuntimeRequirement::Startup => STARTUP,
        };
        source.push_str(snippet);
    }
    source.push_str(REGISTRY);
    source.push_str("})();\n");
    source
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_runtime_always_has_registry() {
        let source = render_runtime(&BTreeSet::new());
        assert!(source.contains("function __bale_require__(id)"));
        assert!(source.contains("__bale_queue__.push ="));
        assert!(!source.contains("__bale_require__.d ="));
    }

    #[test]
    fn helper_order_does_not_depend_on_insertion() {
        let a = BTreeSet::from([RuntimeRequirement::InjectStyle, RuntimeRequirement::Startup]);
        let b = BTreeSet::from([RuntimeRequirement::Startup, RuntimeRequirement::InjectStyle]);
        assert_eq!(render_runtime(&a), render_runtime(&b));
    }

    #[test]
    fn startup_is_defined_before_the_queue_is_drained() {
        let source = render_runtime(&BTreeSet::from([RuntimeRequirement::Startup]));
        let startup = source.find("__bale_require__.x =").unwrap();
        let drain = source.find("forEach(__bale_install__)").unwrap();
        assert!(startup < drain);
    }
}
