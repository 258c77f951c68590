//! Instrumentation injected at the top of every preview document.
//!
//! The preamble forwards `console.*` calls, uncaught errors and unhandled
//! rejections to the host window, tracks dependency script loading, and
//! implements element selection mode. Everything it posts follows the
//! message vocabulary in [`crate::protocol`].

use crate::protocol::{HOST_SOURCE, PROTOCOL_VERSION, SANDBOX_SOURCE};

/// Marker placed right before the preamble; a document carrying it is
/// already instrumented.
pub const INSTRUMENT_MARKER: &str = "<!-- lumina-instrumentation -->";

/// Global the preamble installs its hooks on.
pub const GLOBAL: &str = "__lumina";

/// The preamble body (without the surrounding `<script>` element).
///
/// `%NAME%` placeholders are substituted by [`preamble`].
const PREAMBLE_TEMPLATE: &str = r#"(function () {
  'use strict';
  var SOURCE = '%SANDBOX_SOURCE%', HOST = '%HOST_SOURCE%', VERSION = %VERSION%;
  function post(type, payload) {
    var msg = payload || {};
    msg.type = type;
    msg.source = SOURCE;
    msg.version = VERSION;
    try { window.parent.postMessage(msg, '*'); } catch (_) {}
  }
  function lineFromStack(stack, depth) {
    if (!stack) return null;
    var frames = String(stack).split('\n').filter(function (l) { return /:\d+:\d+/.test(l); });
    var frame = frames[depth] || frames[frames.length - 1];
    var m = frame && frame.match(/:(\d+):\d+\)?\s*$/);
    return m ? parseInt(m[1], 10) : null;
  }
  function describe(value) {
    if (value instanceof Error) return value.stack || (value.name + ': ' + value.message);
    if (typeof value === 'string') return value;
    try { return JSON.stringify(value); } catch (_) { return String(value); }
  }
  ['log', 'info', 'warn', 'error', 'debug'].forEach(function (level) {
    var original = console[level];
    console[level] = function () {
      var args = Array.prototype.slice.call(arguments);
      post('CONSOLE_LOG', {
        level: level,
        message: args.map(describe).join(' '),
        line: lineFromStack(new Error().stack, 1)
      });
      if (original) original.apply(console, args);
    };
  });
  window.addEventListener('error', function (e) {
    if (e.target && e.target !== window) return;
    post('CONSOLE_LOG', {
      level: 'error',
      message: e.error ? describe(e.error) : String(e.message),
      line: e.lineno || lineFromStack(e.error && e.error.stack, 0)
    });
  });
  window.addEventListener('unhandledrejection', function (e) {
    var reason = e.reason;
    post('CONSOLE_LOG', {
      level: 'error',
      message: 'Unhandled rejection: ' + describe(reason),
      line: lineFromStack(reason && reason.stack, 0)
    });
  });

  var deps = { expected: 0, settled: 0, failures: [] };
  function settle() {
    deps.settled += 1;
    if (deps.settled < deps.expected) return;
    if (deps.failures.length) post('DEP_LOAD_ERROR', { failures: deps.failures });
    else post('DEP_LOAD_COMPLETE');
  }

  var selecting = false, hovered = null;
  function selectorFor(el) {
    if (el.id) return '#' + el.id;
    var parts = [];
    while (el && el.nodeType === 1 && el !== document.body) {
      var part = el.tagName.toLowerCase();
      var parent = el.parentElement;
      if (parent) {
        var same = Array.prototype.filter.call(parent.children, function (c) { return c.tagName === el.tagName; });
        if (same.length > 1) part += ':nth-of-type(' + (same.indexOf(el) + 1) + ')';
      }
      parts.unshift(part);
      el = parent;
    }
    return parts.length ? 'body > ' + parts.join(' > ') : 'body';
  }
  function stylesFor(el) {
    var cs = window.getComputedStyle(el), out = {};
    ['color', 'background-color', 'font-size', 'font-weight', 'font-family', 'margin',
     'padding', 'border', 'border-radius', 'display', 'width', 'height'].forEach(function (p) {
      out[p] = cs.getPropertyValue(p);
    });
    return out;
  }
  function highlight(el) {
    if (hovered) hovered.style.outline = hovered.__luminaOutline || '';
    hovered = el;
    if (el) { el.__luminaOutline = el.style.outline; el.style.outline = '2px solid #6366f1'; }
  }
  document.addEventListener('mouseover', function (e) { if (selecting) highlight(e.target); }, true);
  document.addEventListener('click', function (e) {
    if (!selecting) return;
    e.preventDefault();
    e.stopPropagation();
    post(e.altKey ? 'ELEMENT_SELECTED_FOR_EDIT' : 'ELEMENT_SELECTED_FOR_CHAT', {
      selector: selectorFor(e.target),
      styles: stylesFor(e.target)
    });
  }, true);
  window.addEventListener('message', function (e) {
    var d = e.data;
    if (!d || d.source !== HOST || d.version !== VERSION) return;
    if (d.type === 'TOGGLE_SELECTION_MODE') {
      selecting = !!d.active;
      if (!selecting) highlight(null);
    }
  });

  window.%GLOBAL% = {
    expectDependencies: function (count) {
      deps.expected = count;
      post('DEP_LOAD_START', { count: count });
    },
    depLoaded: function () { settle(); },
    depFailed: function (el) {
      deps.failures.push({ name: el.getAttribute('data-lumina-dependency'), url: el.src });
      settle();
    }
  };
})();"#;

/// The preamble script body with protocol constants filled in.
pub fn preamble() -> String {
    PREAMBLE_TEMPLATE
        .replace("%SANDBOX_SOURCE%", SANDBOX_SOURCE)
        .replace("%HOST_SOURCE%", HOST_SOURCE)
        .replace("%VERSION%", &PROTOCOL_VERSION.to_string())
        .replace("%GLOBAL%", GLOBAL)
}

/// `onload`/`onerror` attributes reporting a dependency script's outcome.
pub fn dependency_handlers() -> String {
    format!(
        r#" onload="{g}.depLoaded(this)" onerror="{g}.depFailed(this)""#,
        g = GLOBAL
    )
}

/// Inline call announcing how many dependency scripts follow.
pub fn expect_dependencies(count: usize) -> String {
    format!("{}.expectDependencies({});", GLOBAL, count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preamble_substitutions() {
        let script = preamble();
        for placeholder in ["%SANDBOX_SOURCE%", "%HOST_SOURCE%", "%VERSION%", "%GLOBAL%"] {
            assert!(!script.contains(placeholder), "{placeholder} left in preamble");
        }
        assert!(script.contains("'lumina-sandbox'"));
        assert!(script.contains("'lumina-host'"));
        assert!(script.contains("VERSION = 1"));
        assert!(script.contains("window.__lumina ="));
    }

    #[test]
    fn test_preamble_cannot_close_its_element() {
        assert!(!preamble().to_ascii_lowercase().contains("</script"));
    }
}
