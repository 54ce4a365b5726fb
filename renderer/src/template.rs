//! The fixed page template and the render-hook prelude.

/// Document installed into every fresh page: one container element, zero
/// margins, nothing else.
pub const PAGE_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<style>
html, body { margin: 0; padding: 0; }
#container { margin: 0; padding: 0; }
</style>
</head>
<body>
<div id="container"></div>
</body>
</html>"#;

/// Inner markup the container is restored to on a soft reset.
pub const CONTAINER_RESET: &str = "";

/// Renderer-side entry points, evaluated once per page after the library
/// blob. Disables animations globally and installs the hooks each job
/// drives: `setup`, `render`, `destroy`, plus the page-error listener that
/// mirrors errors into the container when display-errors is on.
pub const RENDER_PRELUDE: &str = r#"
(function () {
  'use strict';

  window.__displayErrors = false;

  window.onerror = function (message) {
    if (window.__displayErrors) {
      var container = document.getElementById('container');
      if (container) {
        container.innerText = String(message);
      }
    }
    return true;
  };

  window.__chartRenderer = {
    setup: function () {
      if (typeof Highcharts === 'undefined') {
        return false;
      }
      Highcharts.animObject = function () {
        return { duration: 0 };
      };
      Highcharts.setOptions({
        chart: { animation: false },
        plotOptions: {
          series: {
            animation: false,
            dataLabels: { defer: false }
          }
        }
      });
      return true;
    },

    render: function (config, opts, displayErrors) {
      window.__displayErrors = !!displayErrors;
      if (opts.globalOptions) {
        Highcharts.setOptions(opts.globalOptions);
      }
      if (opts.themeOptions) {
        Highcharts.setOptions(opts.themeOptions);
      }
      if (opts.customCode) {
        eval(opts.customCode);
      }
      var callback;
      if (opts.callback) {
        callback = eval('(' + opts.callback + ')');
      }
      var constr = typeof Highcharts[opts.constr] === 'function' ? opts.constr : 'chart';
      var chart = Highcharts[constr]('container', config, callback);
      return {
        height: chart.chartHeight,
        width: chart.chartWidth
      };
    },

    dimensions: function () {
      var chart = (Highcharts.charts || []).filter(function (c) {
        return c && c.renderTo && c.renderTo.id === 'container';
      })[0];
      if (!chart) {
        return { height: 0, width: 0 };
      }
      return { height: chart.chartHeight, width: chart.chartWidth };
    },

    destroy: function () {
      (Highcharts.charts || []).forEach(function (chart) {
        if (chart && chart.renderTo && chart.renderTo.id === 'container') {
          chart.destroy();
        }
      });
    }
  };
})();
"#;

/// Expression probing that the prelude and library landed.
pub const SETUP_EXPRESSION: &str = "window.__chartRenderer.setup()";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_has_single_container() {
        assert_eq!(PAGE_TEMPLATE.matches("id=\"container\"").count(), 1);
        assert!(PAGE_TEMPLATE.contains("margin: 0"));
    }

    #[test]
    fn test_prelude_disables_animation_and_installs_hooks() {
        assert!(RENDER_PRELUDE.contains("animation: false"));
        assert!(RENDER_PRELUDE.contains("__chartRenderer"));
        assert!(RENDER_PRELUDE.contains("window.onerror"));
    }
}
