//! HTML assembly for data plugins.
//!
//! A data response carries template markup and a data map; this service
//! renders the markup with Tera and wraps the result in the device-sized
//! document layout (shared markup) the rasterizer expects. This never runs
//! in the display hot path — only workers assemble documents.

use serde_json::{Map, Value};
use tera::{Context, Tera};

use crate::error::RenderError;

/// Outer document every plugin screen is wrapped in. Kept deliberately
/// plain: e-ink rendering wants high contrast and no webfonts.
const SHARED_LAYOUT: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<style>
  html, body { margin: 0; padding: 0; width: {{ width }}px; height: {{ height }}px; }
  body { font-family: sans-serif; background: #fff; color: #000; }
  .view { padding: 24px; box-sizing: border-box; width: 100%; height: 100%; }
  .label { font-weight: bold; padding-right: 12px; }
</style>
</head>
<body>
{{ content | safe }}
</body>
</html>"#;

pub struct HtmlRenderer;

impl HtmlRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Render plugin markup against its data, then wrap in the layout for
    /// the target geometry.
    pub fn render_document(
        &self,
        template: &str,
        data: &Map<String, Value>,
        width: u32,
        height: u32,
    ) -> Result<String, RenderError> {
        let mut tera = Tera::default();
        register_filters(&mut tera);
        tera.add_raw_template("plugin", template)?;

        let mut context = Context::new();
        for (key, value) in data {
            context.insert(key, value);
        }
        let content = tera.render("plugin", &context)?;

        let mut layout = Tera::default();
        register_filters(&mut layout);
        layout.add_raw_template("layout", SHARED_LAYOUT)?;
        let mut outer = Context::new();
        outer.insert("content", &content);
        outer.insert("width", &width);
        outer.insert("height", &height);
        Ok(layout.render("layout", &outer)?)
    }
}

impl Default for HtmlRenderer {
    fn default() -> Self {
        Self::new()
    }
}

fn register_filters(tera: &mut Tera) {
    // truncate filter with custom length
    tera.register_filter(
        "truncate",
        |value: &tera::Value, args: &std::collections::HashMap<String, tera::Value>| {
            let s = tera::try_get_value!("truncate", "value", String, value);
            let len = args.get("length").and_then(|v| v.as_u64()).unwrap_or(50) as usize;

            if s.len() <= len {
                Ok(tera::Value::String(s))
            } else {
                let truncated = s.chars().take(len.saturating_sub(3)).collect::<String>() + "...";
                Ok(tera::Value::String(truncated))
            }
        },
    );

    // format_time filter: unix seconds -> formatted local string
    tera.register_filter(
        "format_time",
        |value: &tera::Value, args: &std::collections::HashMap<String, tera::Value>| {
            let ts = tera::try_get_value!("format_time", "value", i64, value);
            let fmt = args
                .get("format")
                .and_then(|v| v.as_str())
                .unwrap_or("%H:%M");

            use chrono::{TimeZone, Utc};
            if let Some(dt) = Utc.timestamp_opt(ts, 0).single() {
                Ok(tera::Value::String(dt.format(fmt).to_string()))
            } else {
                Ok(tera::Value::String("--:--".to_string()))
            }
        },
    );
}
