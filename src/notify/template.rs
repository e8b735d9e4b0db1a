//! Message body rendering
//!
//! Templates are plain strings with `{placeholder}` substitution, no
//! conditionals, no loops. Supported placeholders: `{machine}`, `{rule}`,
//! `{parameter}`, `{value}`, `{unit}`, `{threshold}`, `{timestamp}`.
//! Anything else is left in place verbatim.

use chrono::{DateTime, Utc};

/// Used when an action's template is empty
pub const DEFAULT_TEMPLATE: &str =
    "[{rule}] {machine}: {parameter} = {value}{unit} (threshold {threshold}{unit}) at {timestamp}";

/// Values available to a template
///
/// Offline dispatches can be missing the numeric side entirely; absent
/// values render as "n/a" rather than failing the render.
#[derive(Debug, Clone)]
pub struct TemplateContext {
    /// Machine display name, or the id when no display is configured
    pub machine: String,

    pub rule: String,

    pub parameter: Option<String>,

    /// Current reading of the reported parameter
    pub value: Option<f64>,

    pub unit: Option<String>,

    pub threshold: Option<f64>,

    pub timestamp: DateTime<Utc>,
}

/// Substitute the context into the template.
pub fn render(template: &str, ctx: &TemplateContext) -> String {
    let template = if template.trim().is_empty() {
        DEFAULT_TEMPLATE
    } else {
        template
    };

    template
        .replace("{machine}", &ctx.machine)
        .replace("{rule}", &ctx.rule)
        .replace("{parameter}", ctx.parameter.as_deref().unwrap_or("n/a"))
        .replace("{value}", &format_number(ctx.value))
        .replace("{threshold}", &format_number(ctx.threshold))
        .replace("{unit}", ctx.unit.as_deref().unwrap_or(""))
        .replace("{timestamp}", &ctx.timestamp.to_rfc3339())
}

fn format_number(value: Option<f64>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "n/a".to_string(),
    }
}
