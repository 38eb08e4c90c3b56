use tracing::debug;

use crate::browser::{FragmentKind, Page};
use crate::crawler::job::Selector;
use crate::crawler::record::Fields;
use crate::utils::ExtractionDiagnostics;

/// Lines that carry no content on the sites this node is pointed at
pub const NOISE_TOKENS: &[&str] = &["== %0", "⇔"];

/// Collapse element text to one line: trim every line, drop blank and
/// noise lines, join the rest with single spaces.
pub fn normalize_text(raw: &str) -> Option<String> {
    let joined = raw
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty() && !NOISE_TOKENS.contains(line))
        .collect::<Vec<_>>()
        .join(" ");

    if joined.is_empty() {
        None
    } else {
        Some(joined)
    }
}

/// Run every usable selector against the page.
///
/// Each usable selector yields a field, empty when the query failed or
/// matched nothing. Elements that cannot be read are skipped and counted
/// in `diagnostics`.
pub async fn extract(page: &dyn Page, selectors: &[Selector], diagnostics: &mut ExtractionDiagnostics) -> Fields {
    let mut fields = Fields::new();

    for rule in selectors {
        let Some((field, css)) = rule.usable() else {
            continue;
        };

        let kind = if rule.full_html {
            FragmentKind::InnerHtml
        } else {
            FragmentKind::Text
        };

        let fragments = match page.fragments(css, kind).await {
            Ok(fragments) => fragments,
            Err(e) => {
                debug!("Selector {} for field {} failed: {}", css, field, e);
                diagnostics.record(field);
                fields.insert(field, Vec::new());
                continue;
            }
        };

        let mut values = Vec::with_capacity(fragments.len());
        for fragment in fragments {
            let raw = match fragment {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    debug!("Skipping element for field {}: {}", field, e);
                    diagnostics.record(field);
                    continue;
                }
            };

            let value = match kind {
                FragmentKind::Text => normalize_text(&raw),
                FragmentKind::InnerHtml => Some(raw.trim().to_string()).filter(|html| !html.is_empty()),
            };

            if let Some(value) = value {
                values.push(value);
            }
        }

        fields.insert(field, values);
    }

    fields
}
