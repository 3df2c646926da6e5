//! Filename and caption edits.

use crate::settings::Settings;

/// Apply the filename find/replace rule, if any.
pub fn apply_filename_edit(settings: &Settings, name: &str) -> String {
    match &settings.filename {
        Some(rule) if !rule.find.is_empty() => name.replace(&rule.find, &rule.replace),
        _ => name.to_string(),
    }
}

/// Apply the caption find/replace rule, then append the extra caption.
pub fn apply_caption_edits(settings: &Settings, caption: &str) -> String {
    let mut out = match &settings.caption {
        Some(rule) if !rule.find.is_empty() => caption.replace(&rule.find, &rule.replace),
        _ => caption.to_string(),
    };

    if let Some(extra) = settings.extra_caption.as_deref().filter(|e| !e.is_empty()) {
        if out.is_empty() {
            out.push_str(extra);
        } else {
            out.push_str("\n\n");
            out.push_str(extra);
        }
    }

    out
}
