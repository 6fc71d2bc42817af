// ABOUTME: ESPI BatchList document rendering for Third Party notifications
// ABOUTME: Lists the resource URIs that changed so the Third Party can fetch them
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

use greenbutton_core::constants::notifications::ESPI_NAMESPACE;
use std::fmt::Write;

/// Render a `BatchList` with one `resources` element per URI
#[must_use]
pub fn render(resources: &[String]) -> String {
    let mut xml = String::with_capacity(96 + resources.iter().map(|r| r.len() + 26).sum::<usize>());
    xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    xml.push('\n');
    // Writing into a String cannot fail
    let _ = writeln!(xml, r#"<BatchList xmlns="{ESPI_NAMESPACE}">"#);
    for resource in resources {
        let _ = writeln!(
            xml,
            "  <resources>{}</resources>",
            html_escape::encode_text(resource)
        );
    }
    xml.push_str("</BatchList>\n");
    xml
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_lists_every_resource() {
        let xml = render(&[
            "https://dc.example.com/espi/1_1/resource/Batch/Subscription/5".to_owned(),
            "https://dc.example.com/espi/1_1/resource/Batch/Subscription/6".to_owned(),
        ]);
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains(r#"<BatchList xmlns="http://naesb.org/espi">"#));
        assert_eq!(xml.matches("<resources>").count(), 2);
        assert!(xml.trim_end().ends_with("</BatchList>"));
    }

    #[test]
    fn test_render_escapes_markup() {
        let xml = render(&["https://dc.example.com/a?x=1&y=<2>".to_owned()]);
        assert!(xml.contains("x=1&amp;y=&lt;2&gt;"));
    }
}
