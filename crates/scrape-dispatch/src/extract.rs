use scraper::{Html, Selector};
use url::Url;

/// Concatenates visible text nodes, collapsing runs of whitespace the way a
/// reader would expect a "page text" field to read.
pub fn extract_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let text: String = document.root_element().text().collect::<Vec<_>>().join(" ");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn extract_links(html: &str, base_url: Option<&str>) -> Vec<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]").expect("static selector is valid");
    resolve_attr(&document, &selector, "href", base_url)
}

pub fn extract_images(html: &str, base_url: Option<&str>) -> Vec<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("img[src]").expect("static selector is valid");
    resolve_attr(&document, &selector, "src", base_url)
}

fn resolve_attr(document: &Html, selector: &Selector, attr: &str, base_url: Option<&str>) -> Vec<String> {
    let base = base_url.and_then(|u| Url::parse(u).ok());

    document
        .select(selector)
        .filter_map(|el| el.value().attr(attr))
        .filter_map(|raw| match &base {
            Some(base) => base.join(raw).ok().map(|u| u.to_string()),
            None => Some(raw.to_string()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_text_collapses_whitespace() {
        let html = "<html><body>  <p>Hello</p>\n<p>World</p>  </body></html>";
        assert_eq!(extract_text(html), "Hello World");
    }

    #[test]
    fn extract_links_resolves_relative_urls() {
        let html = r#"<a href="/about">About</a><a href="https://other.example/x">X</a>"#;
        let links = extract_links(html, Some("https://example.com/page"));
        assert_eq!(
            links,
            vec![
                "https://example.com/about".to_string(),
                "https://other.example/x".to_string(),
            ]
        );
    }

    #[test]
    fn extract_images_without_base_keeps_raw_src() {
        let html = r#"<img src="/logo.png">"#;
        assert_eq!(extract_images(html, None), vec!["/logo.png".to_string()]);
    }
}
